//! Device-resident vectors with queued element-wise transforms.
//!
//! A [`Runner`] bundles a [`Device`] with the [`Queue`]s work is submitted through.
//! [`Vector`]s live in memory owned by one device; [`combine`] allocates a new vector
//! and submits the element-wise application of a [`BinaryOp`] onto a queue. Results
//! stay on the device until they are copied into a host vector and the queue has been
//! waited on.
//!
//! ```no_run
//! # async fn demo() -> Result<(), weft::Error> {
//! use weft::{Cpu, Iota, QueueKind, Runner, Vector, WorkDiv, launch, sum};
//!
//! let mut runner = Runner::<Cpu>::from_id(0, QueueKind::NonBlocking).await?;
//! let device = runner.device().clone();
//! let queue = runner.create_queue();
//!
//! let mut a = Vector::<u32, _>::new(&device, 5)?;
//! launch(queue, WorkDiv::new(5, 1), Iota, &mut a).await?;
//! let c = sum(&a, &a, queue).await?;
//! queue.wait().await?;
//! assert_eq!(c.to_string(), "{0, 2, 4, 6, 8}");
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod num;
pub mod ops;
pub mod platform;
pub mod queue;
pub mod runner;
pub mod vector;
pub mod work;

pub use device::{
    Cpu, CpuBuilder, Device, DeviceId, DeviceKind, Gpu, GpuBuilder, HostDevice, Parallelism,
};
pub use error::Error;
pub use num::{Arithmetic, DataType, Scalar};
pub use ops::{
    BinaryOp, Difference, Fill, Iota, Kernel, Maximum, Minimum, Product, Sum, combine,
    combine_with, launch, sum,
};
pub use queue::{Queue, QueueKind};
pub use runner::Runner;
pub use vector::Vector;
pub use work::{WorkDiv, WorkDivPolicy};
