use std::{fmt::Debug, future::Future};

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{AllocationError, CopyError, DeviceResolutionError, DispatchError},
    num::Scalar,
    ops::{BinaryOp, Kernel},
    work::{WorkDiv, WorkDivPolicy},
};

pub use cpu::{Cpu, CpuBuilder, HostBuffer};
pub use gpu::{Gpu, GpuBuffer, GpuBuilder};

pub mod cpu;
pub mod gpu;
pub mod shader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceKind {
    #[display("host")]
    Host,
    #[display("gpu")]
    Gpu,
}

/// Marker for unique accelerator instances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceInstance;

/// Identifies one device identity. Two resolutions of the same accelerator
/// index are distinct devices with distinct handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DeviceId {
    #[display("host:{_0}")]
    Host(u32),
    #[display("gpu:{index}#{instance}")]
    Gpu {
        index: u32,
        instance: uid::Id<DeviceInstance>,
    },
}

impl DeviceId {
    #[inline]
    pub fn index(&self) -> u32 {
        match *self {
            DeviceId::Host(index) => index,
            DeviceId::Gpu { index, .. } => index,
        }
    }

    /// Returns `true` if memory on this device is directly readable by the host.
    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self, DeviceId::Host(_))
    }
}

/// How a device schedules the units of a work division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parallelism {
    /// Units run one after another on a single thread.
    Serial,
    /// Units are spread over a thread pool.
    Threads,
    /// Units are invocations of a compute shader.
    Workgroups,
}

/// A compute device and the capabilities the vector layer consumes from it.
///
/// Operations returning futures are driven by a [`Queue`](crate::queue::Queue) worker;
/// they complete on the device's timeline, which may lag behind the future until
/// [`Device::synchronize`] resolves.
pub trait Device: Debug + Clone + Send + Sync + 'static {
    /// Memory holding `T`s owned by this device.
    type Buffer<T: Scalar>: Debug + Clone + Send + Sync + 'static;

    /// Resolves the device with the given index.
    fn resolve(index: u32) -> impl Future<Output = Result<Self, DeviceResolutionError>> + Send;

    fn id(&self) -> DeviceId;

    fn parallelism(&self) -> Parallelism;

    /// Policy used to derive work divisions for dispatches without an explicit one.
    fn policy(&self) -> WorkDivPolicy;

    /// Allocates zeroed memory for `len` elements.
    fn allocate<T: Scalar>(&self, len: usize) -> Result<Self::Buffer<T>, AllocationError>;

    /// Reads the whole buffer back into host memory.
    fn download<T: Scalar>(
        &self,
        buffer: &Self::Buffer<T>,
    ) -> impl Future<Output = Result<Box<[T]>, CopyError>> + Send;

    /// Overwrites the whole buffer with host data of the same length.
    fn upload<T: Scalar>(
        &self,
        buffer: &Self::Buffer<T>,
        data: Box<[T]>,
    ) -> impl Future<Output = Result<(), CopyError>> + Send;

    /// Copies between two buffers of this device.
    fn copy<T: Scalar>(
        &self,
        src: &Self::Buffer<T>,
        dst: &Self::Buffer<T>,
    ) -> impl Future<Output = Result<(), CopyError>> + Send;

    /// Checks, before anything is submitted, that `kernel` can produce `T`s on this device.
    fn check_launch<T: Scalar, K: Kernel<T>>(&self, _kernel: &K) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Checks, before anything is submitted, that `op` can run on `T`s on this device.
    fn check_transform<T: Scalar, Op: BinaryOp<T>>(&self, _op: &Op) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Runs `kernel` over `output`, one element per index.
    fn launch<T: Scalar, K: Kernel<T>>(
        &self,
        div: WorkDiv,
        kernel: K,
        output: &Self::Buffer<T>,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Writes `op(lhs[i], rhs[i])` into `output[i]` for every index.
    fn transform<T: Scalar, Op: BinaryOp<T>>(
        &self,
        div: WorkDiv,
        lhs: &Self::Buffer<T>,
        rhs: &Self::Buffer<T>,
        output: &Self::Buffer<T>,
        op: Op,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Resolves once all work handed to the device so far has completed.
    fn synchronize(&self) -> impl Future<Output = ()> + Send;
}

/// A device whose buffers the host may read and write directly.
pub trait HostDevice: Device {
    fn memory<T: Scalar>(buffer: &Self::Buffer<T>) -> &HostBuffer<T>;
}

/// How a copy between two devices is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPath {
    /// Both buffers live on the same device.
    Direct,
    /// Data travels through host memory.
    Staged,
}

/// Decides whether a queue on `queue` can copy from `src` to `dst`.
pub fn copy_path(src: DeviceId, dst: DeviceId, queue: DeviceId) -> Result<CopyPath, CopyError> {
    if queue != src && queue != dst {
        return Err(CopyError::QueueMismatch { queue, src, dst });
    }
    match (src, dst) {
        (src, dst) if src == dst => Ok(CopyPath::Direct),
        (src, dst) if src.is_host() || dst.is_host() => Ok(CopyPath::Staged),
        (src, dst) => Err(CopyError::NoPeerPath { src, dst }),
    }
}

#[cfg(test)]
mod tests {
    use super::{CopyPath, DeviceId, copy_path};
    use crate::error::CopyError;

    fn gpu(index: u32) -> DeviceId {
        DeviceId::Gpu {
            index,
            instance: uid::Id::new(),
        }
    }

    #[test]
    fn test_copy_path() {
        let host = DeviceId::Host(0);
        let x = gpu(0);
        let y = gpu(1);

        assert_eq!(copy_path(host, host, host).unwrap(), CopyPath::Direct);
        assert_eq!(copy_path(x, x, x).unwrap(), CopyPath::Direct);
        assert_eq!(copy_path(x, host, x).unwrap(), CopyPath::Staged);
        assert_eq!(copy_path(host, x, x).unwrap(), CopyPath::Staged);
        assert_eq!(copy_path(x, host, host).unwrap(), CopyPath::Staged);

        assert!(matches!(
            copy_path(x, y, x),
            Err(CopyError::NoPeerPath { .. })
        ));
        assert!(matches!(
            copy_path(x, host, y),
            Err(CopyError::QueueMismatch { .. })
        ));
    }

    #[test]
    fn test_instances_are_distinct() {
        let x = gpu(0);
        let y = gpu(0);
        assert_ne!(x, y);
        assert_eq!(x.index(), y.index());
        assert!(!x.is_host());
        assert_eq!(DeviceId::Host(0).to_string(), "host:0");
    }
}
