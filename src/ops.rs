//! Element-wise operations and their dispatch onto queues.

use std::borrow::Cow;

use crate::{
    device::Device,
    error::{DispatchError, Error},
    num::{Arithmetic, Scalar},
    queue::Queue,
    vector::Vector,
    work::WorkDiv,
};

/// A binary operation applied element by element.
///
/// Every op has a host form. An op that also provides a WGSL expression over the
/// operands `a` and `b` can run on an accelerator.
pub trait BinaryOp<T>: Clone + Send + Sync + 'static {
    fn apply(&self, a: T, b: T) -> T;

    /// The operation as a WGSL expression over `a` and `b`.
    fn wgsl(&self) -> Option<Cow<'static, str>> {
        None
    }
}

/// Closures are host-only operations.
impl<T, F> BinaryOp<T> for F
where
    F: Fn(T, T) -> T + Clone + Send + Sync + 'static,
{
    #[inline]
    fn apply(&self, a: T, b: T) -> T {
        self(a, b)
    }
}

macro_rules! impl_binary_op {
    ($name:ident, $f:ident, $wgsl:literal) => {
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name;

        impl<T: Arithmetic> BinaryOp<T> for $name {
            #[inline]
            fn apply(&self, a: T, b: T) -> T {
                a.$f(b)
            }

            fn wgsl(&self) -> Option<Cow<'static, str>> {
                Some(Cow::Borrowed($wgsl))
            }
        }
    };
}

impl_binary_op!(Sum, add, "a + b");
impl_binary_op!(Difference, sub, "a - b");
impl_binary_op!(Product, mul, "a * b");
impl_binary_op!(Maximum, max, "max(a, b)");
impl_binary_op!(Minimum, min, "min(a, b)");

/// Produces the element at each index of its output.
pub trait Kernel<T>: Clone + Send + Sync + 'static {
    fn element(&self, index: usize) -> T;

    /// The kernel as a WGSL expression over the `u32` index `i`, yielding a `ty`.
    fn wgsl(&self, _ty: &str) -> Option<String> {
        None
    }
}

/// Closures are host-only kernels.
impl<T, F> Kernel<T> for F
where
    F: Fn(usize) -> T + Clone + Send + Sync + 'static,
{
    #[inline]
    fn element(&self, index: usize) -> T {
        self(index)
    }
}

/// Writes each element's own index: `v[i] = i`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iota;

impl<T: Scalar> Kernel<T> for Iota {
    #[inline]
    fn element(&self, index: usize) -> T {
        T::from_index(index)
    }

    fn wgsl(&self, ty: &str) -> Option<String> {
        Some(format!("{ty}(i)"))
    }
}

/// Writes the same value everywhere.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Fill<T>(pub T);

impl<T: Scalar> Kernel<T> for Fill<T> {
    #[inline]
    fn element(&self, _index: usize) -> T {
        self.0
    }

    fn wgsl(&self, ty: &str) -> Option<String> {
        let bits: u32 = bytemuck::try_cast(self.0).ok()?;
        Some(format!("bitcast<{ty}>({bits}u)"))
    }
}

fn check_operands<T: Scalar, D: Device>(
    a: &Vector<T, D>,
    b: &Vector<T, D>,
    queue: &Queue<D>,
) -> Result<(), DispatchError> {
    if a.len() != b.len() {
        return Err(DispatchError::LengthMismatch {
            lhs: a.len(),
            rhs: b.len(),
        });
    }
    if a.device_id() != b.device_id() {
        return Err(DispatchError::DeviceMismatch {
            lhs: a.device_id(),
            rhs: b.device_id(),
        });
    }
    if queue.device_id() != a.device_id() {
        return Err(DispatchError::QueueMismatch {
            queue: queue.device_id(),
            device: a.device_id(),
        });
    }
    Ok(())
}

/// Allocates a vector holding `op(a[i], b[i])` and submits its computation onto `queue`,
/// partitioned by the device's [`WorkDivPolicy`](crate::work::WorkDivPolicy).
///
/// On a non-blocking queue the result is only valid after [`Queue::wait`].
pub async fn combine<T, D, Op>(
    a: &Vector<T, D>,
    b: &Vector<T, D>,
    queue: &Queue<D>,
    op: Op,
) -> Result<Vector<T, D>, Error>
where
    T: Scalar,
    D: Device,
    Op: BinaryOp<T>,
{
    check_operands(a, b, queue)?;
    let div = a.device().policy().for_len(a.len())?;
    combine_with(a, b, queue, div, op).await
}

/// Like [`combine`], with an explicit work division.
pub async fn combine_with<T, D, Op>(
    a: &Vector<T, D>,
    b: &Vector<T, D>,
    queue: &Queue<D>,
    div: WorkDiv,
    op: Op,
) -> Result<Vector<T, D>, Error>
where
    T: Scalar,
    D: Device,
    Op: BinaryOp<T>,
{
    check_operands(a, b, queue)?;
    div.check(a.len())?;
    a.device().check_transform::<T, _>(&op)?;

    let output = Vector::new(a.device(), a.len())?;
    let device = a.device().clone();
    let (x, y, z) = (a.buffer().clone(), b.buffer().clone(), output.buffer().clone());
    log::debug!("combine {} elements on {} with {div}", a.len(), device.id());

    queue
        .submit(async move {
            device
                .transform(div, &x, &y, &z, op)
                .await
                .map_err(Error::from)
        })
        .await?;
    Ok(output)
}

/// Element-wise sum of two vectors.
#[inline]
pub async fn sum<T, D>(
    a: &Vector<T, D>,
    b: &Vector<T, D>,
    queue: &Queue<D>,
) -> Result<Vector<T, D>, Error>
where
    T: Arithmetic,
    D: Device,
{
    combine(a, b, queue, Sum).await
}

/// Submits `kernel` onto `queue`, writing `output[i] = kernel(i)` for every index.
pub async fn launch<T, D, K>(
    queue: &Queue<D>,
    div: WorkDiv,
    kernel: K,
    output: &mut Vector<T, D>,
) -> Result<(), Error>
where
    T: Scalar,
    D: Device,
    K: Kernel<T>,
{
    if queue.device_id() != output.device_id() {
        return Err(DispatchError::QueueMismatch {
            queue: queue.device_id(),
            device: output.device_id(),
        }
        .into());
    }
    div.check(output.len())?;
    output.device().check_launch::<T, _>(&kernel)?;

    let device = output.device().clone();
    let buffer = output.buffer().clone();
    log::debug!("launch over {} elements on {} with {div}", output.len(), device.id());

    queue
        .submit(async move {
            device
                .launch(div, kernel, &buffer)
                .await
                .map_err(Error::from)
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use half::f16;
    use itertools::Itertools;

    use super::{BinaryOp, Fill, Iota, Kernel, Maximum, Minimum, Product, combine, combine_with, launch, sum};
    use crate::{
        device::{Cpu, CpuBuilder, Device},
        error::{self, DispatchError},
        queue::{Queue, QueueKind},
        vector::Vector,
        work::{WorkDiv, WorkDivPolicy},
    };

    #[test]
    fn test_host_forms() {
        assert_eq!(BinaryOp::<u32>::apply(&Product, u32::MAX, 2), u32::MAX - 1);
        assert_eq!(BinaryOp::<f32>::apply(&Maximum, -1.0, 2.0), 2.0);
        assert_eq!(BinaryOp::<i32>::apply(&Minimum, -1, 2), -1);
        assert_eq!(Kernel::<f16>::element(&Iota, 3), f16::from_f32(3.0));
        assert_eq!(Kernel::<u8>::element(&Iota, 257), 1);
        assert_eq!(Fill(1.0f32).wgsl("f32").as_deref(), Some("bitcast<f32>(1065353216u)"));
        assert_eq!(Fill(f16::ONE).wgsl("f16"), None);

        let op = |a: u32, b: u32| a * 10 + b;
        assert_eq!(op.apply(1, 2), 12);
        assert_eq!(BinaryOp::<u32>::wgsl(&op), None);
    }

    #[tokio::test]
    async fn test_sum() -> Result<(), Box<dyn Error>> {
        for kind in [QueueKind::Blocking, QueueKind::NonBlocking] {
            let cpu = Cpu::new(0)?;
            let queue = Queue::new(cpu.clone(), kind);

            let mut a = Vector::<u32, _>::new(&cpu, 5)?;
            let mut b = Vector::<u32, _>::new(&cpu, 5)?;
            launch(&queue, WorkDiv::new(5, 1), Iota, &mut a).await?;
            launch(&queue, WorkDiv::new(1, 5), Iota, &mut b).await?;

            let c = sum(&a, &b, &queue).await?;
            queue.wait().await?;
            assert_eq!(c.len(), 5);
            assert_eq!(c.to_vec(), vec![0, 2, 4, 6, 8]);
            assert_eq!(c.to_string(), "{0, 2, 4, 6, 8}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_dispatches() -> Result<(), Box<dyn Error>> {
        let cpu = CpuBuilder::new(0).work_div(WorkDivPolicy::new(3)).build()?;
        let queue = Queue::new(cpu.clone(), QueueKind::NonBlocking);

        let len = 1000;
        let mut a = Vector::<i32, _>::new(&cpu, len)?;
        launch(&queue, WorkDiv::covering(len, 7)?, Iota, &mut a).await?;
        let b = combine(&a, &a, &queue, Product).await?;
        let c = combine(&b, &a, &queue, |x: i32, y: i32| x - y).await?;
        queue.wait().await?;

        let r#ref = (0..len as i32).map(|x| x * x - x).collect_vec();
        assert_eq!(c.to_vec(), r#ref);
        Ok(())
    }

    #[tokio::test]
    async fn test_random_transforms() -> Result<(), Box<dyn Error>> {
        let cpu = Cpu::new(0)?;
        let queue = Queue::new(cpu.clone(), QueueKind::NonBlocking);

        for _ in 0..20 {
            let len = fastrand::usize(0..2000);
            let x = (0..len).map(|_| fastrand::f32()).collect_vec();
            let y = (0..len).map(|_| fastrand::f32()).collect_vec();
            let a = Vector::from_slice(&cpu, &x)?;
            let b = Vector::from_slice(&cpu, &y)?;

            let elems = fastrand::usize(1..100);
            let div = WorkDiv::new(len.div_ceil(elems) + fastrand::usize(0..3), elems);
            let c = combine_with(&a, &b, &queue, div, Maximum).await?;
            queue.wait().await?;

            let r#ref = x.iter().zip_eq(&y).map(|(x, y)| x.max(*y)).collect_vec();
            assert_eq!(c.to_vec(), r#ref);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rejections() -> Result<(), Box<dyn Error>> {
        let cpu = Cpu::new(0)?;
        let queue = Queue::new(cpu.clone(), QueueKind::Blocking);
        let a = Vector::<f32, _>::new(&cpu, 5)?;
        let b = Vector::<f32, _>::new(&cpu, 4)?;

        let err = sum(&a, &b, &queue).await;
        assert!(matches!(
            err,
            Err(error::Error::Dispatch(DispatchError::LengthMismatch { lhs: 5, rhs: 4 }))
        ));

        let err = combine_with(&a, &a, &queue, WorkDiv::new(2, 2), Minimum).await;
        assert!(matches!(
            err,
            Err(error::Error::Dispatch(DispatchError::WorkDiv { len: 5, .. }))
        ));

        let mut c = Vector::<f32, _>::new(&cpu, 5)?;
        let err = launch(&queue, WorkDiv::new(1, 0), Fill(1.0), &mut c).await;
        assert!(matches!(err, Err(error::Error::Dispatch(DispatchError::WorkDiv { .. }))));
        assert_eq!(cpu.id(), c.device_id());
        Ok(())
    }
}
