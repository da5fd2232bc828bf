use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Device, DeviceId, DeviceKind, HostDevice, Parallelism};
use crate::{
    error::{AllocationError, CopyError, DeviceResolutionError, DispatchError},
    num::Scalar,
    ops::{BinaryOp, Kernel},
    platform,
    work::{WorkDiv, WorkDivPolicy},
};

/// Number of host devices. The host is a single device.
pub const HOST_DEVICE_COUNT: usize = 1;

/// Default number of elements each host unit processes.
pub const HOST_ELEMS_PER_THREAD: usize = 256;

/// Host memory shared between a vector and the work items referencing it.
#[derive(Debug, Clone)]
pub struct HostBuffer<T> {
    data: Arc<RwLock<Box<[T]>>>,
    len: usize,
}

impl<T: Scalar> HostBuffer<T> {
    pub fn new(data: Box<[T]>) -> Self {
        let len = data.len();
        let data = Arc::new(RwLock::new(data));
        Self { data, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[T]>> {
        self.data.read().expect("failed to lock")
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[T]>> {
        self.data.write().expect("failed to lock")
    }

    /// Returns `true` if both handles refer to the same memory.
    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// The host CPU. Its parallelism strategy is fixed when the crate is built:
/// threaded with the `rayon` feature, serial without.
#[derive(Debug, Clone)]
pub struct Cpu {
    index: u32,
    policy: WorkDivPolicy,
}

impl Cpu {
    /// Resolves the host device with default configuration.
    #[inline]
    pub fn new(index: u32) -> Result<Self, DeviceResolutionError> {
        CpuBuilder::new(index).build()
    }
}

#[derive(Debug, Clone)]
pub struct CpuBuilder {
    pub index: u32,
    pub policy: WorkDivPolicy,
}

impl CpuBuilder {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            policy: WorkDivPolicy::new(HOST_ELEMS_PER_THREAD),
        }
    }

    pub fn work_div(mut self, policy: WorkDivPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Cpu, DeviceResolutionError> {
        let Self { index, policy } = self;
        if index as usize >= HOST_DEVICE_COUNT {
            return Err(DeviceResolutionError::NotFound {
                kind: DeviceKind::Host,
                index,
                count: HOST_DEVICE_COUNT,
            });
        }
        log::debug!("resolved host:{index} with {policy:?}");
        Ok(Cpu { index, policy })
    }
}

impl Device for Cpu {
    type Buffer<T: Scalar> = HostBuffer<T>;

    async fn resolve(index: u32) -> Result<Self, DeviceResolutionError> {
        Self::new(index)
    }

    #[inline]
    fn id(&self) -> DeviceId {
        DeviceId::Host(self.index)
    }

    #[inline]
    fn parallelism(&self) -> Parallelism {
        match cfg!(feature = "rayon") {
            true => Parallelism::Threads,
            false => Parallelism::Serial,
        }
    }

    #[inline]
    fn policy(&self) -> WorkDivPolicy {
        self.policy
    }

    fn allocate<T: Scalar>(&self, len: usize) -> Result<HostBuffer<T>, AllocationError> {
        let size = len
            .checked_mul(T::DATA_TYPE.size())
            .ok_or(AllocationError::Extent { len })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| AllocationError::OutOfMemory {
                device: self.id(),
                size,
            })?;
        data.resize(len, T::zero());
        Ok(HostBuffer::new(data.into_boxed_slice()))
    }

    async fn download<T: Scalar>(&self, buffer: &HostBuffer<T>) -> Result<Box<[T]>, CopyError> {
        Ok(buffer.read().clone())
    }

    async fn upload<T: Scalar>(&self, buffer: &HostBuffer<T>, data: Box<[T]>) -> Result<(), CopyError> {
        if data.len() != buffer.len() {
            return Err(CopyError::LengthMismatch {
                src: data.len(),
                dst: buffer.len(),
            });
        }
        buffer.write().copy_from_slice(&data);
        Ok(())
    }

    async fn copy<T: Scalar>(&self, src: &HostBuffer<T>, dst: &HostBuffer<T>) -> Result<(), CopyError> {
        if src.same(dst) {
            return Ok(());
        }
        // snapshot first: never hold one buffer's lock while waiting for another's
        let data = src.read().clone();
        self.upload(dst, data).await
    }

    async fn launch<T: Scalar, K: Kernel<T>>(
        &self,
        div: WorkDiv,
        kernel: K,
        output: &HostBuffer<T>,
    ) -> Result<(), DispatchError> {
        div.check(output.len())?;
        let output = output.clone();

        let execute = move || {
            #[cfg(not(feature = "rayon"))]
            serial::launch(div, &kernel, &mut output.write());
            #[cfg(feature = "rayon")]
            threads::launch(div, &kernel, &mut output.write());
        };
        platform::spawn_blocking(execute)
            .await
            .map_err(|err| DispatchError::Rejected(err.to_string()))
    }

    async fn transform<T: Scalar, Op: BinaryOp<T>>(
        &self,
        div: WorkDiv,
        lhs: &HostBuffer<T>,
        rhs: &HostBuffer<T>,
        output: &HostBuffer<T>,
        op: Op,
    ) -> Result<(), DispatchError> {
        let len = output.len();
        for input in [lhs, rhs] {
            if input.len() != len {
                return Err(DispatchError::LengthMismatch {
                    lhs: input.len(),
                    rhs: len,
                });
            }
            if input.same(output) {
                return Err(DispatchError::Rejected(
                    "output buffer aliases an input".into(),
                ));
            }
        }
        div.check(len)?;

        let (lhs, rhs, output) = (lhs.clone(), rhs.clone(), output.clone());
        let execute = move || {
            let x = lhs.read();
            let y = (!lhs.same(&rhs)).then(|| rhs.read());
            let y: &[T] = match &y {
                Some(y) => y,
                None => &x,
            };

            #[cfg(not(feature = "rayon"))]
            serial::transform(div, &x, y, &mut output.write(), &op);
            #[cfg(feature = "rayon")]
            threads::transform(div, &x, y, &mut output.write(), &op);
        };

        platform::spawn_blocking(execute)
            .await
            .map_err(|err| DispatchError::Rejected(err.to_string()))
    }

    async fn synchronize(&self) {}
}

impl HostDevice for Cpu {
    #[inline]
    fn memory<T: Scalar>(buffer: &HostBuffer<T>) -> &HostBuffer<T> {
        buffer
    }
}

/// Runs the units of a division one after another.
///
/// Callers guarantee that all slices share one length and that `div` covers it.
#[cfg_attr(feature = "rayon", allow(dead_code))]
mod serial {
    use crate::{
        num::Scalar,
        ops::{BinaryOp, Kernel},
        work::WorkDiv,
    };

    pub fn launch<T: Scalar, K: Kernel<T>>(div: WorkDiv, kernel: &K, output: &mut [T]) {
        let len = output.len();
        for thread in 0..div.threads {
            let Some(range) = div.range(thread, len) else {
                break;
            };
            for index in range {
                // SAFETY: `range` is clipped to `len`.
                unsafe { *output.get_unchecked_mut(index) = kernel.element(index) };
            }
        }
    }

    pub fn transform<T: Scalar, Op: BinaryOp<T>>(
        div: WorkDiv,
        lhs: &[T],
        rhs: &[T],
        output: &mut [T],
        op: &Op,
    ) {
        let len = output.len();
        assert!(lhs.len() == len && rhs.len() == len);
        for thread in 0..div.threads {
            let Some(range) = div.range(thread, len) else {
                break;
            };
            for index in range {
                // SAFETY: `range` is clipped to `len`, the length of all three slices.
                unsafe {
                    let (x, y) = (*lhs.get_unchecked(index), *rhs.get_unchecked(index));
                    *output.get_unchecked_mut(index) = op.apply(x, y);
                }
            }
        }
    }
}

/// Runs the units of a division on the rayon pool. Chunk `t` is unit `t`'s range.
#[cfg(any(feature = "rayon", test))]
mod threads {
    use rayon::prelude::*;

    use crate::{
        num::Scalar,
        ops::{BinaryOp, Kernel},
        work::WorkDiv,
    };

    pub fn launch<T: Scalar, K: Kernel<T>>(div: WorkDiv, kernel: &K, output: &mut [T]) {
        let elems = div.elems;
        output
            .par_chunks_mut(elems)
            .enumerate()
            .for_each(|(thread, chunk)| {
                let first = thread * elems;
                chunk
                    .iter_mut()
                    .enumerate()
                    .for_each(|(offset, z)| *z = kernel.element(first + offset));
            });
    }

    pub fn transform<T: Scalar, Op: BinaryOp<T>>(
        div: WorkDiv,
        lhs: &[T],
        rhs: &[T],
        output: &mut [T],
        op: &Op,
    ) {
        let elems = div.elems;
        output
            .par_chunks_mut(elems)
            .zip(lhs.par_chunks(elems))
            .zip(rhs.par_chunks(elems))
            .for_each(|((z, x), y)| {
                z.iter_mut()
                    .zip(x)
                    .zip(y)
                    .for_each(|((z, &x), &y)| *z = op.apply(x, y));
            });
    }
}
