//! Fixed-length, device-resident vectors.

use std::{
    fmt::Display,
    sync::{RwLockReadGuard, RwLockWriteGuard},
};

use itertools::Itertools;

use crate::{
    device::{CopyPath, Device, DeviceId, HostDevice, copy_path},
    error::{AllocationError, CopyError, Error},
    num::Scalar,
    queue::Queue,
};

/// A fixed-length sequence of `T` stored in memory owned by one device.
///
/// Contents of a vector on an accelerator are only reachable by copying them into a
/// vector on the host. Element access exists only for host devices.
#[derive(Debug)]
pub struct Vector<T: Scalar, D: Device> {
    device: D,
    len: usize,
    buffer: D::Buffer<T>,
}

impl<T: Scalar, D: Device> Vector<T, D> {
    /// Allocates a zero-initialized vector of `len` elements on `device`.
    pub fn new(device: &D, len: usize) -> Result<Self, AllocationError> {
        let buffer = device.allocate(len)?;
        let device = device.clone();
        Ok(Self {
            device,
            len,
            buffer,
        })
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
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    #[inline]
    pub fn buffer(&self) -> &D::Buffer<T> {
        &self.buffer
    }

    fn check_copy<S: Device>(&self, other: &Vector<T, S>) -> Result<(), CopyError> {
        match other.len() == self.len() {
            true => Ok(()),
            false => Err(CopyError::LengthMismatch {
                src: other.len(),
                dst: self.len(),
            }),
        }
    }

    /// Submits a copy of the whole of `other` into `self` onto `queue`, staged through
    /// host memory.
    ///
    /// The queue must be bound to either side. The destination is only safe to read
    /// after the queue has been waited on. Vectors on the same device are better served
    /// by [`Vector::copy_within`].
    pub async fn copy_from<S, Q>(&mut self, other: &Vector<T, S>, queue: &Queue<Q>) -> Result<(), Error>
    where
        S: Device,
        Q: Device,
    {
        self.check_copy(other)?;
        copy_path(other.device_id(), self.device_id(), queue.device_id())?;

        let (src_device, dst_device) = (other.device.clone(), self.device.clone());
        let (src, dst) = (other.buffer.clone(), self.buffer.clone());
        queue
            .submit(async move {
                let data = src_device.download(&src).await?;
                dst_device.upload(&dst, data).await?;
                Ok::<_, Error>(())
            })
            .await
    }

    /// Submits a device-local copy of the whole of `other` into `self` onto `queue`.
    ///
    /// Both vectors and the queue must share one device.
    pub async fn copy_within(&mut self, other: &Vector<T, D>, queue: &Queue<D>) -> Result<(), Error> {
        self.check_copy(other)?;
        let (src, dst) = (other.device_id(), self.device_id());
        if copy_path(src, dst, queue.device_id())? != CopyPath::Direct {
            return Err(CopyError::NoPeerPath { src, dst }.into());
        }

        let device = self.device.clone();
        let (src, dst) = (other.buffer.clone(), self.buffer.clone());
        queue
            .submit(async move { device.copy(&src, &dst).await.map_err(Error::from) })
            .await
    }
}

impl<T: Scalar, D: HostDevice> Vector<T, D> {
    /// Allocates a host vector holding a copy of `data`.
    pub fn from_slice(device: &D, data: &[T]) -> Result<Self, AllocationError> {
        let vector = Self::new(device, data.len())?;
        vector.write().copy_from_slice(data);
        Ok(vector)
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[T]>> {
        D::memory(&self.buffer).read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[T]>> {
        D::memory(&self.buffer).write()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        self.read().get(index).copied()
    }

    /// Stores `value` at `index`, returning the previous element, or `None` if out of bounds.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) -> Option<T> {
        let mut data = self.write();
        let slot = data.get_mut(index)?;
        Some(std::mem::replace(slot, value))
    }

    /// # Safety
    ///
    /// `index` must be less than [`Vector::len`].
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> T {
        unsafe { *self.read().get_unchecked(index) }
    }

    /// # Safety
    ///
    /// `index` must be less than [`Vector::len`].
    #[inline]
    pub unsafe fn set_unchecked(&mut self, index: usize, value: T) {
        unsafe { *self.write().get_unchecked_mut(index) = value }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }
}

impl<T: Scalar, D: HostDevice> Display for Vector<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.read().iter().format(", "))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use half::f16;

    use super::Vector;
    use crate::{
        device::{Cpu, Device},
        error::{self, AllocationError, CopyError},
        queue::{Queue, QueueKind},
    };

    #[test]
    fn test_host_access() -> Result<(), Box<dyn Error>> {
        let cpu = Cpu::new(0)?;
        let mut x = Vector::<u16, _>::new(&cpu, 4)?;
        assert_eq!(x.to_vec(), vec![0; 4]);
        assert_eq!(x.to_string(), "{0, 0, 0, 0}");

        assert_eq!(x.set(2, 7), Some(0));
        assert_eq!(x.set(4, 7), None);
        assert_eq!(x.get(2), Some(7));
        assert_eq!(x.get(4), None);

        unsafe {
            x.set_unchecked(0, 3);
            assert_eq!(x.get_unchecked(0), 3);
        }
        x.write()[1] = 5;
        assert_eq!(x.read().iter().copied().sum::<u16>(), 15);

        let y = Vector::<f16, _>::new(&cpu, 0)?;
        assert!(y.is_empty());
        assert_eq!(y.to_string(), "{}");
        Ok(())
    }

    #[test]
    fn test_allocation_failure() -> Result<(), Box<dyn Error>> {
        let cpu = Cpu::new(0)?;
        let err = Vector::<u32, _>::new(&cpu, usize::MAX);
        assert!(matches!(err, Err(AllocationError::Extent { .. })));

        let err = Vector::<u8, _>::new(&cpu, usize::MAX);
        assert!(matches!(err, Err(AllocationError::OutOfMemory { .. })));
        assert_eq!(cpu.id(), Vector::<u8, _>::new(&cpu, 1)?.device_id());
        Ok(())
    }

    #[tokio::test]
    async fn test_copy() -> Result<(), Box<dyn Error>> {
        let cpu = Cpu::new(0)?;
        let queue = Queue::new(cpu.clone(), QueueKind::NonBlocking);

        let x = Vector::from_slice(&cpu, &[1.5f32, 2.5, 3.5])?;
        let mut y = Vector::new(&cpu, 3)?;
        y.copy_from(&x, &queue).await?;
        queue.wait().await?;
        assert_eq!(y.to_vec(), vec![1.5, 2.5, 3.5]);

        let mut z = Vector::<f32, _>::new(&cpu, 2)?;
        let err = z.copy_from(&x, &queue).await;
        assert!(matches!(
            err,
            Err(error::Error::Copy(CopyError::LengthMismatch { src: 3, dst: 2 }))
        ));
        assert_eq!(z.to_vec(), vec![0.0; 2]);

        let mut w = Vector::<f32, _>::new(&cpu, 3)?;
        w.copy_within(&x, &queue).await?;
        queue.wait().await?;
        assert_eq!(w.to_string(), "{1.5, 2.5, 3.5}");

        let err = z.copy_within(&x, &queue).await;
        assert!(matches!(
            err,
            Err(error::Error::Copy(CopyError::LengthMismatch { src: 3, dst: 2 }))
        ));
        Ok(())
    }
}
