use thiserror::Error;

use crate::{
    device::{DeviceId, DeviceKind},
    num::DataType,
    queue::QueueId,
    work::WorkDiv,
};

#[derive(Debug, Error)]
pub enum DeviceResolutionError {
    #[error("no {kind} device with index {index} ({count} available)")]
    NotFound {
        kind: DeviceKind,
        index: u32,
        count: usize,
    },
    #[error("failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("out of memory: failed to allocate {size} bytes on {device}")]
    OutOfMemory { device: DeviceId, size: usize },
    #[error("extent of {len} elements overflows the address space")]
    Extent { len: usize },
    #[error("data type {type} cannot be stored on {device}")]
    UnsupportedType { device: DeviceId, r#type: DataType },
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy length mismatch: source has {src} elements, destination has {dst}")]
    LengthMismatch { src: usize, dst: usize },
    #[error("queue on {queue} can not copy from {src} to {dst}")]
    QueueMismatch {
        queue: DeviceId,
        src: DeviceId,
        dst: DeviceId,
    },
    #[error("no copy path from {src} to {dst}")]
    NoPeerPath { src: DeviceId, dst: DeviceId },
    #[error("failed to map buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("transfer failed: {0}")]
    Transfer(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("operand length mismatch: {lhs} vs {rhs}")]
    LengthMismatch { lhs: usize, rhs: usize },
    #[error("operands live on different devices: {lhs} vs {rhs}")]
    DeviceMismatch { lhs: DeviceId, rhs: DeviceId },
    #[error("queue on {queue} can not dispatch work for {device}")]
    QueueMismatch { queue: DeviceId, device: DeviceId },
    #[error("malformed work division {div} for {len} elements: {reason}")]
    WorkDiv {
        div: WorkDiv,
        len: usize,
        reason: &'static str,
    },
    #[error("{device} can not run this kernel on {type}: {reason}")]
    Unsupported {
        device: DeviceId,
        r#type: DataType,
        reason: &'static str,
    },
    #[error("device rejected the kernel: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} is closed")]
    Closed(QueueId),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    DeviceResolution(#[from] DeviceResolutionError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::{AllocationError, DispatchError};
    use crate::{device::DeviceId, num::DataType};

    #[test]
    fn test_messages() {
        let err = AllocationError::UnsupportedType {
            device: DeviceId::Host(0),
            r#type: DataType::F16,
        };
        assert_eq!(err.to_string(), "data type F16 cannot be stored on host:0");

        let err = DispatchError::Unsupported {
            device: DeviceId::Host(0),
            r#type: DataType::U8,
            reason: "no device representation",
        };
        assert_eq!(
            err.to_string(),
            "host:0 can not run this kernel on U8: no device representation"
        );
    }
}
