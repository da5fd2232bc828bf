use crate::{
    device::Device,
    error::DeviceResolutionError,
    queue::{Queue, QueueKind},
};

/// A device together with the queues work is submitted through.
///
/// All queues of a runner share its [`QueueKind`]. Dropping the runner drops the
/// queues; their workers finish the items they already hold and exit.
#[derive(Debug)]
pub struct Runner<D: Device> {
    device: D,
    kind: QueueKind,
    queues: Vec<Queue<D>>,
}

impl<D: Device> Runner<D> {
    pub fn new(device: D, kind: QueueKind) -> Self {
        Self {
            device,
            kind,
            queues: vec![],
        }
    }

    /// Resolves the device with the given index and wraps it.
    pub async fn from_id(index: u32, kind: QueueKind) -> Result<Self, DeviceResolutionError> {
        let device = D::resolve(index).await?;
        Ok(Self::new(device, kind))
    }

    /// Appends a new queue bound to the runner's device.
    pub fn create_queue(&mut self) -> &Queue<D> {
        let index = self.queues.len();
        self.queues.push(Queue::new(self.device.clone(), self.kind));
        &self.queues[index]
    }

    #[inline]
    pub fn queue(&self, index: usize) -> Option<&Queue<D>> {
        self.queues.get(index)
    }

    #[inline]
    pub fn queues(&self) -> &[Queue<D>] {
        &self.queues
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }
}
