//! Ordered work submission onto one device.
//!
//! Each [`Queue`] owns a worker task fed through an unbounded channel. The worker
//! runs work items strictly in submission order, so a later item may consume the
//! output of an earlier one without any synchronization in between.

use std::future::Future;

use derive_more::{Deref, Display};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    device::{Device, DeviceId},
    error::{Error, QueueError},
    platform::{self, BoxFuture},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct QueueId(uid::Id<QueueId>);

/// Whether submissions wait for their work to finish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QueueKind {
    /// A submission resolves once its work item has executed on the device.
    #[default]
    #[display("blocking")]
    Blocking,
    /// A submission resolves as soon as the item is enqueued.
    #[display("non-blocking")]
    NonBlocking,
}

pub enum QueueEvent {
    Submit {
        work: BoxFuture<'static, Result<(), Error>>,
        sender: Option<flume::Sender<Result<(), Error>>>,
    },
    Wait {
        sender: flume::Sender<Result<(), Error>>,
    },
}

/// A handle to an ordered work-submission channel bound to one device.
#[derive(Debug, Clone)]
pub struct Queue<D: Device> {
    id: QueueId,
    kind: QueueKind,
    device: D,
    sender: flume::Sender<QueueEvent>,
}

impl<D: Device> Queue<D> {
    /// Creates a queue and spawns its worker. Must be called within a tokio runtime.
    pub fn new(device: D, kind: QueueKind) -> Self {
        let id = QueueId(uid::Id::new());
        let (sender, receiver) = flume::unbounded();
        log::debug!("create {kind} queue {id} on {}", device.id());
        platform::spawn(serve(id, device.clone(), receiver));
        Self {
            id,
            kind,
            device,
            sender,
        }
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    fn send(&self, event: QueueEvent) -> Result<(), QueueError> {
        self.sender
            .send(event)
            .map_err(|_| QueueError::Closed(self.id))
    }

    /// Enqueues `work` behind everything submitted before it.
    ///
    /// On a blocking queue this resolves with the outcome of `work` once the device
    /// finished it. On a non-blocking queue it resolves immediately and failures are
    /// reported by the next [`Queue::wait`].
    pub async fn submit<F>(&self, work: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let work = Box::pin(work);
        match self.kind {
            QueueKind::Blocking => {
                let (sender, receiver) = flume::bounded(1);
                let sender = Some(sender);
                self.send(QueueEvent::Submit { work, sender })?;
                receiver
                    .recv_async()
                    .await
                    .map_err(|_| QueueError::Closed(self.id))?
            }
            QueueKind::NonBlocking => {
                let sender = None;
                self.send(QueueEvent::Submit { work, sender })?;
                Ok(())
            }
        }
    }

    /// Resolves once all previously submitted work has completed on the device.
    ///
    /// Returns the first failure of a non-blocking item since the last wait.
    pub async fn wait(&self) -> Result<(), Error> {
        let (sender, receiver) = flume::bounded(1);
        self.send(QueueEvent::Wait { sender })?;
        receiver
            .recv_async()
            .await
            .map_err(|_| QueueError::Closed(self.id))?
    }
}

#[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(queue = %id)))]
async fn serve<D: Device>(id: QueueId, device: D, receiver: flume::Receiver<QueueEvent>) {
    let mut failure: Option<Error> = None;

    while let Ok(event) = receiver.recv_async().await {
        match event {
            QueueEvent::Submit { work, sender } => {
                log::trace!("queue {id}: run work item");
                let result = work.await;
                match sender {
                    Some(sender) => {
                        device.synchronize().await;
                        _ = sender.send_async(result).await;
                    }
                    None => {
                        if let Err(err) = result {
                            log::error!("queue {id}: {err}");
                            failure.get_or_insert(err);
                        }
                    }
                }
            }
            QueueEvent::Wait { sender } => {
                device.synchronize().await;
                let result = failure.take().map_or(Ok(()), Err);
                _ = sender.send_async(result).await;
            }
        }
    }

    log::debug!("queue {id} closed");
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use itertools::Itertools;

    use super::{Queue, QueueKind};
    use crate::{
        device::Cpu,
        error::{self, DispatchError},
    };

    fn rejected() -> error::Error {
        DispatchError::Rejected("phony failure".into()).into()
    }

    #[tokio::test]
    async fn test_fifo() -> Result<(), Box<dyn Error>> {
        let queue = Queue::new(Cpu::new(0)?, QueueKind::NonBlocking);
        let log = Arc::new(Mutex::new(vec![]));

        for index in 0..32 {
            let log = log.clone();
            let delay = Duration::from_micros(fastrand::u64(0..500));
            queue
                .submit(async move {
                    tokio::time::sleep(delay).await;
                    log.lock().expect("failed to lock").push(index);
                    Ok(())
                })
                .await?;
        }
        queue.wait().await?;

        let log = log.lock().expect("failed to lock").clone();
        assert_eq!(log, (0..32).collect_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking() -> Result<(), Box<dyn Error>> {
        let queue = Queue::new(Cpu::new(0)?, QueueKind::Blocking);
        let flag = Arc::new(Mutex::new(false));

        let inner = flag.clone();
        queue
            .submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                *inner.lock().expect("failed to lock") = true;
                Ok(())
            })
            .await?;
        assert!(*flag.lock().expect("failed to lock"));

        let err = queue.submit(async { Err(rejected()) }).await;
        assert!(matches!(
            err,
            Err(error::Error::Dispatch(DispatchError::Rejected(_)))
        ));
        queue.wait().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_deferred_failure() -> Result<(), Box<dyn Error>> {
        let queue = Queue::new(Cpu::new(0)?, QueueKind::NonBlocking);
        assert_eq!(queue.kind().to_string(), "non-blocking");

        queue.submit(async { Err(rejected()) }).await?;
        queue.submit(async { Ok(()) }).await?;
        assert!(queue.wait().await.is_err());

        // reported once
        queue.wait().await?;
        Ok(())
    }
}
