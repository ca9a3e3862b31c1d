//! Fire-and-poll remote operations
//!
//! Every remote call runs on its own background thread and reports back over
//! an mpsc channel. The repository polls each frame; nothing in this crate
//! ever blocks on the network. Results carry no cancellation token - the
//! caller re-checks context before applying them.

use super::{RemoteError, RemoteLevelService};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A handle to a pending remote operation that can be polled
pub struct RemoteOp<T> {
    receiver: Receiver<RemoteResult<T>>,
    result: Option<RemoteResult<T>>,
}

impl<T> RemoteOp<T> {
    pub(crate) fn from_receiver(receiver: Receiver<RemoteResult<T>>) -> Self {
        Self {
            receiver,
            result: None,
        }
    }

    /// Check if the operation has completed (polls the channel)
    pub fn is_complete(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }

        match self.receiver.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                // Worker panicked or dropped the sender
                self.result = Some(Err(RemoteError::Unreachable(
                    "worker disconnected".to_string(),
                )));
                true
            }
        }
    }

    /// Take the result if complete
    pub fn take(mut self) -> Option<RemoteResult<T>> {
        if self.result.is_none() {
            if let Ok(result) = self.receiver.try_recv() {
                self.result = Some(result);
            }
        }
        self.result
    }

    /// Get a reference to the result if complete
    pub fn result(&self) -> Option<&RemoteResult<T>> {
        self.result.as_ref()
    }
}

/// Run one service call on a background thread
pub fn spawn<T, F>(service: Arc<dyn RemoteLevelService>, call: F) -> RemoteOp<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RemoteLevelService) -> RemoteResult<T> + Send + 'static,
{
    let (sender, receiver) = channel();

    thread::spawn(move || {
        let result = call(service.as_ref());
        let _ = sender.send(result);
    });

    RemoteOp::from_receiver(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{
        CompletionOutcome, FeaturedLevels, LevelPage, ListQuery, LevelUpload, SavedLevel,
    };
    use crate::level::LevelDescriptor;
    use std::time::Duration;

    /// Service whose every call fails; the closures under test ignore it
    struct NullService;

    impl RemoteLevelService for NullService {
        fn list_levels(&self, _: &ListQuery) -> RemoteResult<LevelPage> {
            Err(RemoteError::NotConfigured)
        }
        fn get_level(&self, id: &str) -> RemoteResult<LevelDescriptor> {
            Err(RemoteError::NotFound(id.to_string()))
        }
        fn get_featured(&self) -> RemoteResult<FeaturedLevels> {
            Err(RemoteError::NotConfigured)
        }
        fn save_level(&self, _: &LevelUpload) -> RemoteResult<SavedLevel> {
            Err(RemoteError::NotConfigured)
        }
        fn record_completion(&self, _: &str, _: &CompletionOutcome) -> RemoteResult<()> {
            Err(RemoteError::NotConfigured)
        }
        fn rate_level(&self, _: &str, _: f32, _: &str) -> RemoteResult<()> {
            Err(RemoteError::NotConfigured)
        }
    }

    fn wait_complete<T>(op: &mut RemoteOp<T>) {
        for _ in 0..200 {
            if op.is_complete() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("operation never completed");
    }

    #[test]
    fn test_op_completes() {
        let service: Arc<dyn RemoteLevelService> = Arc::new(NullService);
        let mut op = spawn(service, |_| Ok(42u32));
        wait_complete(&mut op);
        assert_eq!(op.take(), Some(Ok(42)));
    }

    #[test]
    fn test_op_carries_service_error() {
        let service: Arc<dyn RemoteLevelService> = Arc::new(NullService);
        let mut op = spawn(service, |svc| svc.get_featured());
        wait_complete(&mut op);
        assert_eq!(op.take(), Some(Err(RemoteError::NotConfigured)));
    }

    #[test]
    fn test_disconnected_worker_is_an_error() {
        let (sender, receiver) = channel::<RemoteResult<u32>>();
        drop(sender);
        let mut op = RemoteOp::from_receiver(receiver);
        assert!(op.is_complete());
        assert!(matches!(op.take(), Some(Err(RemoteError::Unreachable(_)))));
    }
}
