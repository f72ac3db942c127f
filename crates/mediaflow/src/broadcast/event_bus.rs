//! Multi-subscriber fan-out of job events.
//!
//! Every listener gets its own delivery thread fed by an unbounded channel,
//! so publishing never waits on listener code and each listener sees events
//! in publish order. A panicking listener is logged and keeps receiving.
//! Async consumers can instead take a lossy [`broadcast::Receiver`] from
//! [`EventBus::stream`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::broadcast::job_event::JobEvent;
use crate::error::WorkerError;

/// Receives job events on a dedicated delivery thread.
pub trait JobEventListener: Send + 'static {
    fn on_event(&mut self, event: &JobEvent);
}

impl<F> JobEventListener for F
where
    F: FnMut(&JobEvent) + Send + 'static,
{
    fn on_event(&mut self, event: &JobEvent) {
        self(event)
    }
}

/// Identifies a listener registered with [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

pub struct EventBus {
    subscribers: Mutex<HashMap<u64, Sender<Arc<JobEvent>>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Creates a bus whose lossy stream buffers `stream_capacity` events per receiver.
    pub fn new(stream_capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(stream_capacity.max(1));
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<u64, Sender<Arc<JobEvent>>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Event bus subscriber lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Registers a listener. It receives every event published after this call.
    pub fn subscribe<L: JobEventListener>(
        &self,
        mut listener: L,
    ) -> Result<SubscriptionHandle, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded::<Arc<JobEvent>>();

        thread::Builder::new()
            .name(format!("job-events-{}", id))
            .spawn(move || {
                for event in receiver.iter() {
                    let delivered =
                        catch_unwind(AssertUnwindSafe(|| listener.on_event(event.as_ref())));
                    if delivered.is_err() {
                        error!(
                            subscriber = id,
                            event = %event.kind(),
                            job_id = %event.job_id,
                            "Job event listener panicked"
                        );
                    }
                }
                debug!(subscriber = id, "Job event listener stopped");
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        self.lock_subscribers().insert(id, sender);
        Ok(SubscriptionHandle(id))
    }

    /// Removes a listener. Events already queued for it are still delivered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.lock_subscribers().remove(&handle.0).is_some()
    }

    /// Queues `event` for every listener and the lossy stream.
    pub fn publish(&self, event: JobEvent) {
        let shared = Arc::new(event);
        {
            let mut subscribers = self.lock_subscribers();
            // A send only fails once the delivery thread is gone.
            subscribers.retain(|id, sender| {
                let alive = sender.send(Arc::clone(&shared)).is_ok();
                if !alive {
                    warn!(subscriber = *id, "Dropping disconnected job event listener");
                }
                alive
            });
        }

        // Ignore errors - no active receivers is fine
        let _ = self.stream.send(shared.as_ref().clone());
    }

    /// A lossy receiver for async consumers; lagging receivers skip events.
    pub fn stream(&self) -> broadcast::Receiver<JobEvent> {
        self.stream.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
