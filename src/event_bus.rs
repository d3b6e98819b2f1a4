/*!
 * Per-job event distribution.
 *
 * The bus keeps, for every job id, a list of bounded mailboxes. Publishing is
 * fan-out and never blocks: a full mailbox loses the event for that
 * subscriber only. `stream` wraps a subscription into a `Stream` that emits
 * heartbeats while idle, ends after a terminal event and always unsubscribes
 * when dropped.
 */

use futures::stream::{self, Stream};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::database::models::{Job, JobStatus};

/// Default mailbox capacity per subscriber
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Default idle time before a heartbeat frame
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Progress notification for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub job_id: i64,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl StageEvent {
    /// Snapshot of a job record
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            error: job.error.clone(),
            output_path: job.output_path.clone(),
        }
    }

    // @returns: Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One item of an event stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A published event
    Event(StageEvent),
    /// Synthetic keep-alive emitted while no event arrives
    Heartbeat,
}

impl StreamFrame {
    /// JSON form used on the wire: the event itself, or `{"type":"ping"}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StreamFrame::Event(event) => {
                serde_json::to_value(event).unwrap_or(serde_json::Value::Null)
            }
            StreamFrame::Heartbeat => serde_json::json!({ "type": "ping" }),
        }
    }
}

/// Identifies one mailbox within a job's subscriber list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end of a subscription
pub struct Subscription {
    job_id: i64,
    id: SubscriberId,
    receiver: mpsc::Receiver<StageEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<StageEvent> {
        self.receiver.recv().await
    }

    /// Take an event if one is queued
    pub fn try_recv(&mut self) -> Option<StageEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Mailbox {
    id: SubscriberId,
    sender: mpsc::Sender<StageEvent>,
}

struct Registry {
    mailboxes: Mutex<HashMap<i64, Vec<Mailbox>>>,
    next_id: AtomicU64,
    capacity: usize,
    heartbeat: Duration,
}

/// Registry of per-job subscribers, cheap to clone and shared by the service
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY, DEFAULT_HEARTBEAT)
    }
}

impl EventBus {
    /// Create a bus with the given mailbox capacity and heartbeat interval
    pub fn new(capacity: usize, heartbeat: Duration) -> Self {
        Self {
            registry: Arc::new(Registry {
                mailboxes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                heartbeat,
            }),
        }
    }

    /// Register a new mailbox for a job
    pub fn subscribe(&self, job_id: i64) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.registry.capacity);
        let id = SubscriberId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));

        let mut mailboxes = self.registry.mailboxes.lock();
        let list = mailboxes.entry(job_id).or_default();
        list.push(Mailbox { id, sender });
        debug!("Subscriber registered for job {} ({} active)", job_id, list.len());

        Subscription { job_id, id, receiver }
    }

    /// Remove a mailbox; the job's entry goes away with its last mailbox
    pub fn unsubscribe(&self, job_id: i64, id: SubscriberId) {
        let mut mailboxes = self.registry.mailboxes.lock();
        if let Some(list) = mailboxes.get_mut(&job_id) {
            list.retain(|mailbox| mailbox.id != id);
            if list.is_empty() {
                mailboxes.remove(&job_id);
            }
            debug!("Subscriber removed for job {}", job_id);
        }
    }

    /// Deliver an event to every current mailbox of the job.
    ///
    /// Never blocks and never fails; returns how many mailboxes accepted it.
    pub fn publish(&self, job_id: i64, event: &StageEvent) -> usize {
        let mailboxes = self.registry.mailboxes.lock();
        let Some(list) = mailboxes.get(&job_id) else {
            return 0;
        };

        let mut delivered = 0;
        for mailbox in list {
            match mailbox.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Event mailbox full, dropping event for job {}", job_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Event mailbox closed for job {}", job_id);
                }
            }
        }
        delivered
    }

    // @returns: Number of live mailboxes for a job
    pub fn subscriber_count(&self, job_id: i64) -> usize {
        self.registry
            .mailboxes
            .lock()
            .get(&job_id)
            .map_or(0, Vec::len)
    }

    // @returns: Whether the registry holds an entry for the job
    pub fn has_entry(&self, job_id: i64) -> bool {
        self.registry.mailboxes.lock().contains_key(&job_id)
    }

    /// Subscribe and expose the mailbox as a stream of frames.
    ///
    /// Emits `Heartbeat` after each idle interval, ends right after a terminal
    /// event, and unsubscribes once the stream ends or is dropped.
    pub fn stream(&self, job_id: i64) -> impl Stream<Item = StreamFrame> + Send + use<> {
        let guard = SubscriptionGuard {
            bus: self.clone(),
            subscription: self.subscribe(job_id),
        };
        let heartbeat = self.registry.heartbeat;

        stream::unfold(Some(guard), move |state| async move {
            let mut guard = state?;
            match tokio::time::timeout(heartbeat, guard.subscription.recv()).await {
                Err(_) => Some((StreamFrame::Heartbeat, Some(guard))),
                Ok(Some(event)) => {
                    let next = if event.is_terminal() { None } else { Some(guard) };
                    Some((StreamFrame::Event(event), next))
                }
                Ok(None) => None,
            }
        })
    }
}

/// Unsubscribes on drop, whichever way the owning stream ends
struct SubscriptionGuard {
    bus: EventBus,
    subscription: Subscription,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus
            .unsubscribe(self.subscription.job_id, self.subscription.id);
    }
}
