use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use statrelay_wire::message::Message;
use statrelay_wire::WireError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::session::{Session, SessionRegistry, SessionState, UserId};

/// Sentinel filter key meaning "all keys".
pub const ALL_KEYS: &str = "*";

/// Bounded depth of each subscriber's frame queue. Overflowing frames are
/// dropped; a slow consumer never stalls ingestion.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

/// One registered subscriber's receive side.
pub struct Subscription {
    /// Identity used to unsubscribe.
    pub id: u64,
    /// Stream of JSON object frames.
    pub rx: mpsc::Receiver<Vec<u8>>,
}

struct Subscriber {
    id: u64,
    filter: HashSet<String>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl Subscriber {
    fn wants(&self, name: &str) -> bool {
        self.filter.contains(ALL_KEYS) || self.filter.contains(name)
    }
}

#[derive(Default)]
struct HubInner {
    user_subs: HashMap<UserId, Vec<Subscriber>>,
    last_ingest: HashMap<UserId, Instant>,
}

/// Fan-out hub: registers key-filtered subscribers per user and turns each
/// decoded message into one JSON frame per matching subscriber.
pub struct SubscriptionHub {
    inner: RwLock<HubInner>,
    next_subscription_id: AtomicU64,
    max_idle: Duration,
}

impl SubscriptionHub {
    pub fn new(max_idle: Duration) -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
            next_subscription_id: AtomicU64::new(1),
            max_idle,
        }
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Registers a subscriber if the user is below `max_count` concurrent
    /// subscriptions. `None` means the slots are exhausted.
    pub fn subscribe_if_slot(
        &self,
        user_id: UserId,
        filter: HashSet<String>,
        max_count: usize,
    ) -> Option<Subscription> {
        let mut inner = self.write_inner();
        if inner.user_subs.get(&user_id).map_or(0, Vec::len) >= max_count {
            return None;
        }

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        inner
            .user_subs
            .entry(user_id)
            .or_default()
            .push(Subscriber { id, filter, tx });
        Some(Subscription { id, rx })
    }

    /// Removes a subscriber by identity. Dropping its sender ends the
    /// receiver's stream. An emptied user entry is removed from the map.
    pub fn unsubscribe(&self, user_id: UserId, subscription_id: u64) {
        let mut inner = self.write_inner();
        if let Some(subs) = inner.user_subs.get_mut(&user_id) {
            subs.retain(|sub| sub.id != subscription_id);
            if subs.is_empty() {
                inner.user_subs.remove(&user_id);
            }
        }
    }

    pub fn subscriber_count(&self, user_id: &UserId) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.user_subs.get(user_id).map_or(0, Vec::len)
    }

    /// Ingests one fully buffered request body under the session mutex.
    ///
    /// The decoder keeps its dictionary table; only its byte source is
    /// swapped. Returns the number of messages committed; messages decoded
    /// before a mid-stream fault stay applied to session state.
    pub fn ingest_body(
        &self,
        user_id: UserId,
        session: &Session,
        body: Vec<u8>,
    ) -> Result<usize, WireError> {
        let mut guard = session.lock();
        let SessionState { reader, state } = &mut *guard;
        reader.set_source(Cursor::new(body));

        let mut committed = 0_usize;
        loop {
            match reader.read_next_message()? {
                Some(mut message) => {
                    self.stream_message(user_id, state, &mut message)?;
                    committed += 1;
                }
                None => return Ok(committed),
            }
        }
    }

    /// Fans one decoded message out to the user's subscribers and merges its
    /// key/values into `state`.
    ///
    /// The body is pulled exactly once; each value's JSON encoding is
    /// computed once and shared between all matching subscriber frames and
    /// the state merge. Frames are sent non-blocking; a full queue drops the
    /// frame. The last-ingest timestamp refreshes for every message, body or
    /// not, so keep-alives count as liveness.
    pub fn stream_message<R: std::io::Read>(
        &self,
        user_id: UserId,
        state: &mut HashMap<String, Vec<u8>>,
        message: &mut Message<'_, R>,
    ) -> Result<(), WireError> {
        let mut inner = self.write_inner();
        let result = fan_out(&inner, user_id, state, message);
        inner.last_ingest.insert(user_id, Instant::now());
        result
    }

    /// Resets every session idle past the deadline: one `{}` frame to each
    /// of its subscribers, then a fresh decoder and empty state map.
    pub fn sweep_idle(&self, registry: &SessionRegistry) {
        let mut reset_targets = Vec::new();
        {
            let mut inner = self.write_inner();
            let now = Instant::now();
            let HubInner {
                user_subs,
                last_ingest,
            } = &mut *inner;

            last_ingest.retain(|user_id, last| {
                if now.duration_since(*last) <= self.max_idle {
                    return true;
                }
                if let Some(subs) = user_subs.get(user_id) {
                    for sub in subs {
                        if sub.tx.try_send(b"{}".to_vec()).is_err() {
                            tracing::warn!(
                                user = %user_id,
                                subscriber = sub.id,
                                "subscriber queue full, dropping reset frame"
                            );
                        }
                    }
                }
                reset_targets.push(*user_id);
                false
            });
        }

        // The ingest path locks session then hub; session locks are taken
        // only after the hub lock is released.
        for user_id in reset_targets {
            match registry.get(&user_id) {
                Some(session) => session.lock().reset(),
                None => tracing::warn!(user = %user_id, "idle sweep found no session"),
            }
            tracing::info!(user = %user_id, "session reset after idle timeout");
        }
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, HubInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn fan_out<R: std::io::Read>(
    inner: &HubInner,
    user_id: UserId,
    state: &mut HashMap<String, Vec<u8>>,
    message: &mut Message<'_, R>,
) -> Result<(), WireError> {
    let Some(body) = message.body.as_mut() else {
        return Ok(());
    };
    if body.is_empty() {
        return Ok(());
    }

    let subs = inner
        .user_subs
        .get(&user_id)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut frames: Vec<Vec<u8>> = subs
        .iter()
        .map(|_| {
            let mut frame = Vec::with_capacity(1024);
            frame.push(b'{');
            frame
        })
        .collect();

    while let Some(kv) = body.read_next_key_value()? {
        let mut json_value = Vec::new();
        kv.append_json(&mut json_value);

        for (frame, sub) in frames.iter_mut().zip(subs) {
            if !sub.wants(kv.name) {
                continue;
            }
            frame.push(b'"');
            frame.extend_from_slice(kv.name.as_bytes());
            frame.extend_from_slice(b"\":");
            frame.extend_from_slice(&json_value);
            frame.push(b',');
        }

        // The state map takes the buffer itself, so it never aliases a
        // subscriber frame.
        state.insert(kv.name.to_owned(), json_value);
    }

    for (mut frame, sub) in frames.into_iter().zip(subs) {
        if frame.len() <= 1 {
            continue;
        }
        let last = frame.len() - 1;
        frame[last] = b'}';
        match sub.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    user = %user_id,
                    subscriber = sub.id,
                    "subscriber queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    user = %user_id,
                    subscriber = sub.id,
                    "subscriber channel closed"
                );
            }
        }
    }

    Ok(())
}

/// Spawns the background idle sweeper. It wakes every `max_idle` and exits
/// when the shutdown signal flips.
pub fn spawn_idle_sweeper(
    hub: Arc<SubscriptionHub>,
    registry: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hub.max_idle());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => hub.sweep_idle(&registry),
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("idle sweeper stopped");
    })
}
