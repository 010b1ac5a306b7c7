//! Inbound message inbox: buffered messages plus one-shot listeners.
//!
//! The reader task pushes every decoded message into the [`Inbox`]. A message
//! goes to the first registered listener whose [`Interest`] matches it;
//! otherwise it is buffered so that a subscriber arriving later still
//! observes it exactly once. [`Inbox::subscribe`] always checks the buffer
//! before registering, which closes the gap between "send a command" and
//! "start waiting for its result".
//!
//! Response correlation is by `request_seq` only. When a waiter gives up, its
//! sequence number is remembered as abandoned and the late response is
//! dropped on arrival instead of being buffered or handed to anyone else.
//! The abandoned set is bounded by the buffer capacity; the oldest sequence
//! numbers are forgotten first.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::dap::protocol::{EventMessage, ProtocolMessage, ResponseMessage};
use crate::{AppError, Result};

/// Default bound on buffered, unclaimed messages.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

/// What a listener is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// The response to the request with this sequence number.
    Response {
        /// Sequence number of the outstanding request.
        request_seq: i64,
    },
    /// The first event whose name is one of these.
    Event {
        /// Accepted event names.
        names: Vec<String>,
    },
}

impl Interest {
    /// Interest in one or more event names.
    #[must_use]
    pub fn events(names: &[&str]) -> Self {
        Self::Event {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
        }
    }

    fn matches(&self, message: &ProtocolMessage) -> bool {
        match (self, message) {
            (Self::Response { request_seq }, ProtocolMessage::Response(r)) => {
                r.request_seq == *request_seq
            }
            (Self::Event { names }, ProtocolMessage::Event(e)) => {
                names.iter().any(|n| *n == e.event)
            }
            _ => false,
        }
    }
}

/// What happened to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to a waiting listener.
    Dispatched,
    /// Kept for a later subscriber.
    Buffered,
    /// Discarded: a late response for an abandoned request.
    Dropped,
}

struct Listener {
    id: u64,
    interest: Interest,
    tx: oneshot::Sender<ProtocolMessage>,
}

#[derive(Default)]
struct InboxState {
    buffered: VecDeque<ProtocolMessage>,
    listeners: Vec<Listener>,
    abandoned: BTreeSet<i64>,
    next_listener_id: u64,
    closed: Option<String>,
}

/// Shared inbox for one debug adapter connection.
pub struct Inbox {
    session_id: String,
    capacity: usize,
    state: Mutex<InboxState>,
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("session_id", &self.session_id)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Inbox {
    /// Create an inbox with [`DEFAULT_BUFFER_CAPACITY`].
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_capacity(session_id, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create an inbox that buffers at most `capacity` unclaimed messages.
    #[must_use]
    pub fn with_capacity(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            capacity: capacity.max(1),
            state: Mutex::new(InboxState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route an inbound message to a listener or the buffer.
    pub fn deliver(&self, message: ProtocolMessage) -> Delivery {
        let mut state = self.lock();

        if let ProtocolMessage::Response(r) = &message {
            if state.abandoned.remove(&r.request_seq) {
                debug!(
                    session_id = %self.session_id,
                    request_seq = r.request_seq,
                    "inbox: dropping late response for abandoned request"
                );
                return Delivery::Dropped;
            }
        }

        let mut message = message;
        while let Some(pos) = state.listeners.iter().position(|l| l.interest.matches(&message)) {
            let listener = state.listeners.remove(pos);
            match listener.tx.send(message) {
                Ok(()) => return Delivery::Dispatched,
                // Receiver already gone; try the next matching listener.
                Err(returned) => message = returned,
            }
        }

        if state.buffered.len() >= self.capacity {
            if let Some(evicted) = state.buffered.pop_front() {
                warn!(
                    session_id = %self.session_id,
                    seq = evicted.seq(),
                    "inbox: buffer full, evicting oldest message"
                );
            }
        }
        state.buffered.push_back(message);
        Delivery::Buffered
    }

    /// Wait for a message matching `interest`.
    ///
    /// A matching buffered message is claimed immediately; otherwise a
    /// listener is registered. After [`Inbox::close`], subscriptions with no
    /// buffered match resolve to an error.
    pub fn subscribe(&self, interest: Interest) -> Subscription<'_> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;

        if let Some(pos) = state.buffered.iter().position(|m| interest.matches(m)) {
            if let Some(message) = state.buffered.remove(pos) {
                // The receiver is held right here, so this cannot fail.
                let _ = tx.send(message);
            }
        } else if state.closed.is_none() {
            state.listeners.push(Listener {
                id,
                interest: interest.clone(),
                tx,
            });
        }
        // When closed, `tx` drops here and the receiver reports closure.

        Subscription {
            inbox: self,
            id,
            interest,
            rx: Some(rx),
            settled: false,
        }
    }

    /// Like [`Inbox::subscribe`], but first discards every buffered message
    /// matching `interest` and never claims from the buffer.
    ///
    /// Returns the discarded messages, oldest first. Used when a buffered
    /// match would belong to an earlier exchange, such as a `stopped` event
    /// that arrived after its step gave up waiting.
    pub fn subscribe_fresh(&self, interest: Interest) -> (Subscription<'_>, Vec<ProtocolMessage>) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;

        let (stale, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.buffered)
            .into_iter()
            .partition(|m| interest.matches(m));
        state.buffered = kept;
        if !stale.is_empty() {
            debug!(
                session_id = %self.session_id,
                discarded = stale.len(),
                "inbox: discarding stale buffered messages"
            );
        }

        if state.closed.is_none() {
            state.listeners.push(Listener {
                id,
                interest: interest.clone(),
                tx,
            });
        }

        let subscription = Subscription {
            inbox: self,
            id,
            interest,
            rx: Some(rx),
            settled: false,
        };
        (subscription, stale.into())
    }

    /// Mark the stream as ended; pending and future listeners fail.
    pub fn close(&self, reason: &str) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.to_owned());
        }
        state.listeners.clear();
        debug!(session_id = %self.session_id, reason, "inbox closed");
    }

    /// Why the inbox was closed, if it was.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.lock().closed.clone()
    }

    /// Number of buffered, unclaimed messages.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.lock().buffered.len()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Number of request sequence numbers whose late responses will be dropped.
    #[must_use]
    pub fn abandoned_len(&self) -> usize {
        self.lock().abandoned.len()
    }

    fn remove_listener(state: &mut InboxState, id: u64) -> bool {
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        state.listeners.len() != before
    }

    /// Remove a listener; for responses, drop the late reply when it comes.
    fn cancel(&self, id: u64, interest: &Interest) {
        let mut state = self.lock();
        let was_pending = Self::remove_listener(&mut state, id);
        if let Interest::Response { request_seq } = interest {
            if was_pending && state.closed.is_none() {
                state.abandoned.insert(*request_seq);
                while state.abandoned.len() > self.capacity {
                    state.abandoned.pop_first();
                }
            }
        }
    }

    /// Remove a listener whose message can never arrive.
    fn withdraw(&self, id: u64) {
        let mut state = self.lock();
        Self::remove_listener(&mut state, id);
    }
}

/// A pending wait on the [`Inbox`]. Dropping it deregisters the listener.
pub struct Subscription<'a> {
    inbox: &'a Inbox,
    id: u64,
    interest: Interest,
    rx: Option<oneshot::Receiver<ProtocolMessage>>,
    settled: bool,
}

impl Subscription<'_> {
    /// Wait up to `timeout` for the matching message.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` when nothing matched in time; the listener is
    ///   deregistered.
    /// - `AppError::Dap` when the inbox closed first.
    pub async fn wait(mut self, timeout: Duration) -> Result<ProtocolMessage> {
        let Some(rx) = self.rx.take() else {
            return Err(AppError::Dap("subscription already consumed".into()));
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => {
                self.settled = true;
                Ok(message)
            }
            Ok(Err(_closed)) => {
                self.settled = true;
                let reason = self
                    .inbox
                    .closed_reason()
                    .unwrap_or_else(|| "listener dropped".into());
                Err(AppError::Dap(format!("adapter stream closed: {reason}")))
            }
            Err(_elapsed) => Err(AppError::Timeout(format!(
                "{} not received within {timeout:?}",
                describe(&self.interest)
            ))),
        }
    }

    /// Give up on a message that was never asked for, e.g. the response to
    /// a request that could not be written. Nothing is marked abandoned.
    pub fn withdraw(mut self) {
        self.settled = true;
        self.inbox.withdraw(self.id);
    }

    /// Wait for a response.
    ///
    /// # Errors
    ///
    /// As [`Subscription::wait`], plus `AppError::Dap` if a non-response matched.
    pub async fn response(self, timeout: Duration) -> Result<ResponseMessage> {
        match self.wait(timeout).await? {
            ProtocolMessage::Response(r) => Ok(r),
            other => Err(AppError::Dap(format!("expected response, got {other:?}"))),
        }
    }

    /// Wait for an event.
    ///
    /// # Errors
    ///
    /// As [`Subscription::wait`], plus `AppError::Dap` if a non-event matched.
    pub async fn event(self, timeout: Duration) -> Result<EventMessage> {
        match self.wait(timeout).await? {
            ProtocolMessage::Event(e) => Ok(e),
            other => Err(AppError::Dap(format!("expected event, got {other:?}"))),
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.inbox.cancel(self.id, &self.interest);
        }
    }
}

fn describe(interest: &Interest) -> String {
    match interest {
        Interest::Response { request_seq } => format!("response to request {request_seq}"),
        Interest::Event { names } => format!("event {}", names.join("|")),
    }
}
