//! Request/response correlation and event waiting over one adapter stream.
//!
//! [`DapClient::call`] allocates the next sequence number, registers
//! interest in the matching response *before* writing the request, and then
//! waits. [`DapClient::wait_for`] awaits a named event, claiming an already
//! buffered one first.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::config::DebugConfig;
use crate::dap::codec::DapCodec;
use crate::dap::inbox::{Inbox, Interest, Subscription};
use crate::dap::protocol::{Command, EventMessage, ProtocolMessage, ResponseMessage};
use crate::{AppError, Result};

/// Write half of an adapter connection.
pub type AdapterWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-command timeout selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Applied to every command except `disconnect`.
    pub request: Duration,
    /// Applied to `disconnect`.
    pub disconnect: Duration,
}

impl TimeoutPolicy {
    /// Timeout for `command`; an explicit `override_timeout` always wins.
    #[must_use]
    pub fn for_command(&self, command: &Command, override_timeout: Option<Duration>) -> Duration {
        match override_timeout {
            Some(timeout) => timeout,
            None if command.is_disconnect() => self.disconnect,
            None => self.request,
        }
    }
}

impl From<&DebugConfig> for TimeoutPolicy {
    fn from(config: &DebugConfig) -> Self {
        Self {
            request: config.request_timeout(),
            disconnect: config.disconnect_timeout(),
        }
    }
}

/// Client side of one debug adapter connection.
pub struct DapClient {
    session_id: String,
    next_seq: AtomicI64,
    writer: Mutex<FramedWrite<AdapterWriter, DapCodec>>,
    inbox: Arc<Inbox>,
    timeouts: TimeoutPolicy,
}

impl std::fmt::Debug for DapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapClient")
            .field("session_id", &self.session_id)
            .field("next_seq", &self.next_seq)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl DapClient {
    /// Wrap `writer`; responses and events are read from `inbox`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        writer: AdapterWriter,
        inbox: Arc<Inbox>,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            next_seq: AtomicI64::new(1),
            writer: Mutex::new(FramedWrite::new(writer, DapCodec::new())),
            inbox,
            timeouts,
        }
    }

    /// Session this client belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Inbox fed by the reader task.
    #[must_use]
    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    /// Timeout policy in effect.
    #[must_use]
    pub fn timeouts(&self) -> TimeoutPolicy {
        self.timeouts
    }

    /// Sequence number the next request will use.
    #[must_use]
    pub fn peek_seq(&self) -> i64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    fn allocate_seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Frame and write one message to the adapter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dap("send failed: …")` when the adapter's input is
    /// gone (for example because the process exited).
    pub async fn send(&self, message: ProtocolMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|err| {
            warn!(session_id = %self.session_id, %err, "dap: write to adapter failed");
            AppError::Dap(format!("send failed: {err}"))
        })
    }

    /// Send `command` and wait for its response.
    ///
    /// A response with `success == false` is returned as `Ok`; only
    /// transport failures are errors.
    ///
    /// # Errors
    ///
    /// - `AppError::Dap` when the write fails or the stream closes.
    /// - `AppError::Timeout` when no response arrives in time. A response
    ///   arriving later is discarded.
    pub async fn call(&self, command: Command, timeout: Option<Duration>) -> Result<ResponseMessage> {
        let timeout = self.timeouts.for_command(&command, timeout);
        let seq = self.allocate_seq();
        let name = command.name();

        let pending = self.inbox.subscribe(Interest::Response { request_seq: seq });
        if let Err(err) = self.send(ProtocolMessage::Request(command.into_request(seq))).await {
            pending.withdraw();
            return Err(err);
        }
        debug!(session_id = %self.session_id, seq, command = name, "dap: request sent");

        let response = pending.response(timeout).await.map_err(|err| match err {
            AppError::Timeout(_) => {
                AppError::Timeout(format!("`{name}` (seq {seq}) got no response within {timeout:?}"))
            }
            other => other,
        })?;

        if !response.success {
            debug!(
                session_id = %self.session_id,
                seq,
                command = name,
                message = ?response.message,
                "dap: request unsuccessful"
            );
        }
        Ok(response)
    }

    /// Register interest in any of `names` without waiting yet.
    pub fn subscribe_events(&self, names: &[&str]) -> Subscription<'_> {
        self.inbox.subscribe(Interest::events(names))
    }

    /// Register interest in any of `names`, discarding buffered events of
    /// those names first. Returns the discarded events.
    pub fn subscribe_fresh_events(&self, names: &[&str]) -> (Subscription<'_>, Vec<EventMessage>) {
        let (subscription, stale) = self.inbox.subscribe_fresh(Interest::events(names));
        let stale = stale
            .into_iter()
            .filter_map(|message| match message {
                ProtocolMessage::Event(event) => Some(event),
                _ => None,
            })
            .collect();
        (subscription, stale)
    }

    /// Wait up to `timeout` for an event named one of `names`.
    ///
    /// # Errors
    ///
    /// `AppError::Timeout` when no such event arrives in time, or
    /// `AppError::Dap` when the stream closes first.
    pub async fn wait_for(&self, names: &[&str], timeout: Duration) -> Result<EventMessage> {
        self.subscribe_events(names).event(timeout).await
    }
}
