//! Debug adapter reader task.
//!
//! Reads Content-Length framed messages from the adapter's stdout via
//! [`FramedRead`] + [`DapCodec`] and pushes each one into the session
//! [`Inbox`]. `output` events are logged as they pass.
//!
//! Malformed frames are logged and skipped; they do **not** stop the task.
//! On EOF, I/O error, or cancellation the inbox is closed so every pending
//! waiter fails promptly instead of running into its timeout.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dap::codec::{DapCodec, InboundFrame};
use crate::dap::inbox::{Delivery, Inbox};
use crate::dap::protocol::{Event, ProtocolMessage};

/// Drive `stdout` until it ends, delivering messages into `inbox`.
pub async fn run_reader<R>(session_id: String, stdout: R, inbox: Arc<Inbox>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, DapCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "dap reader: cancellation received, stopping");
                inbox.close("reader cancelled");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "dap reader: EOF detected");
                        inbox.close("adapter stdout closed");
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "dap reader: stream error, stopping");
                        inbox.close(&format!("stream error: {e}"));
                        break;
                    }

                    Some(Ok(InboundFrame::Malformed(reason))) => {
                        warn!(session_id, reason, "dap reader: malformed frame discarded");
                    }

                    Some(Ok(InboundFrame::Message(message))) => {
                        dispatch(&session_id, &inbox, message);
                    }
                }
            }
        }
    }
}

fn dispatch(session_id: &str, inbox: &Inbox, message: ProtocolMessage) {
    match &message {
        ProtocolMessage::Event(e) => {
            // Output is logged, never awaited, so it is not buffered.
            if let Event::Output { output } = e.kind() {
                debug!(session_id, output = output.trim_end(), "dap: adapter output");
                return;
            }
        }
        ProtocolMessage::Request(r) => {
            // Reverse requests (e.g. runInTerminal) are not supported.
            debug!(session_id, command = %r.command, "dap reader: ignoring reverse request");
            return;
        }
        ProtocolMessage::Response(_) => {}
    }

    let seq = message.seq();
    let delivery = inbox.deliver(message);
    trace!(session_id, seq, ?delivery, "dap reader: message delivered");
    if delivery == Delivery::Dropped {
        debug!(session_id, seq, "dap reader: late response discarded");
    }
}
