//! Unit tests for request/response correlation in `DapClient`.
//!
//! The adapter side is driven by hand over an in-memory duplex stream so
//! each test decides exactly when and in which order responses arrive.
//!
//! Covers:
//! - out-of-order responses reach the matching caller
//! - sequence numbers are strictly increasing
//! - unsuccessful responses are returned, not raised
//! - late responses for timed-out calls are dropped
//! - a closed stream fails pending calls promptly

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use noir_workbench::dap::client::{DapClient, TimeoutPolicy};
use noir_workbench::dap::codec::{DapCodec, InboundFrame};
use noir_workbench::dap::inbox::Inbox;
use noir_workbench::dap::protocol::{
    Command, ProtocolMessage, RequestMessage, ResponseMessage, StepKind,
};
use noir_workbench::dap::reader::run_reader;
use noir_workbench::AppError;

struct Peer {
    requests: FramedRead<ReadHalf<DuplexStream>, DapCodec>,
    replies: FramedWrite<WriteHalf<DuplexStream>, DapCodec>,
    seq: i64,
}

impl Peer {
    async fn next_request(&mut self) -> RequestMessage {
        match self.requests.next().await {
            Some(Ok(InboundFrame::Message(ProtocolMessage::Request(r)))) => r,
            other => panic!("expected request, got {other:?}"),
        }
    }

    async fn reply(&mut self, request: &RequestMessage, success: bool, body: Value) {
        self.seq += 1;
        let response = ResponseMessage {
            seq: self.seq,
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message: (!success).then(|| format!("{} failed", request.command)),
            body,
        };
        self.replies
            .send(ProtocolMessage::Response(response))
            .await
            .expect("reply");
    }
}

fn policy() -> TimeoutPolicy {
    TimeoutPolicy {
        request: Duration::from_secs(5),
        disconnect: Duration::from_secs(15),
    }
}

fn connect() -> (DapClient, Peer, CancellationToken) {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (peer_read, peer_write) = tokio::io::split(peer_io);

    let inbox = Arc::new(Inbox::new("test"));
    let cancel = CancellationToken::new();
    tokio::spawn(run_reader(
        "test".to_owned(),
        client_read,
        Arc::clone(&inbox),
        cancel.clone(),
    ));

    let client = DapClient::new("test", Box::new(client_write), inbox, policy());
    let peer = Peer {
        requests: FramedRead::new(peer_read, DapCodec::new()),
        replies: FramedWrite::new(peer_write, DapCodec::new()),
        seq: 0,
    };
    (client, peer, cancel)
}

fn stack_trace() -> Command {
    Command::StackTrace { thread_id: 1 }
}

// ── Correlation ─────────────────────────────────────────────────────────────

/// Two concurrent calls answered in reverse order each receive the response
/// carrying their own sequence number.
#[tokio::test]
async fn out_of_order_responses_reach_matching_callers() {
    let (client, mut peer, _cancel) = connect();

    let adapter = async {
        let first = peer.next_request().await;
        let second = peer.next_request().await;
        peer.reply(&second, true, json!({ "tag": "second" })).await;
        peer.reply(&first, true, json!({ "tag": "first" })).await;
        (first.seq, second.seq)
    };

    let calls = async {
        tokio::join!(
            client.call(stack_trace(), None),
            client.call(Command::Scopes { frame_id: 0 }, None),
        )
    };

    let ((first_seq, second_seq), (a, b)) = tokio::join!(adapter, calls);
    let a = a.expect("first call");
    let b = b.expect("second call");

    assert_eq!(a.request_seq, first_seq);
    assert_eq!(b.request_seq, second_seq);
    assert_eq!(a.body["tag"], "first");
    assert_eq!(b.body["tag"], "second");
    assert_eq!(a.command, "stackTrace");
    assert_eq!(b.command, "scopes");
}

/// Sequence numbers start at 1 and increase by one per request.
#[tokio::test]
async fn sequence_numbers_increase_strictly() {
    let (client, mut peer, _cancel) = connect();
    assert_eq!(client.peek_seq(), 1);

    let adapter = async {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let request = peer.next_request().await;
            seen.push(request.seq);
            peer.reply(&request, true, Value::Null).await;
        }
        seen
    };
    let calls = async {
        for _ in 0..3 {
            client.call(stack_trace(), None).await.expect("call");
        }
    };

    let (seen, ()) = tokio::join!(adapter, calls);
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(client.peek_seq(), 4);
}

/// `success: false` is a normal result carrying the adapter's message.
#[tokio::test]
async fn unsuccessful_response_is_returned() {
    let (client, mut peer, _cancel) = connect();

    let adapter = async {
        let request = peer.next_request().await;
        peer.reply(&request, false, Value::Null).await;
    };
    let step = Command::Step {
        kind: StepKind::Next,
        thread_id: 1,
    };
    let ((), response) = tokio::join!(adapter, client.call(step, None));

    let response = response.expect("transport succeeded");
    assert!(!response.success);
    assert_eq!(response.failure_message(), "next failed");
}

// ── Timeouts ────────────────────────────────────────────────────────────────

/// A timed-out call fails with `Timeout`; its late response is dropped and
/// never handed to the next caller.
#[tokio::test]
async fn late_response_is_dropped() {
    let (client, mut peer, _cancel) = connect();

    let err = client
        .call(stack_trace(), Some(Duration::from_millis(20)))
        .await
        .expect_err("no reply was sent");
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    assert_eq!(client.inbox().listener_count(), 0);

    let abandoned = peer.next_request().await;

    let adapter = async {
        peer.reply(&abandoned, true, json!({ "tag": "late" })).await;
        let current = peer.next_request().await;
        peer.reply(&current, true, json!({ "tag": "current" })).await;
    };
    let ((), response) = tokio::join!(adapter, client.call(stack_trace(), None));

    let response = response.expect("second call");
    assert_eq!(response.body["tag"], "current");
    assert_eq!(response.request_seq, abandoned.seq + 1);
    assert_eq!(client.inbox().buffered_len(), 0, "late response must not be buffered");
    assert_eq!(client.inbox().abandoned_len(), 0);
}

/// `disconnect` gets the longer timeout unless the caller overrides it.
#[test]
fn disconnect_uses_longer_timeout() {
    let policy = policy();
    let disconnect = Command::Disconnect {
        terminate_debuggee: true,
    };
    assert_eq!(policy.for_command(&stack_trace(), None), Duration::from_secs(5));
    assert_eq!(policy.for_command(&disconnect, None), Duration::from_secs(15));
    assert_eq!(
        policy.for_command(&disconnect, Some(Duration::from_secs(1))),
        Duration::from_secs(1)
    );
}

// ── Stream closure ──────────────────────────────────────────────────────────

/// When the adapter's output ends, a pending call fails with a `Dap` error
/// well before its timeout.
#[tokio::test]
async fn closed_stream_fails_pending_call() {
    let (client, peer, _cancel) = connect();

    let adapter = async move {
        let mut peer = peer;
        let _request = peer.next_request().await;
        drop(peer);
    };

    let started = std::time::Instant::now();
    let ((), result) = tokio::join!(adapter, client.call(stack_trace(), None));

    let err = result.expect_err("stream closed");
    assert!(matches!(err, AppError::Dap(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Writing after the adapter has gone surfaces as a failed send.
#[tokio::test]
async fn send_to_closed_adapter_fails() {
    let (client, peer, cancel) = connect();
    drop(peer);
    cancel.cancel();

    let err = client
        .call(stack_trace(), None)
        .await
        .expect_err("adapter gone");
    assert!(matches!(err, AppError::Dap(_)), "got {err:?}");
}

/// A request that could not be written leaves no listener behind and is
/// not remembered as abandoned.
#[tokio::test]
async fn failed_send_leaves_nothing_pending() {
    let (client_io, peer_io) = tokio::io::duplex(1024);
    drop(peer_io);
    let inbox = Arc::new(Inbox::new("test"));
    let client = DapClient::new("test", Box::new(client_io), Arc::clone(&inbox), policy());

    let err = client
        .call(stack_trace(), None)
        .await
        .expect_err("adapter gone");

    assert!(matches!(err, AppError::Dap(_)), "got {err:?}");
    assert_eq!(inbox.listener_count(), 0);
    assert_eq!(inbox.abandoned_len(), 0);
}
