//! Unit tests for event waiting on the inbox.
//!
//! Covers:
//! - an event buffered before the wait resolves immediately
//! - a buffered event is observed exactly once
//! - a waiter registered first receives the event directly
//! - waits time out, and fail promptly on a closed stream

use std::time::Duration;

use serde_json::{json, Value};

use noir_workbench::dap::inbox::{Delivery, Inbox, Interest};
use noir_workbench::dap::protocol::{Event, EventMessage, ProtocolMessage};
use noir_workbench::AppError;

fn event(seq: i64, name: &str, body: Value) -> ProtocolMessage {
    ProtocolMessage::Event(EventMessage {
        seq,
        event: name.into(),
        body,
    })
}

// ── Buffered events ─────────────────────────────────────────────────────────

/// A `stopped` event that arrived before anyone waited is returned without
/// waiting at all.
#[tokio::test]
async fn buffered_event_resolves_immediately() {
    let inbox = Inbox::new("s");
    let delivered = inbox.deliver(event(7, "stopped", json!({ "reason": "entry", "threadId": 1 })));
    assert_eq!(delivered, Delivery::Buffered);

    let got = inbox
        .subscribe(Interest::events(&["stopped"]))
        .event(Duration::ZERO)
        .await
        .expect("buffered event");

    assert_eq!(got.seq, 7);
    assert!(matches!(got.kind(), Event::Stopped(body) if body.reason == "entry"));
    assert_eq!(inbox.buffered_len(), 0);
}

/// Once claimed, a buffered event is gone; a second waiter times out.
#[tokio::test]
async fn buffered_event_is_claimed_once() {
    let inbox = Inbox::new("s");
    inbox.deliver(event(1, "initialized", Value::Null));

    inbox
        .subscribe(Interest::events(&["initialized"]))
        .event(Duration::ZERO)
        .await
        .expect("first waiter");

    let err = inbox
        .subscribe(Interest::events(&["initialized"]))
        .event(Duration::from_millis(10))
        .await
        .expect_err("already claimed");
    assert!(matches!(err, AppError::Timeout(_)));
}

/// Unrelated buffered messages are skipped; the oldest match is claimed.
#[tokio::test]
async fn oldest_matching_event_is_claimed() {
    let inbox = Inbox::new("s");
    inbox.deliver(event(1, "initialized", Value::Null));
    inbox.deliver(event(2, "stopped", json!({ "reason": "entry" })));
    inbox.deliver(event(3, "stopped", json!({ "reason": "step" })));

    let got = inbox
        .subscribe(Interest::events(&["stopped", "terminated"]))
        .event(Duration::ZERO)
        .await
        .expect("match");
    assert_eq!(got.seq, 2);
    assert_eq!(inbox.buffered_len(), 2);
}

// ── Live events ─────────────────────────────────────────────────────────────

/// An event arriving after the waiter registered is dispatched to it and
/// not buffered.
#[tokio::test]
async fn registered_waiter_receives_event() {
    let inbox = Inbox::new("s");
    let waiter = inbox.subscribe(Interest::events(&["terminated", "exited"]));
    assert_eq!(inbox.listener_count(), 1);

    assert_eq!(
        inbox.deliver(event(4, "terminated", Value::Null)),
        Delivery::Dispatched
    );
    let got = waiter.event(Duration::from_secs(1)).await.expect("dispatched");
    assert_eq!(got.event, "terminated");
    assert_eq!(inbox.buffered_len(), 0);
    assert_eq!(inbox.listener_count(), 0);
}

/// A wait that times out deregisters itself, so the event that finally
/// arrives is buffered for the next waiter.
#[tokio::test]
async fn timed_out_waiter_is_deregistered() {
    let inbox = Inbox::new("s");
    let err = inbox
        .subscribe(Interest::events(&["stopped"]))
        .event(Duration::from_millis(10))
        .await
        .expect_err("nothing delivered");
    assert!(matches!(err, AppError::Timeout(_)));
    assert_eq!(inbox.listener_count(), 0);

    assert_eq!(inbox.deliver(event(5, "stopped", Value::Null)), Delivery::Buffered);
}

/// Closing the inbox fails pending and future waits with a `Dap` error.
#[tokio::test]
async fn closed_inbox_fails_waiters() {
    let inbox = Inbox::new("s");
    let pending = inbox.subscribe(Interest::events(&["stopped"]));
    inbox.close("adapter stdout closed");

    let err = pending
        .event(Duration::from_secs(5))
        .await
        .expect_err("closed");
    assert!(err.to_string().contains("adapter stdout closed"), "{err}");

    let err = inbox
        .subscribe(Interest::events(&["stopped"]))
        .event(Duration::from_secs(5))
        .await
        .expect_err("closed");
    assert!(matches!(err, AppError::Dap(_)));
}

/// Messages buffered before closure can still be claimed afterwards.
#[tokio::test]
async fn buffered_event_survives_close() {
    let inbox = Inbox::new("s");
    inbox.deliver(event(1, "terminated", Value::Null));
    inbox.close("eof");

    let got = inbox
        .subscribe(Interest::events(&["terminated"]))
        .event(Duration::ZERO)
        .await
        .expect("buffered before close");
    assert_eq!(got.event, "terminated");
}
