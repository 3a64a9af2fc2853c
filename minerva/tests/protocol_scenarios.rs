//! Integration-level tests exercising `Transport`'s full `framesReceived`
//! dispatch against a real `StreamTracker`, rather than any one module in
//! isolation.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use minerva::application::BasicMinervaFactory;
use minerva::frame::Frame;
use minerva::transport::{accept_all, Transport};
use minerva::{StreamId, StreamTracker};

fn tracker() -> Arc<StreamTracker> {
    StreamTracker::new(Arc::new(BasicMinervaFactory))
}

fn feed_framed(transport: &Transport, payload: &[u8]) {
    let mut framed = format!("{}:", payload.len()).into_bytes();
    framed.extend_from_slice(payload);
    framed.push(b',');
    let _ = transport.receive_bytes(&framed);
}

fn drain_frames(transport: &Transport) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(chunk) = transport.pop_outbound() {
        let colon = chunk.iter().position(|&b| b == b':').expect("length-prefixed chunk");
        let len: usize = std::str::from_utf8(&chunk[..colon]).unwrap().parse().unwrap();
        let payload = &chunk[colon + 1..colon + 1 + len];
        frames.push(Frame::decode(payload).unwrap());
    }
    frames
}

async fn settle() {
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn minimal_hello_attaches_and_delivers_boxes_with_seqnum_anchor() {
    let tracker = tracker();
    let transport = Transport::new_socket(1, None, accept_all(), tracker.clone());
    transport.receive_bytes(b"<int32/>\n").unwrap();

    let id = "c".repeat(20);
    let hello = json!([5, {"v": 2, "i": id, "n": 0, "m": 1_000_000u64, "w": true}]);
    feed_framed(&transport, hello.to_string().as_bytes());
    settle().await;
    assert!(!transport.is_terminating());

    feed_framed(&transport, json!([6, null]).to_string().as_bytes());

    let stream_id = StreamId::new(Bytes::from("c".repeat(20))).unwrap();
    let stream = tracker.get_stream(&stream_id).unwrap();
    stream.send_boxes(vec![json!("hello")]).unwrap();

    let frames = drain_frames(&transport);
    assert_eq!(frames, vec![Frame::SeqNum(0), Frame::Box(json!("hello"))]);
}

#[tokio::test]
async fn wrong_protocol_version_is_killed_then_closed() {
    let transport = Transport::new_socket(1, None, accept_all(), tracker());
    transport.receive_bytes(b"<int32/>\n").unwrap();

    let hello = json!([5, {"v": 1, "i": "a".repeat(20), "n": 0, "m": 1_000u64}]);
    feed_framed(&transport, hello.to_string().as_bytes());

    assert!(transport.is_terminating());
    assert_eq!(drain_frames(&transport), vec![Frame::TkInvalidFrameTypeOrArguments, Frame::YouCloseIt]);
}

#[tokio::test]
async fn sack_naming_an_unsent_sequence_is_killed() {
    let transport = Transport::new_socket(1, None, accept_all(), tracker());
    transport.receive_bytes(b"<int32/>\n").unwrap();

    let hello = json!([5, {"v": 2, "i": "b".repeat(20), "n": 0, "m": 1_000u64, "w": true}]);
    feed_framed(&transport, hello.to_string().as_bytes());
    settle().await;
    assert!(!transport.is_terminating());

    feed_framed(&transport, json!([4, 5, []]).to_string().as_bytes());

    assert!(transport.is_terminating());
    let frames = drain_frames(&transport);
    assert!(frames.contains(&Frame::TkAckedUnsentBoxes));
    assert!(frames.contains(&Frame::YouCloseIt));
}

#[tokio::test]
async fn you_close_it_from_a_non_http_client_is_rejected() {
    let transport = Transport::new_socket(1, None, accept_all(), tracker());
    transport.receive_bytes(b"<int32/>\n").unwrap();

    let hello = json!([5, {"v": 2, "i": "d".repeat(20), "n": 0, "m": 1_000u64, "w": true}]);
    feed_framed(&transport, hello.to_string().as_bytes());
    settle().await;

    feed_framed(&transport, json!([11]).to_string().as_bytes());

    assert!(transport.is_terminating());
    let frames = drain_frames(&transport);
    assert!(frames.contains(&Frame::TkInvalidFrameTypeOrArguments));
}

#[tokio::test]
async fn stream_reset_tears_down_the_transport() {
    let tracker = tracker();
    let transport = Transport::new_socket(1, None, accept_all(), tracker.clone());
    transport.receive_bytes(b"<int32/>\n").unwrap();

    let id = "e".repeat(20);
    let hello = json!([5, {"v": 2, "i": id, "n": 0, "m": 1_000_000u64, "w": true}]);
    feed_framed(&transport, hello.to_string().as_bytes());
    settle().await;

    let stream_id = StreamId::new(Bytes::from("e".repeat(20))).unwrap();
    let stream = tracker.get_stream(&stream_id).unwrap();
    stream.reset("done").unwrap();

    let frames = drain_frames(&transport);
    assert!(matches!(frames.first(), Some(Frame::Reset { application_level: true, .. })));
    assert_eq!(frames.last(), Some(&Frame::YouCloseIt));
}
