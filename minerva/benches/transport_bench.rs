// Minerva core benchmarks using criterion.
//
// Measures:
//   - Frame encode / decode throughput
//   - SACK apply throughput on a growing send queue
//   - StreamTracker build/get throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use minerva::application::BasicMinervaFactory;
use minerva::frame::Frame;
use minerva::send_queue::SendQueue;
use minerva::{StreamId, StreamTracker};

// ---------------------------------------------------------------------------
// Frame encode throughput
// ---------------------------------------------------------------------------

fn bench_frame_encode(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 8192, 65536];

    let mut group = c.benchmark_group("frame_encode");
    for &size in sizes {
        let payload = json!("x".repeat(size));
        let frame = Frame::Box(payload);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size}B")), &frame, |b, f| {
            b.iter(|| {
                black_box(f.encode().unwrap());
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Frame decode throughput
// ---------------------------------------------------------------------------

fn bench_frame_decode(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 8192, 65536];

    let mut group = c.benchmark_group("frame_decode");
    for &size in sizes {
        let payload = json!("x".repeat(size));
        let encoded = Frame::Box(payload).encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size}B")), &encoded, |b, data| {
            b.iter(|| {
                black_box(Frame::decode(black_box(data)).unwrap());
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Boxes/SACK frame encode/decode
// ---------------------------------------------------------------------------

fn bench_boxes_and_sack_frames(c: &mut Criterion) {
    let items: Vec<(u64, serde_json::Value)> = (0..100).map(|i| (i, json!({"n": i}))).collect();
    let boxes = Frame::Boxes(items);

    c.bench_function("boxes_frame_encode_100_items", |b| {
        b.iter(|| {
            black_box(boxes.encode().unwrap());
        });
    });

    let encoded = boxes.encode().unwrap();
    c.bench_function("boxes_frame_decode_100_items", |b| {
        b.iter(|| {
            black_box(Frame::decode(black_box(&encoded)).unwrap());
        });
    });

    let sack = Frame::Sack { ack: Some(500), sack: (501..600).collect() };
    c.bench_function("sack_frame_roundtrip", |b| {
        b.iter(|| {
            let encoded = sack.encode().unwrap();
            black_box(Frame::decode(black_box(&encoded)).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// SendQueue sack-apply throughput
// ---------------------------------------------------------------------------

fn bench_send_queue_sack_apply(c: &mut Criterion) {
    c.bench_function("send_queue_handle_sack_1000_noncontiguous", |b| {
        b.iter(|| {
            let mut queue = SendQueue::new();
            queue.extend((0..1000).map(|i| json!(i)));
            let sack: Vec<u64> = (0..1000).step_by(2).collect();
            black_box(queue.handle_sack(None, &sack).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// StreamTracker build/get throughput
// ---------------------------------------------------------------------------

fn bench_tracker_dispatch(c: &mut Criterion) {
    c.bench_function("tracker_build_100_streams", |b| {
        b.iter(|| {
            let tracker = StreamTracker::new(Arc::new(BasicMinervaFactory));
            for i in 0..100u32 {
                let id = StreamId::new(Bytes::from(format!("{i:020}"))).unwrap();
                black_box(tracker.build_stream(id).unwrap());
            }
        });
    });

    c.bench_function("tracker_get_existing_stream", |b| {
        let tracker = StreamTracker::new(Arc::new(BasicMinervaFactory));
        let id = StreamId::new(Bytes::from("a".repeat(20))).unwrap();
        tracker.build_stream(id.clone()).unwrap();

        b.iter(|| {
            black_box(tracker.get_stream(black_box(&id)).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group! {
    name = transport_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_frame_encode,
        bench_frame_decode,
        bench_boxes_and_sack_frames,
        bench_send_queue_sack_apply,
        bench_tracker_dispatch
}

criterion_main!(transport_benches);
