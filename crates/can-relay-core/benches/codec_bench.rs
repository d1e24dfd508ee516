//! Criterion benchmarks for the relay wire codec.
//!
//! The forwarding loop encodes every bus frame once per broadcast and every
//! session decodes every inbound command, so these are the relay's hot paths.
//!
//! Run with:
//! ```bash
//! cargo bench --package can-relay-core --bench codec_bench
//! ```

use can_relay_core::{
    decode_record, encode_command, encode_event, Command, Direction, Event, Frame, LineFramer,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_event(len: usize) -> Event {
    let data = (0..len as u8).collect();
    Event::Frame(Frame::with_timestamp(0x123, data, Direction::Rx, 1_700_000_000_000_000).unwrap())
}

fn make_extended_event() -> Event {
    Event::Frame(
        Frame::with_timestamp(0x18DA_F110, vec![0x02, 0x10, 0x03], Direction::Rx, 0).unwrap(),
    )
}

fn make_send() -> Command {
    Command::SendFrame {
        id: 0x7DF,
        data: vec![0x02, 0x01, 0x0C, 0, 0, 0, 0, 0],
    }
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode_event(c: &mut Criterion) {
    let events: &[(&str, Event)] = &[
        ("empty", make_event(0)),
        ("4 bytes", make_event(4)),
        ("8 bytes", make_event(8)),
        ("extended id", make_extended_event()),
    ];

    let mut group = c.benchmark_group("encode_event");
    for (name, event) in events {
        group.bench_with_input(BenchmarkId::new("frame", name), event, |b, event| {
            b.iter(|| encode_event(black_box(event)).expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let event_bytes = encode_event(&make_event(8)).expect("encode must succeed for setup");
    let command_bytes = encode_command(&make_send()).expect("encode must succeed for setup");

    let mut group = c.benchmark_group("decode_record");
    group.bench_function("event", |b| {
        b.iter(|| decode_record(black_box(&event_bytes)).expect("decode must succeed"))
    });
    group.bench_function("send_message", |b| {
        b.iter(|| decode_record(black_box(&command_bytes)).expect("decode must succeed"))
    });
    group.finish();
}

/// Frames and decodes a batch of 100 records delivered in one read.
fn bench_framed_stream(c: &mut Criterion) {
    let record = encode_event(&make_event(8)).expect("encode must succeed for setup");
    let chunk: Vec<u8> = record.iter().copied().cycle().take(record.len() * 100).collect();

    c.bench_function("framed_stream_100", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            framer.push(black_box(&chunk));
            let mut n = 0;
            while let Some(rec) = framer.next_record().expect("framing must succeed") {
                decode_record(&rec).expect("decode must succeed");
                n += 1;
            }
            n
        })
    });
}

criterion_group!(benches, bench_encode_event, bench_decode, bench_framed_stream);
criterion_main!(benches);
