//! Decode and encode throughput
//!
//! Covers the paths a connection worker runs per frame: in-place decode into
//! a recycled packet, resynchronisation past leading noise, and the error
//! path for a truncated frame.

use codec::{build_data, build_heartbeat, decode_into, encode, encode_into, Packet, DEFAULT_SYNCWORD};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let heartbeat = encode(&build_heartbeat(DEFAULT_SYNCWORD, 7, 0));
    let data = encode(&build_data(DEFAULT_SYNCWORD, 3, 7, vec![0x42; 512]));
    let mut noisy = vec![0u8; 256];
    noisy.extend_from_slice(&data);
    let truncated = data[..data.len() - 1].to_vec();

    let mut packet = Packet::default();
    group.bench_function("heartbeat", |b| {
        b.iter(|| black_box(decode_into(&mut packet, black_box(&heartbeat), DEFAULT_SYNCWORD)))
    });
    group.bench_function("data_512", |b| {
        b.iter(|| black_box(decode_into(&mut packet, black_box(&data), DEFAULT_SYNCWORD)))
    });
    group.bench_function("data_512_after_noise", |b| {
        b.iter(|| black_box(decode_into(&mut packet, black_box(&noisy), DEFAULT_SYNCWORD)))
    });
    group.bench_function("truncated", |b| {
        b.iter(|| black_box(decode_into(&mut packet, black_box(&truncated), DEFAULT_SYNCWORD)))
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let data = build_data(DEFAULT_SYNCWORD, 3, 7, vec![0x42; 512]);
    let mut out = Vec::with_capacity(1024);
    group.bench_function("data_512_reused_buffer", |b| {
        b.iter(|| {
            out.clear();
            encode_into(black_box(&data), &mut out);
            black_box(out.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
