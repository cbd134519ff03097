//! Codec benchmarks for weft-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use weft_data::Value;
use weft_protocol::{codec, Frame, DEFAULT_MAX_FRAME_BYTES};

fn small_frame() -> Frame {
    Frame::data("zeek/events/test", Value::string(vec![0u8; 64]))
}

fn nested_frame() -> Frame {
    let value = Value::table((0..16).map(|i| {
        (
            Value::Count(i),
            Value::vector([Value::from("payload"), Value::Real(0.5)]),
        )
    }));
    Frame::data("zeek/events/nested", value)
}

fn bench_encode_small(c: &mut Criterion) {
    let frame = small_frame();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("data_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame), DEFAULT_MAX_FRAME_BYTES))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let frame = small_frame();
    let encoded = codec::encode(&frame, DEFAULT_MAX_FRAME_BYTES).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("data_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded), DEFAULT_MAX_FRAME_BYTES))
    });
    group.finish();
}

fn bench_roundtrip_nested(c: &mut Criterion) {
    let frame = nested_frame();

    c.bench_function("roundtrip_nested_table", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame), DEFAULT_MAX_FRAME_BYTES).unwrap();
            codec::decode(black_box(&encoded), DEFAULT_MAX_FRAME_BYTES).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip_nested
);
criterion_main!(benches);
