//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pupperlink_protocol::payload::{decode_payload, positions_payload};
use pupperlink_protocol::{cobsr, Cmd, Compiler, ContinuityCounter, Decoder, Firmware, Frame};

fn test_data(size: usize) -> Vec<u8> {
    // Every 7th byte is zero so the encoder has groups to split
    (0..size).map(|i| if i % 7 == 0 { 0 } else { i as u8 }).collect()
}

fn bench_cobsr_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("cobsr_encode");

    for size in [16, 64, 250] {
        let data = test_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(cobsr::encode(data)));
        });
    }

    group.finish();
}

fn bench_cobsr_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("cobsr_decode");

    for size in [16, 64, 250] {
        let encoded = cobsr::encode(&test_data(size));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(cobsr::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for size in [0, 24, 200] {
        let frame = Frame::new(Cmd::WRITE, 0x76).with_data(Bytes::from(test_data(size)));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            let mut compiler = Compiler::new(ContinuityCounter::default());
            b.iter(|| black_box(compiler.compile(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    for count in [1, 10, 100] {
        let mut compiler = Compiler::default();
        let frame = Frame::new(Cmd::READ, 0x77).with_data(Bytes::from(test_data(24)));
        let mut stream = Vec::new();
        for _ in 0..count {
            stream.extend_from_slice(&compiler.compile(&frame).unwrap());
        }

        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(stream);
                let mut packets = 0;
                while let Some(packet) = decoder.decode_packet() {
                    black_box(&packet);
                    packets += 1;
                }
                assert_eq!(packets, count);
            });
        });
    }

    group.finish();
}

fn bench_payload_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_decode");
    group.throughput(Throughput::Elements(1));

    let positions = positions_payload(&[512; 12]);
    group.bench_function("servo_words", |b| {
        b.iter(|| black_box(decode_payload(Firmware::Current, 0x77, &positions).unwrap()));
    });

    let six_dof: Vec<u8> = (0..6).flat_map(|i| (i as f32).to_le_bytes()).collect();
    group.bench_function("six_dof", |b| {
        b.iter(|| black_box(decode_payload(Firmware::Current, 0x60, &six_dof).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cobsr_encode,
    bench_cobsr_decode,
    bench_compile,
    bench_decode_stream,
    bench_payload_decode,
);

criterion_main!(benches);
