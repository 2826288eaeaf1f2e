//! IPC codec throughput benchmark.
//!
//! Measures frame writing and reading for typical bz2 request sizes, and
//! the cost of turning a request frame into a typed request.

use bz2_worker::bz2::Bz2Request;
use bz2_worker::ipc::codec::{encode_payload, read_frame, write_frame, MSG_REQUEST};
use bz2_worker::ipc::router::RequestEnvelope;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::Cursor;

const MAX_FRAME: u32 = 1024 * 1024;

fn compress_request() -> Vec<u8> {
    let request = serde_json::json!({
        "id": "3f2c0d9e5b1a4c7e8d6f0a1b2c3d4e5f",
        "service": "bz2",
        "method": "CompressStream",
        "body": {"ifd": 7, "ofd": 8, "blocksize100k": 9, "verbosity": 0, "workfactor": 30},
    });
    encode_payload(&request).unwrap()
}

fn bench_frames(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("frame");
    for &size in &[0usize, 96, 4096] {
        let payload = vec![0x5Au8; size];
        group.bench_with_input(BenchmarkId::new("write", size), &payload, |b, p| {
            b.iter(|| {
                rt.block_on(async {
                    let mut buf = Vec::with_capacity(p.len() + 5);
                    write_frame(&mut buf, MSG_REQUEST, black_box(p)).await.unwrap();
                    buf
                })
            });
        });

        let mut wire = Vec::new();
        rt.block_on(write_frame(&mut wire, MSG_REQUEST, &payload)).unwrap();
        group.bench_with_input(BenchmarkId::new("read", size), &wire, |b, w| {
            b.iter(|| {
                rt.block_on(async {
                    let mut cursor = Cursor::new(black_box(w.as_slice()));
                    read_frame(&mut cursor, MAX_FRAME).await.unwrap()
                })
            });
        });
    }
    group.finish();
}

fn bench_decode_request(c: &mut Criterion) {
    let payload = compress_request();
    c.bench_function("decode_compress_request", |b| {
        b.iter(|| {
            let envelope = RequestEnvelope::decode(black_box(&payload)).unwrap();
            Bz2Request::parse(&envelope.method, envelope.body).unwrap()
        });
    });
}

criterion_group!(benches, bench_frames, bench_decode_request);
criterion_main!(benches);
