//! # Transaction Processor Benchmarks
//!
//! Hot paths on every execution request:
//!
//! | Path | Work per request |
//! |------|------------------|
//! | Frame codec | encode + decode of each envelope |
//! | Correlation table | register + resolve per state call |
//! | Namespace hashing | one SHA-512 per derived address |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qc_18_transaction_processor::CorrelationTable;
use shared_crypto::{make_address, namespace_prefix};
use shared_types::codec::{decode_body, encode_frame, DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_LEN};
use shared_types::{
    MessageKind, RequestEnvelope, StateStatus, TpProcessRequest, TpStateEntry, TpStateGetResponse,
    TransactionHeader,
};

// ============================================================================
// FRAME CODEC
// ============================================================================

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame-codec");

    for size in [256usize, 4 * 1024, 64 * 1024] {
        let request = TpProcessRequest {
            header: TransactionHeader {
                family_name: "intkey".into(),
                family_version: "1.0".into(),
                inputs: vec![make_address("1cf126", "foo").unwrap()],
                ..TransactionHeader::default()
            },
            payload: vec![0xab; size],
            signature: "00".repeat(64),
            context_id: "ctx".into(),
        };
        let envelope = RequestEnvelope::request(&request).unwrap();
        let frame = encode_frame(&envelope, DEFAULT_MAX_FRAME_LEN).unwrap();

        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &envelope, |b, env| {
            b.iter(|| black_box(encode_frame(env, DEFAULT_MAX_FRAME_LEN).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| black_box(decode_body(&frame[FRAME_HEADER_LEN..]).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// CORRELATION TABLE
// ============================================================================

fn bench_correlation_round_trip(c: &mut Criterion) {
    let table = CorrelationTable::new();
    let response = TpStateGetResponse {
        entries: vec![TpStateEntry {
            address: make_address("1cf126", "foo").unwrap(),
            data: vec![1; 32],
        }],
        status: StateStatus::Ok,
    };
    let template = RequestEnvelope::request(&response).unwrap();

    c.bench_function("correlation-register-resolve", |b| {
        b.iter(|| {
            let mut reply = template.clone();
            reply.correlation_id = shared_types::CorrelationId::new();
            let waiter = table
                .register(reply.correlation_id, MessageKind::TpStateGetResponse)
                .unwrap();
            table.resolve(reply.correlation_id, reply).unwrap();
            black_box(waiter.id())
        })
    });
}

// ============================================================================
// NAMESPACE HASHING
// ============================================================================

fn bench_namespace_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("namespace-hashing");
    group.bench_function("prefix", |b| b.iter(|| black_box(namespace_prefix("intkey"))));
    group.bench_function("address", |b| {
        b.iter(|| black_box(make_address("1cf126", "some-key").unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_codec,
    bench_correlation_round_trip,
    bench_namespace_hashing
);
criterion_main!(benches);
