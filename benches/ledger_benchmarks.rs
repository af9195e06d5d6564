//! Benchmarks for ledger append and verification throughput

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use uuid::Uuid;

use ddge::{
    BincodeCodec, ContentHash, EventType, ExecutionStatus, InMemoryLog, TraceDraft, TraceLedger,
    Version,
};

fn draft(n: u64) -> TraceDraft {
    TraceDraft {
        trace_id: Uuid::new_v4(),
        event_type: EventType::Execution,
        function_id: "loan_eligibility".to_string(),
        version: Version::new(1, 0, 0),
        function_hash: ContentHash([1; 32]),
        caller_id: format!("caller-{}", n % 50),
        timestamp: Utc::now(),
        status: ExecutionStatus::Ok,
        error: None,
        input_hash: ContentHash([(n % 251) as u8; 32]),
        output_hash: Some(ContentHash([((n + 1) % 251) as u8; 32])),
        feature_snapshot_ref: None,
        governance: None,
    }
}

fn fresh_ledger() -> TraceLedger {
    TraceLedger::open(Arc::new(InMemoryLog::new()), Box::new(BincodeCodec::new())).unwrap()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_append");
    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let ledger = fresh_ledger();
                for n in 0..size {
                    black_box(ledger.append(draft(n)).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_verify_integrity(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_verify_integrity");
    for size in [100u64, 1_000, 10_000] {
        let ledger = fresh_ledger();
        for n in 0..size {
            ledger.append(draft(n)).unwrap();
        }
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ledger, |b, ledger| {
            b.iter(|| black_box(ledger.verify_integrity(0, None).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_verify_integrity);
criterion_main!(benches);
