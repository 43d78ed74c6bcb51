use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_bus::canonical::canonical_hash;
use event_bus::{EventClass, EventEnvelope};
use serde_json::json;

fn sample_envelope() -> EventEnvelope {
    EventEnvelope::build(
        "payout.paid",
        EventClass::Domain,
        json!({
            "payout_id": "po_1",
            "user_id": "user-1",
            "submission_id": "sub-1",
            "amount_minor": 12525,
            "currency": "USD",
            "method": "standard"
        }),
        "po_1",
        "data.payout_id",
        "trace-bench",
        "1.0.0",
        "payouts",
        Utc::now(),
    )
}

fn bench_validate(c: &mut Criterion) {
    let envelope = sample_envelope();
    c.bench_function("envelope_validate", |b| {
        b.iter(|| black_box(&envelope).validate())
    });
}

fn bench_decode_validated(c: &mut Criterion) {
    let bytes = sample_envelope().encode().expect("encode");
    c.bench_function("envelope_decode_validated", |b| {
        b.iter(|| EventEnvelope::decode_validated(black_box(&bytes)))
    });
}

fn bench_canonical_hash(c: &mut Criterion) {
    let request = json!({
        "operation": "create_payout",
        "request": {
            "user_id": "user-1",
            "submission_id": "sub-1",
            "amount": 125.25,
            "currency": "USD",
            "method": "standard",
            "scheduled_at": "2026-02-10T00:00:00Z"
        }
    });
    c.bench_function("canonical_request_hash", |b| {
        b.iter(|| canonical_hash(black_box(&request)))
    });
}

criterion_group!(benches, bench_validate, bench_decode_validated, bench_canonical_hash);
criterion_main!(benches);
