//! Performance benchmarks for query matching and fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oplog_subs::{
    CompiledFilter, EnrichedEntry, FanoutHub, HubConfig, LogEntry, NamespacePattern, Outbound,
    Position, SubscribeRequest, SubscriptionTag, WireFormat,
};
use serde_json::json;

fn sample_document() -> serde_json::Value {
    json!({
        "_id": "tom",
        "name": "tom",
        "weighs": 41,
        "owner": {"name": "ann", "address": {"city": "oslo"}},
        "tags": ["grey", "indoor", "old"],
        "visits": [{"vet": "a", "cost": 10}, {"vet": "b", "cost": 80}]
    })
}

/// Benchmark filter compilation
fn bench_query_compile(c: &mut Criterion) {
    let query = json!({
        "weighs": {"$gt": 40, "$lt": 45},
        "owner.address.city": "oslo",
        "visits.vet": {"$in": ["a", "c"]}
    });

    c.bench_function("query_compile", |b| {
        b.iter(|| black_box(CompiledFilter::compile(&query).unwrap()));
    });
}

/// Benchmark matching by query shape
fn bench_query_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_match");
    let document = sample_document();

    let queries = [
        ("literal", json!({"name": "tom"})),
        ("range", json!({"weighs": {"$gt": 40, "$lt": 45}})),
        ("nested", json!({"owner.address.city": "oslo"})),
        ("in_list", json!({"name": {"$in": ["felix", "tom"]}})),
        ("array_of_objects", json!({"visits.cost": {"$gte": 50}})),
        ("miss", json!({"name": "felix", "weighs": 41})),
    ];

    for (name, query) in queries {
        let filter = CompiledFilter::compile(&query).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(filter.matches(&document)));
        });
    }

    group.finish();
}

/// Benchmark namespace pattern matching
fn bench_namespace_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("namespace_match");

    for pattern in ["*", "test.cats", "*.cats", "prod_*.c*s"] {
        let compiled = NamespacePattern::compile(pattern).unwrap();
        group.bench_with_input(BenchmarkId::new("pattern", pattern), &compiled, |b, p| {
            b.iter(|| black_box(p.matches("prod_eu.cats")));
        });
    }

    group.finish();
}

/// Benchmark routing one entry across varying subscription counts
fn bench_hub_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_route");

    for subscriptions in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("subscriptions", subscriptions),
            &subscriptions,
            |b, &count| {
                let hub = FanoutHub::new(HubConfig::default());
                // One in ten subscriptions matches
                let handles: Vec<_> = (0..count)
                    .map(|i| {
                        hub.subscribe(
                            SubscribeRequest::new(format!("sub-{}", i))
                                .namespace("*.cats")
                                .query(json!({"weighs": {"$gt": (i % 10) * 10 + 35}})),
                        )
                        .unwrap()
                    })
                    .collect();
                let entry = EnrichedEntry::passthrough(
                    LogEntry::insert("test.cats", Position(1), sample_document()).unwrap(),
                );

                b.iter(|| {
                    hub.route(black_box(&entry));
                    for handle in &handles {
                        while handle.try_recv().is_ok() {}
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark outbound message encoding
fn bench_wire_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_encode");
    let message = Outbound::Update {
        tag: SubscriptionTag::from("heavy-cats"),
        result: sample_document(),
    };

    for format in [WireFormat::Json, WireFormat::MessagePack] {
        group.bench_with_input(
            BenchmarkId::new("format", format!("{:?}", format)),
            &format,
            |b, format| {
                b.iter(|| black_box(format.encode(&message).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_query_compile,
    bench_query_match,
    bench_namespace_match,
    bench_hub_route,
    bench_wire_encode,
);
criterion_main!(benches);
