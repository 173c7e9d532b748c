use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use market_consensus::dedup::{deduplicate, DedupConfig};
use market_consensus::finding::FindingId;
use market_consensus::validation::CrossMetricValidator;
use market_consensus::{
    ConsensusAggregator, ExtractedValue, GeoEntityId, GeoLevel, Metric, ResearchFinding, ResearchQuery,
    SourceHost,
};

const ENTITIES: u32 = 64;
const SOURCES: u32 = 12;

/// 64 entities x 2 metrics x 12 sources; every third source syndicates the previous one.
fn synthetic_batch() -> Vec<ResearchFinding> {
    let mut findings = Vec::new();
    for e in 0..ENTITIES {
        let entity = GeoEntityId::derive(&format!("City {e}"), GeoLevel::City);
        for (metric, base) in [(Metric::MedianRent, 1500.0), (Metric::MedianHomePrice, 240_000.0)] {
            for s in 0..SOURCES {
                let host = SourceHost::parse(&format!("source{s}.com")).unwrap();
                let value = base * (1.0 + f64::from(s % 5) * 0.02);
                let payload = if s % 3 == 2 {
                    format!("{metric} in City {e} is {} per recent data", s - 1)
                } else {
                    format!("{metric} in City {e} is {s} per recent data")
                };
                let weight = 0.2 + f64::from(s) * 0.06;
                findings.push(ResearchFinding {
                    id: FindingId::new(),
                    query: ResearchQuery::new(format!("{metric} City {e}"), metric.clone()),
                    entity,
                    queried_entity: entity,
                    metric: metric.clone(),
                    actual_source_host: host,
                    intended_source_host: None,
                    url: Some(format!("https://source{s}.com/{e}")),
                    extracted_value: Some(ExtractedValue::numeric(value).unwrap()),
                    has_usable_data: true,
                    observed_at: NaiveDate::from_ymd_opt(2024, 10, 15),
                    collected_at: Utc::now(),
                    topic_mismatch: false,
                    mirrored_from_hosts: BTreeSet::new(),
                    mirror_of: None,
                    payload,
                    trust_weight: weight,
                    recency_weight: 1.0,
                    raw_weight: weight,
                    effective_weight: weight,
                    fallback_depth: 0,
                });
            }
        }
    }
    findings
}

fn bench_dedup(c: &mut Criterion) {
    let batch = synthetic_batch();
    let mut group = c.benchmark_group("reconcile");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("dedup", |b| {
        b.iter_batched(
            || batch.clone(),
            |mut findings| deduplicate(&mut findings, &DedupConfig::default()),
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_validate_and_aggregate(c: &mut Criterion) {
    let mut batch = synthetic_batch();
    deduplicate(&mut batch, &DedupConfig::default());
    let validator = CrossMetricValidator::default();
    let aggregator = ConsensusAggregator::default();
    let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();

    let mut group = c.benchmark_group("reconcile");
    group.throughput(Throughput::Elements(u64::from(ENTITIES) * 2));
    group.bench_function("validate_and_aggregate", |b| {
        b.iter(|| {
            let warnings = validator.validate(&batch, &aggregator);
            let mut produced = 0usize;
            for chunk in batch.chunks(SOURCES as usize) {
                let refs: Vec<&ResearchFinding> = chunk.iter().collect();
                let key = (chunk[0].entity, chunk[0].metric.clone());
                let pair_warnings = warnings.get(&key).map_or(&[][..], Vec::as_slice);
                let value = aggregator.aggregate(key.0, &key.1, &refs, pair_warnings, today);
                produced += usize::from(value.value.is_some());
            }
            produced
        });
    });
    group.finish();
}

criterion_group!(reconcile, bench_dedup, bench_validate_and_aggregate);
criterion_main!(reconcile);
