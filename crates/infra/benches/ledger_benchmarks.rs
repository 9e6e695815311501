use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use crystalerp_core::{AggregateId, TenantId};
use crystalerp_events::{EventEnvelope, InMemoryEventBus};
use crystalerp_infra::event_store::InMemoryEventStore;
use crystalerp_infra::ledger::{ProduceRequest, SaleRequest};
use crystalerp_infra::{Ledger, LedgerConfig};
use crystalerp_products::{MaterialSignature, MaterialUsageInput};
use crystalerp_purchasing::{LotSpec, MaterialCategory, PurchaseLotId};
use rust_decimal::Decimal;
use std::sync::Arc;

type BenchLedger = Ledger<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>;

fn usages(lots: usize) -> Vec<MaterialUsageInput> {
    (0..lots)
        .map(|i| MaterialUsageInput::beads(PurchaseLotId::new(AggregateId::new()), i as i64 + 1))
        .collect()
}

fn setup_ledger(lot_count: usize) -> (BenchLedger, TenantId, Vec<PurchaseLotId>) {
    let ledger = Ledger::new(
        InMemoryEventStore::new(),
        Arc::new(InMemoryEventBus::new()),
        LedgerConfig::default(),
    );
    let tenant_id = TenantId::new();
    let lots = (0..lot_count)
        .map(|_| {
            let lot_id = PurchaseLotId::new(AggregateId::new());
            let spec = LotSpec {
                piece_count: Some(1_000_000),
                total_price: Some(Decimal::from(5_000)),
                ..LotSpec::new("Rose quartz 6mm", MaterialCategory::LooseBeads)
            };
            ledger.register_lot(tenant_id, lot_id, spec).unwrap();
            lot_id
        })
        .collect();
    (ledger, tenant_id, lots)
}

fn bench_signature_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_hashing");

    for lot_count in [1usize, 4, 16, 64].iter() {
        let input = usages(*lot_count);
        group.throughput(Throughput::Elements(*lot_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lot_count), &input, |b, input| {
            b.iter(|| {
                let signature = MaterialSignature::from_usages(black_box(input)).unwrap();
                black_box(signature.hash().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_resolve_existing_sku(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_existing_sku");

    for lot_count in [1usize, 4, 8].iter() {
        let (ledger, tenant_id, lots) = setup_ledger(*lot_count);
        let request = ProduceRequest::new(
            "Rose Quartz Bracelet",
            Decimal::from(80),
            lots.iter().map(|lot| MaterialUsageInput::beads(*lot, 1)).collect(),
        );
        ledger.resolve_or_create_sku(tenant_id, request.clone()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(lot_count), &request, |b, request| {
            b.iter(|| {
                black_box(ledger.resolve_or_create_sku(tenant_id, request.clone()).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_sell(c: &mut Criterion) {
    let mut group = c.benchmark_group("sell");
    group.throughput(Throughput::Elements(1));

    let (ledger, tenant_id, lots) = setup_ledger(2);
    let request = ProduceRequest {
        quantity: 1_000_000,
        ..ProduceRequest::new(
            "Rose Quartz Bracelet",
            Decimal::from(80),
            vec![MaterialUsageInput::beads(lots[0], 1), MaterialUsageInput::beads(lots[1], 1)],
        )
    };
    let sku_id = ledger.resolve_or_create_sku(tenant_id, request).unwrap().sku.sku_id;

    group.bench_function("single_unit", |b| {
        b.iter(|| {
            black_box(ledger.sell(tenant_id, sku_id, SaleRequest::new(1)).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_signature_hashing,
    bench_resolve_existing_sku,
    bench_sell,
);
criterion_main!(benches);
