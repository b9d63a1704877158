//! Common fixtures for reconciliation-core integration tests.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use reconciliation_core::ledger::account::utils::create_marketplace_chart;
use reconciliation_core::utils::{MemoryRunStore, MemorySources, MemoryStorage};
use reconciliation_core::{
    AccountManager, AdjustmentKind, EscrowAdjustment, Ledger, MatchEngine, PurchaseRecord,
    Reconciler, SettlementRecord, StandardChartOfAccounts, StreamProcessor,
};
use std::str::FromStr;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciliation_core=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const SHOP: &str = "shop-jkt";

/// Wiring of the core over in-memory backends
#[allow(dead_code)]
pub struct TestHarness {
    pub storage: Arc<MemoryStorage>,
    pub sources: MemorySources,
    pub runs: MemoryRunStore,
    pub ledger: Ledger<MemoryStorage>,
    pub reconciler: Reconciler<MemoryStorage>,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn new() -> Self {
        init_tracing();
        let storage = Arc::new(MemoryStorage::new());
        create_marketplace_chart(&AccountManager::new(storage.clone()))
            .await
            .expect("chart of accounts");

        let sources = MemorySources::new();
        let runs = MemoryRunStore::new();
        let ledger = Ledger::new(storage.clone());
        let engine = MatchEngine::new(
            Arc::new(sources.clone()),
            Arc::new(sources.clone()),
            ledger.clone(),
        );
        let reconciler = Reconciler::new(
            engine,
            Arc::new(StandardChartOfAccounts::new(storage.clone())),
            Arc::new(runs.clone()),
        );

        Self {
            storage,
            sources,
            runs,
            ledger,
            reconciler,
        }
    }

    pub fn processor(&self) -> StreamProcessor<MemoryStorage> {
        StreamProcessor::new(
            self.reconciler.clone(),
            Arc::new(self.runs.clone()),
            Arc::new(self.runs.clone()),
        )
    }

    /// A completed purchase with a clean settlement, ready to post
    pub fn seed_confirmed(&self, code: &str, created_at: NaiveDateTime) -> PurchaseRecord {
        let purchase = purchase(code, "pesanan selesai", 700_000, created_at);
        self.sources.insert_purchase(purchase.clone()).unwrap();
        self.sources
            .insert_settlement(settlement(code, 950_000))
            .unwrap();
        purchase
    }
}

#[allow(dead_code)]
pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// June 2024 timestamp, `seconds` after 10:00 on `day`
#[allow(dead_code)]
pub fn at(day: u32, seconds: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, day)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        + chrono::Duration::seconds(seconds)
}

#[allow(dead_code)]
pub fn purchase(code: &str, status: &str, amount: i64, created_at: NaiveDateTime) -> PurchaseRecord {
    PurchaseRecord {
        id: Uuid::new_v4(),
        order_code: code.to_string(),
        shop: SHOP.to_string(),
        channel: "shopee".to_string(),
        store: "main".to_string(),
        status: status.to_string(),
        total_amount: BigDecimal::from(amount),
        created_at,
        shipped_at: None,
    }
}

/// Settlement netting `net` after a 30k commission and 20k service fee
#[allow(dead_code)]
pub fn settlement(code: &str, net: i64) -> SettlementRecord {
    SettlementRecord {
        id: Uuid::new_v4(),
        order_code: code.to_string(),
        shop: SHOP.to_string(),
        commission_fee: BigDecimal::from(30_000),
        service_fee: BigDecimal::from(20_000),
        transaction_fee: BigDecimal::from(0),
        shipping_fee: BigDecimal::from(0),
        seller_discount: BigDecimal::from(0),
        platform_rebate: BigDecimal::from(0),
        net_receivable: BigDecimal::from(net),
        is_mismatch: false,
        is_confirmed: true,
        settled_at: NaiveDate::from_ymd_opt(2024, 6, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
    }
}

/// Buyer return recorded by the marketplace on June 21st
#[allow(dead_code)]
pub fn return_adjustment(code: &str, is_partial: bool, amount: i64) -> EscrowAdjustment {
    EscrowAdjustment {
        id: Uuid::new_v4(),
        order_code: code.to_string(),
        kind: AdjustmentKind::Return,
        is_partial,
        amount: BigDecimal::from(amount),
        reason: Some("buyer returned item".to_string()),
        created_at: at(21, 0),
    }
}
