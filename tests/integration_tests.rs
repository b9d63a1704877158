//! Integration tests for reconciliation-core

mod common;

use bigdecimal::BigDecimal;
use common::*;
use reconciliation_core::{
    total_credits, total_debits, AdjustmentKind, CandidateQuery, EscrowAdjustment, FilterExpr,
    EntryType, LedgerError, MatchStatus, ReconcileOutcome, ReconciledStatus, ReconciliationStore,
    SourceRef, SourceType,
};
use uuid::Uuid;

fn june() -> CandidateQuery {
    CandidateQuery::new(at(1, 0).date(), at(30, 0).date())
}

#[tokio::test]
async fn test_unsettled_purchase_is_listed_unmatched() {
    let h = TestHarness::new().await;
    let p1 = purchase("P1", "shipped", 1_000_000, at(3, 0));
    h.sources.insert_purchase(p1.clone()).unwrap();

    let page = h.reconciler.engine().list_candidates(SHOP, &june()).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].purchase.id, p1.id);
    assert_eq!(page.items[0].status(), MatchStatus::Unmatched);
    assert!(page.items[0].classification.settlement.is_none());
    assert!(page.next_cursor.is_none());

    // Explicit lookups by id do report the absence
    let missing = h.reconciler.engine().classify_order("NOPE").await;
    assert!(matches!(missing, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn test_confirmed_purchase_posts_once() {
    let h = TestHarness::new().await;
    let p2 = h.seed_confirmed("P2", at(4, 0));

    let outcome = h.reconciler.reconcile(p2.id, "P2", SHOP).await.unwrap();
    let entry_id = match outcome {
        ReconcileOutcome::Posted(id) => id,
        other => panic!("expected a posting, got {:?}", other),
    };

    let lines = h.ledger.lines_for(entry_id).await.unwrap();
    assert_eq!(total_debits(&lines), total_credits(&lines));
    // 950k net + 50k fees + 700k supplier cost
    assert_eq!(total_debits(&lines), BigDecimal::from(1_700_000));
    let revenue = lines.iter().find(|l| l.account_id == "4000").unwrap();
    assert_eq!(revenue.amount, BigDecimal::from(1_000_000));

    let entry = h.ledger.get_entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.source, SourceRef::new(SourceType::Sale, "P2"));

    let decision = h.runs.get_decision(p2.id).await.unwrap().unwrap();
    assert_eq!(decision.status, ReconciledStatus::Matched);

    let again = h.reconciler.reconcile(p2.id, "P2", SHOP).await;
    assert_eq!(again, Err(LedgerError::AlreadyReconciled("P2".to_string())));
    assert_eq!(h.storage.entry_count(), 1);

    // Closed work no longer surfaces as a candidate
    let page = h.reconciler.engine().list_candidates(SHOP, &june()).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn test_unconfirmed_purchase_is_deferred() {
    let h = TestHarness::new().await;
    let p = purchase("P3", "shipped", 500_000, at(5, 0));
    h.sources.insert_purchase(p.clone()).unwrap();
    h.sources.insert_settlement(settlement("P3", 450_000)).unwrap();

    let outcome = h.reconciler.reconcile(p.id, "P3", SHOP).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deferred(MatchStatus::CandidateMatched));
    assert_eq!(h.storage.entry_count(), 0);
    let decision = h.runs.get_decision(p.id).await.unwrap().unwrap();
    assert_eq!(decision.status, ReconciledStatus::Unmatched);
    assert!(decision.settlement_id.is_some());

    let wrong_shop = h.reconciler.reconcile(p.id, "P3", "other-shop").await;
    assert!(matches!(wrong_shop, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn test_full_return_reverses_sale_once() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("INV-1", at(6, 0));
    let ReconcileOutcome::Posted(sale_id) = h.reconciler.reconcile(p.id, "INV-1", SHOP).await.unwrap() else {
        panic!("sale was not posted");
    };

    let return_id = h
        .reconciler
        .process_returned_order("INV-1", false, &BigDecimal::from(0))
        .await
        .unwrap();
    assert!(h.reconciler.has_return_journal("INV-1").await.unwrap());

    let sale = h.ledger.lines_for(sale_id).await.unwrap();
    let reversal = h.ledger.lines_for(return_id).await.unwrap();
    assert_eq!(sale.len(), reversal.len());
    for (original, reversed) in sale.iter().zip(&reversal) {
        assert_eq!(original.account_id, reversed.account_id);
        assert_eq!(original.amount, reversed.amount);
        assert_eq!(original.entry_type.opposite(), reversed.entry_type);
    }

    let again = h
        .reconciler
        .process_returned_order("INV-1", false, &BigDecimal::from(0))
        .await
        .unwrap_err();
    assert_eq!(again, LedgerError::AlreadyProcessed("INV-1".to_string()));
    assert!(again.is_conflict());

    let history = h.reconciler.history("INV-1").await.unwrap();
    let kinds: Vec<SourceType> = history.iter().map(|e| e.source.source_type).collect();
    assert_eq!(kinds, vec![SourceType::Sale, SourceType::Return]);
}

#[tokio::test]
async fn test_partial_return_validates_before_storage() {
    let h = TestHarness::new().await;
    h.storage.set_unavailable(true);

    for amount in [BigDecimal::from(0), BigDecimal::from(-5)] {
        let result = h.reconciler.process_returned_order("INV-2", true, &amount).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}

#[tokio::test]
async fn test_partial_return_reverses_exact_amount() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("INV-3", at(7, 0));
    h.reconciler.reconcile(p.id, "INV-3", SHOP).await.unwrap();

    let return_id = h
        .reconciler
        .process_returned_order("INV-3", true, &dec("170000.333"))
        .await
        .unwrap();
    let lines = h.ledger.lines_for(return_id).await.unwrap();
    assert_eq!(total_debits(&lines), dec("170000.33"));
    assert_eq!(total_credits(&lines), dec("170000.33"));

    let missing = h
        .reconciler
        .process_returned_order("NEVER-SOLD", true, &BigDecimal::from(10))
        .await;
    assert!(matches!(missing, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn test_cancellation_paths() {
    let h = TestHarness::new().await;

    // Never settled: supplier cost written off
    let unsettled = purchase("C1", "dibatalkan", 400_000, at(8, 0));
    h.sources.insert_purchase(unsettled).unwrap();
    let write_off = h.reconciler.cancel_purchase("C1").await.unwrap();
    let lines = h.ledger.lines_for(write_off).await.unwrap();
    assert_eq!(total_debits(&lines), BigDecimal::from(400_000));
    assert!(lines.iter().any(|l| l.account_id == "1180" && l.is_debit()));
    assert_eq!(
        h.reconciler.cancel_purchase("C1").await,
        Err(LedgerError::AlreadyProcessed("C1".to_string()))
    );

    // Settled and partly returned: the remainder is reversed
    let p = h.seed_confirmed("C2", at(8, 60));
    h.reconciler.reconcile(p.id, "C2", SHOP).await.unwrap();
    h.reconciler
        .process_returned_order("C2", true, &BigDecimal::from(100_000))
        .await
        .unwrap();
    h.reconciler.cancel_purchase("C2").await.unwrap();

    let today = chrono::Utc::now().date_naive();
    let balances = h.ledger.balances_as_of(SHOP, today).await.unwrap();
    for balance in &balances {
        if balance.account.id == "1180" || balance.account.id == "2110" {
            continue;
        }
        assert_eq!(balance.balance, BigDecimal::from(0), "account {}", balance.account.id);
    }
    assert!(h.ledger.validate_integrity(SHOP, today).await.unwrap().is_valid);
}

#[tokio::test]
async fn test_returned_candidate_reverses_posted_sale() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("R1", at(9, 0));
    h.reconciler.reconcile(p.id, "R1", SHOP).await.unwrap();
    h.sources
        .insert_adjustment(EscrowAdjustment {
            id: Uuid::new_v4(),
            order_code: "R1".to_string(),
            kind: AdjustmentKind::Return,
            is_partial: false,
            amount: BigDecimal::from(0),
            reason: Some("buyer returned item".to_string()),
            created_at: at(21, 0),
        })
        .unwrap();

    let candidate = h.reconciler.engine().classify_order("R1").await.unwrap();
    assert_eq!(candidate.status(), MatchStatus::Returned);
    assert!(matches!(
        h.reconciler.reconcile_candidate(&candidate).await.unwrap(),
        ReconcileOutcome::Posted(_)
    ));
    assert_eq!(
        h.reconciler.reconcile_candidate(&candidate).await.unwrap(),
        ReconcileOutcome::Deferred(MatchStatus::Returned)
    );
}

#[tokio::test]
async fn test_candidates_filter_and_paginate() {
    let h = TestHarness::new().await;
    for i in 0..7 {
        let code = format!("PG-{}", i);
        let status = if i % 2 == 0 { "shipped" } else { "packed" };
        h.sources
            .insert_purchase(purchase(&code, status, 100_000 + i, at(10, i)))
            .unwrap();
    }
    h.sources.insert_settlement(settlement("PG-6", 90_000)).unwrap();

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let query = june().with_limit(3).after(cursor);
        let page = h.reconciler.engine().list_candidates(SHOP, &query).await.unwrap();
        seen.extend(page.items.iter().map(|c| c.purchase.order_code.clone()));
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    let expected: Vec<String> = (0..7).rev().map(|i| format!("PG-{}", i)).collect();
    assert_eq!(seen, expected);

    let shipped = june().with_filter(FilterExpr::eq("status", "shipped").unwrap());
    let page = h.reconciler.engine().list_candidates(SHOP, &shipped).await.unwrap();
    assert_eq!(page.items.len(), 4);

    let matched = june().with_status(MatchStatus::CandidateMatched);
    let page = h.reconciler.engine().list_candidates(SHOP, &matched).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].purchase.order_code, "PG-6");

    let backwards = CandidateQuery::new(at(30, 0).date(), at(1, 0).date());
    assert!(h.reconciler.engine().list_candidates(SHOP, &backwards).await.is_err());
}

#[tokio::test]
async fn test_return_imported_before_sale_posts_sale_then_reversal() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("PR-1", at(11, 0));
    h.sources
        .insert_adjustment(return_adjustment("PR-1", true, 10_000))
        .unwrap();

    let candidate = h.reconciler.engine().classify_order("PR-1").await.unwrap();
    assert_eq!(candidate.status(), MatchStatus::Returned);
    assert!(candidate.postable_settlement().is_some());

    let ReconcileOutcome::Posted(sale_id) = h.reconciler.reconcile(p.id, "PR-1", SHOP).await.unwrap() else {
        panic!("sale was not posted");
    };
    let sale = h.ledger.get_entry(sale_id).await.unwrap().unwrap();
    assert_eq!(sale.source, SourceRef::new(SourceType::Sale, "PR-1"));

    let history = h.reconciler.history("PR-1").await.unwrap();
    let kinds: Vec<SourceType> = history.iter().map(|e| e.source.source_type).collect();
    assert_eq!(kinds, vec![SourceType::Sale, SourceType::Return]);
    let reversal = h.ledger.lines_for(history[1].id).await.unwrap();
    let revenue = reversal.iter().find(|l| l.account_id == "4000").unwrap();
    assert_eq!(revenue.amount, BigDecimal::from(10_000));

    assert!(h
        .reconciler
        .engine()
        .list_candidates(SHOP, &june())
        .await
        .unwrap()
        .items
        .is_empty());
    assert_eq!(
        h.reconciler
            .process_returned_order("PR-1", true, &BigDecimal::from(10_000))
            .await,
        Err(LedgerError::AlreadyProcessed("PR-1".to_string()))
    );
}

#[tokio::test]
async fn test_returned_candidate_without_sale_posts_through_candidate_path() {
    let h = TestHarness::new().await;
    h.seed_confirmed("PR-3", at(11, 60));
    h.sources
        .insert_adjustment(return_adjustment("PR-3", false, 0))
        .unwrap();

    let candidate = h.reconciler.engine().classify_order("PR-3").await.unwrap();
    assert!(matches!(
        h.reconciler.reconcile_candidate(&candidate).await.unwrap(),
        ReconcileOutcome::Posted(_)
    ));
    assert!(h.reconciler.has_return_journal("PR-3").await.unwrap());
    assert_eq!(h.storage.entry_count(), 2);

    // Unsettled returns have nothing to post yet
    let unsettled = purchase("PR-4", "pesanan selesai", 300_000, at(12, 0));
    h.sources.insert_purchase(unsettled).unwrap();
    h.sources
        .insert_adjustment(return_adjustment("PR-4", false, 0))
        .unwrap();
    let candidate = h.reconciler.engine().classify_order("PR-4").await.unwrap();
    assert_eq!(
        h.reconciler.reconcile_candidate(&candidate).await.unwrap(),
        ReconcileOutcome::Deferred(MatchStatus::Returned)
    );
}

#[tokio::test]
async fn test_partial_return_scales_against_revenue() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("PR-2", at(13, 0));
    h.reconciler.reconcile(p.id, "PR-2", SHOP).await.unwrap();

    let excess = h
        .reconciler
        .process_returned_order("PR-2", true, &dec("1000000.01"))
        .await;
    assert!(matches!(excess, Err(LedgerError::Validation(_))));
    assert!(!h.reconciler.has_return_journal("PR-2").await.unwrap());

    let return_id = h
        .reconciler
        .process_returned_order("PR-2", true, &BigDecimal::from(1_000_000))
        .await
        .unwrap();
    let lines = h.ledger.lines_for(return_id).await.unwrap();
    let revenue = lines.iter().find(|l| l.account_id == "4000").unwrap();
    assert_eq!(revenue.entry_type, EntryType::Debit);
    assert_eq!(revenue.amount, BigDecimal::from(1_000_000));
    let escrow = lines.iter().find(|l| l.account_id == "1120").unwrap();
    assert_eq!(escrow.amount, BigDecimal::from(950_000));
    // Supplier cost is untouched by a partial refund
    assert!(lines.iter().all(|l| l.account_id != "5000" && l.account_id != "2110"));
    assert_eq!(total_debits(&lines), total_credits(&lines));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconcile_posts_exactly_once() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("RACE", at(14, 0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = h.reconciler.clone();
        handles.push(tokio::spawn(async move { reconciler.reconcile(p.id, "RACE", SHOP).await }));
    }

    let mut posted = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ReconcileOutcome::Posted(_)) => posted += 1,
            Err(LedgerError::AlreadyReconciled(code)) => {
                assert_eq!(code, "RACE");
                conflicts += 1;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(posted, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(h.storage.entry_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_returns_post_exactly_once() {
    let h = TestHarness::new().await;
    let p = h.seed_confirmed("RACE-R", at(14, 60));
    h.reconciler.reconcile(p.id, "RACE-R", SHOP).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = h.reconciler.clone();
        handles.push(tokio::spawn(async move {
            reconciler
                .process_returned_order("RACE-R", false, &BigDecimal::from(0))
                .await
        }));
    }

    let mut posted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => posted += 1,
            Err(e) => assert_eq!(e, LedgerError::AlreadyProcessed("RACE-R".to_string())),
        }
    }
    assert_eq!(posted, 1);
    assert_eq!(h.storage.entry_count(), 2);
}
