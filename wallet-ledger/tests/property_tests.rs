//! Property-based tests for ledger invariants
//!
//! - Balance convergence: published balance == Σ(deposits) − Σ(withdrawals)
//! - Non-negativity under serialized withdrawals
//! - Idempotency: a reference ID is accepted at most once, ledger-wide

mod common;

use common::Harness;
use proptest::prelude::*;
use wallet_ledger::types::{replay_balance, TransactionType};
use wallet_ledger::WalletError;

#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Withdraw(i64),
}

/// Strategy for generating mutations with positive amounts
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..10_000).prop_map(Op::Deposit),
        (1i64..10_000).prop_map(Op::Withdraw),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: after settling, the published balance is the signed sum of accepted mutations
    #[test]
    fn prop_balance_converges(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let wallet_id = h.enabled_wallet("c1").await;
            let mut expected = 0i64;

            for (i, op) in ops.iter().enumerate() {
                let reference = format!("ref-{}", i);
                match op {
                    Op::Deposit(amount) => {
                        h.service.deposit(&wallet_id, *amount, &reference).await.unwrap();
                        expected += amount;
                    }
                    Op::Withdraw(amount) => {
                        match h.service.withdraw(&wallet_id, *amount, &reference).await {
                            Ok(_) => expected -= amount,
                            Err(WalletError::InsufficientBalance { .. }) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            }

            let published = h.settle(&wallet_id).await;
            prop_assert_eq!(published, expected);
            prop_assert!(published >= 0);
            prop_assert_eq!(h.snapshot_balance(&wallet_id).await, expected);

            let history = h.service.list_transactions(&wallet_id).await.unwrap();
            prop_assert_eq!(replay_balance(&history).unwrap(), expected);

            h.scheduler.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: repeated references never produce a second row
    #[test]
    fn prop_references_accepted_once(refs in prop::collection::vec(0u8..8, 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let w1 = h.enabled_wallet("c1").await;
            let w2 = h.enabled_wallet("c2").await;
            let mut accepted = std::collections::HashSet::new();

            for (i, r) in refs.iter().enumerate() {
                let wallet_id = if i % 2 == 0 { &w1 } else { &w2 };
                let reference = format!("ref-{}", r);

                match h.service.deposit(wallet_id, 10, &reference).await {
                    Ok(tx) => {
                        prop_assert!(accepted.insert(reference));
                        prop_assert_eq!(tx.kind, TransactionType::Deposit);
                    }
                    Err(WalletError::DuplicateReference(dup)) => {
                        prop_assert!(accepted.contains(&dup));
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }

            prop_assert_eq!(h.store.transaction_count(), accepted.len());

            let total = h.settle(&w1).await + h.settle(&w2).await;
            prop_assert_eq!(total, 10 * accepted.len() as i64);

            h.scheduler.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
