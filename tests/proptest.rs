// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Property-based tests for the ledger store and invite attribution.
//!
//! These tests verify invariants that should hold for any sequence of
//! balance changes and redemptions.

use proptest::prelude::*;
use reward_ledger::{
    AttributionCoordinator, Config, Currency, LedgerStore, LogNotifier, MilestoneTable,
    RedemptionOutcome, TransactionKind, UserId,
};
use rust_decimal::Decimal;
use std::sync::Arc;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

fn arb_currency() -> impl Strategy<Value = Currency> {
    prop::sample::select(Currency::ALL.to_vec())
}

/// A signed change against one of a handful of accounts.
fn arb_change() -> impl Strategy<Value = (u64, Currency, Decimal, bool)> {
    (1u64..=4, arb_currency(), arb_amount(), any::<bool>())
}

// =============================================================================
// Ledger Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Balances never go negative and always equal the sum of their journal.
    #[test]
    fn balances_match_journal_and_stay_non_negative(
        changes in prop::collection::vec(arb_change(), 1..60),
    ) {
        let store = LedgerStore::default();
        for user in 1..=4 {
            store.open_account(UserId(user));
        }

        for (user, currency, amount, credit) in changes {
            let delta = if credit { amount } else { -amount };
            let _ = store.apply_transaction(
                UserId(user),
                currency,
                delta,
                TransactionKind::BalanceAdjustment,
                "",
            );
        }

        for account in store.accounts() {
            for currency in Currency::ALL {
                prop_assert!(account.balance(currency) >= Decimal::ZERO);
            }
        }
        prop_assert!(store.verify_conservation().is_empty());
    }

    /// Every committed row chains from the previous balance of its account.
    #[test]
    fn committed_rows_chain(
        changes in prop::collection::vec(arb_change(), 1..40),
    ) {
        let store = LedgerStore::default();
        for user in 1..=4 {
            store.open_account(UserId(user));
        }
        for (user, currency, amount, credit) in changes {
            let delta = if credit { amount } else { -amount };
            let _ = store.apply_transaction(UserId(user), currency, delta, TransactionKind::Deposit, "");
        }

        for user in 1..=4 {
            for currency in Currency::ALL {
                let mut running = Decimal::ZERO;
                for tx in store
                    .transactions_for(UserId(user))
                    .iter()
                    .filter(|tx| tx.currency == currency)
                {
                    prop_assert!(tx.is_consistent());
                    prop_assert_eq!(tx.balance_before, running);
                    running = tx.balance_after;
                }
            }
        }
    }

    /// Deposits in any order sum to the same balance.
    #[test]
    fn deposits_sum_to_balance(
        amounts in prop::collection::vec(arb_amount(), 1..20),
    ) {
        let store = LedgerStore::default();
        store.open_account(UserId(1));
        let expected: Decimal = amounts.iter().copied().sum();

        for amount in amounts.iter().rev() {
            store.deposit(UserId(1), Currency::Stars, *amount).unwrap();
        }

        prop_assert_eq!(
            store.get_account(UserId(1)).unwrap().balance(Currency::Stars),
            expected
        );
    }
}

// =============================================================================
// Attribution Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// `invited_by` is written at most once and never changes afterwards.
    #[test]
    fn invited_by_is_set_once(
        attempts in prop::collection::vec((1u64..=6, 1u64..=6), 1..40),
    ) {
        let coordinator = AttributionCoordinator::from_config(&Config::default(), Arc::new(LogNotifier));
        let codes: Vec<_> = (1..=6)
            .map(|user| {
                coordinator.register(UserId(user));
                coordinator.invite_code(UserId(user)).unwrap()
            })
            .collect();

        let mut first_inviter = [None; 7];
        for (invitee, inviter) in attempts {
            let result = coordinator.redeem_invite(UserId(invitee), codes[(inviter - 1) as usize].as_str());
            match result {
                Ok(RedemptionOutcome::Credited(receipt)) => {
                    prop_assert!(first_inviter[invitee as usize].is_none());
                    prop_assert_ne!(receipt.inviter, receipt.invitee);
                    first_inviter[invitee as usize] = Some(receipt.inviter);
                }
                Ok(RedemptionOutcome::AlreadyRedeemed { .. }) => {
                    prop_assert!(false, "no concurrent redemptions in this test");
                }
                Err(_) => {}
            }
            let account = coordinator.store().get_account(UserId(invitee)).unwrap();
            prop_assert_eq!(account.invited_by, first_inviter[invitee as usize]);
        }

        let invites: u32 = coordinator.store().accounts().iter().map(|a| a.invite_count).sum();
        let invited = first_inviter.iter().filter(|inviter| inviter.is_some()).count() as u32;
        prop_assert_eq!(invites, invited);
        prop_assert!(coordinator.store().verify_conservation().is_empty());
    }

    /// Milestone bonuses fire only on exact thresholds.
    #[test]
    fn milestones_match_exactly(
        thresholds in prop::collection::btree_set(1u32..50, 0..6),
        count in 0u32..60,
    ) {
        let table = MilestoneTable::new(
            thresholds.iter().map(|t| (*t, Decimal::from(*t))),
        );
        prop_assert_eq!(
            table.bonus_for(count).is_some(),
            thresholds.contains(&count)
        );
    }
}
