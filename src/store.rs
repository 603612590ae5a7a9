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

//! Ledger store.
//!
//! The [`LedgerStore`] owns every account row and the transaction journal. It
//! is the only component that mutates balances, and it only does so inside an
//! atomic unit that also writes the matching [`Transaction`] rows.
//!
//! # Atomic units
//!
//! [`LedgerStore::atomic`] locks every account the unit touches, in ascending
//! user id order, waiting at most the configured lock timeout for each. The
//! closure works on private copies of the rows; nothing becomes visible until
//! it returns `Ok`, at which point all staged rows and all transactions are
//! written while the locks are still held. Returning `Err` discards the copies.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`] of `Arc<Account>`. Map references are never
//! held while a row lock is taken, so row locks are the only contended
//! resource and units touching disjoint accounts never wait on each other.

use crate::account::{Account, AccountData, AccountSnapshot};
use crate::base::{Currency, InviteCode, TransactionId, UserId};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::journal::Journal;
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Durable record of balances and transactions.
pub struct LedgerStore {
    accounts: DashMap<UserId, Arc<Account>>,
    /// Reverse index of issued invite codes. Entries are never removed.
    invite_codes: DashMap<InviteCode, UserId>,
    journal: Journal,
    next_transaction_id: AtomicU64,
    config: LedgerConfig,
}

impl LedgerStore {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            invite_codes: DashMap::new(),
            journal: Journal::new(),
            next_transaction_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn handle(&self, user_id: UserId) -> Option<Arc<Account>> {
        self.accounts.get(&user_id).map(|r| Arc::clone(r.value()))
    }

    /// Opens the account on first contact. Existing accounts are returned as-is.
    pub fn open_account(&self, user_id: UserId) -> AccountSnapshot {
        let account = Arc::clone(
            self.accounts
                .entry(user_id)
                .or_insert_with(|| {
                    debug!(%user_id, "opening account");
                    Arc::new(Account::new(user_id))
                })
                .value(),
        );
        account.snapshot()
    }

    pub fn get_account(&self, user_id: UserId) -> Option<AccountSnapshot> {
        self.handle(user_id).map(|account| account.snapshot())
    }

    pub fn find_by_invite_code(&self, code: &InviteCode) -> Option<AccountSnapshot> {
        let user_id = *self.invite_codes.get(code)?;
        self.get_account(user_id)
    }

    /// Every account, ordered by user id.
    pub fn accounts(&self) -> Vec<AccountSnapshot> {
        let handles: Vec<_> = self.accounts.iter().map(|r| Arc::clone(r.value())).collect();
        let mut snapshots: Vec<_> = handles.iter().map(|account| account.snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.user_id);
        snapshots
    }

    /// Returns the account's invite code, allocating one on first use.
    ///
    /// Codes are drawn from the operating system's CSPRNG. A candidate that
    /// is already taken is discarded and another one drawn, up to the
    /// configured number of attempts.
    pub fn generate_invite_code(&self, user_id: UserId) -> Result<InviteCode, LedgerError> {
        self.generate_invite_code_with(user_id, &mut OsRng)
    }

    pub(crate) fn generate_invite_code_with<R: Rng>(
        &self,
        user_id: UserId,
        rng: &mut R,
    ) -> Result<InviteCode, LedgerError> {
        let account = self
            .handle(user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;
        let mut row = account
            .lock_for(self.config.lock_timeout())
            .ok_or(LedgerError::Conflict(user_id))?;

        if let Some(code) = &row.invite_code {
            return Ok(code.clone());
        }

        for attempt in 1..=self.config.invite_code_attempts {
            let candidate: String = (0..self.config.invite_code_length)
                .map(|_| InviteCode::ALPHABET[rng.gen_range(0..InviteCode::ALPHABET.len())] as char)
                .collect();
            let code = InviteCode::from_generated(candidate);

            match self.invite_codes.entry(code.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(user_id);
                    row.invite_code = Some(code.clone());
                    info!(%user_id, %code, "issued invite code");
                    return Ok(code);
                }
                Entry::Occupied(_) => {
                    debug!(%user_id, attempt, "invite code collision");
                }
            }
        }

        warn!(%user_id, "invite code space exhausted");
        Err(LedgerError::InviteCodeExhausted)
    }

    /// Applies a single balance change and records it.
    ///
    /// `delta` is signed. A debit that would take the balance below zero fails
    /// with [`LedgerError::InsufficientFunds`] and changes nothing.
    pub fn apply_transaction(
        &self,
        user_id: UserId,
        currency: Currency,
        delta: Decimal,
        kind: TransactionKind,
        note: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        let note = note.into();
        let ((), mut transactions) = self.atomic(&[user_id], |unit| {
            unit.apply(user_id, currency, delta, kind, note)
        })?;
        // A one-entry unit commits exactly one row
        transactions
            .pop()
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    pub fn deposit(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.apply_transaction(user_id, currency, amount, TransactionKind::Deposit, "deposit")
    }

    pub fn withdraw(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.apply_transaction(
            user_id,
            currency,
            -amount,
            TransactionKind::Withdrawal,
            "withdrawal",
        )
    }

    /// Runs `f` as one atomic unit over the accounts in `user_ids`.
    ///
    /// On success returns the closure's value together with the transactions
    /// committed by the unit, in the order they were staged.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] - an account in `user_ids` was never opened.
    /// - [`LedgerError::Conflict`] - a row lock was not acquired within the timeout.
    /// - Any error returned by `f`, after which nothing is written.
    pub fn atomic<T, E, F>(&self, user_ids: &[UserId], f: F) -> Result<(T, Vec<Transaction>), E>
    where
        F: FnOnce(&mut UnitOfWork) -> Result<T, E>,
        E: From<LedgerError>,
    {
        let mut ids = user_ids.to_vec();
        ids.sort();
        ids.dedup();

        let handles = ids
            .iter()
            .map(|id| self.handle(*id).ok_or(LedgerError::AccountNotFound(*id)))
            .collect::<Result<Vec<_>, _>>()?;

        // Ascending id order rules out lock cycles between units
        let mut guards = Vec::with_capacity(handles.len());
        for (id, account) in ids.iter().zip(&handles) {
            let guard = account.lock_for(self.config.lock_timeout()).ok_or_else(|| {
                warn!(user_id = %id, "lock wait timed out");
                LedgerError::Conflict(*id)
            })?;
            guards.push(guard);
        }

        let mut unit = UnitOfWork {
            staged: guards.iter().map(|guard| (**guard).clone()).collect(),
            pending: Vec::new(),
        };
        let value = f(&mut unit)?;

        let UnitOfWork { staged, pending } = unit;
        for (guard, row) in guards.iter_mut().zip(staged) {
            **guard = row;
        }
        let created_at = Utc::now();
        let transactions: Vec<Transaction> = pending
            .into_iter()
            .map(|entry| {
                let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
                let transaction = entry.into_transaction(id, created_at);
                self.journal.append(transaction.clone());
                transaction
            })
            .collect();
        drop(guards);

        Ok((value, transactions))
    }

    /// Audit trail of one account in commit order.
    pub fn transactions_for(&self, user_id: UserId) -> Vec<Transaction> {
        self.journal
            .for_user(user_id)
            .iter()
            .map(|tx| (**tx).clone())
            .collect()
    }

    /// Sum of every journaled amount for the account in `currency`.
    pub fn journal_balance(&self, user_id: UserId, currency: Currency) -> Decimal {
        self.journal.balance_of(user_id, currency)
    }

    /// Checks that every balance equals the sum of its journal entries.
    ///
    /// Only meaningful while no unit is committing. Returns the offending
    /// `(user, currency)` pairs.
    pub fn verify_conservation(&self) -> Vec<(UserId, Currency)> {
        let mut breaches = Vec::new();
        for snapshot in self.accounts() {
            for currency in Currency::ALL {
                let journaled = self.journal_balance(snapshot.user_id, currency);
                if snapshot.balance(currency) != journaled {
                    warn!(
                        user_id = %snapshot.user_id,
                        %currency,
                        balance = %snapshot.balance(currency),
                        %journaled,
                        "ledger conservation breach"
                    );
                    breaches.push((snapshot.user_id, currency));
                }
            }
        }
        breaches
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

/// A balance change staged inside a unit, not yet committed.
#[derive(Debug)]
struct PendingEntry {
    user_id: UserId,
    kind: TransactionKind,
    currency: Currency,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    note: String,
}

impl PendingEntry {
    fn into_transaction(self, id: TransactionId, created_at: chrono::DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            kind: self.kind,
            currency: self.currency,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            note: self.note,
            status: TransactionStatus::Completed,
            created_at,
        }
    }
}

/// Staged mutations of one atomic unit.
///
/// Only accounts named when the unit was opened are reachable; any other id
/// yields [`LedgerError::AccountNotFound`].
#[derive(Debug)]
pub struct UnitOfWork {
    /// Private copies of the locked rows, in ascending id order.
    staged: Vec<AccountData>,
    pending: Vec<PendingEntry>,
}

impl UnitOfWork {
    fn row(&self, user_id: UserId) -> Result<&AccountData, LedgerError> {
        self.staged
            .iter()
            .find(|row| row.user_id == user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn row_mut(&mut self, user_id: UserId) -> Result<&mut AccountData, LedgerError> {
        self.staged
            .iter_mut()
            .find(|row| row.user_id == user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// The account as staged so far in this unit.
    pub fn account(&self, user_id: UserId) -> Result<AccountSnapshot, LedgerError> {
        self.row(user_id).map(AccountData::snapshot)
    }

    /// Stages a balance change and the transaction recording it.
    pub fn apply(
        &mut self,
        user_id: UserId,
        currency: Currency,
        delta: Decimal,
        kind: TransactionKind,
        note: impl Into<String>,
    ) -> Result<(), LedgerError> {
        let (balance_before, balance_after) = self.row_mut(user_id)?.apply(currency, delta)?;
        self.pending.push(PendingEntry {
            user_id,
            kind,
            currency,
            amount: delta,
            balance_before,
            balance_after,
            note: note.into(),
        });
        Ok(())
    }

    /// Records the inviter unless one is already set. Returns whether it was set.
    pub fn set_invited_by_if_unset(
        &mut self,
        user_id: UserId,
        inviter: UserId,
    ) -> Result<bool, LedgerError> {
        Ok(self.row_mut(user_id)?.set_invited_by_if_unset(inviter))
    }

    /// Returns the new invite count.
    pub fn increment_invite_count(&mut self, user_id: UserId) -> Result<u32, LedgerError> {
        Ok(self.row_mut(user_id)?.increment_invite_count())
    }

    pub fn add_invite_earnings(
        &mut self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.row_mut(user_id)?.add_invite_earnings(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    #[test]
    fn generated_codes_use_the_configured_length() {
        let store = LedgerStore::default();
        store.open_account(UserId(1));
        let code = store.generate_invite_code(UserId(1)).unwrap();
        assert_eq!(code.as_str().len(), 8);
        assert_eq!(InviteCode::parse(code.as_str()), Some(code));
    }

    #[test]
    fn collision_draws_another_candidate() {
        let store = LedgerStore::default();
        store.open_account(UserId(1));
        store.open_account(UserId(2));

        // Identical seeds make user 2's first candidate collide with user 1's code
        let first = store
            .generate_invite_code_with(UserId(1), &mut StdRng::seed_from_u64(7))
            .unwrap();
        let second = store
            .generate_invite_code_with(UserId(2), &mut StdRng::seed_from_u64(7))
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.find_by_invite_code(&first).unwrap().user_id, UserId(1));
        assert_eq!(store.find_by_invite_code(&second).unwrap().user_id, UserId(2));
    }

    #[test]
    fn exhausted_attempts_report_an_error() {
        let store = LedgerStore::new(LedgerConfig {
            invite_code_attempts: 1,
            ..LedgerConfig::default()
        });
        store.open_account(UserId(1));
        store.open_account(UserId(2));

        store
            .generate_invite_code_with(UserId(1), &mut StdRng::seed_from_u64(7))
            .unwrap();
        let result = store.generate_invite_code_with(UserId(2), &mut StdRng::seed_from_u64(7));
        assert_eq!(result, Err(LedgerError::InviteCodeExhausted));
        assert_eq!(store.get_account(UserId(2)).unwrap().invite_code, None);
    }

    #[test]
    fn unit_rejects_accounts_outside_its_lock_set() {
        let store = LedgerStore::default();
        store.open_account(UserId(1));
        store.open_account(UserId(2));

        let result = store.atomic(&[UserId(1)], |unit| {
            unit.apply(UserId(2), Currency::Usdt, dec!(1), TransactionKind::Deposit, "")
        });
        assert_eq!(result, Err(LedgerError::AccountNotFound(UserId(2))));
        assert!(store.journal().is_empty());
    }

    #[test]
    fn unit_sees_its_own_staged_writes() {
        let store = LedgerStore::default();
        store.open_account(UserId(1));

        let ((), transactions) = store
            .atomic(&[UserId(1), UserId(1)], |unit| {
                unit.apply(UserId(1), Currency::Ton, dec!(3), TransactionKind::Deposit, "a")?;
                assert_eq!(unit.account(UserId(1))?.balance(Currency::Ton), dec!(3));
                unit.apply(UserId(1), Currency::Ton, dec!(-1), TransactionKind::Withdrawal, "b")
            })
            .unwrap();

        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].balance_after, transactions[1].balance_before);
        assert_eq!(transactions[1].balance_after, dec!(2));
        assert!(transactions[0].id < transactions[1].id);
    }
}
