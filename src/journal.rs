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

//! Append-only transaction journal.
//!
//! Stores every committed [`Transaction`], indexed by id and by owning
//! account.

use crate::base::{Currency, TransactionId, UserId};
use crate::transaction::Transaction;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;

/// A thread-safe, append-only transaction log.
///
/// Records are never updated or removed. The per-account index preserves
/// commit order.
#[derive(Debug, Default)]
pub struct Journal {
    /// Every committed transaction by id.
    transactions: DashMap<TransactionId, Arc<Transaction>>,

    /// Transaction ids per account, in commit order.
    by_user: DashMap<UserId, Vec<TransactionId>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a committed transaction.
    ///
    /// Returns `false` and leaves the journal untouched if the id is already
    /// present.
    pub(crate) fn append(&self, transaction: Transaction) -> bool {
        let id = transaction.id;
        let user_id = transaction.user_id;

        // Entry API keeps check-and-insert atomic
        match self.transactions.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(transaction));
                self.by_user.entry(user_id).or_default().push(id);
                true
            }
        }
    }

    pub fn get(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.transactions.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Audit trail of one account in commit order.
    pub fn for_user(&self, user_id: UserId) -> Vec<Arc<Transaction>> {
        let ids = match self.by_user.get(&user_id) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Sum of completed amounts for one account and currency.
    pub fn balance_of(&self, user_id: UserId, currency: Currency) -> Decimal {
        self.for_user(user_id)
            .iter()
            .filter(|tx| tx.currency == currency)
            .map(|tx| tx.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
