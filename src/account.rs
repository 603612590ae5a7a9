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

//! Account rows and their read-only snapshots.
//!
//! An [`Account`] is the mutable row owned by the ledger store. Everything
//! outside the store sees an [`AccountSnapshot`], a plain copy of the row's
//! scalar fields taken under the row lock.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use reward_ledger::{Account, Currency, UserId};
//!
//! let account = Account::new(UserId(1));
//! assert_eq!(account.snapshot().balance(Currency::Usdt), dec!(0));
//! ```

use crate::base::{Currency, InviteCode, UserId};
use crate::error::LedgerError;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct AccountData {
    pub(crate) user_id: UserId,
    balances: BTreeMap<Currency, Decimal>,
    pub(crate) invite_code: Option<InviteCode>,
    invited_by: Option<UserId>,
    invite_count: u32,
    invite_earnings: Decimal,
}

impl AccountData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balances: BTreeMap::new(),
            invite_code: None,
            invited_by: None,
            invite_count: 0,
            invite_earnings: Decimal::ZERO,
        }
    }

    fn assert_invariants(&self) {
        for (currency, balance) in &self.balances {
            debug_assert!(
                *balance >= Decimal::ZERO,
                "Invariant violated: {} balance went negative: {}",
                currency,
                balance
            );
        }
    }

    pub(crate) fn balance(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Adds `delta` to the balance and returns `(before, after)`.
    pub(crate) fn apply(
        &mut self,
        currency: Currency,
        delta: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        if delta.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let before = self.balance(currency);
        let after = before + delta;
        if after < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                user_id: self.user_id,
                currency,
            });
        }
        self.balances.insert(currency, after);
        self.assert_invariants();
        Ok((before, after))
    }

    /// Sets the inviter only if none is recorded yet. Returns whether it was set.
    pub(crate) fn set_invited_by_if_unset(&mut self, inviter: UserId) -> bool {
        if self.invited_by.is_some() {
            return false;
        }
        self.invited_by = Some(inviter);
        true
    }

    pub(crate) fn increment_invite_count(&mut self) -> u32 {
        self.invite_count += 1;
        self.invite_count
    }

    pub(crate) fn add_invite_earnings(&mut self, amount: Decimal) {
        self.invite_earnings += amount;
    }

    pub(crate) fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user_id,
            balances: self.balances.clone(),
            invite_code: self.invite_code.clone(),
            invited_by: self.invited_by,
            invite_count: self.invite_count,
            invite_earnings: self.invite_earnings,
        }
    }
}

/// Ledger account row.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user_id)),
        }
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.inner.lock().snapshot()
    }

    /// Waits at most `timeout` for the row lock.
    pub(crate) fn lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, AccountData>> {
        self.inner.try_lock_for(timeout)
    }
}

/// Point-in-time copy of an account's public fields.
///
/// Detached from the store: holding a snapshot never blocks writers and never
/// observes a later write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub balances: BTreeMap<Currency, Decimal>,
    pub invite_code: Option<InviteCode>,
    pub invited_by: Option<UserId>,
    pub invite_count: u32,
    pub invite_earnings: Decimal,
}

impl AccountSnapshot {
    const DECIMAL_PRECISION: u32 = 4;

    pub fn balance(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }
}

impl Serialize for AccountSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rounded =
            |currency| self.balance(currency).round_dp(AccountSnapshot::DECIMAL_PRECISION);
        let mut state = serializer.serialize_struct("Account", 9)?;
        state.serialize_field("user", &self.user_id)?;
        state.serialize_field("usdt", &rounded(Currency::Usdt))?;
        state.serialize_field("ton", &rounded(Currency::Ton))?;
        state.serialize_field("stars", &rounded(Currency::Stars))?;
        state.serialize_field("points", &rounded(Currency::Points))?;
        state.serialize_field("invite_code", &self.invite_code)?;
        state.serialize_field("invited_by", &self.invited_by)?;
        state.serialize_field("invite_count", &self.invite_count)?;
        state.serialize_field(
            "invite_earnings",
            &self.invite_earnings.round_dp(AccountSnapshot::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}
