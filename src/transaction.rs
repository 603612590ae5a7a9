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

//! Ledger transaction records.
//!
//! A [`Transaction`] is created exactly once, when the balance change it
//! describes commits, and is never modified afterwards. Corrections are
//! recorded as new, offsetting transactions.

use crate::base::{Currency, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What caused a balance change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    InviteBonus,
    InviteMilestone,
    BalanceAdjustment,
    Deposit,
    Withdrawal,
    GiftSend,
    GiftClaim,
    RedpacketRain,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InviteBonus => "invite_bonus",
            Self::InviteMilestone => "invite_milestone",
            Self::BalanceAdjustment => "balance_adjustment",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::GiftSend => "gift_send",
            Self::GiftClaim => "gift_claim",
            Self::RedpacketRain => "redpacket_rain",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

/// Immutable audit record of one balance change.
///
/// # Invariants
///
/// - `balance_after == balance_before + amount`
/// - `balance_after` is the account balance immediately after the commit that
///   produced this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub currency: Currency,
    /// Signed: credits are positive, debits negative.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub note: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Checks the before/after arithmetic recorded on this row.
    pub fn is_consistent(&self) -> bool {
        self.balance_before + self.amount == self.balance_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(amount: Decimal, before: Decimal, after: Decimal) -> Transaction {
        Transaction {
            id: TransactionId(1),
            user_id: UserId(1),
            kind: TransactionKind::BalanceAdjustment,
            currency: Currency::Usdt,
            amount,
            balance_before: before,
            balance_after: after,
            note: String::new(),
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn consistency_checks_arithmetic() {
        assert!(sample(dec!(100), dec!(50), dec!(150)).is_consistent());
        assert!(sample(dec!(-20), dec!(50), dec!(30)).is_consistent());
        assert!(!sample(dec!(100), dec!(50), dec!(100)).is_consistent());
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::InviteMilestone).unwrap(),
            "\"invite_milestone\""
        );
        assert_eq!(TransactionKind::BalanceAdjustment.to_string(), "balance_adjustment");
    }
}
