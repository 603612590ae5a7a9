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

//! # Reward Ledger
//!
//! This library keeps user balances with an append-only audit trail and pays
//! invite rewards (per-invite bonuses and invite-count milestones) exactly once
//! per qualifying event, under concurrent access.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: Source of truth for balances; every change is an atomic unit that also writes its [`Transaction`] rows
//! - [`BalanceCache`]: Short-TTL read-through cache of [`AccountSnapshot`]s
//! - [`RewardRules`]: Pure evaluation of invite and milestone rewards
//! - [`AttributionCoordinator`]: Runs invite redemptions and admin adjustments end to end
//! - [`Notifier`]: Fire-and-forget task-completion signals to downstream services
//! - [`RainSchedule`]: Schedule of red-packet rains sharing the ledger's accounts
//!
//! ## Example
//!
//! ```
//! use reward_ledger::{AttributionCoordinator, Config, Currency, LogNotifier, RedemptionOutcome, UserId};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let coordinator = AttributionCoordinator::from_config(&Config::default(), Arc::new(LogNotifier));
//!
//! let inviter = UserId(1);
//! coordinator.register(inviter);
//! let code = coordinator.invite_code(inviter).unwrap();
//!
//! let outcome = coordinator.redeem_invite(UserId(2), code.as_str()).unwrap();
//! assert!(matches!(outcome, RedemptionOutcome::Credited(_)));
//!
//! let balance = coordinator.balance(inviter).unwrap();
//! assert_eq!(balance.balance(Currency::Points), dec!(10));
//! ```
//!
//! ## Thread Safety
//!
//! Account rows are individually locked. Units touching different accounts run
//! in parallel; units sharing an account are serialized on its row lock, with
//! a bounded wait surfaced as a retryable conflict.

pub mod account;
mod base;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod notifier;
pub mod rain;
pub mod rules;
pub mod store;
mod transaction;

pub use account::{Account, AccountSnapshot};
pub use base::{Currency, InviteCode, RainId, TransactionId, UnknownCurrency, UserId};
pub use cache::{BalanceCache, CacheStats};
pub use config::{CacheConfig, Config, LedgerConfig, NotifierConfig, RewardConfig};
pub use coordinator::{
    AttributionCoordinator, BalanceAdjustment, InviteStats, RedemptionOutcome, RedemptionReceipt,
    RedemptionState,
};
pub use error::{AttributionError, LedgerError, NotificationError, ValidationError};
pub use journal::Journal;
pub use notifier::{HttpNotifier, LogNotifier, Notifier, TaskCompletion, TaskKind};
pub use rain::{NewRain, RainSchedule, RainStatus, ScheduledRain};
pub use rules::{InviteReward, MilestoneTable, RewardRules};
pub use store::{LedgerStore, UnitOfWork};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
