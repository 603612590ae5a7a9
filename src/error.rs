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

//! Error types for ledger, attribution and notification failures.

use crate::base::{Currency, UserId};
use thiserror::Error;

/// Ledger store errors.
///
/// Any error returned from inside an atomic unit rolls back every mutation
/// staged in that unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced account has never been opened
    #[error("account {0} not found")]
    AccountNotFound(UserId),

    /// Amount is zero
    #[error("invalid amount (must be non-zero)")]
    InvalidAmount,

    /// Debit would drive the balance negative
    #[error("insufficient {currency} funds on account {user_id}")]
    InsufficientFunds { user_id: UserId, currency: Currency },

    /// Account row lock could not be acquired within the lock-wait timeout
    #[error("lock conflict on account {0}")]
    Conflict(UserId),

    /// No unused invite code could be allocated
    #[error("could not allocate a unique invite code")]
    InviteCodeExhausted,

    /// Red-packet rain rejected by schema validation
    #[error("invalid red-packet rain: {0}")]
    InvalidRain(String),
}

impl LedgerError {
    /// Conflicts are transient and safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Invite redemption rejected before any mutation was attempted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invite code is malformed")]
    MalformedInviteCode,

    #[error("invite code does not belong to any account")]
    UnknownInviteCode,

    #[error("cannot redeem your own invite code")]
    SelfInvite,

    #[error("account was already invited")]
    AlreadyInvited,
}

/// Errors surfaced by the attribution coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Lock conflicts persisted past the retry budget
    #[error("gave up after {attempts} conflicting attempts")]
    RetriesExhausted { attempts: u32 },
}

impl AttributionError {
    /// Validation and insufficient-funds failures are reported to the user as
    /// a rejected action. Everything else is an internal failure.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Ledger(LedgerError::InsufficientFunds { .. })
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => true,
            Self::Ledger(err) => err.is_retryable(),
            Self::Validation(_) => false,
        }
    }
}

/// Downstream notification failures.
///
/// These never reach callers of the coordinator; they are logged and dropped.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,
}
