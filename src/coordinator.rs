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

//! Invite attribution.
//!
//! The [`AttributionCoordinator`] runs one invite redemption end to end:
//!
//! ```text
//! Received ──validate──► Validated ──atomic unit──► Applied ──invalidate + notify──► Notified
//!     │
//!     └──────────────► Rejected
//! ```
//!
//! Validation reads the authoritative store, never the cache, and writes
//! nothing; an unregistered invitee is opened only once it passes. The Applied step
//! is a single ledger unit over inviter and invitee: it records `invited_by`
//! only if it is still unset, bumps the inviter's invite count and credits
//! every reward the rules grant. A redemption that loses the race for
//! `invited_by` commits nothing and reports [`RedemptionOutcome::AlreadyRedeemed`].
//!
//! Once the unit has committed it stays committed. Cache invalidation and
//! downstream notification happen afterwards and cannot undo it.

use crate::account::AccountSnapshot;
use crate::base::{Currency, InviteCode, UserId};
use crate::cache::BalanceCache;
use crate::config::Config;
use crate::error::{AttributionError, LedgerError, ValidationError};
use crate::notifier::{Notifier, TaskCompletion, TaskKind};
use crate::rules::{InviteReward, RewardRules};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of one invite redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionState {
    Received,
    Validated,
    Applied,
    Notified,
    Rejected,
}

impl RedemptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Notified | Self::Rejected)
    }
}

/// What a successful redemption paid out.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionReceipt {
    pub inviter: UserId,
    pub invitee: UserId,
    /// Inviter's invite count after this redemption.
    pub invite_count: u32,
    pub currency: Currency,
    pub reward: InviteReward,
    pub milestone_bonus: Option<Decimal>,
    /// Committed rows, in the order they were applied.
    pub transactions: Vec<Transaction>,
    pub state: RedemptionState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionOutcome {
    Credited(RedemptionReceipt),
    /// A concurrent redemption for the same invitee committed first.
    AlreadyRedeemed { invitee: UserId },
}

/// Admin balance correction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BalanceAdjustment {
    pub account_id: UserId,
    pub currency: Currency,
    /// Signed amount; negative values debit.
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteStats {
    pub invite_code: Option<InviteCode>,
    pub invited_by: Option<UserId>,
    pub invite_count: u32,
    pub invite_earnings: Decimal,
}

impl From<&AccountSnapshot> for InviteStats {
    fn from(snapshot: &AccountSnapshot) -> Self {
        Self {
            invite_code: snapshot.invite_code.clone(),
            invited_by: snapshot.invited_by,
            invite_count: snapshot.invite_count,
            invite_earnings: snapshot.invite_earnings,
        }
    }
}

/// Committed result of the Applied step, before notification.
struct Applied {
    invite_count: u32,
    reward: InviteReward,
    milestone_bonus: Option<Decimal>,
}

pub struct AttributionCoordinator {
    store: Arc<LedgerStore>,
    cache: Arc<BalanceCache>,
    rules: RewardRules,
    notifier: Arc<dyn Notifier>,
    conflict_retries: u32,
}

impl AttributionCoordinator {
    pub fn new(
        store: Arc<LedgerStore>,
        cache: Arc<BalanceCache>,
        rules: RewardRules,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let conflict_retries = store.config().conflict_retries;
        Self {
            store,
            cache,
            rules,
            notifier,
            conflict_retries,
        }
    }

    /// Wires a fresh store, cache and rule set from `config`.
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            Arc::new(LedgerStore::new(config.ledger.clone())),
            Arc::new(BalanceCache::new(config.cache.ttl())),
            RewardRules::from_config(&config.rewards),
            notifier,
        )
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<BalanceCache> {
        &self.cache
    }

    pub fn rules(&self) -> &RewardRules {
        &self.rules
    }

    /// First contact with a user: opens the account if needed.
    pub fn register(&self, user_id: UserId) -> AccountSnapshot {
        self.store.open_account(user_id)
    }

    /// Returns the user's invite code, issuing one on first request.
    pub fn invite_code(&self, user_id: UserId) -> Result<InviteCode, AttributionError> {
        let code = self.with_retries(|| self.store.generate_invite_code(user_id))?;
        self.cache.invalidate(user_id);
        Ok(code)
    }

    /// Cached view of the account; may lag a write by at most the cache TTL
    /// unless that write invalidated it.
    pub fn balance(&self, user_id: UserId) -> Option<AccountSnapshot> {
        self.cache
            .get_or_load(user_id, |id| self.store.get_account(id))
    }

    pub fn invite_stats(&self, user_id: UserId) -> Option<InviteStats> {
        self.balance(user_id).as_ref().map(InviteStats::from)
    }

    /// Applies one balance change through the store and invalidates the cache.
    pub fn apply_transaction(
        &self,
        user_id: UserId,
        currency: Currency,
        delta: Decimal,
        kind: TransactionKind,
        note: &str,
    ) -> Result<Transaction, AttributionError> {
        let transaction = self.with_retries(|| {
            self.store
                .apply_transaction(user_id, currency, delta, kind, note)
        });
        // Invalidate even on failure; a lost lock race says nothing about the row
        self.cache.invalidate(user_id);
        transaction
    }

    /// Credits a positive `amount` as a `deposit`.
    pub fn deposit(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
    ) -> Result<Transaction, AttributionError> {
        let transaction = self.with_retries(|| self.store.deposit(user_id, currency, amount));
        self.cache.invalidate(user_id);
        transaction
    }

    /// Debits a positive `amount` as a `withdrawal`.
    pub fn withdraw(
        &self,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
    ) -> Result<Transaction, AttributionError> {
        let transaction = self.with_retries(|| self.store.withdraw(user_id, currency, amount));
        self.cache.invalidate(user_id);
        transaction
    }

    /// Admin correction, recorded as a `balance_adjustment` transaction.
    pub fn adjust_balance(
        &self,
        adjustment: BalanceAdjustment,
    ) -> Result<Transaction, AttributionError> {
        let BalanceAdjustment {
            account_id,
            currency,
            amount,
            reason,
        } = adjustment;
        let transaction = self.apply_transaction(
            account_id,
            currency,
            amount,
            TransactionKind::BalanceAdjustment,
            &reason,
        )?;
        info!(
            user_id = %account_id,
            %currency,
            %amount,
            balance_after = %transaction.balance_after,
            %reason,
            "balance adjusted"
        );
        Ok(transaction)
    }

    /// Redeems `code` on behalf of `invitee`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MalformedInviteCode`] - `code` cannot be an invite code.
    /// - [`ValidationError::AlreadyInvited`] - `invitee` was already credited by an inviter.
    /// - [`ValidationError::UnknownInviteCode`] - no account owns `code`.
    /// - [`ValidationError::SelfInvite`] - `code` belongs to `invitee`.
    /// - [`AttributionError::RetriesExhausted`] - lock conflicts outlasted the retry budget.
    pub fn redeem_invite(
        &self,
        invitee: UserId,
        code: &str,
    ) -> Result<RedemptionOutcome, AttributionError> {
        debug!(%invitee, state = ?RedemptionState::Received, "invite redemption");

        let inviter = match self.validate(invitee, code) {
            Ok(inviter) => inviter,
            Err(error) => {
                warn!(%invitee, state = ?RedemptionState::Rejected, %error, "invite redemption rejected");
                return Err(error.into());
            }
        };
        debug!(%invitee, %inviter, state = ?RedemptionState::Validated, "invite redemption");

        // Redemption is the invitee's first contact when they never registered
        self.store.open_account(invitee);
        let (applied, transactions) = self.with_retries(|| self.apply(inviter, invitee))?;
        let Some(applied) = applied else {
            debug!(%invitee, %inviter, "invite already redeemed concurrently");
            return Ok(RedemptionOutcome::AlreadyRedeemed { invitee });
        };
        info!(
            %invitee,
            %inviter,
            invite_count = applied.invite_count,
            milestone_bonus = ?applied.milestone_bonus,
            state = ?RedemptionState::Applied,
            "invite redeemed"
        );

        self.cache.invalidate(inviter);
        self.cache.invalidate(invitee);
        self.notify(inviter, invitee, &applied);

        Ok(RedemptionOutcome::Credited(RedemptionReceipt {
            inviter,
            invitee,
            invite_count: applied.invite_count,
            currency: self.rules.currency(),
            reward: applied.reward,
            milestone_bonus: applied.milestone_bonus,
            transactions,
            state: RedemptionState::Notified,
        }))
    }

    /// Read-only checks; an unknown invitee is treated as not yet invited.
    fn validate(&self, invitee: UserId, code: &str) -> Result<UserId, ValidationError> {
        let code = InviteCode::parse(code).ok_or(ValidationError::MalformedInviteCode)?;
        let already_invited = self
            .store
            .get_account(invitee)
            .is_some_and(|account| account.invited_by.is_some());
        if already_invited {
            return Err(ValidationError::AlreadyInvited);
        }
        let inviter = self
            .store
            .find_by_invite_code(&code)
            .ok_or(ValidationError::UnknownInviteCode)?;
        if inviter.user_id == invitee {
            return Err(ValidationError::SelfInvite);
        }
        Ok(inviter.user_id)
    }

    fn apply(
        &self,
        inviter: UserId,
        invitee: UserId,
    ) -> Result<(Option<Applied>, Vec<Transaction>), LedgerError> {
        let rules = &self.rules;
        let currency = rules.currency();

        self.store.atomic(&[inviter, invitee], |unit| {
            // Conditional write: only the first redemption for this invitee proceeds
            if !unit.set_invited_by_if_unset(invitee, inviter)? {
                return Ok(None);
            }
            let invite_count = unit.increment_invite_count(inviter)?;

            let reward = rules.evaluate_invite_reward(true);
            if reward.inviter_amount > Decimal::ZERO {
                unit.apply(
                    inviter,
                    currency,
                    reward.inviter_amount,
                    TransactionKind::InviteBonus,
                    format!("invite reward for user {invitee}"),
                )?;
                unit.add_invite_earnings(inviter, reward.inviter_amount)?;
            }
            if reward.invitee_amount > Decimal::ZERO {
                unit.apply(
                    invitee,
                    currency,
                    reward.invitee_amount,
                    TransactionKind::InviteBonus,
                    format!("joined with invite from user {inviter}"),
                )?;
            }

            let milestone_bonus = rules.evaluate_milestone(invite_count);
            if let Some(bonus) = milestone_bonus {
                unit.apply(
                    inviter,
                    currency,
                    bonus,
                    TransactionKind::InviteMilestone,
                    format!("milestone reward for {invite_count} invites"),
                )?;
                unit.add_invite_earnings(inviter, bonus)?;
            }

            Ok(Some(Applied {
                invite_count,
                reward,
                milestone_bonus,
            }))
        })
    }

    fn notify(&self, inviter: UserId, invitee: UserId, applied: &Applied) {
        self.notifier.notify(
            TaskKind::InviteFriend,
            TaskCompletion {
                user_id: inviter,
                related_user_id: Some(invitee),
                invite_count: Some(applied.invite_count),
            },
        );
        self.notifier.notify(
            TaskKind::AcceptInvite,
            TaskCompletion {
                user_id: invitee,
                related_user_id: Some(inviter),
                invite_count: None,
            },
        );
        if applied.milestone_bonus.is_some() {
            self.notifier.notify(
                TaskKind::InviteMilestone,
                TaskCompletion {
                    user_id: inviter,
                    related_user_id: None,
                    invite_count: Some(applied.invite_count),
                },
            );
        }
    }

    /// Runs `op`, retrying lock conflicts up to the configured budget.
    fn with_retries<T>(
        &self,
        mut op: impl FnMut() -> Result<T, LedgerError>,
    ) -> Result<T, AttributionError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Err(LedgerError::Conflict(user_id)) => {
                    if attempts > self.conflict_retries {
                        warn!(%user_id, attempts, "giving up after lock conflicts");
                        return Err(AttributionError::RetriesExhausted { attempts });
                    }
                    warn!(%user_id, attempts, "lock conflict, retrying");
                }
                result => return result.map_err(AttributionError::from),
            }
        }
    }
}
