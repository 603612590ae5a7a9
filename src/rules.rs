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

//! Reward rules.
//!
//! Pure functions deciding what an attribution event pays out. Nothing here
//! touches the ledger.

use crate::base::Currency;
use crate::config::RewardConfig;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Invite-count thresholds and the one-time bonus paid on reaching each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MilestoneTable {
    thresholds: BTreeMap<u32, Decimal>,
}

impl MilestoneTable {
    /// Builds a table from `(invite_count, bonus)` pairs.
    ///
    /// Non-positive bonuses are dropped. A repeated threshold keeps the last
    /// bonus given for it.
    pub fn new(entries: impl IntoIterator<Item = (u32, Decimal)>) -> Self {
        let thresholds = entries
            .into_iter()
            .filter(|(_, bonus)| *bonus > Decimal::ZERO)
            .collect();
        Self { thresholds }
    }

    /// Bonus for a count that lands exactly on a threshold.
    ///
    /// Counts between thresholds pay nothing, including counts that skipped
    /// over one.
    pub fn bonus_for(&self, invite_count: u32) -> Option<Decimal> {
        self.thresholds.get(&invite_count).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Decimal)> + '_ {
        self.thresholds.iter().map(|(count, bonus)| (*count, *bonus))
    }
}

/// Amounts credited for a single invite redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InviteReward {
    pub inviter_amount: Decimal,
    pub invitee_amount: Decimal,
}

impl InviteReward {
    pub const NONE: InviteReward = InviteReward {
        inviter_amount: Decimal::ZERO,
        invitee_amount: Decimal::ZERO,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardRules {
    currency: Currency,
    inviter_reward: Decimal,
    invitee_reward: Decimal,
    milestones: MilestoneTable,
}

impl RewardRules {
    pub fn new(
        currency: Currency,
        inviter_reward: Decimal,
        invitee_reward: Decimal,
        milestones: MilestoneTable,
    ) -> Self {
        Self {
            currency,
            inviter_reward: inviter_reward.max(Decimal::ZERO),
            invitee_reward: invitee_reward.max(Decimal::ZERO),
            milestones,
        }
    }

    pub fn from_config(config: &RewardConfig) -> Self {
        Self::new(
            config.currency,
            config.inviter_reward,
            config.invitee_reward,
            MilestoneTable::new(config.milestones.iter().map(|m| (m.invites, m.bonus))),
        )
    }

    /// Currency every invite reward is paid in.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn milestones(&self) -> &MilestoneTable {
        &self.milestones
    }

    /// Only the first redemption of an invitee pays out.
    pub fn evaluate_invite_reward(&self, is_first_redemption: bool) -> InviteReward {
        if !is_first_redemption {
            return InviteReward::NONE;
        }
        InviteReward {
            inviter_amount: self.inviter_reward,
            invitee_amount: self.invitee_reward,
        }
    }

    pub fn evaluate_milestone(&self, new_invite_count: u32) -> Option<Decimal> {
        self.milestones.bonus_for(new_invite_count)
    }
}

impl Default for RewardRules {
    fn default() -> Self {
        Self::from_config(&RewardConfig::default())
    }
}
