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

//! Scheduled red-packet rains.
//!
//! A rain is a time-triggered bulk distribution into a group chat. This module
//! only keeps the schedule: it validates new rains against the ledger's
//! accounts and tracks their status. Splitting and paying out packets is done
//! elsewhere.
//!
//! ```text
//! Scheduled ──start──► Running ──complete──► Completed
//!     │
//!     └──cancel──► Cancelled
//! ```

use crate::base::{Currency, RainId, UserId};
use crate::error::LedgerError;
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RainStatus {
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRain {
    pub start_time: DateTime<Utc>,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub packet_count: u32,
    pub target_chat: i64,
    pub created_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledRain {
    pub id: RainId,
    pub start_time: DateTime<Utc>,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub packet_count: u32,
    pub target_chat: i64,
    pub status: RainStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

pub struct RainSchedule {
    store: Arc<LedgerStore>,
    rains: DashMap<RainId, ScheduledRain>,
    next_id: AtomicU64,
}

impl RainSchedule {
    /// Smallest amount a single packet may carry.
    pub const MIN_PACKET_AMOUNT: Decimal = dec!(0.01);

    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self {
            store,
            rains: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn schedule(&self, rain: NewRain) -> Result<ScheduledRain, LedgerError> {
        if self.store.get_account(rain.created_by).is_none() {
            return Err(LedgerError::AccountNotFound(rain.created_by));
        }
        if rain.packet_count == 0 {
            return Err(LedgerError::InvalidRain("packet count must be positive".into()));
        }
        if rain.total_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidRain("total amount must be positive".into()));
        }
        if rain.total_amount < Self::MIN_PACKET_AMOUNT * Decimal::from(rain.packet_count) {
            return Err(LedgerError::InvalidRain(format!(
                "{} {} cannot fill {} packets",
                rain.total_amount, rain.currency, rain.packet_count
            )));
        }

        let id = RainId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let scheduled = ScheduledRain {
            id,
            start_time: rain.start_time,
            total_amount: rain.total_amount,
            currency: rain.currency,
            packet_count: rain.packet_count,
            target_chat: rain.target_chat,
            status: RainStatus::Scheduled,
            created_by: rain.created_by,
            created_at: Utc::now(),
        };
        self.rains.insert(id, scheduled.clone());
        info!(rain_id = %id, created_by = %rain.created_by, start_time = %rain.start_time, "red-packet rain scheduled");
        Ok(scheduled)
    }

    pub fn get(&self, id: RainId) -> Option<ScheduledRain> {
        self.rains.get(&id).map(|r| r.value().clone())
    }

    /// Scheduled rains whose start time is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledRain> {
        let mut due: Vec<_> = self
            .rains
            .iter()
            .filter(|r| r.status == RainStatus::Scheduled && r.start_time <= now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|rain| (rain.start_time, rain.id));
        due
    }

    pub fn start(&self, id: RainId) -> Result<ScheduledRain, LedgerError> {
        self.transition(id, RainStatus::Scheduled, RainStatus::Running)
    }

    pub fn complete(&self, id: RainId) -> Result<ScheduledRain, LedgerError> {
        self.transition(id, RainStatus::Running, RainStatus::Completed)
    }

    pub fn cancel(&self, id: RainId) -> Result<ScheduledRain, LedgerError> {
        self.transition(id, RainStatus::Scheduled, RainStatus::Cancelled)
    }

    fn transition(
        &self,
        id: RainId,
        from: RainStatus,
        to: RainStatus,
    ) -> Result<ScheduledRain, LedgerError> {
        let mut rain = self
            .rains
            .get_mut(&id)
            .ok_or_else(|| LedgerError::InvalidRain(format!("rain {id} not found")))?;
        if rain.status != from {
            return Err(LedgerError::InvalidRain(format!(
                "rain {id} is {:?}, expected {:?}",
                rain.status, from
            )));
        }
        rain.status = to;
        info!(rain_id = %id, status = ?to, "red-packet rain status changed");
        Ok(rain.value().clone())
    }
}
