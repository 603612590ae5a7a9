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

//! Read-through balance cache.
//!
//! Holds [`AccountSnapshot`] copies keyed by user id for a bounded time. The
//! cache is never authoritative: a miss is filled by the caller's loader,
//! usually [`LedgerStore::get_account`](crate::LedgerStore::get_account).
//!
//! Every writer must call [`BalanceCache::invalidate`] for each account it
//! touched before handing control back to anything that reads through the
//! cache. Each invalidation bumps a per-user generation; a load that started
//! before the bump is returned to its caller but not stored, so a slow reader
//! cannot re-populate the cache with a pre-write snapshot.

use crate::account::AccountSnapshot;
use crate::base::UserId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: AccountSnapshot,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<CacheEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct BalanceCache {
    slots: DashMap<UserId, Slot>,
    ttl: RwLock<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl: RwLock::new(ttl),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Changes the TTL. Applies to entries already cached.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    /// Returns the cached snapshot if present and younger than the TTL.
    pub fn get(&self, user_id: UserId) -> Option<AccountSnapshot> {
        let found = self.lookup(user_id);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn lookup(&self, user_id: UserId) -> Option<AccountSnapshot> {
        let ttl = self.ttl();
        let expired_at = {
            let slot = self.slots.get(&user_id)?;
            let entry = slot.entry.as_ref()?;
            if entry.cached_at.elapsed() < ttl {
                return Some(entry.snapshot.clone());
            }
            entry.cached_at
        };

        // Evict unless a fresher entry replaced it in the meantime
        if let Some(mut slot) = self.slots.get_mut(&user_id) {
            if slot.entry.as_ref().map(|e| e.cached_at) == Some(expired_at) {
                slot.entry = None;
            }
        }
        None
    }

    /// Returns the cached snapshot or loads, caches and returns a fresh one.
    ///
    /// `load` runs without any cache lock held. Returns `None` if the loader
    /// finds no account.
    pub fn get_or_load<F>(&self, user_id: UserId, load: F) -> Option<AccountSnapshot>
    where
        F: FnOnce(UserId) -> Option<AccountSnapshot>,
    {
        if let Some(snapshot) = self.get(user_id) {
            return Some(snapshot);
        }

        let generation = self.slots.entry(user_id).or_default().generation;
        let snapshot = load(user_id)?;

        if let Some(mut slot) = self.slots.get_mut(&user_id) {
            if slot.generation == generation {
                slot.entry = Some(CacheEntry {
                    snapshot: snapshot.clone(),
                    cached_at: Instant::now(),
                });
            }
        }
        Some(snapshot)
    }

    /// Drops the user's entry and fences off loads already in flight.
    pub fn invalidate(&self, user_id: UserId) {
        let mut slot = self.slots.entry(user_id).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.entry = None;
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = None;
        }
    }

    /// Number of live (possibly expired but not yet evicted) entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use std::thread;

    fn snapshot(user: u64) -> AccountSnapshot {
        Account::new(UserId(user)).snapshot()
    }

    #[test]
    fn miss_then_hit() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(UserId(1)), None);

        let loaded = cache.get_or_load(UserId(1), |id| Some(snapshot(id.0)));
        assert_eq!(loaded, Some(snapshot(1)));
        assert_eq!(cache.get(UserId(1)), Some(snapshot(1)));

        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
    }

    #[test]
    fn loader_not_called_on_hit() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        cache.get_or_load(UserId(1), |id| Some(snapshot(id.0)));
        let again = cache.get_or_load(UserId(1), |_| panic!("loader called on hit"));
        assert_eq!(again, Some(snapshot(1)));
    }

    #[test]
    fn missing_account_is_not_cached() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_load(UserId(1), |_| None), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = BalanceCache::new(Duration::from_millis(20));
        cache.get_or_load(UserId(1), |id| Some(snapshot(id.0)));
        assert!(cache.get(UserId(1)).is_some());

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(UserId(1)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn shortening_ttl_applies_to_existing_entries() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        cache.get_or_load(UserId(1), |id| Some(snapshot(id.0)));
        cache.set_ttl(Duration::ZERO);
        assert_eq!(cache.ttl(), Duration::ZERO);
        assert_eq!(cache.get(UserId(1)), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        cache.get_or_load(UserId(1), |id| Some(snapshot(id.0)));
        cache.get_or_load(UserId(2), |id| Some(snapshot(id.0)));

        cache.invalidate(UserId(1));
        assert_eq!(cache.get(UserId(1)), None);
        assert!(cache.get(UserId(2)).is_some());
    }

    #[test]
    fn load_overtaken_by_invalidation_is_not_stored() {
        let cache = BalanceCache::new(Duration::from_secs(60));

        let returned = cache.get_or_load(UserId(1), |id| {
            // A writer commits and invalidates while this load is in flight
            cache.invalidate(id);
            Some(snapshot(id.0))
        });

        assert_eq!(returned, Some(snapshot(1)));
        assert_eq!(cache.get(UserId(1)), None);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = BalanceCache::new(Duration::from_secs(60));
        for user in 1..=3 {
            cache.get_or_load(UserId(user), |id| Some(snapshot(id.0)));
        }
        assert_eq!(cache.len(), 3);
        cache.clear();
        assert!(cache.is_empty());
    }
}
