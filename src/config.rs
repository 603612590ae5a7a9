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

//! Runtime configuration.
//!
//! Every section has defaults, so an empty TOML file is a valid configuration.
//! Environment variables override individual values on top of whatever was
//! loaded.

use crate::base::Currency;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub cache: CacheConfig,
    pub rewards: RewardConfig,
    pub notifier: NotifierConfig,
}

impl Config {
    /// Loads and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Applies `REWARD_LEDGER_*` environment overrides, then validates.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(api_base) = std::env::var("REWARD_LEDGER_API_BASE") {
            self.notifier.api_base = Some(api_base);
        }
        if let Some(ttl) = parse_env("REWARD_LEDGER_CACHE_TTL_SECS")? {
            self.cache.ttl_secs = ttl;
        }
        if let Some(timeout) = parse_env("REWARD_LEDGER_LOCK_TIMEOUT_MS")? {
            self.ledger.lock_timeout_ms = timeout;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.validate()
    }
}

fn parse_env(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}

/// Ledger store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for an account row lock (milliseconds)
    pub lock_timeout_ms: u64,

    /// How many times a conflicting unit is retried before giving up
    pub conflict_retries: u32,

    /// Length of generated invite codes
    pub invite_code_length: usize,

    /// Candidate codes tried before reporting exhaustion
    pub invite_code_attempts: u32,
}

impl LedgerConfig {
    /// Shortest invite code accepted from configuration.
    pub const MIN_INVITE_CODE_LENGTH: usize = 6;

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Rejects invite code settings under which codes could never be issued
    /// or redeemed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invite_code_length < Self::MIN_INVITE_CODE_LENGTH {
            return Err(ConfigError::Invalid {
                name: "ledger.invite_code_length",
                reason: format!(
                    "{} is below the minimum of {}",
                    self.invite_code_length,
                    Self::MIN_INVITE_CODE_LENGTH
                ),
            });
        }
        if self.invite_code_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "ledger.invite_code_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            conflict_retries: 3,
            invite_code_length: 8,
            invite_code_attempts: 16,
        }
    }
}

/// Balance cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneConfig {
    pub invites: u32,
    pub bonus: Decimal,
}

/// Invite reward amounts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardConfig {
    pub currency: Currency,
    pub inviter_reward: Decimal,
    pub invitee_reward: Decimal,
    pub milestones: Vec<MilestoneConfig>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        let milestone = |invites, bonus| MilestoneConfig { invites, bonus };
        Self {
            currency: Currency::Points,
            inviter_reward: dec!(10),
            invitee_reward: dec!(5),
            milestones: vec![
                milestone(5, dec!(50)),
                milestone(10, dec!(120)),
                milestone(25, dec!(350)),
                milestone(50, dec!(1000)),
                milestone(100, dec!(2500)),
            ],
        }
    }
}

/// Downstream task service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    /// Base URL of the task service. Notifications are only logged when unset.
    pub api_base: Option<String>,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Pending notifications kept before new ones are dropped
    pub queue_capacity: usize,
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            timeout_secs: 5,
            queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.ledger.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
        assert_eq!(config.rewards.currency, Currency::Points);
        assert_eq!(config.rewards.milestones[0].invites, 5);
        assert_eq!(config.notifier.timeout(), Duration::from_secs(5));
        assert!(config.notifier.api_base.is_none());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
ttl_secs = 5

[rewards]
currency = "USDT"
inviter_reward = "1.5"
invitee_reward = "0.5"

[[rewards.milestones]]
invites = 3
bonus = "7"

[notifier]
api_base = "http://tasks.internal"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.rewards.currency, Currency::Usdt);
        assert_eq!(config.rewards.inviter_reward, dec!(1.5));
        assert_eq!(config.rewards.invitee_reward, dec!(0.5));
        assert_eq!(
            config.rewards.milestones,
            vec![MilestoneConfig {
                invites: 3,
                bonus: dec!(7)
            }]
        );
        assert_eq!(
            config.notifier.api_base.as_deref(),
            Some("http://tasks.internal")
        );
        // Untouched sections keep their defaults
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache\nttl_secs = ").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn short_invite_codes_are_rejected() {
        for length in [0, 1, 2, 5] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "[ledger]\ninvite_code_length = {length}").unwrap();
            let err = Config::from_file(file.path()).unwrap_err();
            assert!(
                matches!(
                    err,
                    ConfigError::Invalid {
                        name: "ledger.invite_code_length",
                        ..
                    }
                ),
                "length {length}: {err}"
            );
        }
    }

    #[test]
    fn zero_invite_code_attempts_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ledger]\ninvite_code_attempts = 0").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Invalid {
                name: "ledger.invite_code_attempts",
                ..
            })
        ));
    }

    #[test]
    fn minimum_invite_code_length_is_accepted() {
        let config = Config {
            ledger: LedgerConfig {
                invite_code_length: LedgerConfig::MIN_INVITE_CODE_LENGTH,
                ..LedgerConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
