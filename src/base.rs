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

//! Core identifier types for users, transactions and currencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a user account.
///
/// Wraps the messaging platform's numeric user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger transaction.
///
/// Allocated by the ledger store in commit order, so ids are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a scheduled red-packet rain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RainId(pub u64);

impl fmt::Display for RainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currencies a balance can be held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usdt,
    Ton,
    Stars,
    Points,
}

impl Currency {
    pub const ALL: [Currency; 4] = [
        Currency::Usdt,
        Currency::Ton,
        Currency::Stars,
        Currency::Points,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usdt => "USDT",
            Self::Ton => "TON",
            Self::Stars => "STARS",
            Self::Points => "POINTS",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USDT" => Ok(Self::Usdt),
            "TON" => Ok(Self::Ton),
            "STARS" => Ok(Self::Stars),
            "POINTS" => Ok(Self::Points),
            _ => Err(UnknownCurrency(s.to_string())),
        }
    }
}

/// Returned when parsing a currency symbol outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown currency: {0}")]
pub struct UnknownCurrency(pub String);

/// A user's invite code.
///
/// Codes are compared case-insensitively: construction trims surrounding
/// whitespace and upper-cases the input, so `" ab12cd34 "` and `"AB12CD34"`
/// name the same code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
    /// Characters invite codes are drawn from. Excludes `0`, `O`, `1` and `I`.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Normalises `raw` into an invite code.
    ///
    /// Returns `None` if the input is empty or contains characters outside
    /// [`InviteCode::ALPHABET`] after normalisation.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() || !normalized.bytes().all(|b| Self::ALPHABET.contains(&b)) {
            return None;
        }
        Some(Self(normalized))
    }

    pub(crate) fn from_generated(code: String) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("usdt".parse::<Currency>(), Ok(Currency::Usdt));
        assert_eq!(" Ton ".parse::<Currency>(), Ok(Currency::Ton));
        assert_eq!("STARS".parse::<Currency>(), Ok(Currency::Stars));
        assert_eq!("points".parse::<Currency>(), Ok(Currency::Points));
        assert!("BTC".parse::<Currency>().is_err());
    }

    #[test]
    fn currency_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Currency::Usdt).unwrap(), "\"USDT\"");
        assert_eq!(
            serde_json::from_str::<Currency>("\"POINTS\"").unwrap(),
            Currency::Points
        );
    }

    #[test]
    fn invite_code_normalizes_input() {
        let code = InviteCode::parse("  ab23cd45 ").unwrap();
        assert_eq!(code.as_str(), "AB23CD45");
        assert_eq!(InviteCode::parse("AB23CD45"), Some(code));
    }

    #[test]
    fn invite_code_rejects_foreign_characters() {
        assert_eq!(InviteCode::parse(""), None);
        assert_eq!(InviteCode::parse("   "), None);
        assert_eq!(InviteCode::parse("AB-12"), None);
        // Ambiguous glyphs are never issued
        assert_eq!(InviteCode::parse("O0I1"), None);
    }
}
