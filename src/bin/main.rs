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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use reward_ledger::{
    AttributionCoordinator, AttributionError, BalanceAdjustment, Config, Currency, LedgerStore,
    UserId, notifier,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Reward Ledger - Replay ledger events from a CSV file
///
/// Reads events from a CSV file, applies them to a fresh ledger and writes
/// the resulting accounts to stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "reward-ledger")]
#[command(about = "Replays ledger and invite events and prints account balances", long_about = None)]
struct Args {
    /// Path to CSV file with events
    ///
    /// Expected format: type,user,counterpart,currency,amount,note
    /// Example: cargo run -- events.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Base URL of the task service; overrides the configuration
    #[arg(long, value_name = "URL")]
    api_base: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
    .and_then(|mut config| config.apply_env().map(|()| config))
    .unwrap_or_else(|e| {
        eprintln!("Error loading configuration: {}", e);
        process::exit(1);
    });
    if let Some(api_base) = args.api_base {
        config.notifier.api_base = Some(api_base);
    }

    let runtime = tokio::runtime::Handle::current();
    let (notifier, worker) = match notifier::from_config(&config.notifier, &runtime) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Error starting notifier: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let coordinator = AttributionCoordinator::from_config(&config, notifier);
    if let Err(e) = process_events(BufReader::new(file), &coordinator) {
        eprintln!("Error processing events: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_accounts(coordinator.store(), std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    // Close the queue so the worker exits once it has handed off every request
    drop(coordinator);
    if let Some(worker) = worker {
        let _ = worker.await;
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, counterpart, currency, amount, note`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event_type: String,
    user: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    counterpart: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    currency: Option<Currency>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug)]
enum Event {
    Register(UserId),
    Deposit(UserId, Currency, Decimal),
    Withdraw(UserId, Currency, Decimal),
    Adjust(BalanceAdjustment),
    /// `invitee` redeems the invite code of `inviter`.
    Redeem { invitee: UserId, inviter: UserId },
}

impl CsvRecord {
    /// Returns `None` for unknown event types or missing required fields.
    fn into_event(self) -> Option<Event> {
        let user = UserId(self.user);
        match self.event_type.to_lowercase().as_str() {
            "register" => Some(Event::Register(user)),
            "deposit" => Some(Event::Deposit(user, self.currency?, self.amount?)),
            "withdraw" | "withdrawal" => Some(Event::Withdraw(user, self.currency?, self.amount?)),
            "adjust" => Some(Event::Adjust(BalanceAdjustment {
                account_id: user,
                currency: self.currency?,
                amount: self.amount?,
                reason: self.note.unwrap_or_default(),
            })),
            "redeem" => Some(Event::Redeem {
                invitee: user,
                inviter: UserId(self.counterpart?),
            }),
            _ => None,
        }
    }
}

fn apply_event(
    coordinator: &AttributionCoordinator,
    event: Event,
) -> Result<(), AttributionError> {
    match event {
        Event::Register(user) => {
            coordinator.register(user);
        }
        Event::Deposit(user, currency, amount) => {
            coordinator.register(user);
            coordinator.deposit(user, currency, amount)?;
        }
        Event::Withdraw(user, currency, amount) => {
            coordinator.register(user);
            coordinator.withdraw(user, currency, amount)?;
        }
        Event::Adjust(adjustment) => {
            coordinator.register(adjustment.account_id);
            coordinator.adjust_balance(adjustment)?;
        }
        Event::Redeem { invitee, inviter } => {
            coordinator.register(inviter);
            let code = coordinator.invite_code(inviter)?;
            let outcome = coordinator.redeem_invite(invitee, code.as_str())?;
            debug!(?outcome, "redemption processed");
        }
    }
    Ok(())
}

/// Replays events from a CSV reader.
///
/// Streams the input so arbitrarily large files are never held in memory.
/// Malformed rows and rejected events are logged and skipped.
///
/// # Example
///
/// ```csv
/// type,user,counterpart,currency,amount,note
/// register,1,,,,
/// redeem,2,1,,,
/// deposit,2,,USDT,100.0,
/// adjust,2,,USDT,-5,fee correction
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn process_events<R: Read>(
    reader: R,
    coordinator: &AttributionCoordinator,
) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut applied = 0usize;
    let mut skipped = 0usize;
    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                skipped += 1;
                continue;
            }
        };
        let Some(event) = record.into_event() else {
            warn!(line = line + 2, "skipping invalid event");
            skipped += 1;
            continue;
        };
        match apply_event(coordinator, event) {
            Ok(()) => applied += 1,
            Err(e) => {
                warn!(line = line + 2, error = %e, "event rejected");
                skipped += 1;
            }
        }
    }

    info!(applied, skipped, "replay finished");
    Ok(())
}

/// Writes one CSV row per account, ordered by user id, with 4 decimal places.
///
/// Columns: `user, usdt, ton, stars, points, invite_code, invited_by, invite_count, invite_earnings`
pub fn write_accounts<W: Write>(store: &LedgerStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in store.accounts() {
        wtr.serialize(&account)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reward_ledger::{LogNotifier, TransactionKind};
    use rust_decimal_macros::dec;
    use std::io::Cursor;
    use std::sync::Arc;

    fn coordinator() -> AttributionCoordinator {
        AttributionCoordinator::from_config(&Config::default(), Arc::new(LogNotifier))
    }

    #[test]
    fn parse_deposit_and_withdrawal() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   deposit,1,,USDT,100.0,\n\
                   withdraw,1,,USDT,30.0,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        let account = coordinator.store().get_account(UserId(1)).unwrap();
        assert_eq!(account.balance(Currency::Usdt), dec!(70.0));
        assert_eq!(coordinator.store().transactions_for(UserId(1)).len(), 2);
    }

    #[test]
    fn parse_redeem_credits_both_sides() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   register,1,,,,\n\
                   redeem,2,1,,,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        let inviter = coordinator.store().get_account(UserId(1)).unwrap();
        let invitee = coordinator.store().get_account(UserId(2)).unwrap();
        assert_eq!(inviter.balance(Currency::Points), dec!(10));
        assert_eq!(inviter.invite_count, 1);
        assert_eq!(invitee.balance(Currency::Points), dec!(5));
        assert_eq!(invitee.invited_by, Some(UserId(1)));
    }

    #[test]
    fn second_redeem_is_rejected_and_skipped() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   redeem,3,1,,,\n\
                   redeem,3,2,,,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        assert_eq!(
            coordinator.store().get_account(UserId(3)).unwrap().invited_by,
            Some(UserId(1))
        );
        assert_eq!(coordinator.store().get_account(UserId(2)).unwrap().invite_count, 0);
        let code = coordinator.invite_code(UserId(2)).unwrap();
        assert!(matches!(
            coordinator.redeem_invite(UserId(3), code.as_str()),
            Err(AttributionError::Validation(_))
        ));
    }

    #[test]
    fn non_positive_deposits_and_withdrawals_are_skipped() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   deposit,1,,USDT,-100,\n\
                   deposit,1,,USDT,0,\n\
                   deposit,2,,TON,20,\n\
                   withdraw,2,,TON,-5,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        let first = coordinator.store().get_account(UserId(1)).unwrap();
        assert_eq!(first.balance(Currency::Usdt), Decimal::ZERO);
        assert!(coordinator.store().transactions_for(UserId(1)).is_empty());

        let second = coordinator.store().get_account(UserId(2)).unwrap();
        assert_eq!(second.balance(Currency::Ton), dec!(20));
        assert_eq!(coordinator.store().transactions_for(UserId(2)).len(), 1);
    }

    #[test]
    fn adjust_uses_note_as_reason() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   deposit,1,,TON,50,\n\
                   adjust,1,,TON,100,promo credit\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        let trail = coordinator.store().transactions_for(UserId(1));
        assert_eq!(trail[1].kind, TransactionKind::BalanceAdjustment);
        assert_eq!(trail[1].note, "promo credit");
        assert_eq!(trail[1].balance_before, dec!(50));
        assert_eq!(trail[1].balance_after, dec!(150));
    }

    #[test]
    fn skip_malformed_and_rejected_rows() {
        let csv = "type,user,counterpart,currency,amount,note\n\
                   deposit,1,,USDT,10,\n\
                   invalid,row,data,here,,\n\
                   deposit,1,,BTC,10,\n\
                   withdraw,1,,USDT,50,\n\
                   deposit,2,,USDT,20,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv), &coordinator).unwrap();

        assert_eq!(coordinator.store().accounts().len(), 2);
        assert_eq!(
            coordinator.store().get_account(UserId(1)).unwrap().balance(Currency::Usdt),
            dec!(10)
        );
    }

    #[test]
    fn write_accounts_to_csv() {
        let csv_input = "type,user,counterpart,currency,amount,note\n\
                         deposit,2,,USDT,200.25,\n\
                         deposit,1,,STARS,100.5,\n";
        let coordinator = coordinator();
        process_events(Cursor::new(csv_input), &coordinator).unwrap();

        let mut output = Vec::new();
        write_accounts(coordinator.store(), &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        let mut lines = output_str.lines();
        assert_eq!(
            lines.next(),
            Some("user,usdt,ton,stars,points,invite_code,invited_by,invite_count,invite_earnings")
        );
        assert_eq!(lines.next(), Some("1,0,0,100.5,0,,,0,0"));
        assert_eq!(lines.next(), Some("2,200.25,0,0,0,,,0,0"));
    }
}
