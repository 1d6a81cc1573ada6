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
use fc_ledger::{
    Actor, AdminAdjustmentService, AuditLog, EntryType, LedgerStore, TransferEngine, UserId,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// FC Ledger replay tool - process an operations CSV through the ledger
///
/// Replays wallet operations from a CSV file, prints final account states to
/// stdout, and verifies that every balance is recomputable from the entry
/// log. A conservation violation exits nonzero.
#[derive(Parser, Debug)]
#[command(name = "fc-ledger")]
#[command(about = "Replays wallet operation CSVs and audits the ledger", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,counterparty,amount,detail
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let ledger = match process_operations(BufReader::new(file)) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if !verify_conservation(&ledger) {
        eprintln!("Conservation audit FAILED: entry log diverged from balances");
        process::exit(2);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, counterparty, amount, detail`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    user: u64,
    #[serde(deserialize_with = "csv::invalid_option")]
    counterparty: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    detail: Option<String>,
}

struct Replayer {
    ledger: Arc<LedgerStore>,
    transfers: TransferEngine,
    admin: AdminAdjustmentService,
    operator: Actor,
}

impl Replayer {
    fn new() -> Self {
        let ledger = Arc::new(LedgerStore::new());
        let transfers = TransferEngine::new(Arc::clone(&ledger));
        let admin = AdminAdjustmentService::new(Arc::clone(&ledger), Arc::new(AuditLog::new()));
        Self {
            ledger,
            transfers,
            admin,
            operator: Actor::admin(UserId(0)),
        }
    }

    /// Applies one record; unknown ops report `None` so the caller can skip.
    fn apply(&self, record: &CsvRecord, row: usize) -> Option<Result<(), fc_ledger::LedgerError>> {
        let user = UserId(record.user);
        let ref_id = record
            .detail
            .clone()
            .unwrap_or_else(|| format!("replay-{row}"));

        let result = match record.op.to_lowercase().as_str() {
            "deposit" => {
                let amount = record.amount?;
                self.ledger
                    .credit(user, amount, EntryType::Deposit, "replay", &ref_id, None)
                    .map(|_| ())
            }
            "withdraw" => {
                let amount = record.amount?;
                self.ledger
                    .lock_funds(user, amount, "withdrawal", &ref_id, None)
                    .and_then(|lock| {
                        self.ledger
                            .settle_lock(user, lock.id, EntryType::Withdrawal, None)
                    })
                    .map(|_| ())
            }
            "withdraw_fail" => {
                let amount = record.amount?;
                self.ledger
                    .lock_funds(user, amount, "withdrawal", &ref_id, None)
                    .and_then(|lock| self.ledger.unlock_funds(user, lock.id))
                    .map(|_| ())
            }
            "transfer" => {
                let amount = record.amount?;
                let to = UserId(record.counterparty?);
                self.transfers
                    .transfer(user, to, amount, record.detail.as_deref())
                    .map(|_| ())
            }
            "adjust" => {
                let delta = record.amount?;
                self.admin
                    .adjust(&self.operator, user, delta, &ref_id)
                    .map(|_| ())
            }
            _ => return None,
        };
        Some(result)
    }
}

/// Process operations from a CSV reader.
///
/// Streams the file so arbitrarily large replays fit in memory. Malformed
/// rows and rejected operations are skipped; a rejected operation leaves no
/// entries behind, so skipping is safe for the audit.
///
/// # CSV Format
///
/// Expected columns: `op, user, counterparty, amount, detail`
/// - `op`: deposit, withdraw, withdraw_fail, transfer, adjust
/// - `user`: user id (u64)
/// - `counterparty`: recipient user id (transfer only)
/// - `amount`: minor units; signed for adjust
/// - `detail`: reference id, note, or reason
pub fn process_operations<R: Read>(reader: R) -> Result<Arc<LedgerStore>, csv::Error> {
    let replayer = Replayer::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => match replayer.apply(&record, row) {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping row {}: {}", row, e);
                }
                None => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid operation record at row {}", row);
                }
            },
            Err(e) => {
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(replayer.ledger)
}

/// Write account balances to a CSV writer, sorted by user id.
///
/// # CSV Format
///
/// Columns: `user_id, available_minor, locked_minor, total_deposited_minor,
/// total_withdrawn_minor`
pub fn write_balances<W: Write>(ledger: &LedgerStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut balances = ledger.balances();
    balances.sort_by_key(|b| b.user_id);
    for balance in balances {
        wtr.serialize(&balance)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Recomputes every balance from the entry log and compares.
pub fn verify_conservation(ledger: &LedgerStore) -> bool {
    ledger.balances().iter().all(|balance| {
        ledger
            .replay_balance(balance.user_id)
            .map(|replayed| replayed == balance.available_minor + balance.locked_minor)
            .unwrap_or(false)
    })
}
