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

use carpool_booking::{
    BookingError, BookingId, Engine, EngineConfig, ManualClock, NewTrip, NewVehicle, Role, TripId, UserId,
    VehicleId,
};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Carpool Booking - Replay a CSV script of carpool operations
///
/// Reads operations from a CSV file, applies them in order, and writes the
/// resulting trips (or user balances) to stdout.
#[derive(Parser, Debug)]
#[command(name = "carpool-booking")]
#[command(about = "Replays carpool operations and reports trip state", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,actor,target,seats,amount,name,from,to,departure,arrival
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Instant the replay runs at (RFC 3339). Defaults to the current time.
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Passenger cancellations at least this many hours before departure are fully refunded
    #[arg(long)]
    full_refund_cutoff_hours: Option<i64>,

    /// Percentage refunded to passengers cancelling after the cutoff
    #[arg(long)]
    late_refund_percent: Option<Decimal>,

    /// What to write to stdout
    #[arg(long, value_enum, default_value_t = Report::Trips)]
    report: Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Trips,
    Users,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "carpool_booking=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env();
    if let Some(hours) = args.full_refund_cutoff_hours {
        config.refund.full_refund_cutoff_hours = hours;
    }
    if let Some(percent) = args.late_refund_percent {
        config.refund.late_refund_percent = percent;
    }
    let clock = Arc::new(ManualClock::new(args.now.unwrap_or_else(Utc::now)));
    let engine = Engine::with_config(config, clock);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    if let Err(e) = replay(&engine, BufReader::new(file)) {
        tracing::error!(error = %e, "cannot read operations");
        process::exit(1);
    }

    let written = match args.report {
        Report::Trips => write_trips(&engine, std::io::stdout()),
        Report::Users => write_users(&engine, std::io::stdout()),
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "cannot write report");
        process::exit(1);
    }
}

/// Raw CSV record. Columns unused by an operation are left empty.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    actor: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    target: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    seats: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    departure: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "csv::invalid_option")]
    arrival: Option<DateTime<Utc>>,
}

/// Why a row was skipped.
#[derive(Debug)]
enum Skip {
    Malformed(&'static str),
    Rejected(carpool_booking::BookingError),
}

impl From<carpool_booking::BookingError> for Skip {
    fn from(err: carpool_booking::BookingError) -> Self {
        Skip::Rejected(err)
    }
}

impl CsvRecord {
    /// Applies this record to the engine.
    fn apply(self, engine: &Engine) -> Result<(), Skip> {
        let actor = self.actor.map(UserId).ok_or(Skip::Malformed("missing actor"));
        let target = self.target.ok_or(Skip::Malformed("missing target"));

        match self.op.to_lowercase().as_str() {
            "register_user" | "register_admin" => {
                let role = if self.op.eq_ignore_ascii_case("register_admin") {
                    Role::Admin
                } else {
                    Role::User
                };
                engine.register_user(self.name, role, self.amount.unwrap_or(Decimal::ZERO))?;
            }
            "register_vehicle" => {
                engine.register_vehicle(
                    actor?,
                    NewVehicle {
                        brand: String::new(),
                        model: String::new(),
                        plate: self.name,
                        seat_count: self.seats.ok_or(Skip::Malformed("missing seats"))?,
                    },
                )?;
            }
            "top_up" => {
                engine.top_up(actor?, self.amount.ok_or(Skip::Malformed("missing amount"))?)?;
            }
            "create_trip" => {
                engine.create_trip(
                    actor?,
                    NewTrip {
                        vehicle: VehicleId(target?),
                        departure_city: self.from,
                        arrival_city: self.to,
                        departure: self.departure.ok_or(Skip::Malformed("missing departure"))?,
                        arrival: self.arrival.ok_or(Skip::Malformed("missing arrival"))?,
                        available_seats: self.seats.ok_or(Skip::Malformed("missing seats"))?,
                        price: self.amount.ok_or(Skip::Malformed("missing price"))?,
                    },
                )?;
            }
            "book" => {
                engine.create_booking(
                    actor?,
                    TripId(target?),
                    self.seats.ok_or(Skip::Malformed("missing seats"))?,
                )?;
            }
            "cancel_booking" => {
                engine.cancel_booking(actor?, BookingId(target?))?;
            }
            "cancel_trip" => {
                engine.cancel_trip(actor?, TripId(target?))?;
            }
            _ => return Err(Skip::Malformed("unknown operation")),
        }
        Ok(())
    }
}

/// Replays operations from a CSV reader.
///
/// Rows are streamed; malformed rows and rejected operations are logged and
/// skipped. IDs are allocated sequentially from 1 per entity kind, so a
/// script can refer to the users, vehicles, trips, and bookings it created.
///
/// # CSV Format
///
/// Columns: `op, actor, target, seats, amount, name, from, to, departure, arrival`
///
/// | op | actor | target | other columns |
/// |----|-------|--------|---------------|
/// | register_user / register_admin | | | name, amount (initial credits) |
/// | register_vehicle | owner | | seats, name (plate) |
/// | top_up | user | | amount |
/// | create_trip | driver | vehicle | seats, amount (price), from, to, departure, arrival |
/// | book | passenger | trip | seats |
/// | cancel_booking | actor | booking | |
/// | cancel_trip | actor | trip | |
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is invalid.
pub fn replay<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let row = line + 1;
        match result {
            Ok(record) => match record.apply(engine) {
                Ok(()) => {}
                Err(Skip::Malformed(reason)) => {
                    tracing::warn!(row, reason, "skipping malformed row");
                }
                Err(Skip::Rejected(err)) => {
                    tracing::warn!(row, error = %err, kind = ?err.kind(), "operation rejected");
                }
            },
            Err(e) => {
                tracing::warn!(row, error = %e, "skipping unreadable row");
            }
        }
    }

    Ok(())
}

/// Failure while writing a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The engine could not read its rows.
    #[error(transparent)]
    Engine(#[from] BookingError),
}

/// Writes every trip, ordered by ID, as CSV.
///
/// Columns: `trip, driver, vehicle, from, to, departure, arrival, price, available_seats, status`
///
/// # Errors
///
/// Returns an error if the trips cannot be read or writing fails.
pub fn write_trips<W: Write>(engine: &Engine, writer: W) -> Result<(), ReportError> {
    let mut wtr = Writer::from_writer(writer);

    for trip in engine.list_all_trips()? {
        wtr.serialize(&trip)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes every user's credit balance as CSV.
///
/// Columns: `user, credits`
///
/// # Errors
///
/// Returns an error if a balance cannot be read or writing fails.
pub fn write_users<W: Write>(engine: &Engine, writer: W) -> Result<(), ReportError> {
    let mut wtr = Writer::from_writer(writer);

    for balance in engine.balances()? {
        wtr.serialize(balance)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carpool_booking::TripStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const HEADER: &str = "op,actor,target,seats,amount,name,from,to,departure,arrival\n";

    fn engine() -> Engine {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        Engine::with_config(EngineConfig::default(), Arc::new(ManualClock::new(now)))
    }

    fn script(rows: &str) -> Cursor<String> {
        Cursor::new(format!("{HEADER}{rows}"))
    }

    const SETUP: &str = "register_user,,,,0,alice,,,,\n\
                         register_user,,,,50,bob,,,,\n\
                         register_vehicle,1,,4,,AB-123-CD,,,,\n\
                         create_trip,1,1,3,10,,Paris,Lyon,2026-06-03T08:00:00Z,2026-06-03T13:00:00Z\n";

    #[test]
    fn replay_creates_trip() {
        let engine = engine();
        replay(&engine, script(SETUP)).unwrap();

        let trip = engine.get_trip(TripId(1)).unwrap();
        assert_eq!(trip.departure_city, "Paris");
        assert_eq!(trip.status, TripStatus::Open { available_seats: 3 });
    }

    #[test]
    fn replay_booking_debits_passenger() {
        let engine = engine();
        let rows = format!("{SETUP}book,2,1,2,,,,,,\n");
        replay(&engine, script(&rows)).unwrap();

        assert_eq!(engine.balance(UserId(2)).unwrap(), dec!(30));
        assert_eq!(engine.get_trip(TripId(1)).unwrap().available_seats(), 1);
    }

    #[test]
    fn replay_cancel_trip_refunds() {
        let engine = engine();
        let rows = format!("{SETUP}book,2,1,2,,,,,,\ncancel_trip,1,1,,,,,,,\n");
        replay(&engine, script(&rows)).unwrap();

        assert_eq!(engine.balance(UserId(2)).unwrap(), dec!(50));
        assert_eq!(engine.get_trip(TripId(1)).unwrap().status, TripStatus::Cancelled);
    }

    #[test]
    fn rejected_and_malformed_rows_are_skipped() {
        let engine = engine();
        let rows = format!(
            "{SETUP}book,2,1,9,,,,,,\n\
             launch,1,1,,,,,,,\n\
             book,,1,1,,,,,,\n\
             book,2,1,1,,,,,,\n"
        );
        replay(&engine, script(&rows)).unwrap();

        assert_eq!(engine.list_bookings_for_passenger(UserId(2)).unwrap().len(), 1);
        assert_eq!(engine.balance(UserId(2)).unwrap(), dec!(40));
    }

    #[test]
    fn write_trips_to_csv() {
        let engine = engine();
        replay(&engine, script(SETUP)).unwrap();

        let mut output = Vec::new();
        write_trips(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.starts_with(
            "trip,driver,vehicle,from,to,departure,arrival,price,available_seats,status"
        ));
        assert!(output_str.contains("Paris,Lyon"));
        assert!(output_str.trim_end().ends_with(",10,3,open"));
    }

    #[test]
    fn write_users_to_csv() {
        let engine = engine();
        replay(&engine, script(SETUP)).unwrap();

        let mut output = Vec::new();
        write_users(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert_eq!(output_str, "user,credits\n1,0\n2,50\n");
    }
}
