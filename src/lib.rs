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

//! # Carpool Booking
//!
//! This library provides the reservation core of a carpooling service:
//! drivers publish trips with a number of seats, passengers book seats with
//! credits, and cancellations return seats and refund credits.
//!
//! ## Core Components
//!
//! - [`Engine`]: Orchestrates trips, bookings, and credit movements as
//!   all-or-nothing units of work
//! - [`TripStatus`]: Seat-counting trip state machine (`Open`, `Full`, `Cancelled`)
//! - [`Booking`]: A passenger's reservation (`Pending`, `Confirmed`, `Cancelled`)
//! - [`Ledger`]: Per-user credit balances and the journal of committed movements
//! - [`BookingError`]: Structured error values grouped by [`ErrorKind`]
//!
//! ## Example
//!
//! ```
//! use carpool_booking::{Engine, NewTrip, NewVehicle, Role, TripStatus};
//! use chrono::{TimeDelta, Utc};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let driver = engine.register_user("Alice", Role::User, dec!(0)).unwrap();
//! let passenger = engine.register_user("Bob", Role::User, dec!(50)).unwrap();
//! let vehicle = engine
//!     .register_vehicle(driver.id, NewVehicle {
//!         brand: "Renault".into(),
//!         model: "Clio".into(),
//!         plate: "AB-123-CD".into(),
//!         seat_count: 4,
//!     })
//!     .unwrap();
//!
//! let departure = Utc::now() + TimeDelta::days(2);
//! let trip = engine
//!     .create_trip(driver.id, NewTrip {
//!         vehicle: vehicle.id,
//!         departure_city: "Paris".into(),
//!         arrival_city: "Lyon".into(),
//!         departure,
//!         arrival: departure + TimeDelta::hours(5),
//!         available_seats: 3,
//!         price: dec!(10),
//!     })
//!     .unwrap();
//!
//! let booking = engine.create_booking(passenger.id, trip.id, 2).unwrap();
//! assert_eq!(booking.total_price, dec!(20));
//! assert_eq!(engine.balance(passenger.id).unwrap(), dec!(30));
//! assert_eq!(
//!     engine.get_trip(trip.id).unwrap().status,
//!     TripStatus::Open { available_seats: 1 }
//! );
//! ```
//!
//! ## Thread Safety
//!
//! Rows are locked individually, so bookings on different trips proceed in
//! parallel while concurrent bookings on the same trip are serialized. Two
//! passengers racing for the last seat never both succeed.

mod base;
pub mod booking;
pub mod clock;
pub mod config;
mod engine;
pub mod error;
mod journal;
pub mod ledger;
mod query;
mod store;
pub mod trip;
pub mod user;
pub mod vehicle;

pub use base::{BookingId, TripId, UserId, VehicleId};
pub use booking::{Booking, BookingStatus, BookingView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Canceller, EngineConfig, RefundPolicy, StoreConfig};
pub use engine::{Engine, NewTrip, NewVehicle, TripCancellation};
pub use error::{BookingError, ErrorKind, Resource};
pub use journal::{EntryReason, Journal, LedgerEntry};
pub use ledger::{Balance, Ledger};
pub use trip::{Trip, TripStatus};
pub use user::{Role, User, UserPreferences};
pub use vehicle::Vehicle;
