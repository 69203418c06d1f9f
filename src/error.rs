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

//! Error types for trip, booking, and ledger operations.
//!
//! Every variant carries the identifiers and quantities a caller needs to
//! render an actionable message. [`BookingError::kind`] groups variants into
//! the categories callers act on; only [`ErrorKind::TransientStore`] is ever
//! retried automatically.

use crate::base::{BookingId, TripId, UserId, VehicleId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// A lockable row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Trip(TripId),
    Booking(BookingId),
    Wallet(UserId),
    Vehicle(VehicleId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trip(id) => write!(f, "trip {id}"),
            Self::Booking(id) => write!(f, "booking {id}"),
            Self::Wallet(id) => write!(f, "wallet of user {id}"),
            Self::Vehicle(id) => write!(f, "vehicle {id}"),
        }
    }
}

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CapacityExceeded,
    Funds,
    Authorization,
    /// Semantically invalid input (dates, amounts, seat counts).
    Validation,
    /// Row lock or store call timed out before anything was written.
    TransientStore,
    /// Transient failures persisted past the retry budget.
    Unavailable,
    InvariantViolation,
}

/// Booking engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("user {user} not found")]
    UserNotFound { user: UserId },

    #[error("vehicle {vehicle} not found")]
    VehicleNotFound { vehicle: VehicleId },

    #[error("trip {trip} not found")]
    TripNotFound { trip: TripId },

    #[error("booking {booking} not found")]
    BookingNotFound { booking: BookingId },

    #[error("user {user} does not own vehicle {vehicle}")]
    NotOwner { user: UserId, vehicle: VehicleId },

    #[error("user {actor} is not allowed to perform this action")]
    Forbidden { actor: UserId },

    #[error("drivers cannot book their own trip {trip}")]
    CannotBookOwnTrip { trip: TripId },

    #[error("vehicle {vehicle} already has trip {existing} on {date}")]
    DuplicateTripSameVehicleDate {
        vehicle: VehicleId,
        date: NaiveDate,
        existing: TripId,
    },

    #[error("passenger already holds booking {booking} on trip {trip}")]
    DuplicateBooking { trip: TripId, booking: BookingId },

    #[error("booking {booking} is already cancelled")]
    AlreadyCancelled { booking: BookingId },

    #[error("vehicle {vehicle} is used by {active_trips} active trip(s)")]
    VehicleInUse { vehicle: VehicleId, active_trips: u32 },

    #[error("vehicle {vehicle} offers at most {capacity} passenger seat(s), requested {requested}")]
    SeatsExceedCapacity {
        vehicle: VehicleId,
        requested: u32,
        capacity: u32,
    },

    #[error("trip {trip} has {available} seat(s) left, requested {requested}")]
    InsufficientSeats {
        trip: TripId,
        requested: u32,
        available: u32,
    },

    #[error("trip {trip} is {status}")]
    TripNotOpen { trip: TripId, status: &'static str },

    #[error("trip {trip} has already departed")]
    TripDeparted { trip: TripId },

    #[error("user {user} has {available} credit(s), {required} required")]
    InsufficientFunds {
        user: UserId,
        required: Decimal,
        available: Decimal,
    },

    #[error("invalid amount {amount} (must be positive)")]
    InvalidAmount { amount: Decimal },

    /// The result of a credit movement or price computation does not fit in
    /// a [`Decimal`].
    #[error("amount {amount} is out of range")]
    AmountOverflow { amount: Decimal },

    #[error("invalid seat count {requested}")]
    InvalidSeatCount { requested: u32 },

    #[error("departure and arrival cities must be distinct and non-empty")]
    InvalidRoute,

    #[error("departure {departure} is not in the future")]
    DepartureInPast { departure: DateTime<Utc> },

    #[error("arrival {arrival} is not after departure {departure}")]
    ArrivalBeforeDeparture {
        departure: DateTime<Utc>,
        arrival: DateTime<Utc>,
    },

    #[error("{resource} is unavailable (lock timeout)")]
    StoreUnavailable { resource: Resource },

    #[error("service unavailable after {attempts} attempt(s)")]
    ServiceUnavailable { attempts: u32 },

    #[error("invariant violated on trip {trip}: {detail}")]
    InvariantViolation { trip: TripId, detail: String },
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound { .. }
            | Self::VehicleNotFound { .. }
            | Self::TripNotFound { .. }
            | Self::BookingNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateTripSameVehicleDate { .. }
            | Self::DuplicateBooking { .. }
            | Self::AlreadyCancelled { .. }
            | Self::VehicleInUse { .. }
            | Self::TripNotOpen { .. }
            | Self::TripDeparted { .. } => ErrorKind::Conflict,
            Self::SeatsExceedCapacity { .. } | Self::InsufficientSeats { .. } => {
                ErrorKind::CapacityExceeded
            }
            Self::InsufficientFunds { .. } => ErrorKind::Funds,
            Self::NotOwner { .. } | Self::Forbidden { .. } | Self::CannotBookOwnTrip { .. } => {
                ErrorKind::Authorization
            }
            Self::InvalidAmount { .. }
            | Self::AmountOverflow { .. }
            | Self::InvalidSeatCount { .. }
            | Self::InvalidRoute
            | Self::DepartureInPast { .. }
            | Self::ArrivalBeforeDeparture { .. } => ErrorKind::Validation,
            Self::StoreUnavailable { .. } => ErrorKind::TransientStore,
            Self::ServiceUnavailable { .. } => ErrorKind::Unavailable,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }

    /// Returns `true` when the failed operation is known to have written
    /// nothing and may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }
}
