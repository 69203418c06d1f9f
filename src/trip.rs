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

//! Trip lifecycle.
//!
//! Seat availability and trip status are one value, [`TripStatus`]:
//!
//! ```text
//!  Open(n) ──reserve(k), k < n──► Open(n - k)
//!  Open(n) ──reserve(n)─────────► Full
//!  Full ─────release(k)─────────► Open(k)
//!  Open | Full ──cancel─────────► Cancelled   (terminal)
//! ```
//!
//! `Open(0)` is never constructed, so "no seats left" and "full" cannot
//! disagree. The transition functions are the only way to change a trip's
//! status; the store applies them while holding the trip's row lock.

use crate::base::{BookingId, TripId, UserId, VehicleId};
use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Open { available_seats: u32 },
    Full,
    Cancelled,
}

impl TripStatus {
    /// Status of a freshly published trip offering `seats` seats.
    pub fn opened(seats: u32) -> Result<Self, BookingError> {
        if seats == 0 {
            return Err(BookingError::InvalidSeatCount { requested: seats });
        }
        Ok(Self::Open {
            available_seats: seats,
        })
    }

    pub fn available_seats(&self) -> u32 {
        match self {
            Self::Open { available_seats } => *available_seats,
            Self::Full | Self::Cancelled => 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Full => "full",
            Self::Cancelled => "cancelled",
        }
    }

    /// Takes `seats` seats, going `Full` when none remain.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidSeatCount`] - `seats` is zero.
    /// - [`BookingError::TripNotOpen`] - Trip is full or cancelled.
    /// - [`BookingError::InsufficientSeats`] - Fewer than `seats` seats remain.
    pub fn reserve(self, trip: TripId, seats: u32) -> Result<Self, BookingError> {
        if seats == 0 {
            return Err(BookingError::InvalidSeatCount { requested: seats });
        }
        let Self::Open { available_seats } = self else {
            return Err(BookingError::TripNotOpen {
                trip,
                status: self.label(),
            });
        };
        if seats > available_seats {
            return Err(BookingError::InsufficientSeats {
                trip,
                requested: seats,
                available: available_seats,
            });
        }
        Ok(match available_seats - seats {
            0 => Self::Full,
            left => Self::Open {
                available_seats: left,
            },
        })
    }

    /// Returns `seats` seats, capped at `capacity`. A cancelled trip stays
    /// cancelled.
    pub fn release(self, seats: u32, capacity: u32) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::Open { .. } | Self::Full => {
                match self.available_seats().saturating_add(seats).min(capacity) {
                    0 => Self::Full,
                    available_seats => Self::Open { available_seats },
                }
            }
        }
    }

    /// Idempotent.
    pub fn cancel(self) -> Self {
        Self::Cancelled
    }
}

/// Snapshot of a published trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub id: TripId,
    pub driver: UserId,
    pub vehicle: VehicleId,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    /// Price of one seat.
    pub price: Decimal,
    /// Seats offered when the trip was published.
    pub offered_seats: u32,
    /// Vehicle seats minus the driver's, frozen at publication.
    pub capacity: u32,
    pub status: TripStatus,
}

impl Trip {
    const DECIMAL_PRECISION: u32 = 4;

    pub fn available_seats(&self) -> u32 {
        self.status.available_seats()
    }

    pub fn departure_date(&self) -> NaiveDate {
        self.departure.date_naive()
    }
}

impl Serialize for Trip {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Trip", 10)?;
        state.serialize_field("trip", &self.id)?;
        state.serialize_field("driver", &self.driver)?;
        state.serialize_field("vehicle", &self.vehicle)?;
        state.serialize_field("from", &self.departure_city)?;
        state.serialize_field("to", &self.arrival_city)?;
        state.serialize_field("departure", &self.departure)?;
        state.serialize_field("arrival", &self.arrival)?;
        state.serialize_field("price", &self.price.round_dp(Trip::DECIMAL_PRECISION))?;
        state.serialize_field("available_seats", &self.available_seats())?;
        state.serialize_field("status", self.status.label())?;
        state.end()
    }
}

#[derive(Debug)]
pub(crate) struct TripData {
    pub(crate) trip: Trip,
    /// Active (non-cancelled) booking of each passenger.
    pub(crate) passengers: HashMap<UserId, BookingId>,
}

/// Trip row. Identity, driver, and departure never change and can be read
/// without the lock.
#[derive(Debug)]
pub(crate) struct TripRecord {
    pub(crate) id: TripId,
    pub(crate) driver: UserId,
    pub(crate) vehicle: VehicleId,
    pub(crate) departure: DateTime<Utc>,
    pub(crate) inner: Mutex<TripData>,
}

impl TripRecord {
    pub(crate) fn new(trip: Trip) -> Self {
        Self {
            id: trip.id,
            driver: trip.driver,
            vehicle: trip.vehicle,
            departure: trip.departure,
            inner: Mutex::new(TripData {
                trip,
                passengers: HashMap::new(),
            }),
        }
    }
}
