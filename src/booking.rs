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

//! Bookings.
//!
//! ```text
//!  Pending ──confirm──► Confirmed
//!     │                    │
//!     └──────cancel────────┴──► Cancelled   (terminal)
//! ```
//!
//! Bookings are confirmed as soon as they are persisted; `Pending` only
//! exists inside the unit of work that creates them.

use crate::base::{BookingId, TripId, UserId};
use crate::error::BookingError;
use crate::trip::Trip;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub passenger: UserId,
    pub trip: TripId,
    pub seat_count: u32,
    /// `seat_count × price` at booking time; later price changes do not apply.
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub canceller: Option<UserId>,
    pub refunded: Decimal,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub(crate) fn pending(
        id: BookingId,
        passenger: UserId,
        trip: TripId,
        seat_count: u32,
        total_price: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            passenger,
            trip,
            seat_count,
            total_price,
            status: BookingStatus::Pending,
            canceller: None,
            refunded: Decimal::ZERO,
            created_at,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub(crate) fn confirm(&mut self) {
        if self.status == BookingStatus::Pending {
            self.status = BookingStatus::Confirmed;
        }
    }

    /// Marks the booking cancelled by `actor`, recording the refund.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::AlreadyCancelled`] if the booking was cancelled
    /// before. Nothing is changed in that case.
    pub(crate) fn cancel(
        &mut self,
        actor: UserId,
        refund: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled { booking: self.id });
        }
        self.status = BookingStatus::Cancelled;
        self.canceller = Some(actor);
        self.refunded = refund;
        self.cancelled_at = Some(at);
        Ok(())
    }
}

/// A booking together with the trip it is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub booking: Booking,
    pub trip: Trip,
}

/// Booking row. Passenger, trip, and seat count never change.
#[derive(Debug)]
pub(crate) struct BookingRecord {
    pub(crate) id: BookingId,
    pub(crate) trip: TripId,
    pub(crate) passenger: UserId,
    pub(crate) inner: Mutex<Booking>,
}

impl BookingRecord {
    pub(crate) fn new(booking: Booking) -> Self {
        Self {
            id: booking.id,
            trip: booking.trip,
            passenger: booking.passenger,
            inner: Mutex::new(booking),
        }
    }
}
