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

//! In-process row store.
//!
//! Tables are [`DashMap`]s of reference-counted rows; each mutable row sits
//! behind its own [`parking_lot::Mutex`]. Callers clone the row's `Arc` out
//! of the table and drop the map guard before locking the row, so no map
//! shard lock is ever held while waiting on a row.
//!
//! Units of work that touch several rows lock them in one global order:
//!
//! ```text
//! trip → bookings (ascending id) → wallets (ascending user id) → vehicle
//! ```
//!
//! Row locks are taken with a timeout. A timeout happens before any write,
//! so the failed unit of work left no trace and can be retried.

use crate::base::{BookingId, TripId, UserId, VehicleId};
use crate::booking::BookingRecord;
use crate::error::{BookingError, Resource};
use crate::ledger::Ledger;
use crate::trip::TripRecord;
use crate::user::User;
use crate::vehicle::VehicleRecord;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Sequential ID allocation, one counter per table. First ID is 1.
#[derive(Debug, Default)]
struct Sequences {
    users: AtomicU32,
    vehicles: AtomicU32,
    trips: AtomicU32,
    bookings: AtomicU32,
}

fn next(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Debug)]
pub(crate) struct Store {
    pub(crate) users: DashMap<UserId, User>,
    pub(crate) vehicles: DashMap<VehicleId, Arc<VehicleRecord>>,
    pub(crate) trips: DashMap<TripId, Arc<TripRecord>>,
    pub(crate) bookings: DashMap<BookingId, Arc<BookingRecord>>,
    /// Unique (vehicle, departure day) index over non-cancelled trips.
    pub(crate) schedule: DashMap<(VehicleId, NaiveDate), TripId>,
    pub(crate) ledger: Ledger,
    sequences: Sequences,
    lock_timeout: Duration,
}

impl Store {
    pub(crate) fn new(lock_timeout: Duration) -> Self {
        Self {
            users: DashMap::new(),
            vehicles: DashMap::new(),
            trips: DashMap::new(),
            bookings: DashMap::new(),
            schedule: DashMap::new(),
            ledger: Ledger::new(lock_timeout),
            sequences: Sequences::default(),
            lock_timeout,
        }
    }

    pub(crate) fn next_user_id(&self) -> UserId {
        UserId(next(&self.sequences.users))
    }

    pub(crate) fn next_vehicle_id(&self) -> VehicleId {
        VehicleId(next(&self.sequences.vehicles))
    }

    pub(crate) fn next_trip_id(&self) -> TripId {
        TripId(next(&self.sequences.trips))
    }

    pub(crate) fn next_booking_id(&self) -> BookingId {
        BookingId(next(&self.sequences.bookings))
    }

    pub(crate) fn user(&self, user: UserId) -> Result<User, BookingError> {
        self.users
            .get(&user)
            .map(|u| u.clone())
            .ok_or(BookingError::UserNotFound { user })
    }

    pub(crate) fn is_admin(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|u| u.is_admin())
    }

    pub(crate) fn vehicle(&self, vehicle: VehicleId) -> Result<Arc<VehicleRecord>, BookingError> {
        self.vehicles
            .get(&vehicle)
            .map(|v| Arc::clone(v.value()))
            .ok_or(BookingError::VehicleNotFound { vehicle })
    }

    pub(crate) fn trip(&self, trip: TripId) -> Result<Arc<TripRecord>, BookingError> {
        self.trips
            .get(&trip)
            .map(|t| Arc::clone(t.value()))
            .ok_or(BookingError::TripNotFound { trip })
    }

    pub(crate) fn booking(&self, booking: BookingId) -> Result<Arc<BookingRecord>, BookingError> {
        self.bookings
            .get(&booking)
            .map(|b| Arc::clone(b.value()))
            .ok_or(BookingError::BookingNotFound { booking })
    }

    /// Locks a row, giving up after the configured timeout.
    pub(crate) fn acquire<'a, T>(
        &self,
        row: &'a Mutex<T>,
        resource: Resource,
    ) -> Result<MutexGuard<'a, T>, BookingError> {
        row.try_lock_for(self.lock_timeout).ok_or_else(|| {
            tracing::debug!(%resource, "row lock timed out");
            BookingError::StoreUnavailable { resource }
        })
    }
}
