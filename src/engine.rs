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

//! Booking engine.
//!
//! The [`Engine`] owns users, vehicles, trips, bookings, and the credit
//! ledger. Every mutating operation is one unit of work: it locks the rows it
//! touches (in the order documented in the store module), validates, and only
//! then writes. Either every write of the unit happens or none does.
//!
//! # Operations
//!
//! - **create_trip**: Publishes a trip on a vehicle the driver owns.
//! - **create_booking**: Debits the passenger, reserves seats, records a
//!   confirmed booking. A lost seat race refunds the debit before returning.
//! - **cancel_booking**: Cancels one booking, returns its seats, refunds the
//!   passenger according to the [`RefundPolicy`](crate::RefundPolicy).
//! - **cancel_trip**: Cancels every active booking with a full refund, then
//!   cancels the trip.
//!
//! # Retries
//!
//! A row lock that cannot be taken within the configured timeout aborts the
//! unit of work before anything was written. The engine retries such
//! failures a bounded number of times with linear backoff, then reports
//! [`BookingError::ServiceUnavailable`].

use crate::base::{BookingId, TripId, UserId, VehicleId};
use crate::booking::{Booking, BookingRecord};
use crate::clock::{Clock, SystemClock};
use crate::config::{Canceller, EngineConfig};
use crate::error::{BookingError, Resource};
use crate::journal::{EntryReason, LedgerEntry};
use crate::ledger::{Balance, Ledger};
use crate::store::Store;
use crate::trip::{Trip, TripRecord, TripStatus};
use crate::user::{Role, User, UserPreferences};
use crate::vehicle::{Vehicle, VehicleRecord};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;

/// Input for [`Engine::register_vehicle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVehicle {
    pub brand: String,
    pub model: String,
    pub plate: String,
    pub seat_count: u32,
}

/// Input for [`Engine::create_trip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrip {
    pub vehicle: VehicleId,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub available_seats: u32,
    pub price: Decimal,
}

/// Result of [`Engine::cancel_trip`]: the cancelled trip and the bookings
/// cancelled along with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripCancellation {
    pub trip: Trip,
    pub bookings: Vec<Booking>,
}

/// Carpool booking engine.
///
/// # Invariants
///
/// - For a trip that is not cancelled, `available_seats` equals the seats
///   offered minus the seats held by its active bookings.
/// - A trip is `Full` exactly when no seats are left.
/// - A passenger holds at most one active booking per trip.
/// - A vehicle carries at most one non-cancelled trip per departure day.
/// - Credit balances never go negative.
pub struct Engine {
    pub(crate) store: Store,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Creates an engine with default configuration and the system clock.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Engine {
            store: Store::new(config.store.lock_timeout()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.store.ledger
    }

    // === Users and vehicles ===

    /// Registers a user holding `credits` initial credits.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidAmount`] if `credits` is negative.
    pub fn register_user(
        &self,
        name: impl Into<String>,
        role: Role,
        credits: Decimal,
    ) -> Result<User, BookingError> {
        if credits < Decimal::ZERO {
            return Err(BookingError::InvalidAmount { amount: credits });
        }
        let user = User {
            id: self.store.next_user_id(),
            name: name.into(),
            role,
            preferences: UserPreferences::default(),
        };
        self.store.ledger.open(user.id, credits)?;
        self.store.users.insert(user.id, user.clone());
        tracing::debug!(user = %user.id, ?role, %credits, "user registered");
        Ok(user)
    }

    /// # Errors
    ///
    /// Returns [`BookingError::UserNotFound`] for an unknown user.
    pub fn set_preferences(
        &self,
        user: UserId,
        preferences: UserPreferences,
    ) -> Result<User, BookingError> {
        let mut entry = self
            .store
            .users
            .get_mut(&user)
            .ok_or(BookingError::UserNotFound { user })?;
        entry.preferences = preferences;
        Ok(entry.clone())
    }

    /// Adds credits to a user's balance and returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - Unknown user.
    /// - [`BookingError::InvalidAmount`] - `amount` is not positive.
    /// - [`BookingError::AmountOverflow`] - The new balance is out of range.
    /// - [`BookingError::ServiceUnavailable`] - Wallet stayed locked.
    pub fn top_up(&self, user: UserId, amount: Decimal) -> Result<Decimal, BookingError> {
        self.with_retry("top_up", || {
            self.store.ledger.credit(user, amount, EntryReason::TopUp)
        })
    }

    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - Unknown owner.
    /// - [`BookingError::InvalidSeatCount`] - Fewer than two seats.
    pub fn register_vehicle(
        &self,
        owner: UserId,
        new_vehicle: NewVehicle,
    ) -> Result<Vehicle, BookingError> {
        self.store.user(owner)?;
        if new_vehicle.seat_count < 2 {
            return Err(BookingError::InvalidSeatCount {
                requested: new_vehicle.seat_count,
            });
        }
        let vehicle = Vehicle {
            id: self.store.next_vehicle_id(),
            owner,
            brand: new_vehicle.brand,
            model: new_vehicle.model,
            plate: new_vehicle.plate,
            seat_count: new_vehicle.seat_count,
        };
        self.store
            .vehicles
            .insert(vehicle.id, Arc::new(VehicleRecord::new(vehicle.clone())));
        tracing::debug!(vehicle = %vehicle.id, owner = %owner, seats = vehicle.seat_count, "vehicle registered");
        Ok(vehicle)
    }

    /// Changes a vehicle's seat count. Only allowed while no active trip uses it.
    ///
    /// # Errors
    ///
    /// - [`BookingError::VehicleNotFound`] - Unknown vehicle.
    /// - [`BookingError::NotOwner`] - `actor` does not own the vehicle.
    /// - [`BookingError::InvalidSeatCount`] - Fewer than two seats.
    /// - [`BookingError::VehicleInUse`] - A non-cancelled trip uses the vehicle.
    pub fn update_vehicle_seats(
        &self,
        actor: UserId,
        vehicle: VehicleId,
        seat_count: u32,
    ) -> Result<Vehicle, BookingError> {
        self.with_retry("update_vehicle_seats", || {
            let row = self.store.vehicle(vehicle)?;
            if row.owner != actor {
                return Err(BookingError::NotOwner {
                    user: actor,
                    vehicle,
                });
            }
            if seat_count < 2 {
                return Err(BookingError::InvalidSeatCount {
                    requested: seat_count,
                });
            }
            let mut data = self.store.acquire(&row.inner, Resource::Vehicle(row.id))?;
            if data.active_trips > 0 {
                return Err(BookingError::VehicleInUse {
                    vehicle,
                    active_trips: data.active_trips,
                });
            }
            data.vehicle.seat_count = seat_count;
            Ok(data.vehicle.clone())
        })
    }

    // === Trips ===

    /// Publishes a trip. The new trip is `Open`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - Unknown driver.
    /// - [`BookingError::VehicleNotFound`] - Unknown vehicle.
    /// - [`BookingError::NotOwner`] - Driver does not own the vehicle.
    /// - [`BookingError::InvalidRoute`] - Empty or identical cities.
    /// - [`BookingError::DepartureInPast`] - Departure is not in the future.
    /// - [`BookingError::ArrivalBeforeDeparture`] - Arrival not after departure.
    /// - [`BookingError::InvalidAmount`] - Negative price.
    /// - [`BookingError::AmountOverflow`] - Booking every offered seat would
    ///   cost more than a balance can hold.
    /// - [`BookingError::InvalidSeatCount`] - Zero seats offered.
    /// - [`BookingError::SeatsExceedCapacity`] - More seats than the vehicle has
    ///   besides the driver's.
    /// - [`BookingError::DuplicateTripSameVehicleDate`] - Vehicle already has a
    ///   trip that day.
    pub fn create_trip(&self, driver: UserId, new_trip: NewTrip) -> Result<Trip, BookingError> {
        self.with_retry("create_trip", || self.try_create_trip(driver, &new_trip))
    }

    fn try_create_trip(&self, driver: UserId, new_trip: &NewTrip) -> Result<Trip, BookingError> {
        self.store.user(driver)?;
        let vehicle_row = self.store.vehicle(new_trip.vehicle)?;
        if vehicle_row.owner != driver {
            return Err(BookingError::NotOwner {
                user: driver,
                vehicle: new_trip.vehicle,
            });
        }

        let departure_city = new_trip.departure_city.trim();
        let arrival_city = new_trip.arrival_city.trim();
        if departure_city.is_empty()
            || arrival_city.is_empty()
            || departure_city.to_lowercase() == arrival_city.to_lowercase()
        {
            return Err(BookingError::InvalidRoute);
        }
        if new_trip.departure <= self.clock.now() {
            return Err(BookingError::DepartureInPast {
                departure: new_trip.departure,
            });
        }
        if new_trip.arrival <= new_trip.departure {
            return Err(BookingError::ArrivalBeforeDeparture {
                departure: new_trip.departure,
                arrival: new_trip.arrival,
            });
        }
        if new_trip.price < Decimal::ZERO {
            return Err(BookingError::InvalidAmount {
                amount: new_trip.price,
            });
        }
        let status = TripStatus::opened(new_trip.available_seats)?;
        // Any booking on this trip costs at most price × offered seats.
        if new_trip
            .price
            .checked_mul(Decimal::from(new_trip.available_seats))
            .is_none()
        {
            return Err(BookingError::AmountOverflow {
                amount: new_trip.price,
            });
        }

        let mut vehicle = self
            .store
            .acquire(&vehicle_row.inner, Resource::Vehicle(vehicle_row.id))?;
        let capacity = vehicle.vehicle.passenger_capacity();
        if new_trip.available_seats > capacity {
            return Err(BookingError::SeatsExceedCapacity {
                vehicle: vehicle_row.id,
                requested: new_trip.available_seats,
                capacity,
            });
        }

        // Check-and-insert on the schedule index keeps one trip per vehicle per day.
        let date = new_trip.departure.date_naive();
        let trip = match self.store.schedule.entry((vehicle_row.id, date)) {
            Entry::Occupied(entry) => {
                return Err(BookingError::DuplicateTripSameVehicleDate {
                    vehicle: vehicle_row.id,
                    date,
                    existing: *entry.get(),
                });
            }
            Entry::Vacant(entry) => {
                let trip = Trip {
                    id: self.store.next_trip_id(),
                    driver,
                    vehicle: vehicle_row.id,
                    departure_city: departure_city.to_string(),
                    arrival_city: arrival_city.to_string(),
                    departure: new_trip.departure,
                    arrival: new_trip.arrival,
                    price: new_trip.price,
                    offered_seats: new_trip.available_seats,
                    capacity,
                    status,
                };
                entry.insert(trip.id);
                trip
            }
        };
        vehicle.active_trips += 1;
        self.store
            .trips
            .insert(trip.id, Arc::new(TripRecord::new(trip.clone())));

        tracing::info!(
            trip = %trip.id,
            driver = %driver,
            vehicle = %trip.vehicle,
            seats = trip.offered_seats,
            price = %trip.price,
            "trip published"
        );
        Ok(trip)
    }

    /// Cancels a trip and every active booking on it, refunding each
    /// passenger in full. Cancelling a cancelled trip succeeds with no
    /// bookings affected.
    ///
    /// # Errors
    ///
    /// - [`BookingError::TripNotFound`] - Unknown trip.
    /// - [`BookingError::Forbidden`] - `actor` is neither the driver nor an admin.
    /// - [`BookingError::ServiceUnavailable`] - Rows stayed locked.
    /// - [`BookingError::InvariantViolation`] - Trip and bookings disagree.
    pub fn cancel_trip(
        &self,
        actor: UserId,
        trip: TripId,
    ) -> Result<TripCancellation, BookingError> {
        self.with_retry("cancel_trip", || self.try_cancel_trip(actor, trip))
    }

    fn try_cancel_trip(
        &self,
        actor: UserId,
        trip_id: TripId,
    ) -> Result<TripCancellation, BookingError> {
        let trip_row = self.store.trip(trip_id)?;
        if actor != trip_row.driver && !self.store.is_admin(actor) {
            return Err(BookingError::Forbidden { actor });
        }

        let mut trip = self.store.acquire(&trip_row.inner, Resource::Trip(trip_id))?;
        if trip.trip.status.is_cancelled() {
            tracing::debug!(trip = %trip_id, "trip already cancelled");
            return Ok(TripCancellation {
                trip: trip.trip.clone(),
                bookings: Vec::new(),
            });
        }

        let mut active: Vec<BookingId> = trip.passengers.values().copied().collect();
        active.sort();
        let booking_rows = active
            .iter()
            .map(|id| {
                self.store
                    .booking(*id)
                    .map_err(|_| violation(trip_id, format!("indexed booking {id} is missing")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut wallets = booking_rows
            .iter()
            .map(|row| self.store.ledger.wallet(row.passenger))
            .collect::<Result<Vec<_>, _>>()?;
        wallets.sort_by_key(|wallet| wallet.user);
        let vehicle_row = self.store.vehicle(trip_row.vehicle)?;

        let mut bookings = booking_rows
            .iter()
            .map(|row| self.store.acquire(&row.inner, Resource::Booking(row.id)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut funds = wallets
            .iter()
            .map(|wallet| self.store.ledger.lock(wallet))
            .collect::<Result<Vec<_>, _>>()?;
        let mut vehicle = self
            .store
            .acquire(&vehicle_row.inner, Resource::Vehicle(vehicle_row.id))?;

        if let Some(stale) = bookings.iter().find(|booking| !booking.is_active()) {
            return Err(violation(
                trip_id,
                format!("cancelled booking {} is still indexed", stale.id),
            ));
        }
        if vehicle.active_trips == 0 {
            return Err(violation(
                trip_id,
                format!("vehicle {} has no active trips", vehicle_row.id),
            ));
        }

        // One active booking per passenger, so each wallet gets at most one
        // refund and every credit can be checked before anything changes.
        let mut refunds = Vec::with_capacity(bookings.len());
        for booking in bookings.iter() {
            let Some(index) = wallets.iter().position(|w| w.user == booking.passenger) else {
                return Err(violation(
                    trip_id,
                    format!("wallet of passenger {} not locked", booking.passenger),
                ));
            };
            let refund = booking.total_price;
            if refund > Decimal::ZERO {
                funds[index].credited(refund)?;
            }
            refunds.push((index, refund));
        }

        let now = self.clock.now();
        let mut cancelled = Vec::with_capacity(bookings.len());
        for (booking, (index, refund)) in bookings.iter_mut().zip(refunds) {
            booking.cancel(actor, refund, now)?;
            if refund > Decimal::ZERO {
                let wallet = &mut funds[index];
                wallet.credit(refund)?;
                self.store.ledger.record(
                    booking.passenger,
                    refund,
                    wallet.balance(),
                    EntryReason::Refund(booking.id),
                );
            }
            cancelled.push(booking.clone());
        }

        trip.trip.status = trip.trip.status.cancel();
        trip.passengers.clear();
        let slot = (trip_row.vehicle, trip.trip.departure_date());
        self.store.schedule.remove_if(&slot, |_, id| *id == trip_id);
        vehicle.active_trips -= 1;

        tracing::info!(
            trip = %trip_id,
            actor = %actor,
            bookings = cancelled.len(),
            "trip cancelled"
        );
        Ok(TripCancellation {
            trip: trip.trip.clone(),
            bookings: cancelled,
        })
    }

    // === Bookings ===

    /// Books `seats` seats on a trip for `passenger`, paying
    /// `seats × price` credits.
    ///
    /// # Errors
    ///
    /// - [`BookingError::TripNotFound`] - Unknown trip.
    /// - [`BookingError::UserNotFound`] - Unknown passenger.
    /// - [`BookingError::TripNotOpen`] - Trip is cancelled.
    /// - [`BookingError::TripDeparted`] - Trip already left.
    /// - [`BookingError::InvalidSeatCount`] - `seats` is zero.
    /// - [`BookingError::CannotBookOwnTrip`] - Passenger drives this trip.
    /// - [`BookingError::DuplicateBooking`] - Passenger already booked it.
    /// - [`BookingError::InsufficientFunds`] - Balance below the price.
    /// - [`BookingError::AmountOverflow`] - `seats × price` is out of range.
    /// - [`BookingError::InsufficientSeats`] - Not enough seats left
    ///   (including a trip that is already full).
    /// - [`BookingError::ServiceUnavailable`] - Rows stayed locked.
    pub fn create_booking(
        &self,
        passenger: UserId,
        trip: TripId,
        seats: u32,
    ) -> Result<Booking, BookingError> {
        self.with_retry("create_booking", || {
            self.try_create_booking(passenger, trip, seats)
        })
    }

    fn try_create_booking(
        &self,
        passenger: UserId,
        trip_id: TripId,
        seats: u32,
    ) -> Result<Booking, BookingError> {
        let trip_row = self.store.trip(trip_id)?;
        let wallet = self.store.ledger.wallet(passenger)?;

        let mut trip = self.store.acquire(&trip_row.inner, Resource::Trip(trip_id))?;
        let mut funds = self.store.ledger.lock(&wallet)?;

        match trip.trip.status {
            TripStatus::Cancelled => {
                return Err(BookingError::TripNotOpen {
                    trip: trip_id,
                    status: trip.trip.status.label(),
                });
            }
            TripStatus::Full => {
                return Err(BookingError::InsufficientSeats {
                    trip: trip_id,
                    requested: seats,
                    available: 0,
                });
            }
            TripStatus::Open { .. } => {}
        }
        let now = self.clock.now();
        if trip_row.departure <= now {
            return Err(BookingError::TripDeparted { trip: trip_id });
        }
        if seats == 0 {
            return Err(BookingError::InvalidSeatCount { requested: seats });
        }
        if passenger == trip_row.driver {
            return Err(BookingError::CannotBookOwnTrip { trip: trip_id });
        }
        if let Some(existing) = trip.passengers.get(&passenger) {
            return Err(BookingError::DuplicateBooking {
                trip: trip_id,
                booking: *existing,
            });
        }

        let total_price = trip
            .trip
            .price
            .checked_mul(Decimal::from(seats))
            .ok_or(BookingError::AmountOverflow {
                amount: trip.trip.price,
            })?;
        let paid = total_price > Decimal::ZERO;
        if paid {
            funds.debit(total_price)?;
        }
        let status = match trip.trip.status.reserve(trip_id, seats) {
            Ok(status) => status,
            Err(err) => {
                if paid {
                    funds.credit(total_price)?;
                    tracing::warn!(
                        trip = %trip_id,
                        passenger = %passenger,
                        amount = %total_price,
                        error = %err,
                        "seat reservation failed, payment returned"
                    );
                }
                return Err(err);
            }
        };
        trip.trip.status = status;

        let mut booking = Booking::pending(
            self.store.next_booking_id(),
            passenger,
            trip_id,
            seats,
            total_price,
            now,
        );
        booking.confirm();
        trip.passengers.insert(passenger, booking.id);
        self.store
            .bookings
            .insert(booking.id, Arc::new(BookingRecord::new(booking.clone())));
        if paid {
            self.store.ledger.record(
                passenger,
                -total_price,
                funds.balance(),
                EntryReason::Booking(booking.id),
            );
        }

        tracing::info!(
            booking = %booking.id,
            trip = %trip_id,
            passenger = %passenger,
            seats,
            total = %total_price,
            remaining = trip.trip.available_seats(),
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Cancels a booking, returns its seats to the trip, and refunds the
    /// passenger. Passengers cancelling late get the configured partial
    /// refund; drivers and admins always refund in full.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`] - Unknown booking.
    /// - [`BookingError::Forbidden`] - `actor` is not the passenger, the driver,
    ///   or an admin.
    /// - [`BookingError::AlreadyCancelled`] - Booking was cancelled before.
    /// - [`BookingError::AmountOverflow`] - The refund does not fit in the
    ///   passenger's balance. Nothing is cancelled.
    /// - [`BookingError::ServiceUnavailable`] - Rows stayed locked.
    /// - [`BookingError::InvariantViolation`] - Trip and booking disagree.
    pub fn cancel_booking(
        &self,
        actor: UserId,
        booking: BookingId,
    ) -> Result<Booking, BookingError> {
        self.with_retry("cancel_booking", || self.try_cancel_booking(actor, booking))
    }

    fn try_cancel_booking(
        &self,
        actor: UserId,
        booking_id: BookingId,
    ) -> Result<Booking, BookingError> {
        let booking_row = self.store.booking(booking_id)?;
        let trip_row = self.store.trip(booking_row.trip)?;
        let canceller = if actor == booking_row.passenger {
            Canceller::Passenger
        } else if actor == trip_row.driver {
            Canceller::Driver
        } else if self.store.is_admin(actor) {
            Canceller::Admin
        } else {
            return Err(BookingError::Forbidden { actor });
        };
        let wallet = self.store.ledger.wallet(booking_row.passenger)?;

        let mut trip = self
            .store
            .acquire(&trip_row.inner, Resource::Trip(trip_row.id))?;
        let mut booking = self
            .store
            .acquire(&booking_row.inner, Resource::Booking(booking_id))?;
        let mut funds = self.store.ledger.lock(&wallet)?;

        if !booking.is_active() {
            return Err(BookingError::AlreadyCancelled {
                booking: booking_id,
            });
        }
        if trip.passengers.get(&booking.passenger) != Some(&booking_id) {
            return Err(violation(
                trip_row.id,
                format!("active booking {booking_id} is not indexed"),
            ));
        }

        let now = self.clock.now();
        let refund =
            self.config
                .refund
                .refund(booking.total_price, canceller, now, trip_row.departure)?;
        // Nothing after the credit can fail.
        if refund > Decimal::ZERO {
            funds.credit(refund)?;
        }
        booking.cancel(actor, refund, now)?;
        trip.trip.status = trip
            .trip
            .status
            .release(booking.seat_count, trip.trip.capacity);
        trip.passengers.remove(&booking.passenger);
        if refund > Decimal::ZERO {
            self.store.ledger.record(
                booking.passenger,
                refund,
                funds.balance(),
                EntryReason::Refund(booking_id),
            );
        }

        tracing::info!(
            booking = %booking_id,
            trip = %trip_row.id,
            actor = %actor,
            ?canceller,
            refund = %refund,
            "booking cancelled"
        );
        Ok(booking.clone())
    }

    // === Ledger passthrough ===

    /// Balances of every user, ordered by user ID.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a wallet stayed locked.
    pub fn balances(&self) -> Result<Vec<Balance>, BookingError> {
        self.with_retry("balances", || self.store.ledger.balances())
    }

    /// Removes and returns journal entries recorded since the last drain.
    pub fn drain_journal(&self) -> Vec<LedgerEntry> {
        self.store.ledger.drain_journal()
    }

    // === Consistency ===

    /// Recomputes a trip's seat count from its active bookings.
    ///
    /// # Errors
    ///
    /// - [`BookingError::TripNotFound`] - Unknown trip.
    /// - [`BookingError::InvariantViolation`] - Seats or status disagree with
    ///   the bookings.
    /// - [`BookingError::ServiceUnavailable`] - Rows stayed locked.
    pub fn verify_trip(&self, trip: TripId) -> Result<(), BookingError> {
        self.with_retry("verify_trip", || self.try_verify_trip(trip))
    }

    fn try_verify_trip(&self, trip_id: TripId) -> Result<(), BookingError> {
        let trip_row = self.store.trip(trip_id)?;
        let trip = self.store.acquire(&trip_row.inner, Resource::Trip(trip_id))?;

        if trip.trip.status.is_cancelled() {
            if !trip.passengers.is_empty() {
                return Err(violation(
                    trip_id,
                    format!("cancelled trip indexes {} booking(s)", trip.passengers.len()),
                ));
            }
            return Ok(());
        }
        if trip.trip.status == (TripStatus::Open { available_seats: 0 }) {
            return Err(violation(trip_id, "open trip has no seats left".to_string()));
        }

        let mut reserved = 0u32;
        for (passenger, id) in trip.passengers.iter() {
            let row = self
                .store
                .booking(*id)
                .map_err(|_| violation(trip_id, format!("indexed booking {id} is missing")))?;
            let booking = self.store.acquire(&row.inner, Resource::Booking(*id))?;
            if !booking.is_active() || booking.passenger != *passenger || booking.trip != trip_id {
                return Err(violation(
                    trip_id,
                    format!("indexed booking {id} does not belong here"),
                ));
            }
            reserved += booking.seat_count;
        }

        let Some(expected) = trip.trip.offered_seats.checked_sub(reserved) else {
            return Err(violation(
                trip_id,
                format!(
                    "{reserved} seat(s) booked but only {} offered",
                    trip.trip.offered_seats
                ),
            ));
        };
        let available = trip.trip.available_seats();
        if available != expected {
            return Err(violation(
                trip_id,
                format!("{available} seat(s) available, bookings imply {expected}"),
            ));
        }
        Ok(())
    }

    /// Runs `attempt` until it succeeds, fails permanently, or exhausts the
    /// retry budget.
    pub(crate) fn with_retry<T>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, BookingError>,
    ) -> Result<T, BookingError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match attempt() {
                Err(err) if err.is_retryable() => {
                    if attempts > self.config.store.max_retries {
                        tracing::error!(operation, attempts, error = %err, "retry budget exhausted");
                        return Err(BookingError::ServiceUnavailable { attempts });
                    }
                    tracing::warn!(operation, attempt = attempts, error = %err, "transient store failure, retrying");
                    thread::sleep(self.config.store.backoff(attempts));
                }
                result => return result,
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn violation(trip: TripId, detail: String) -> BookingError {
    tracing::error!(trip = %trip, detail = %detail, "invariant violation");
    BookingError::InvariantViolation { trip, detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use chrono::{TimeDelta, TimeZone};
    use rust_decimal_macros::dec;

    fn engine_with_retries(max_retries: u32) -> Engine {
        let config = EngineConfig {
            store: StoreConfig {
                lock_timeout_ms: 5,
                max_retries,
                retry_backoff_ms: 1,
            },
            ..EngineConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        Engine::with_config(config, Arc::new(ManualClock::new(now)))
    }

    fn publish(engine: &Engine) -> (UserId, Trip) {
        let driver = engine.register_user("driver", Role::User, dec!(0)).unwrap();
        let vehicle = engine
            .register_vehicle(
                driver.id,
                NewVehicle {
                    brand: "Peugeot".to_string(),
                    model: "308".to_string(),
                    plate: "XY-987-ZT".to_string(),
                    seat_count: 4,
                },
            )
            .unwrap();
        let departure = Utc.with_ymd_and_hms(2026, 5, 3, 9, 0, 0).unwrap();
        let trip = engine
            .create_trip(
                driver.id,
                NewTrip {
                    vehicle: vehicle.id,
                    departure_city: "Nantes".to_string(),
                    arrival_city: "Rennes".to_string(),
                    departure,
                    arrival: departure + TimeDelta::hours(2),
                    available_seats: 3,
                    price: dec!(10),
                },
            )
            .unwrap();
        (driver.id, trip)
    }

    #[test]
    fn locked_trip_row_exhausts_retries() {
        let engine = engine_with_retries(2);
        let (_, trip) = publish(&engine);
        let passenger = engine.register_user("p", Role::User, dec!(50)).unwrap();

        let row = engine.store.trip(trip.id).unwrap();
        let held = row.inner.lock();
        let result = engine.create_booking(passenger.id, trip.id, 1);
        drop(held);

        assert_eq!(result, Err(BookingError::ServiceUnavailable { attempts: 3 }));
        assert_eq!(engine.ledger().balance(passenger.id), Ok(dec!(50)));
        assert_eq!(engine.get_trip(trip.id).unwrap().available_seats(), 3);
    }

    #[test]
    fn retry_succeeds_once_lock_is_released() {
        let engine = Arc::new(engine_with_retries(50));
        let (_, trip) = publish(&engine);
        let passenger = engine.register_user("p", Role::User, dec!(50)).unwrap();

        let row = engine.store.trip(trip.id).unwrap();
        let held = row.inner.lock();
        let worker = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.create_booking(passenger.id, trip.id, 2))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        drop(held);

        let booking = worker.join().unwrap().unwrap();
        assert_eq!(booking.total_price, dec!(20));
        assert_eq!(engine.ledger().balance(passenger.id), Ok(dec!(30)));
    }

    #[test]
    fn verify_detects_corrupted_seat_count() {
        let engine = engine_with_retries(0);
        let (_, trip) = publish(&engine);
        engine.verify_trip(trip.id).unwrap();

        let row = engine.store.trip(trip.id).unwrap();
        row.inner.lock().trip.status = TripStatus::Open { available_seats: 1 };

        let result = engine.verify_trip(trip.id);
        assert!(matches!(
            result,
            Err(BookingError::InvariantViolation { trip: id, .. }) if id == trip.id
        ));
    }

    #[test]
    fn cancel_booking_detects_missing_index_entry() {
        let engine = engine_with_retries(0);
        let (_, trip) = publish(&engine);
        let passenger = engine.register_user("p", Role::User, dec!(50)).unwrap();
        let booking = engine.create_booking(passenger.id, trip.id, 1).unwrap();

        let row = engine.store.trip(trip.id).unwrap();
        row.inner.lock().passengers.clear();

        let result = engine.cancel_booking(passenger.id, booking.id);
        assert!(matches!(result, Err(BookingError::InvariantViolation { .. })));
        assert_eq!(engine.ledger().balance(passenger.id), Ok(dec!(40)));
    }
}
