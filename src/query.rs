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

//! Read-only queries.
//!
//! Queries read committed rows and copy them out under the row lock. Each
//! lock is taken with the store's timeout, so a query against a row that
//! stays locked fails with [`BookingError::ServiceUnavailable`] once its
//! retries run out instead of blocking. A booking view holds its trip and
//! booking locks together, taken in the writers' order (trip, then
//! booking), so the pair is consistent and cannot deadlock with a writer.
//! A booking returned by a successful `create_booking` is visible to every
//! query issued afterwards.

use crate::base::{BookingId, TripId, UserId, VehicleId};
use crate::booking::{Booking, BookingRecord, BookingView};
use crate::engine::Engine;
use crate::error::{BookingError, Resource};
use crate::trip::{Trip, TripRecord};
use crate::user::User;
use crate::vehicle::Vehicle;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

impl Engine {
    /// # Errors
    ///
    /// Returns [`BookingError::UserNotFound`] for an unknown user.
    pub fn get_user(&self, user: UserId) -> Result<User, BookingError> {
        self.store.user(user)
    }

    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - Unknown user.
    /// - [`BookingError::ServiceUnavailable`] - The wallet stayed locked.
    pub fn balance(&self, user: UserId) -> Result<Decimal, BookingError> {
        self.with_retry("balance", || self.store.ledger.balance(user))
    }

    /// # Errors
    ///
    /// - [`BookingError::VehicleNotFound`] - Unknown vehicle.
    /// - [`BookingError::ServiceUnavailable`] - The row stayed locked.
    pub fn get_vehicle(&self, vehicle: VehicleId) -> Result<Vehicle, BookingError> {
        let row = self.store.vehicle(vehicle)?;
        self.with_retry("get_vehicle", || {
            let data = self.store.acquire(&row.inner, Resource::Vehicle(row.id))?;
            Ok(data.vehicle.clone())
        })
    }

    /// # Errors
    ///
    /// - [`BookingError::TripNotFound`] - Unknown trip.
    /// - [`BookingError::ServiceUnavailable`] - The row stayed locked.
    pub fn get_trip(&self, trip: TripId) -> Result<Trip, BookingError> {
        let row = self.store.trip(trip)?;
        self.with_retry("get_trip", || self.read_trip(&row))
    }

    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`] - Unknown booking.
    /// - [`BookingError::ServiceUnavailable`] - The row stayed locked.
    pub fn get_booking(&self, booking: BookingId) -> Result<Booking, BookingError> {
        let row = self.store.booking(booking)?;
        self.with_retry("get_booking", || {
            let booking = self.store.acquire(&row.inner, Resource::Booking(row.id))?;
            Ok(booking.clone())
        })
    }

    /// Bookings made by `passenger`, oldest first, each with its trip.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn list_bookings_for_passenger(
        &self,
        passenger: UserId,
    ) -> Result<Vec<BookingView>, BookingError> {
        self.booking_views("list_bookings_for_passenger", |row| row.passenger == passenger)
    }

    /// Bookings on trips driven by `driver`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn list_bookings_for_driver(&self, driver: UserId) -> Result<Vec<BookingView>, BookingError> {
        let trips: HashSet<TripId> = self
            .store
            .trips
            .iter()
            .filter(|row| row.driver == driver)
            .map(|row| row.id)
            .collect();
        self.booking_views("list_bookings_for_driver", |row| trips.contains(&row.trip))
    }

    /// Every booking in the system, oldest first. Intended for admins.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn list_all_bookings(&self) -> Result<Vec<BookingView>, BookingError> {
        self.booking_views("list_all_bookings", |_| true)
    }

    /// Trips published by `driver`, ordered by departure.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn list_trips_for_driver(&self, driver: UserId) -> Result<Vec<Trip>, BookingError> {
        let mut trips = self.read_trips("list_trips_for_driver", |row| row.driver == driver)?;
        trips.sort_by_key(|trip| (trip.departure, trip.id));
        Ok(trips)
    }

    /// Every trip, ordered by ID. Intended for admins and reports.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn list_all_trips(&self) -> Result<Vec<Trip>, BookingError> {
        let mut trips = self.read_trips("list_all_trips", |_| true)?;
        trips.sort_by_key(|trip| trip.id);
        Ok(trips)
    }

    /// Open trips between two cities departing on `date`, earliest first.
    /// City names match case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ServiceUnavailable`] if a row stayed locked.
    pub fn search_trips(
        &self,
        departure_city: &str,
        arrival_city: &str,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, BookingError> {
        let from = departure_city.trim().to_lowercase();
        let to = arrival_city.trim().to_lowercase();
        let mut trips: Vec<Trip> = self
            .read_trips("search_trips", |row| row.departure.date_naive() == date)?
            .into_iter()
            .filter(|trip| {
                trip.status.is_open()
                    && trip.departure_city.to_lowercase() == from
                    && trip.arrival_city.to_lowercase() == to
            })
            .collect();
        trips.sort_by_key(|trip| (trip.departure, trip.id));
        Ok(trips)
    }

    fn read_trip(&self, row: &TripRecord) -> Result<Trip, BookingError> {
        let trip = self.store.acquire(&row.inner, Resource::Trip(row.id))?;
        Ok(trip.trip.clone())
    }

    fn read_trips(
        &self,
        operation: &'static str,
        keep: impl Fn(&TripRecord) -> bool,
    ) -> Result<Vec<Trip>, BookingError> {
        let rows: Vec<Arc<TripRecord>> = self
            .store
            .trips
            .iter()
            .filter(|row| keep(row))
            .map(|row| Arc::clone(row.value()))
            .collect();
        self.with_retry(operation, || rows.iter().map(|row| self.read_trip(row)).collect())
    }

    fn booking_views(
        &self,
        operation: &'static str,
        keep: impl Fn(&BookingRecord) -> bool,
    ) -> Result<Vec<BookingView>, BookingError> {
        let mut rows: Vec<Arc<BookingRecord>> = self
            .store
            .bookings
            .iter()
            .filter(|row| keep(row))
            .map(|row| Arc::clone(row.value()))
            .collect();
        rows.sort_by_key(|row| row.id);
        let trips = rows
            .iter()
            .map(|row| self.store.trip(row.trip))
            .collect::<Result<Vec<_>, _>>()?;
        self.with_retry(operation, || {
            rows.iter()
                .zip(&trips)
                .map(|(row, trip_row)| -> Result<BookingView, BookingError> {
                    let trip = self.store.acquire(&trip_row.inner, Resource::Trip(trip_row.id))?;
                    let booking = self.store.acquire(&row.inner, Resource::Booking(row.id))?;
                    Ok(BookingView {
                        booking: booking.clone(),
                        trip: trip.trip.clone(),
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EngineConfig, StoreConfig};
    use crate::engine::{NewTrip, NewVehicle};
    use crate::user::Role;
    use chrono::{TimeDelta, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn engine() -> Engine {
        let config = EngineConfig {
            store: StoreConfig {
                lock_timeout_ms: 5,
                max_retries: 1,
                retry_backoff_ms: 1,
            },
            ..EngineConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        Engine::with_config(config, Arc::new(ManualClock::new(now)))
    }

    fn booked(engine: &Engine) -> (Trip, Booking) {
        let driver = engine.register_user("driver", Role::User, dec!(0)).unwrap();
        let passenger = engine.register_user("p", Role::User, dec!(50)).unwrap();
        let vehicle = engine
            .register_vehicle(
                driver.id,
                NewVehicle {
                    brand: "Renault".to_string(),
                    model: "Clio".to_string(),
                    plate: "AB-123-CD".to_string(),
                    seat_count: 5,
                },
            )
            .unwrap();
        let departure = Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap();
        let trip = engine
            .create_trip(
                driver.id,
                NewTrip {
                    vehicle: vehicle.id,
                    departure_city: "Lyon".to_string(),
                    arrival_city: "Grenoble".to_string(),
                    departure,
                    arrival: departure + TimeDelta::hours(1),
                    available_seats: 3,
                    price: dec!(5),
                },
            )
            .unwrap();
        let booking = engine.create_booking(passenger.id, trip.id, 1).unwrap();
        (trip, booking)
    }

    #[test]
    fn reads_give_up_on_a_locked_trip_row() {
        let engine = engine();
        let (trip, booking) = booked(&engine);

        let row = engine.store.trip(trip.id).unwrap();
        let held = row.inner.lock();
        let unavailable = BookingError::ServiceUnavailable { attempts: 2 };
        assert_eq!(engine.get_trip(trip.id), Err(unavailable.clone()));
        assert_eq!(engine.list_all_trips(), Err(unavailable.clone()));
        assert_eq!(engine.list_all_bookings(), Err(unavailable));
        assert_eq!(engine.get_booking(booking.id).map(|b| b.id), Ok(booking.id));
        drop(held);

        assert_eq!(engine.get_trip(trip.id).unwrap().available_seats(), 2);
    }

    #[test]
    fn booking_view_reads_a_locked_booking_row_as_unavailable() {
        let engine = engine();
        let (_, booking) = booked(&engine);

        let row = engine.store.booking(booking.id).unwrap();
        let held = row.inner.lock();
        assert_eq!(
            engine.list_bookings_for_passenger(booking.passenger),
            Err(BookingError::ServiceUnavailable { attempts: 2 })
        );
        assert_eq!(
            engine.get_booking(booking.id),
            Err(BookingError::ServiceUnavailable { attempts: 2 })
        );
        drop(held);

        let views = engine.list_bookings_for_passenger(booking.passenger).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].trip.available_seats(), 2);
    }
}
