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

//! Benchmarks for the booking engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded booking and cancellation
//! - Parallel bookings on distinct trips and on one contended trip
//! - Trip search as the number of published trips grows

use carpool_booking::{Engine, NewTrip, NewVehicle, Role, TripId, UserId};
use chrono::{TimeDelta, Utc};
use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Helper Functions
// =============================================================================

fn publish(engine: &Engine, index: u32, seats: u32) -> TripId {
    let driver = engine
        .register_user(format!("driver-{index}"), Role::User, Decimal::ZERO)
        .unwrap()
        .id;
    let vehicle = engine
        .register_vehicle(
            driver,
            NewVehicle {
                brand: "Citroen".to_string(),
                model: "Berlingo".to_string(),
                plate: format!("BN-{index:05}"),
                seat_count: seats + 1,
            },
        )
        .unwrap()
        .id;
    let departure = Utc::now() + TimeDelta::days(2);
    engine
        .create_trip(
            driver,
            NewTrip {
                vehicle,
                departure_city: if index % 2 == 0 { "Paris" } else { "Lille" }.to_string(),
                arrival_city: "Lyon".to_string(),
                departure,
                arrival: departure + TimeDelta::hours(4),
                available_seats: seats,
                price: dec!(12.5),
            },
        )
        .unwrap()
        .id
}

fn passengers(engine: &Engine, count: usize) -> Vec<UserId> {
    (0..count)
        .map(|i| {
            engine
                .register_user(format!("passenger-{i}"), Role::User, dec!(1000))
                .unwrap()
                .id
        })
        .collect()
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_booking(c: &mut Criterion) {
    c.bench_function("single_booking", |b| {
        b.iter_batched(
            || {
                let engine = Engine::new();
                let trip = publish(&engine, 0, 3);
                let passenger = passengers(&engine, 1)[0];
                (engine, trip, passenger)
            },
            |(engine, trip, passenger)| {
                black_box(engine.create_booking(passenger, trip, 2).unwrap());
                engine
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_book_cancel_cycle(c: &mut Criterion) {
    let engine = Engine::new();
    let trip = publish(&engine, 0, 3);
    let passenger = passengers(&engine, 1)[0];

    c.bench_function("book_cancel_cycle", |b| {
        b.iter(|| {
            let booking = engine.create_booking(passenger, trip, 1).unwrap();
            black_box(engine.cancel_booking(passenger, booking.id).unwrap());
        })
    });
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_bookings_distinct_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_bookings_distinct_trips");

    for count in [64usize, 512].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let engine = Engine::new();
                    let trips: Vec<TripId> =
                        (0..count as u32).map(|i| publish(&engine, i, 4)).collect();
                    let riders = passengers(&engine, count);
                    (engine, trips, riders)
                },
                |(engine, trips, riders)| {
                    trips.par_iter().zip(riders.par_iter()).for_each(|(trip, rider)| {
                        black_box(engine.create_booking(*rider, *trip, 1).unwrap());
                    });
                    engine
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_contended_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_trip");

    for count in [64usize, 512].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let engine = Engine::new();
                    let trip = publish(&engine, 0, count as u32 / 2);
                    let riders = passengers(&engine, count);
                    (engine, trip, riders)
                },
                |(engine, trip, riders)| {
                    let booked = riders
                        .par_iter()
                        .filter(|rider| engine.create_booking(**rider, trip, 1).is_ok())
                        .count();
                    assert_eq!(booked, count / 2);
                    engine
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Query Benchmarks
// =============================================================================

fn bench_search_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_trips");

    for count in [100u32, 1_000, 10_000].iter() {
        let engine = Engine::new();
        for i in 0..*count {
            publish(&engine, i, 3);
        }
        let date = (Utc::now() + TimeDelta::days(2)).date_naive();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(engine.search_trips("Paris", "Lyon", date).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(single_threaded, bench_single_booking, bench_book_cancel_cycle,);

criterion_group!(
    multi_threaded,
    bench_parallel_bookings_distinct_trips,
    bench_contended_trip,
);

criterion_group!(queries, bench_search_trips,);

criterion_main!(single_threaded, multi_threaded, queries);
