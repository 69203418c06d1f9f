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

//! Vehicles registered by drivers.

use crate::base::{UserId, VehicleId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub owner: UserId,
    pub brand: String,
    pub model: String,
    pub plate: String,
    /// Physical seats, the driver's included.
    pub seat_count: u32,
}

impl Vehicle {
    /// Seats a trip on this vehicle can offer to passengers.
    pub fn passenger_capacity(&self) -> u32 {
        self.seat_count.saturating_sub(1)
    }
}

#[derive(Debug)]
pub(crate) struct VehicleData {
    pub(crate) vehicle: Vehicle,
    /// Non-cancelled trips referencing this vehicle.
    pub(crate) active_trips: u32,
}

/// Vehicle row. `owner` never changes and can be read without the lock.
#[derive(Debug)]
pub(crate) struct VehicleRecord {
    pub(crate) id: VehicleId,
    pub(crate) owner: UserId,
    pub(crate) inner: Mutex<VehicleData>,
}

impl VehicleRecord {
    pub(crate) fn new(vehicle: Vehicle) -> Self {
        Self {
            id: vehicle.id,
            owner: vehicle.owner,
            inner: Mutex::new(VehicleData {
                vehicle,
                active_trips: 0,
            }),
        }
    }
}
