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

//! Append-only journal of committed credit movements.
//!
//! Entries are pushed by the ledger after each committed debit or credit
//! and drained in sequence order by consumers (reports, audit export).
//! Across drains the sequence has no gaps and never goes backwards.

use crate::base::{BookingId, UserId};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "booking", rename_all = "snake_case")]
pub enum EntryReason {
    /// Credits granted at registration.
    Opening,
    TopUp,
    /// Payment for a booking.
    Booking(BookingId),
    /// Refund of a cancelled booking.
    Refund(BookingId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub user: UserId,
    /// Signed change: negative for debits.
    pub amount: Decimal,
    /// Balance right after this entry was applied.
    pub balance: Decimal,
    #[serde(flatten)]
    pub reason: EntryReason,
}

/// A lock-free, append-only journal.
///
/// Sequence numbers are allocated atomically, so a push can land in the
/// queue after a push holding a later number. [`Journal::drain`] only hands
/// out the contiguous run following the last drained sequence and keeps the
/// rest queued until the missing entries arrive.
#[derive(Debug, Default)]
pub struct Journal {
    entries: SegQueue<LedgerEntry>,
    next_sequence: AtomicU64,
    /// Highest sequence handed out by a drain.
    drained: Mutex<u64>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its sequence number.
    pub fn push(&self, user: UserId, amount: Decimal, balance: Decimal, reason: EntryReason) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.push(LedgerEntry {
            sequence,
            user,
            amount,
            balance,
            reason,
        });
        sequence
    }

    /// Removes and returns pending entries, oldest first. Entries behind a
    /// sequence number whose push has not landed yet stay queued.
    pub fn drain(&self) -> Vec<LedgerEntry> {
        let mut drained = self.drained.lock();
        let mut pending = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            pending.push(entry);
        }
        pending.sort_by_key(|entry| entry.sequence);

        let ready = pending
            .iter()
            .zip(*drained + 1..)
            .take_while(|(entry, expected)| entry.sequence == *expected)
            .count();
        for entry in pending.split_off(ready) {
            self.entries.push(entry);
        }
        if let Some(last) = pending.last() {
            *drained = last.sequence;
        }
        pending
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
