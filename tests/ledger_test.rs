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

//! Ledger public API integration tests.

use carpool_booking::{BookingError, BookingId, EntryReason, Ledger, UserId};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ledger() -> Ledger {
    Ledger::new(Duration::from_millis(250))
}

// === Basic Wallet Tests ===

#[test]
fn opened_wallet_holds_initial_credits() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(50)).unwrap();
    assert_eq!(ledger.balance(UserId(1)), Ok(dec!(50)));
    assert_eq!(
        ledger.balance(UserId(2)),
        Err(BookingError::UserNotFound { user: UserId(2) })
    );
}

#[test]
fn reopening_keeps_existing_balance() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(50)).unwrap();
    ledger.open(UserId(1), dec!(500)).unwrap();
    assert_eq!(ledger.balance(UserId(1)), Ok(dec!(50)));
    assert_eq!(ledger.drain_journal().len(), 1);
}

#[test]
fn debit_then_credit_returns_new_balances() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(50)).unwrap();

    let after_debit = ledger
        .debit(UserId(1), dec!(20), EntryReason::Booking(BookingId(1)))
        .unwrap();
    let after_credit = ledger
        .credit(UserId(1), dec!(7.5), EntryReason::Refund(BookingId(1)))
        .unwrap();

    assert_eq!(after_debit, dec!(30));
    assert_eq!(after_credit, dec!(37.5));
}

#[test]
fn balances_are_sorted_by_user() {
    let ledger = ledger();
    for id in [3, 1, 2] {
        ledger.open(UserId(id), Decimal::from(id * 10)).unwrap();
    }
    let users: Vec<UserId> = ledger.balances().unwrap().iter().map(|b| b.user).collect();
    assert_eq!(users, vec![UserId(1), UserId(2), UserId(3)]);
}

// === Error Cases ===

#[test]
fn negative_opening_balance_is_rejected() {
    let ledger = ledger();
    assert_eq!(
        ledger.open(UserId(1), dec!(-1)),
        Err(BookingError::InvalidAmount { amount: dec!(-1) })
    );
    assert_eq!(
        ledger.balance(UserId(1)),
        Err(BookingError::UserNotFound { user: UserId(1) })
    );
}

#[test]
fn overdraft_is_rejected_without_side_effects() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(5)).unwrap();
    ledger.drain_journal();

    let result = ledger.debit(UserId(1), dec!(10), EntryReason::Booking(BookingId(1)));

    assert_eq!(
        result,
        Err(BookingError::InsufficientFunds {
            user: UserId(1),
            required: dec!(10),
            available: dec!(5),
        })
    );
    assert_eq!(ledger.balance(UserId(1)), Ok(dec!(5)));
    assert!(ledger.drain_journal().is_empty());
}

#[test]
fn non_positive_movements_are_rejected() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(5)).unwrap();

    assert_eq!(
        ledger.credit(UserId(1), dec!(0), EntryReason::TopUp),
        Err(BookingError::InvalidAmount { amount: dec!(0) })
    );
    assert_eq!(
        ledger.debit(UserId(1), dec!(-3), EntryReason::Booking(BookingId(1))),
        Err(BookingError::InvalidAmount { amount: dec!(-3) })
    );
}

#[test]
fn unknown_wallet_is_reported() {
    let ledger = ledger();
    assert_eq!(
        ledger.credit(UserId(9), dec!(1), EntryReason::TopUp),
        Err(BookingError::UserNotFound { user: UserId(9) })
    );
}

#[test]
fn journal_drains_in_sequence_order() {
    let ledger = ledger();
    ledger.open(UserId(1), dec!(10)).unwrap();
    ledger.credit(UserId(1), dec!(5), EntryReason::TopUp).unwrap();
    ledger
        .debit(UserId(1), dec!(15), EntryReason::Booking(BookingId(4)))
        .unwrap();

    let entries = ledger.drain_journal();
    let reasons: Vec<EntryReason> = entries.iter().map(|e| e.reason).collect();
    assert_eq!(
        reasons,
        vec![
            EntryReason::Opening,
            EntryReason::TopUp,
            EntryReason::Booking(BookingId(4)),
        ]
    );
    assert_eq!(entries[2].balance, dec!(0));
    assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(ledger.drain_journal().is_empty());
}

#[test]
fn journal_entry_serializes_reason_inline() {
    let ledger = ledger();
    ledger.open(UserId(2), dec!(10)).unwrap();
    ledger
        .debit(UserId(2), dec!(4), EntryReason::Booking(BookingId(7)))
        .unwrap();

    let entries = ledger.drain_journal();
    let json = serde_json::to_value(&entries[1]).unwrap();
    assert_eq!(json["user"], 2);
    assert_eq!(json["reason"], "booking");
    assert_eq!(json["booking"], 7);
    assert_eq!(json["amount"], "-4");
}

// === Multi-threading Tests ===

#[test]
fn concurrent_debits_never_overdraw() {
    let ledger = Arc::new(ledger());
    ledger.open(UserId(1), dec!(100)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                (0..10)
                    .filter(|i| {
                        let booking = BookingId(t * 10 + i);
                        ledger
                            .debit(UserId(1), dec!(3), EntryReason::Booking(booking))
                            .is_ok()
                    })
                    .count()
            })
        })
        .collect();
    let successes: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(successes, 33);
    assert_eq!(ledger.balance(UserId(1)), Ok(dec!(1)));
}

#[test]
fn parallel_movements_across_wallets_balance_out() {
    let ledger = ledger();
    (1..=50u32).for_each(|id| ledger.open(UserId(id), dec!(20)).unwrap());

    (1..=50u32).into_par_iter().for_each(|id| {
        let user = UserId(id);
        ledger
            .debit(user, dec!(12), EntryReason::Booking(BookingId(id)))
            .unwrap();
        ledger
            .credit(user, dec!(12), EntryReason::Refund(BookingId(id)))
            .unwrap();
    });

    let total: Decimal = ledger.balances().unwrap().iter().map(|b| b.credits).sum();
    assert_eq!(total, dec!(1000));
    assert_eq!(ledger.drain_journal().len(), 150);
}
