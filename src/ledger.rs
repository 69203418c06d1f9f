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

//! Credit ledger.
//!
//! Each user has one [`Wallet`] holding a non-negative credit balance.
//! Debits check the balance and subtract it under the wallet's row lock, so
//! concurrent debits on the same user can never overdraw.
//!
//! # Example
//!
//! ```
//! use carpool_booking::{EntryReason, Ledger, UserId};
//! use rust_decimal_macros::dec;
//! use std::time::Duration;
//!
//! let ledger = Ledger::new(Duration::from_millis(100));
//! ledger.open(UserId(1), dec!(50)).unwrap();
//! ledger.debit(UserId(1), dec!(20), EntryReason::TopUp).unwrap();
//! assert_eq!(ledger.balance(UserId(1)), Ok(dec!(30)));
//! ```

use crate::base::UserId;
use crate::error::{BookingError, Resource};
use crate::journal::{EntryReason, Journal, LedgerEntry};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct WalletData {
    user: UserId,
    balance: Decimal,
}

impl WalletData {
    fn new(user: UserId, balance: Decimal) -> Self {
        Self { user, balance }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance of user {} went negative: {}",
            self.user,
            self.balance
        );
    }

    pub(crate) fn balance(&self) -> Decimal {
        self.balance
    }

    /// Decreases the balance.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), BookingError> {
        if amount <= Decimal::ZERO {
            return Err(BookingError::InvalidAmount { amount });
        }
        if self.balance < amount {
            return Err(BookingError::InsufficientFunds {
                user: self.user,
                required: amount,
                available: self.balance,
            });
        }
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(BookingError::AmountOverflow { amount })?;
        self.assert_invariants();
        Ok(())
    }

    /// Balance after crediting `amount`, without applying it.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidAmount`] - `amount` is not positive.
    /// - [`BookingError::AmountOverflow`] - The new balance is not representable.
    pub(crate) fn credited(&self, amount: Decimal) -> Result<Decimal, BookingError> {
        if amount <= Decimal::ZERO {
            return Err(BookingError::InvalidAmount { amount });
        }
        self.balance
            .checked_add(amount)
            .ok_or(BookingError::AmountOverflow { amount })
    }

    /// Increases the balance. There is no upper bound beyond what a
    /// [`Decimal`] can hold.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<(), BookingError> {
        self.balance = self.credited(amount)?;
        self.assert_invariants();
        Ok(())
    }
}

/// A user's credit balance row.
#[derive(Debug)]
pub(crate) struct Wallet {
    pub(crate) user: UserId,
    pub(crate) inner: Mutex<WalletData>,
}

impl Wallet {
    fn new(user: UserId, balance: Decimal) -> Self {
        Self {
            user,
            inner: Mutex::new(WalletData::new(user, balance)),
        }
    }
}

/// A user's balance at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub user: UserId,
    pub credits: Decimal,
}

impl Balance {
    const DECIMAL_PRECISION: u32 = 4;
}

impl Serialize for Balance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Balance", 2)?;
        state.serialize_field("user", &self.user)?;
        state.serialize_field("credits", &self.credits.round_dp(Balance::DECIMAL_PRECISION))?;
        state.end()
    }
}

/// Credit balances of all users plus the journal of committed movements.
#[derive(Debug)]
pub struct Ledger {
    wallets: DashMap<UserId, Arc<Wallet>>,
    journal: Journal,
    lock_timeout: Duration,
}

impl Ledger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            wallets: DashMap::new(),
            journal: Journal::new(),
            lock_timeout,
        }
    }

    /// Opens a wallet for `user` holding `initial` credits.
    ///
    /// Opening an existing wallet leaves it untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidAmount`] if `initial` is negative.
    pub fn open(&self, user: UserId, initial: Decimal) -> Result<(), BookingError> {
        if initial < Decimal::ZERO {
            return Err(BookingError::InvalidAmount { amount: initial });
        }
        if let Entry::Vacant(entry) = self.wallets.entry(user) {
            entry.insert(Arc::new(Wallet::new(user, initial)));
            if initial > Decimal::ZERO {
                self.journal.push(user, initial, initial, EntryReason::Opening);
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - No wallet for `user`.
    /// - [`BookingError::StoreUnavailable`] - Wallet lock timed out.
    pub fn balance(&self, user: UserId) -> Result<Decimal, BookingError> {
        let wallet = self.wallet(user)?;
        let balance = self.lock(&wallet)?.balance();
        Ok(balance)
    }

    /// Atomically checks and decreases `user`'s balance. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - No wallet for `user`.
    /// - [`BookingError::InvalidAmount`] - `amount` is not positive.
    /// - [`BookingError::InsufficientFunds`] - Balance below `amount`.
    /// - [`BookingError::StoreUnavailable`] - Wallet lock timed out.
    pub fn debit(
        &self,
        user: UserId,
        amount: Decimal,
        reason: EntryReason,
    ) -> Result<Decimal, BookingError> {
        let wallet = self.wallet(user)?;
        let mut data = self.lock(&wallet)?;
        data.debit(amount)?;
        self.record(user, -amount, data.balance(), reason);
        Ok(data.balance())
    }

    /// Atomically increases `user`'s balance. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UserNotFound`] - No wallet for `user`.
    /// - [`BookingError::InvalidAmount`] - `amount` is not positive.
    /// - [`BookingError::StoreUnavailable`] - Wallet lock timed out.
    pub fn credit(
        &self,
        user: UserId,
        amount: Decimal,
        reason: EntryReason,
    ) -> Result<Decimal, BookingError> {
        let wallet = self.wallet(user)?;
        let mut data = self.lock(&wallet)?;
        data.credit(amount)?;
        self.record(user, amount, data.balance(), reason);
        Ok(data.balance())
    }

    /// Balances of every user, ordered by user ID.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StoreUnavailable`] if a wallet lock timed out.
    pub fn balances(&self) -> Result<Vec<Balance>, BookingError> {
        let wallets: Vec<Arc<Wallet>> = self.wallets.iter().map(|w| Arc::clone(w.value())).collect();
        let mut balances = wallets
            .iter()
            .map(|wallet| {
                Ok(Balance {
                    user: wallet.user,
                    credits: self.lock(wallet)?.balance(),
                })
            })
            .collect::<Result<Vec<_>, BookingError>>()?;
        balances.sort_by_key(|balance| balance.user);
        Ok(balances)
    }

    /// Removes and returns journal entries recorded since the last drain.
    pub fn drain_journal(&self) -> Vec<LedgerEntry> {
        self.journal.drain()
    }

    pub(crate) fn wallet(&self, user: UserId) -> Result<Arc<Wallet>, BookingError> {
        self.wallets
            .get(&user)
            .map(|w| Arc::clone(w.value()))
            .ok_or(BookingError::UserNotFound { user })
    }

    pub(crate) fn lock<'a>(
        &self,
        wallet: &'a Wallet,
    ) -> Result<MutexGuard<'a, WalletData>, BookingError> {
        wallet
            .inner
            .try_lock_for(self.lock_timeout)
            .ok_or(BookingError::StoreUnavailable {
                resource: Resource::Wallet(wallet.user),
            })
    }

    pub(crate) fn record(&self, user: UserId, amount: Decimal, balance: Decimal, reason: EntryReason) {
        self.journal.push(user, amount, balance, reason);
    }
}
