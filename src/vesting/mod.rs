//! Time-locked vesting schedules.
//!
//! Every lock releases its principal linearly over its duration. Locks live in
//! a [`LockTable`] keyed by `(holder, id)`; ids are handed out per holder from
//! a cursor that starts at 0 and only moves forward.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::{AccountId, Amount, LockId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub id: LockId,
    #[serde(with = "crate::token::serde_amount")]
    pub amount: Amount,
    pub created_at: Timestamp,
    pub duration: u64,
    #[serde(with = "crate::token::serde_amount")]
    pub claimed: Amount,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Created,
    PartiallyClaimed,
    FullyVested,
}

impl Lock {
    /// Cumulative amount released by the schedule at `now`.
    pub fn vested(&self, now: Timestamp, panicked: bool) -> Amount {
        if panicked {
            return self.amount;
        }
        let elapsed = now.saturating_sub(self.created_at);
        vested_amount(self.amount, elapsed, self.duration)
    }

    /// Vested but not yet claimed at `now`.
    pub fn claimable(&self, now: Timestamp, panicked: bool) -> Amount {
        self.vested(now, panicked).saturating_sub(self.claimed)
    }

    pub fn remaining(&self) -> Amount {
        self.amount - self.claimed
    }

    pub fn unlocks_at(&self) -> Timestamp {
        self.created_at.saturating_add(self.duration)
    }

    pub fn state(&self) -> LockState {
        if self.claimed == 0 && self.amount > 0 {
            LockState::Created
        } else if self.claimed < self.amount {
            LockState::PartiallyClaimed
        } else {
            LockState::FullyVested
        }
    }
}

/// `floor(amount * elapsed / duration)`, capped at `amount`.
///
/// The product is formed in 256 bits, so any `u128` principal and `u64`
/// elapsed time are exact.
pub fn vested_amount(amount: Amount, elapsed: u64, duration: u64) -> Amount {
    if elapsed >= duration {
        return amount;
    }
    let vested = U256::from(amount) * U256::from(elapsed) / U256::from(duration);
    // elapsed < duration, so the quotient is below `amount`.
    vested.as_u128()
}

#[derive(Clone, Debug, Default)]
pub struct LockTable {
    locks: BTreeMap<(AccountId, LockId), Lock>,
    next_ids: BTreeMap<AccountId, LockId>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, holder: &AccountId) -> LockId {
        self.next_ids.get(holder).copied().unwrap_or(0)
    }

    /// Creates a lock at the holder's cursor and advances it.
    pub fn create(
        &mut self,
        holder: &AccountId,
        amount: Amount,
        created_at: Timestamp,
        duration: u64,
    ) -> LedgerResult<LockId> {
        let id = self.next_id(holder);
        let next = id.checked_add(1).ok_or(LedgerError::Overflow)?;
        self.locks.insert(
            (holder.clone(), id),
            Lock {
                id,
                amount,
                created_at,
                duration,
                claimed: 0,
            },
        );
        self.next_ids.insert(holder.clone(), next);
        Ok(id)
    }

    pub fn get(&self, holder: &AccountId, id: LockId) -> Option<&Lock> {
        self.locks.get(&(holder.clone(), id))
    }

    pub fn require(&self, holder: &AccountId, id: LockId) -> LedgerResult<&Lock> {
        self.get(holder, id).ok_or_else(|| LedgerError::LockNotFound {
            holder: holder.clone(),
            lock_id: id,
        })
    }

    /// Advances `claimed` on an existing lock; never past its principal.
    pub fn record_claim(
        &mut self,
        holder: &AccountId,
        id: LockId,
        amount: Amount,
    ) -> LedgerResult<()> {
        let lock = self
            .locks
            .get_mut(&(holder.clone(), id))
            .ok_or_else(|| LedgerError::LockNotFound {
                holder: holder.clone(),
                lock_id: id,
            })?;
        let claimed = lock
            .claimed
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        if claimed > lock.amount {
            return Err(LedgerError::Overflow);
        }
        lock.claimed = claimed;
        Ok(())
    }

    pub fn locks_of<'a>(
        &'a self,
        holder: &AccountId,
    ) -> impl Iterator<Item = &'a Lock> + 'a {
        self.locks
            .range((holder.clone(), 0)..=(holder.clone(), LockId::MAX))
            .map(|(_, lock)| lock)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Lock)> {
        self.locks.iter().map(|((holder, _), lock)| (holder, lock))
    }

    /// Principal still held in custody across all locks.
    pub fn outstanding(&self) -> Amount {
        self.locks.values().map(Lock::remaining).sum()
    }
}
