//! Token custody, staking and time-locked vesting ledger.
//!
//! Holders stake liquid tokens and open any number of independent locks,
//! each releasing its principal linearly over a fixed duration and claimed
//! incrementally. The building blocks:
//!
//! * [`access`]: owner, single admin and the lock blacklist.
//! * [`vesting`]: lock records and the linear vesting math.
//! * [`ledger`]: [`StakingLedger`], the entry points for stake, unstake,
//!   lock, claim and the emergency override.
//! * [`token`]: the asset-transfer collaborator the ledger moves value
//!   through, plus an in-memory fungible token.
//! * [`events`]: the append-only event log.
//! * [`config`] and [`script`]: JSON bootstrap and operation replay used by
//!   the `stake-ledger` binary.

pub mod access;
pub mod clock;
pub mod config;
pub mod events;
pub mod ledger;
pub mod script;
pub mod token;
pub mod vesting;

mod error;

pub use error::{LedgerError, LedgerResult, TransferError};
pub use ledger::StakingLedger;

pub type AccountId = String;
pub type Amount = u128;
pub type LockId = u64;
pub type Timestamp = u64;
