use thiserror::Error;

use crate::access::Role;
use crate::{AccountId, Amount, LockId};

/// Failures reported by the asset-transfer collaborator.
///
/// The ledger never interprets these; they are surfaced to the caller as
/// [`LedgerError::Transfer`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The holder has not approved enough for the custody account to pull.
    #[error("insufficient allowance: {owner} approved {allowance} for {spender}, needed {needed}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        allowance: Amount,
        needed: Amount,
    },

    /// The source account does not hold enough of the asset.
    #[error("insufficient balance in {account}: have {balance}, need {needed}")]
    InsufficientBalance {
        account: AccountId,
        balance: Amount,
        needed: Amount,
    },

    /// Any other collaborator-side failure.
    #[error("transfer failed: {0}")]
    Failure(String),
}

/// Canonical error type for every ledger entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{caller} is missing {role}")]
    Unauthorized { caller: AccountId, role: Role },

    #[error("{holder} is blacklisted")]
    Blacklisted { holder: AccountId },

    #[error("amount must be greater than 0")]
    InvalidAmount,

    #[error("duration must be greater than 0")]
    InvalidDuration,

    #[error("insufficient staked amount for {holder}: have {balance}, need {needed}")]
    InsufficientBalance {
        holder: AccountId,
        balance: Amount,
        needed: Amount,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("lock {lock_id} not found for {holder}")]
    LockNotFound { holder: AccountId, lock_id: LockId },

    #[error("arithmetic overflow")]
    Overflow,

    #[error("custody shortfall: vault holds {custody_balance}, owes {liabilities}")]
    CustodyShortfall {
        custody_balance: Amount,
        liabilities: Amount,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
