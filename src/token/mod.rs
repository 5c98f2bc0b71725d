//! Asset-transfer collaborator.
//!
//! The ledger decides how much may move and when; the actual movement goes
//! through [`AssetTransfer`]. [`InMemoryToken`] is an allowance-based fungible
//! token used by the CLI and the tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::{AccountId, Amount};

pub const DEFAULT_DECIMALS: u8 = 18;
/// Largest `decimals` whose scale factor fits in an [`Amount`].
pub const MAX_DECIMALS: u8 = 38;

pub trait AssetTransfer {
    /// Pulls `amount` from `from` into ledger custody.
    fn transfer_in(&mut self, from: &AccountId, amount: Amount) -> Result<(), TransferError>;

    /// Pushes `amount` from ledger custody to `to`.
    fn transfer_out(&mut self, to: &AccountId, amount: Amount) -> Result<(), TransferError>;

    /// Liquid balance of `holder` in the underlying asset.
    fn balance_of(&self, holder: &AccountId) -> Amount;

    /// Account that holds the ledger's custody balance.
    fn custody(&self) -> &AccountId;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "Test Token".to_string(),
            symbol: "TEST".to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryToken {
    meta: TokenMetadata,
    custody: AccountId,
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<(AccountId, AccountId), Amount>,
    total_supply: Amount,
}

impl InMemoryToken {
    pub fn new(meta: TokenMetadata, custody: AccountId) -> Self {
        Self {
            meta,
            custody,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            total_supply: 0,
        }
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.meta
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn mint(&mut self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| TransferError::Failure("total supply overflow".to_string()))?;
        self.credit(to, amount)?;
        self.total_supply = supply;
        tracing::debug!(%to, %amount, "minted");
        Ok(())
    }

    /// Sets the allowance `owner` grants `spender`, replacing any previous value.
    pub fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Amount) {
        self.allowances
            .insert((owner.clone(), spender.clone()), amount);
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let balance = self.balance(from);
        if balance < amount {
            return Err(TransferError::InsufficientBalance {
                account: from.clone(),
                balance,
                needed: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        // Credit first: it is the only step that can fail.
        self.credit(to, amount)?;
        self.balances.insert(from.clone(), balance - amount);
        tracing::debug!(%from, %to, %amount, "token transfer");
        Ok(())
    }

    fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn credit(&mut self, account: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let entry = self.balances.entry(account.clone()).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| TransferError::Failure(format!("balance overflow for {account}")))?;
        Ok(())
    }
}

impl AssetTransfer for InMemoryToken {
    fn transfer_in(&mut self, from: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if from == &self.custody {
            return Err(TransferError::Failure(format!(
                "custody account {from} cannot deposit into itself"
            )));
        }
        let spender = self.custody.clone();
        let allowance = self.allowance(from, &spender);
        if allowance < amount {
            return Err(TransferError::InsufficientAllowance {
                owner: from.clone(),
                spender,
                allowance,
                needed: amount,
            });
        }
        self.transfer(from, &spender, amount)?;
        self.allowances
            .insert((from.clone(), spender), allowance - amount);
        Ok(())
    }

    fn transfer_out(&mut self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if to == &self.custody {
            return Err(TransferError::Failure(format!(
                "custody account {to} cannot receive a payout"
            )));
        }
        let custody = self.custody.clone();
        self.transfer(&custody, to, amount)
    }

    fn balance_of(&self, holder: &AccountId) -> Amount {
        self.balance(holder)
    }

    fn custody(&self) -> &AccountId {
        &self.custody
    }
}

/// Serializes base-unit amounts as decimal strings; JSON consumers cannot be
/// trusted with integers above 2^53.
pub mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("invalid decimal amount {0:?}")]
    Malformed(String),
    #[error("{value:?} has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u8 },
    #[error("{0:?} does not fit in 128 bits")]
    Overflow(String),
    #[error("decimals must be at most {MAX_DECIMALS}, got {0}")]
    Decimals(u8),
}

/// Scales a decimal string such as `"100"` or `"0.25"` into base units.
pub fn parse_units(value: &str, decimals: u8) -> Result<Amount, UnitsError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::Decimals(decimals));
    }
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits(whole) || !digits(frac) {
        return Err(UnitsError::Malformed(value.to_string()));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }
    let overflow = || UnitsError::Overflow(value.to_string());
    let scale = 10u128.pow(decimals as u32);
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        let raw: Amount = frac.parse().map_err(|_| overflow())?;
        raw * 10u128.pow(decimals as u32 - frac.len() as u32)
    };
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Renders base units as a decimal string without trailing fractional zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    let scale = 10u128.pow(decimals as u32);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
