//! Ledger bootstrap configuration.
//!
//! A JSON document naming the owner, an optional admin, the custody account
//! and the token, plus initial token allocations:
//!
//! ```json
//! {
//!   "owner": "owner",
//!   "admin": "admin",
//!   "token": { "name": "Test Token", "symbol": "TEST", "decimals": 18 },
//!   "allocations": [ { "account": "user1", "amount": "1000" } ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ManualClock, SystemClock};
use crate::error::{LedgerError, TransferError};
use crate::ledger::StakingLedger;
use crate::token::{parse_units, InMemoryToken, TokenMetadata, UnitsError, MAX_DECIMALS};
use crate::{AccountId, Timestamp};

pub const DEFAULT_OWNER: &str = "owner";
pub const DEFAULT_CUSTODY: &str = "staking-vault";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid allocation: {0}")]
    Units(#[from] UnitsError),
    #[error("allocation failed: {0}")]
    Mint(#[from] TransferError),
    #[error("bootstrap failed: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub account: AccountId,
    /// Whole tokens as a decimal string, scaled by the token's decimals.
    pub amount: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub owner: AccountId,
    pub admin: Option<AccountId>,
    pub custody: AccountId,
    pub token: TokenMetadata,
    /// Starting clock reading; the system time when absent.
    pub genesis_time: Option<Timestamp>,
    pub allocations: Vec<Allocation>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            admin: None,
            custody: DEFAULT_CUSTODY.to_string(),
            token: TokenMetadata::default(),
            genesis_time: None,
            allocations: Vec::new(),
        }
    }
}

pub type ScriptLedger = StakingLedger<InMemoryToken, ManualClock>;

impl LedgerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), owner = %config.owner, "config loaded");
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.trim().is_empty() {
            return Err(ConfigError::Invalid("owner must not be empty".into()));
        }
        if self.custody.trim().is_empty() {
            return Err(ConfigError::Invalid("custody must not be empty".into()));
        }
        if self.custody == self.owner || Some(&self.custody) == self.admin.as_ref() {
            return Err(ConfigError::Invalid(
                "custody account must be distinct from owner and admin".into(),
            ));
        }
        if self.token.decimals > MAX_DECIMALS {
            return Err(ConfigError::Units(UnitsError::Decimals(self.token.decimals)));
        }
        Ok(())
    }

    /// Builds a ledger over an in-memory token with a manual clock. The
    /// returned clock handle drives time for the ledger.
    pub fn bootstrap(&self) -> Result<(ScriptLedger, ManualClock), ConfigError> {
        self.validate()?;
        let clock = ManualClock::new(self.genesis_time.unwrap_or_else(|| SystemClock.now()));
        let mut token = InMemoryToken::new(self.token.clone(), self.custody.clone());
        for allocation in &self.allocations {
            let amount = parse_units(&allocation.amount, self.token.decimals)?;
            token.mint(&allocation.account, amount)?;
        }
        let mut ledger = StakingLedger::new(self.owner.clone(), token, clock.clone());
        if let Some(admin) = &self.admin {
            ledger.set_admin(&self.owner, admin)?;
        }
        tracing::info!(
            owner = %self.owner,
            admin = ?self.admin,
            allocations = self.allocations.len(),
            genesis = clock.now(),
            "ledger bootstrapped"
        );
        Ok((ledger, clock))
    }
}
