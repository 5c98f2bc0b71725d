//! JSON-lines operation scripts replayed against a bootstrapped ledger.
//!
//! One operation per line, tagged by `op`; blank lines and lines starting
//! with `#` are skipped:
//!
//! ```text
//! {"op":"approve","holder":"user2","amount":"100"}
//! {"op":"lock","caller":"user2","duration":"365d","amount":"100"}
//! {"op":"advance","by":"30d"}
//! {"op":"claim","caller":"user2","lock_id":0}
//! ```
//!
//! Amounts are either JSON integers in base units or decimal strings in whole
//! tokens. Integers are capped at `u64::MAX` base units (about 18.4 tokens at
//! 18 decimals); anything larger has to be written as a token string such as
//! `"1000"` or `"0.000000000000000001"`. Durations are seconds or strings with
//! an `s`/`m`/`h`/`d`/`w` suffix.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::clock::ManualClock;
use crate::config::{ConfigError, LedgerConfig, ScriptLedger};
use crate::error::{LedgerError, TransferError};
use crate::events::EventRecord;
use crate::token::{parse_units, AssetTransfer, UnitsError};
use crate::{AccountId, Amount, LockId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AmountArg {
    /// Base units, at most `u64::MAX`.
    Base(u64),
    /// Whole tokens as a decimal string.
    Tokens(String),
}

impl AmountArg {
    pub fn resolve(&self, decimals: u8) -> Result<Amount, UnitsError> {
        match self {
            AmountArg::Base(units) => Ok(*units as Amount),
            AmountArg::Tokens(value) => parse_units(value, decimals),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationArg {
    Seconds(u64),
    Text(String),
}

impl DurationArg {
    pub fn seconds(&self) -> Result<u64, StepError> {
        match self {
            DurationArg::Seconds(secs) => Ok(*secs),
            DurationArg::Text(text) => parse_duration(text),
        }
    }
}

/// Parses `"90"`, `"45s"`, `"15m"`, `"12h"`, `"30d"` or `"2w"` into seconds.
pub fn parse_duration(text: &str) -> Result<u64, StepError> {
    let text = text.trim();
    let invalid = || StepError::Duration(text.to_string());
    let (digits, unit) = match text.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 7 * 86_400,
        _ => return Err(invalid()),
    };
    value.checked_mul(scale).ok_or_else(invalid)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Mint {
        to: AccountId,
        amount: AmountArg,
    },
    /// Approves the ledger's custody account to pull from `holder`.
    Approve {
        holder: AccountId,
        amount: AmountArg,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: AmountArg,
    },
    Stake {
        caller: AccountId,
        amount: AmountArg,
    },
    Unstake {
        caller: AccountId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<AccountId>,
        amount: AmountArg,
    },
    Lock {
        caller: AccountId,
        duration: DurationArg,
        amount: AmountArg,
    },
    Claim {
        caller: AccountId,
        lock_id: LockId,
    },
    SetAdmin {
        caller: AccountId,
        account: AccountId,
    },
    RevokeAdmin {
        caller: AccountId,
    },
    Blacklist {
        caller: AccountId,
        account: AccountId,
    },
    Unblacklist {
        caller: AccountId,
        account: AccountId,
    },
    Panic {
        caller: AccountId,
    },
    Advance {
        by: DurationArg,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error("invalid duration {0:?}")]
    Duration(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub released: Option<Amount>,
    pub lock_id: Option<LockId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub line: usize,
    pub op: Operation,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base units paid out by a claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<LockId>,
    pub events: Vec<EventRecord>,
}

/// Reads every operation up front so a malformed script fails before any
/// state changes.
pub fn parse_script<R: BufRead>(reader: R) -> Result<Vec<(usize, Operation)>, ScriptError> {
    let mut ops = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let op = serde_json::from_str(trimmed).map_err(|source| ScriptError::Parse {
            line: idx + 1,
            source,
        })?;
        ops.push((idx + 1, op));
    }
    Ok(ops)
}

pub struct ScriptRunner {
    ledger: ScriptLedger,
    clock: ManualClock,
}

impl ScriptRunner {
    pub fn new(ledger: ScriptLedger, clock: ManualClock) -> Self {
        Self { ledger, clock }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, ConfigError> {
        let (ledger, clock) = config.bootstrap()?;
        Ok(Self::new(ledger, clock))
    }

    pub fn ledger(&self) -> &ScriptLedger {
        &self.ledger
    }

    pub fn apply(&mut self, op: &Operation) -> Result<Outcome, StepError> {
        let decimals = self.ledger.asset().metadata().decimals;
        let mut outcome = Outcome::default();
        match op {
            Operation::Mint { to, amount } => {
                let amount = amount.resolve(decimals)?;
                self.ledger.asset_mut().mint(to, amount)?;
            }
            Operation::Approve { holder, amount } => {
                let amount = amount.resolve(decimals)?;
                let custody = self.ledger.asset().custody().clone();
                self.ledger.asset_mut().approve(holder, &custody, amount);
            }
            Operation::Transfer { from, to, amount } => {
                let amount = amount.resolve(decimals)?;
                self.ledger.asset_mut().transfer(from, to, amount)?;
            }
            Operation::Stake { caller, amount } => {
                self.ledger.stake(caller, amount.resolve(decimals)?)?;
            }
            Operation::Unstake {
                caller,
                recipient,
                amount,
            } => {
                let recipient = recipient.as_ref().unwrap_or(caller);
                self.ledger
                    .unstake(caller, recipient, amount.resolve(decimals)?)?;
            }
            Operation::Lock {
                caller,
                duration,
                amount,
            } => {
                let id = self
                    .ledger
                    .lock(caller, duration.seconds()?, amount.resolve(decimals)?)?;
                outcome.lock_id = Some(id);
            }
            Operation::Claim { caller, lock_id } => {
                outcome.released = Some(self.ledger.claim(caller, *lock_id)?);
                outcome.lock_id = Some(*lock_id);
            }
            Operation::SetAdmin { caller, account } => self.ledger.set_admin(caller, account)?,
            Operation::RevokeAdmin { caller } => self.ledger.revoke_admin(caller)?,
            Operation::Blacklist { caller, account } => {
                self.ledger.add_to_blacklist(caller, account)?
            }
            Operation::Unblacklist { caller, account } => {
                self.ledger.remove_from_blacklist(caller, account)?
            }
            Operation::Panic { caller } => {
                self.ledger.panic(caller)?;
            }
            Operation::Advance { by } => {
                let now = self.clock.advance(by.seconds()?);
                tracing::debug!(now, "clock advanced");
            }
        }
        Ok(outcome)
    }

    /// Applies one operation and reports it along with the events it emitted.
    pub fn execute(&mut self, line: usize, op: Operation) -> StepReport {
        let cursor = self.ledger.events().len() as u64;
        let result = self.apply(&op);
        let events = self.ledger.events_since(cursor).to_vec();
        match result {
            Ok(outcome) => StepReport {
                line,
                op,
                ok: true,
                error: None,
                released: outcome.released.map(|a| a.to_string()),
                lock_id: outcome.lock_id,
                events,
            },
            Err(err) => {
                tracing::warn!(line, error = %err, "operation failed");
                StepReport {
                    line,
                    op,
                    ok: false,
                    error: Some(err.to_string()),
                    released: None,
                    lock_id: None,
                    events,
                }
            }
        }
    }
}
