use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::{AccountId, Amount, LockId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    RoleGranted {
        role: Role,
        /// Hex of [`Role::id`].
        role_id: String,
        account: AccountId,
        grantor: AccountId,
    },
    RoleRevoked {
        role: Role,
        /// Hex of [`Role::id`].
        role_id: String,
        account: AccountId,
        revoker: AccountId,
    },
    Staked {
        holder: AccountId,
        #[serde(with = "crate::token::serde_amount")]
        amount: Amount,
    },
    Unstaked {
        holder: AccountId,
        recipient: AccountId,
        #[serde(with = "crate::token::serde_amount")]
        amount: Amount,
    },
    Locked {
        holder: AccountId,
        lock_id: LockId,
    },
    Claimed {
        holder: AccountId,
        #[serde(with = "crate::token::serde_amount")]
        amount: Amount,
    },
    BlacklistUpdated {
        account: AccountId,
        blacklisted: bool,
        admin: AccountId,
    },
    EmergencyPanic {
        admin: AccountId,
    },
}

impl LedgerEvent {
    pub fn role_granted(role: Role, account: AccountId, grantor: AccountId) -> Self {
        LedgerEvent::RoleGranted {
            role,
            role_id: role.hex_id(),
            account,
            grantor,
        }
    }

    pub fn role_revoked(role: Role, account: AccountId, revoker: AccountId) -> Self {
        LedgerEvent::RoleRevoked {
            role,
            role_id: role.hex_id(),
            account,
            revoker,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

/// Append-only event log. Records are only added after a state change has
/// been committed.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, timestamp: Timestamp, event: LedgerEvent) -> u64 {
        let seq = self.records.len() as u64;
        self.records.push(EventRecord {
            seq,
            timestamp,
            event,
        });
        seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `seq >= cursor`.
    pub fn since(&self, cursor: u64) -> &[EventRecord] {
        let start = (cursor as usize).min(self.records.len());
        &self.records[start..]
    }
}
