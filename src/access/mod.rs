//! Two-tier access control: an immutable owner, at most one admin, and a
//! blacklist maintained by the admin.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::AccountId;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER_ROLE",
            Role::Admin => "ADMIN_ROLE",
        }
    }

    /// 32-byte role identifier carried in role events.
    pub fn id(&self) -> [u8; 32] {
        Sha256::digest(self.name().as_bytes()).into()
    }

    pub fn hex_id(&self) -> String {
        hex::encode(self.id())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminUpdate {
    /// The account already held the admin role.
    Unchanged,
    Granted { previous: Option<AccountId> },
}

#[derive(Clone, Debug)]
pub struct AccessControl {
    owner: AccountId,
    admin: Option<AccountId>,
    blacklist: BTreeSet<AccountId>,
}

impl AccessControl {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            admin: None,
            blacklist: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn admin(&self) -> Option<&AccountId> {
        self.admin.as_ref()
    }

    pub fn has_role(&self, role: Role, account: &AccountId) -> bool {
        match role {
            Role::Owner => &self.owner == account,
            Role::Admin => self.admin.as_ref() == Some(account),
        }
    }

    pub fn require_role(&self, role: Role, caller: &AccountId) -> LedgerResult<()> {
        if self.has_role(role, caller) {
            return Ok(());
        }
        tracing::warn!(%caller, %role, "rejected privileged call");
        Err(LedgerError::Unauthorized {
            caller: caller.clone(),
            role,
        })
    }

    /// Replaces the admin. Owner only.
    pub fn set_admin(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
    ) -> LedgerResult<AdminUpdate> {
        self.require_role(Role::Owner, caller)?;
        if self.admin.as_ref() == Some(account) {
            return Ok(AdminUpdate::Unchanged);
        }
        let previous = self.admin.replace(account.clone());
        Ok(AdminUpdate::Granted { previous })
    }

    /// Clears the admin slot. Owner only; returns the removed admin if any.
    pub fn revoke_admin(&mut self, caller: &AccountId) -> LedgerResult<Option<AccountId>> {
        self.require_role(Role::Owner, caller)?;
        Ok(self.admin.take())
    }

    /// Adds or removes `account` from the blacklist. Admin only; returns
    /// whether the set changed.
    pub fn set_blacklisted(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        blacklisted: bool,
    ) -> LedgerResult<bool> {
        self.require_role(Role::Admin, caller)?;
        let changed = if blacklisted {
            self.blacklist.insert(account.clone())
        } else {
            self.blacklist.remove(account)
        };
        Ok(changed)
    }

    pub fn is_blacklisted(&self, account: &AccountId) -> bool {
        self.blacklist.contains(account)
    }

    pub fn ensure_not_blacklisted(&self, holder: &AccountId) -> LedgerResult<()> {
        if self.is_blacklisted(holder) {
            return Err(LedgerError::Blacklisted {
                holder: holder.clone(),
            });
        }
        Ok(())
    }

    pub fn blacklist(&self) -> impl Iterator<Item = &AccountId> {
        self.blacklist.iter()
    }
}
