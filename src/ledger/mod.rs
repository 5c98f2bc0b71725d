//! The staking ledger: liquid stake accounting, time-locked vesting and the
//! emergency override, gated by [`AccessControl`].
//!
//! Every entry point runs to completion against `&mut self`. It validates,
//! calls the asset collaborator, and only then commits counters and appends
//! events, so a failed call leaves no trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::{AccessControl, AdminUpdate, Role};
use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventLog, EventRecord, LedgerEvent};
use crate::token::AssetTransfer;
use crate::vesting::{Lock, LockState, LockTable};
use crate::{AccountId, Amount, LockId, Timestamp};

pub struct StakingLedger<A, C = SystemClock> {
    asset: A,
    clock: C,
    access: AccessControl,
    stakes: BTreeMap<AccountId, Amount>,
    total_staked: Amount,
    locks: LockTable,
    panicked: bool,
    events: EventLog,
}

impl<A: AssetTransfer, C: Clock> StakingLedger<A, C> {
    pub fn new(owner: AccountId, asset: A, clock: C) -> Self {
        Self {
            asset,
            clock,
            access: AccessControl::new(owner),
            stakes: BTreeMap::new(),
            total_staked: 0,
            locks: LockTable::new(),
            panicked: false,
            events: EventLog::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Access control
    // ---------------------------------------------------------------------

    /// Grants the admin role to `account`, revoking it from the previous
    /// holder. Owner only.
    pub fn set_admin(&mut self, caller: &AccountId, account: &AccountId) -> LedgerResult<()> {
        let now = self.clock.now();
        match self.access.set_admin(caller, account)? {
            AdminUpdate::Unchanged => {
                tracing::debug!(%account, "admin unchanged");
            }
            AdminUpdate::Granted { previous } => {
                if let Some(previous) = previous {
                    self.events.append(
                        now,
                        LedgerEvent::role_revoked(Role::Admin, previous, caller.clone()),
                    );
                }
                self.events.append(
                    now,
                    LedgerEvent::role_granted(Role::Admin, account.clone(), caller.clone()),
                );
                tracing::info!(%account, grantor = %caller, "admin role granted");
            }
        }
        Ok(())
    }

    /// Leaves the ledger without an admin. Owner only.
    pub fn revoke_admin(&mut self, caller: &AccountId) -> LedgerResult<()> {
        let now = self.clock.now();
        if let Some(previous) = self.access.revoke_admin(caller)? {
            tracing::info!(account = %previous, "admin role revoked");
            self.events.append(
                now,
                LedgerEvent::role_revoked(Role::Admin, previous, caller.clone()),
            );
        }
        Ok(())
    }

    pub fn add_to_blacklist(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
    ) -> LedgerResult<()> {
        self.update_blacklist(caller, account, true)
    }

    pub fn remove_from_blacklist(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
    ) -> LedgerResult<()> {
        self.update_blacklist(caller, account, false)
    }

    fn update_blacklist(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        blacklisted: bool,
    ) -> LedgerResult<()> {
        let now = self.clock.now();
        if self.access.set_blacklisted(caller, account, blacklisted)? {
            tracing::info!(%account, blacklisted, "blacklist updated");
            self.events.append(
                now,
                LedgerEvent::BlacklistUpdated {
                    account: account.clone(),
                    blacklisted,
                    admin: caller.clone(),
                },
            );
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Stake
    // ---------------------------------------------------------------------

    /// Pulls `amount` from `caller` into custody and credits their stake.
    pub fn stake(&mut self, caller: &AccountId, amount: Amount) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let now = self.clock.now();
        let balance = self
            .balance_of(caller)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        self.asset.transfer_in(caller, amount)?;

        self.stakes.insert(caller.clone(), balance);
        self.total_staked = total;
        self.events.append(
            now,
            LedgerEvent::Staked {
                holder: caller.clone(),
                amount,
            },
        );
        tracing::info!(holder = %caller, %amount, "staked");
        Ok(())
    }

    /// Debits `caller`'s stake and pays `amount` out of custody to `recipient`.
    ///
    /// A zero amount succeeds without touching the asset, the stake table or
    /// the event log.
    pub fn unstake(
        &mut self,
        caller: &AccountId,
        recipient: &AccountId,
        amount: Amount,
    ) -> LedgerResult<()> {
        if amount == 0 {
            tracing::debug!(holder = %caller, "nothing to unstake");
            return Ok(());
        }
        let now = self.clock.now();
        let balance = self.balance_of(caller);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: caller.clone(),
                balance,
                needed: amount,
            });
        }

        self.asset.transfer_out(recipient, amount)?;

        self.stakes.insert(caller.clone(), balance - amount);
        self.total_staked -= amount;
        self.events.append(
            now,
            LedgerEvent::Unstaked {
                holder: caller.clone(),
                recipient: recipient.clone(),
                amount,
            },
        );
        tracing::info!(holder = %caller, %recipient, %amount, "unstaked");
        Ok(())
    }

    pub fn balance_of(&self, holder: &AccountId) -> Amount {
        self.stakes.get(holder).copied().unwrap_or(0)
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    // ---------------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------------

    /// Commits `amount` into a new vesting schedule of `duration` seconds
    /// and returns its id.
    pub fn lock(
        &mut self,
        caller: &AccountId,
        duration: u64,
        amount: Amount,
    ) -> LedgerResult<LockId> {
        self.access.ensure_not_blacklisted(caller)?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if duration == 0 {
            return Err(LedgerError::InvalidDuration);
        }
        let now = self.clock.now();
        self.locks
            .next_id(caller)
            .checked_add(1)
            .ok_or(LedgerError::Overflow)?;

        self.asset.transfer_in(caller, amount)?;

        let lock_id = self.locks.create(caller, amount, now, duration)?;
        self.events.append(
            now,
            LedgerEvent::Locked {
                holder: caller.clone(),
                lock_id,
            },
        );
        tracing::info!(holder = %caller, lock_id, %amount, duration, "locked");
        Ok(lock_id)
    }

    /// Releases whatever has vested on the lock since the last claim.
    ///
    /// Returns the amount paid out. A lock with nothing claimable is left
    /// untouched and yields 0 without touching the asset or the event log.
    pub fn claim(&mut self, caller: &AccountId, lock_id: LockId) -> LedgerResult<Amount> {
        let now = self.clock.now();
        let claimable = self
            .locks
            .require(caller, lock_id)?
            .claimable(now, self.panicked);
        if claimable == 0 {
            tracing::debug!(holder = %caller, lock_id, "nothing to claim");
            return Ok(0);
        }

        self.asset.transfer_out(caller, claimable)?;

        self.locks.record_claim(caller, lock_id, claimable)?;
        self.events.append(
            now,
            LedgerEvent::Claimed {
                holder: caller.clone(),
                amount: claimable,
            },
        );
        tracing::info!(holder = %caller, lock_id, amount = %claimable, "claimed");
        Ok(claimable)
    }

    pub fn claimable(&self, holder: &AccountId, lock_id: LockId) -> LedgerResult<Amount> {
        let now = self.clock.now();
        Ok(self.locks.require(holder, lock_id)?.claimable(now, self.panicked))
    }

    pub fn vested(&self, holder: &AccountId, lock_id: LockId) -> LedgerResult<Amount> {
        let now = self.clock.now();
        Ok(self.locks.require(holder, lock_id)?.vested(now, self.panicked))
    }

    pub fn lock_info(&self, holder: &AccountId, lock_id: LockId) -> Option<&Lock> {
        self.locks.get(holder, lock_id)
    }

    pub fn locks_of<'a>(
        &'a self,
        holder: &AccountId,
    ) -> impl Iterator<Item = &'a Lock> + 'a {
        self.locks.locks_of(holder)
    }

    pub fn next_lock_id(&self, holder: &AccountId) -> LockId {
        self.locks.next_id(holder)
    }

    /// Principal committed to locks and not yet claimed.
    pub fn total_locked(&self) -> Amount {
        self.locks.outstanding()
    }

    // ---------------------------------------------------------------------
    // Emergency override
    // ---------------------------------------------------------------------

    /// Vests every lock in full, for every holder, from now on. Admin only.
    ///
    /// Returns `true` when this call tripped the flag; repeat calls are no-ops.
    pub fn panic(&mut self, caller: &AccountId) -> LedgerResult<bool> {
        self.access.require_role(Role::Admin, caller)?;
        if self.panicked {
            tracing::debug!(admin = %caller, "emergency panic already active");
            return Ok(false);
        }
        let now = self.clock.now();
        self.panicked = true;
        self.events.append(
            now,
            LedgerEvent::EmergencyPanic {
                admin: caller.clone(),
            },
        );
        tracing::warn!(admin = %caller, "emergency panic: vesting schedules bypassed");
        Ok(true)
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn owner(&self) -> &AccountId {
        self.access.owner()
    }

    pub fn admin(&self) -> Option<&AccountId> {
        self.access.admin()
    }

    pub fn is_blacklisted(&self, holder: &AccountId) -> bool {
        self.access.is_blacklisted(holder)
    }

    pub fn events(&self) -> &[EventRecord] {
        self.events.records()
    }

    pub fn events_since(&self, cursor: u64) -> &[EventRecord] {
        self.events.since(cursor)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn asset(&self) -> &A {
        &self.asset
    }

    /// Direct access to the collaborator, for operations the ledger does not
    /// mediate (minting, approvals).
    pub fn asset_mut(&mut self) -> &mut A {
        &mut self.asset
    }

    /// Checks that custody covers every outstanding stake and lock.
    pub fn audit_custody(&self) -> LedgerResult<CustodyReport> {
        let custody_balance = self.asset.balance_of(self.asset.custody());
        let liabilities = self
            .total_staked
            .checked_add(self.total_locked())
            .ok_or(LedgerError::Overflow)?;
        if custody_balance < liabilities {
            tracing::error!(%custody_balance, %liabilities, "custody shortfall");
            return Err(LedgerError::CustodyShortfall {
                custody_balance,
                liabilities,
            });
        }
        Ok(CustodyReport {
            custody_balance,
            liabilities,
            surplus: custody_balance - liabilities,
        })
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let stakes: Vec<StakeEntry> = self
            .stakes
            .iter()
            .map(|(holder, amount)| StakeEntry {
                holder: holder.clone(),
                amount: *amount,
            })
            .collect();
        let locks: Vec<LockEntry> = self
            .locks
            .iter()
            .map(|(holder, lock)| LockEntry {
                holder: holder.clone(),
                state: lock.state(),
                unlocks_at: lock.unlocks_at(),
                lock: lock.clone(),
            })
            .collect();
        let blacklist: Vec<AccountId> = self.access.blacklist().cloned().collect();
        let state_root = compute_state_root(&stakes, &locks, &blacklist);
        LedgerSnapshot {
            timestamp: self.clock.now(),
            owner: self.access.owner().clone(),
            admin: self.access.admin().cloned(),
            panicked: self.panicked,
            blacklist,
            total_staked: self.total_staked,
            total_locked: self.total_locked(),
            stakes,
            locks,
            event_count: self.events.len(),
            state_root: hex::encode(state_root),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustodyReport {
    #[serde(with = "crate::token::serde_amount")]
    pub custody_balance: Amount,
    #[serde(with = "crate::token::serde_amount")]
    pub liabilities: Amount,
    #[serde(with = "crate::token::serde_amount")]
    pub surplus: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeEntry {
    pub holder: AccountId,
    #[serde(with = "crate::token::serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEntry {
    pub holder: AccountId,
    pub state: LockState,
    pub unlocks_at: Timestamp,
    #[serde(flatten)]
    pub lock: Lock,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub timestamp: Timestamp,
    pub owner: AccountId,
    pub admin: Option<AccountId>,
    pub panicked: bool,
    pub blacklist: Vec<AccountId>,
    #[serde(with = "crate::token::serde_amount")]
    pub total_staked: Amount,
    #[serde(with = "crate::token::serde_amount")]
    pub total_locked: Amount,
    pub stakes: Vec<StakeEntry>,
    pub locks: Vec<LockEntry>,
    pub event_count: usize,
    pub state_root: String,
}

fn compute_state_root(
    stakes: &[StakeEntry],
    locks: &[LockEntry],
    blacklist: &[AccountId],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for entry in stakes {
        let mut hasher = Sha256::new();
        hasher.update(b"stake");
        hasher.update(entry.holder.as_bytes());
        hasher.update(entry.amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for entry in locks {
        let mut hasher = Sha256::new();
        hasher.update(b"lock");
        hasher.update(entry.holder.as_bytes());
        hasher.update(entry.lock.id.to_le_bytes());
        hasher.update(entry.lock.amount.to_le_bytes());
        hasher.update(entry.lock.created_at.to_le_bytes());
        hasher.update(entry.lock.duration.to_le_bytes());
        hasher.update(entry.lock.claimed.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for account in blacklist {
        let mut hasher = Sha256::new();
        hasher.update(b"blacklist");
        hasher.update(account.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"stake-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransferError;
    use crate::token::{InMemoryToken, TokenMetadata};
    use proptest::prelude::*;

    const DAY: u64 = 86_400;
    const E18: Amount = 1_000_000_000_000_000_000;
    const START: Timestamp = 1_700_000_000;

    type TestLedger = StakingLedger<InMemoryToken, ManualClock>;

    fn acct(name: &str) -> AccountId {
        name.to_string()
    }

    fn setup() -> (TestLedger, ManualClock) {
        let clock = ManualClock::new(START);
        let mut token = InMemoryToken::new(TokenMetadata::default(), acct("vault"));
        for user in ["user1", "user2", "user3"] {
            token.mint(&acct(user), 1_000 * E18).unwrap();
        }
        let ledger = StakingLedger::new(acct("owner"), token, clock.clone());
        (ledger, clock)
    }

    fn approve(ledger: &mut TestLedger, holder: &str, amount: Amount) {
        ledger
            .asset_mut()
            .approve(&acct(holder), &acct("vault"), amount);
    }

    #[test]
    fn stake_rejects_zero_amount() {
        let (mut ledger, _) = setup();
        assert_eq!(ledger.stake(&acct("user1"), 0), Err(LedgerError::InvalidAmount));
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn stake_without_approval_surfaces_allowance_error() {
        let (mut ledger, _) = setup();
        let err = ledger.stake(&acct("user1"), 100 * E18).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transfer(TransferError::InsufficientAllowance { .. })
        ));
        assert_eq!(ledger.balance_of(&acct("user1")), 0);
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn unstake_more_than_staked_fails_without_side_effects() {
        let (mut ledger, _) = setup();
        let err = ledger
            .unstake(&acct("user1"), &acct("user1"), 100 * E18)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                holder: acct("user1"),
                balance: 0,
                needed: 100 * E18,
            }
        );
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn stake_then_partial_unstake() {
        let (mut ledger, _) = setup();
        approve(&mut ledger, "user1", 100 * E18);
        ledger.stake(&acct("user1"), 100 * E18).unwrap();
        ledger
            .unstake(&acct("user1"), &acct("user1"), 50 * E18)
            .unwrap();
        assert_eq!(ledger.balance_of(&acct("user1")), 50 * E18);
        assert_eq!(ledger.asset().balance_of(&acct("user1")), 950 * E18);
        let events: Vec<_> = ledger.events().iter().map(|r| r.event.clone()).collect();
        assert_eq!(
            events,
            vec![
                LedgerEvent::Staked {
                    holder: acct("user1"),
                    amount: 100 * E18
                },
                LedgerEvent::Unstaked {
                    holder: acct("user1"),
                    recipient: acct("user1"),
                    amount: 50 * E18
                },
            ]
        );
    }

    #[test]
    fn unstake_to_delegated_recipient() {
        let (mut ledger, _) = setup();
        approve(&mut ledger, "user3", 300 * E18);
        ledger.stake(&acct("user3"), 300 * E18).unwrap();
        ledger
            .unstake(&acct("user3"), &acct("cold-wallet"), 100 * E18)
            .unwrap();
        assert_eq!(ledger.balance_of(&acct("user3")), 200 * E18);
        assert_eq!(ledger.asset().balance_of(&acct("cold-wallet")), 100 * E18);
        assert_eq!(ledger.total_staked(), 200 * E18);
    }

    #[test]
    fn lock_ids_are_sequential_per_holder() {
        let (mut ledger, _) = setup();
        approve(&mut ledger, "user2", 300 * E18);
        assert_eq!(ledger.next_lock_id(&acct("user2")), 0);
        assert_eq!(ledger.lock(&acct("user2"), 365 * DAY, 100 * E18).unwrap(), 0);
        assert_eq!(ledger.lock(&acct("user2"), 395 * DAY, 200 * E18).unwrap(), 1);
        assert_eq!(ledger.next_lock_id(&acct("user2")), 2);
        assert_eq!(ledger.next_lock_id(&acct("user1")), 0);
        assert_eq!(ledger.total_locked(), 300 * E18);
    }

    #[test]
    fn lock_validates_inputs_before_pulling_funds() {
        let (mut ledger, _) = setup();
        approve(&mut ledger, "user1", 100 * E18);
        assert_eq!(
            ledger.lock(&acct("user1"), DAY, 0),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            ledger.lock(&acct("user1"), 0, E18),
            Err(LedgerError::InvalidDuration)
        );
        assert_eq!(ledger.asset().balance_of(&acct("user1")), 1_000 * E18);
        assert_eq!(ledger.next_lock_id(&acct("user1")), 0);
    }

    #[test]
    fn failed_lock_transfer_does_not_consume_an_id() {
        let (mut ledger, _) = setup();
        let err = ledger.lock(&acct("user1"), DAY, E18).unwrap_err();
        assert!(matches!(err, LedgerError::Transfer(_)));
        assert_eq!(ledger.next_lock_id(&acct("user1")), 0);
        assert!(ledger.lock_info(&acct("user1"), 0).is_none());
    }

    #[test]
    fn blacklist_only_gates_lock() {
        let (mut ledger, clock) = setup();
        ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
        approve(&mut ledger, "user1", 300 * E18);
        ledger.lock(&acct("user1"), 10 * DAY, 100 * E18).unwrap();
        ledger
            .add_to_blacklist(&acct("admin"), &acct("user1"))
            .unwrap();
        assert!(ledger.is_blacklisted(&acct("user1")));

        assert_eq!(
            ledger.lock(&acct("user1"), DAY, E18),
            Err(LedgerError::Blacklisted {
                holder: acct("user1")
            })
        );
        ledger.stake(&acct("user1"), 100 * E18).unwrap();
        ledger
            .unstake(&acct("user1"), &acct("user1"), 40 * E18)
            .unwrap();
        clock.advance(10 * DAY);
        assert_eq!(ledger.claim(&acct("user1"), 0).unwrap(), 100 * E18);

        ledger
            .remove_from_blacklist(&acct("admin"), &acct("user1"))
            .unwrap();
        approve(&mut ledger, "user1", E18);
        assert_eq!(ledger.lock(&acct("user1"), DAY, E18).unwrap(), 1);
    }

    #[test]
    fn claim_follows_linear_schedule() {
        let (mut ledger, clock) = setup();
        approve(&mut ledger, "user2", 100 * E18);
        let id = ledger.lock(&acct("user2"), 365 * DAY, 100 * E18).unwrap();

        clock.advance(30 * DAY);
        let first = ledger.claim(&acct("user2"), id).unwrap();
        assert_eq!(first, 8_219_178_082_191_780_821);
        assert_eq!(ledger.claim(&acct("user2"), id).unwrap(), 0);

        clock.advance(335 * DAY);
        let rest = ledger.claim(&acct("user2"), id).unwrap();
        assert_eq!(first + rest, 100 * E18);
        assert_eq!(
            ledger.lock_info(&acct("user2"), id).unwrap().state(),
            LockState::FullyVested
        );
        assert_eq!(ledger.asset().balance_of(&acct("user2")), 1_000 * E18);
    }

    #[test]
    fn claim_on_fully_vested_lock_is_a_silent_no_op() {
        let (mut ledger, clock) = setup();
        approve(&mut ledger, "user1", 10);
        ledger.lock(&acct("user1"), 5, 10).unwrap();
        clock.advance(5);
        assert_eq!(ledger.claim(&acct("user1"), 0).unwrap(), 10);
        let events = ledger.events().len();
        clock.advance(100);
        assert_eq!(ledger.claim(&acct("user1"), 0).unwrap(), 0);
        assert_eq!(ledger.events().len(), events);
    }

    #[test]
    fn claim_unknown_lock_fails() {
        let (mut ledger, _) = setup();
        assert_eq!(
            ledger.claim(&acct("user1"), 3),
            Err(LedgerError::LockNotFound {
                holder: acct("user1"),
                lock_id: 3
            })
        );
    }

    #[test]
    fn locks_are_private_to_their_holder() {
        let (mut ledger, clock) = setup();
        approve(&mut ledger, "user1", 10);
        ledger.lock(&acct("user1"), 5, 10).unwrap();
        clock.advance(5);
        assert!(matches!(
            ledger.claim(&acct("user2"), 0),
            Err(LedgerError::LockNotFound { .. })
        ));
    }

    #[test]
    fn only_admin_can_panic_and_panic_is_idempotent() {
        let (mut ledger, _) = setup();
        ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
        assert!(matches!(
            ledger.panic(&acct("user1")),
            Err(LedgerError::Unauthorized { role: Role::Admin, .. })
        ));
        assert!(matches!(
            ledger.panic(&acct("owner")),
            Err(LedgerError::Unauthorized { .. })
        ));
        assert!(!ledger.is_panicked());
        assert!(ledger.panic(&acct("admin")).unwrap());
        let events = ledger.events().len();
        assert!(!ledger.panic(&acct("admin")).unwrap());
        assert_eq!(ledger.events().len(), events);
        assert!(ledger.is_panicked());
    }

    #[test]
    fn panic_releases_remaining_principal() {
        let (mut ledger, clock) = setup();
        ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
        approve(&mut ledger, "user2", 300 * E18);
        ledger.lock(&acct("user2"), 365 * DAY, 100 * E18).unwrap();
        clock.advance(30 * DAY);
        let partial = ledger.claim(&acct("user2"), 0).unwrap();
        ledger.lock(&acct("user2"), 395 * DAY, 200 * E18).unwrap();

        ledger.panic(&acct("admin")).unwrap();
        assert_eq!(ledger.claimable(&acct("user2"), 1).unwrap(), 200 * E18);
        assert_eq!(ledger.claim(&acct("user2"), 1).unwrap(), 200 * E18);
        assert_eq!(ledger.claim(&acct("user2"), 0).unwrap(), 100 * E18 - partial);
        assert_eq!(ledger.total_locked(), 0);
        assert_eq!(
            ledger.events().last().map(|r| &r.event),
            Some(&LedgerEvent::Claimed {
                holder: acct("user2"),
                amount: 100 * E18 - partial
            })
        );
    }

    #[test]
    fn admin_replacement_emits_revoke_then_grant() {
        let (mut ledger, _) = setup();
        assert!(ledger.set_admin(&acct("user1"), &acct("admin")).is_err());
        ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
        ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
        ledger.set_admin(&acct("owner"), &acct("admin2")).unwrap();
        let events: Vec<_> = ledger.events().iter().map(|r| r.event.clone()).collect();
        assert_eq!(
            events,
            vec![
                LedgerEvent::role_granted(Role::Admin, acct("admin"), acct("owner")),
                LedgerEvent::role_revoked(Role::Admin, acct("admin"), acct("owner")),
                LedgerEvent::role_granted(Role::Admin, acct("admin2"), acct("owner")),
            ]
        );
        ledger.revoke_admin(&acct("owner")).unwrap();
        assert!(ledger.admin().is_none());
    }

    #[test]
    fn failed_payout_rolls_back_claim() {
        let (mut ledger, clock) = setup();
        approve(&mut ledger, "user1", 100);
        ledger.lock(&acct("user1"), 10, 100).unwrap();
        // Drain custody behind the ledger's back.
        ledger
            .asset_mut()
            .transfer(&acct("vault"), &acct("thief"), 100)
            .unwrap();
        clock.advance(10);
        assert!(matches!(
            ledger.claim(&acct("user1"), 0),
            Err(LedgerError::Transfer(TransferError::InsufficientBalance { .. }))
        ));
        assert_eq!(ledger.lock_info(&acct("user1"), 0).unwrap().claimed, 0);
        assert!(matches!(
            ledger.audit_custody(),
            Err(LedgerError::CustodyShortfall { liabilities: 100, .. })
        ));
    }

    #[test]
    fn custody_covers_stakes_and_locks() {
        let (mut ledger, clock) = setup();
        approve(&mut ledger, "user1", 500);
        ledger.stake(&acct("user1"), 200).unwrap();
        ledger.lock(&acct("user1"), 100, 300).unwrap();
        clock.advance(50);
        ledger.claim(&acct("user1"), 0).unwrap();
        let report = ledger.audit_custody().unwrap();
        assert_eq!(report.liabilities, 200 + 150);
        assert_eq!(report.custody_balance, 350);
        assert_eq!(report.surplus, 0);
    }

    #[test]
    fn snapshot_root_tracks_state() {
        let (mut ledger, _) = setup();
        let empty = ledger.snapshot();
        assert_eq!(empty.state_root, ledger.snapshot().state_root);
        approve(&mut ledger, "user1", 100);
        ledger.stake(&acct("user1"), 60).unwrap();
        ledger.lock(&acct("user1"), 10, 40).unwrap();
        let snap = ledger.snapshot();
        assert_ne!(snap.state_root, empty.state_root);
        assert_eq!(snap.stakes.len(), 1);
        assert_eq!(snap.locks[0].state, LockState::Created);
        assert_eq!(snap.event_count, 2);
        assert_eq!(snap.total_locked, 40);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["locks"][0]["amount"], "40");
        assert_eq!(json["locks"][0]["holder"], "user1");
        assert_eq!(json["locks"][0]["unlocks_at"], START + 10);
    }

    #[test]
    fn zero_unstake_leaves_no_trace() {
        let (mut ledger, _) = setup();
        let before = ledger.snapshot();
        ledger
            .unstake(&acct("user1"), &acct("user2"), 0)
            .unwrap();
        let after = ledger.snapshot();
        assert!(after.stakes.is_empty());
        assert_eq!(after.event_count, 0);
        assert_eq!(after.state_root, before.state_root);
        assert_eq!(ledger.asset().balance_of(&acct("user2")), 1_000 * E18);
    }

    #[test]
    fn custody_account_cannot_act_as_holder() {
        let (mut ledger, _) = setup();
        let vault = acct("vault");
        approve(&mut ledger, "user1", 100);
        ledger.stake(&acct("user1"), 100).unwrap();

        ledger.asset_mut().mint(&vault, 100).unwrap();
        approve(&mut ledger, "vault", 100);
        assert!(matches!(
            ledger.stake(&vault, 100),
            Err(LedgerError::Transfer(TransferError::Failure(_)))
        ));
        assert!(matches!(
            ledger.lock(&vault, DAY, 100),
            Err(LedgerError::Transfer(TransferError::Failure(_)))
        ));
        assert_eq!(ledger.balance_of(&vault), 0);
        assert!(matches!(
            ledger.unstake(&vault, &acct("thief"), 100),
            Err(LedgerError::InsufficientBalance { .. })
        ));

        // Paying a holder's stake into the vault would strand it there.
        assert!(matches!(
            ledger.unstake(&acct("user1"), &vault, 100),
            Err(LedgerError::Transfer(TransferError::Failure(_)))
        ));
        assert_eq!(ledger.balance_of(&acct("user1")), 100);
        assert_eq!(ledger.events().len(), 1);

        ledger
            .unstake(&acct("user1"), &acct("user1"), 100)
            .unwrap();
        assert_eq!(ledger.audit_custody().unwrap().liabilities, 0);
    }

    proptest! {
        #[test]
        fn prop_lock_ids_are_dense(
            ops in proptest::collection::vec((0usize..3, 0u8..3), 1..40)
        ) {
            let (mut ledger, _) = setup();
            let holders = ["user1", "user2", "user3"];
            for holder in holders {
                approve(&mut ledger, holder, Amount::MAX);
            }
            let mut expected = [0u64; 3];
            for (who, kind) in ops {
                let holder = acct(holders[who]);
                let amount = match kind {
                    0 => E18,
                    1 => 0,
                    _ => 10_000 * E18,
                };
                match ledger.lock(&holder, DAY, amount) {
                    Ok(id) => {
                        prop_assert_eq!(kind, 0);
                        prop_assert_eq!(id, expected[who]);
                        expected[who] += 1;
                    }
                    Err(_) => prop_assert_ne!(kind, 0),
                }
                prop_assert_eq!(ledger.next_lock_id(&holder), expected[who]);
            }
            for (who, holder) in holders.iter().enumerate() {
                let ids: Vec<LockId> = ledger.locks_of(&acct(holder)).map(|l| l.id).collect();
                prop_assert_eq!(ids, (0..expected[who]).collect::<Vec<_>>());
            }
        }

        #[test]
        fn prop_stake_unstake_conservation(
            ops in proptest::collection::vec((any::<bool>(), 0u128..1_000), 1..60)
        ) {
            let (mut ledger, _) = setup();
            let holder = acct("user1");
            approve(&mut ledger, "user1", Amount::MAX);
            let mut expected: Amount = 0;
            for (is_stake, amount) in ops {
                if is_stake {
                    match ledger.stake(&holder, amount) {
                        Ok(()) => expected += amount,
                        Err(err) => prop_assert_eq!(err, LedgerError::InvalidAmount),
                    }
                } else {
                    match ledger.unstake(&holder, &holder, amount) {
                        Ok(()) => expected -= amount,
                        Err(err) => {
                            prop_assert!(amount > expected);
                            let insufficient = matches!(err, LedgerError::InsufficientBalance { .. });
                            prop_assert!(insufficient);
                        }
                    }
                }
                prop_assert_eq!(ledger.balance_of(&holder), expected);
            }
            prop_assert_eq!(ledger.total_staked(), expected);
            prop_assert_eq!(
                ledger.asset().balance_of(&holder) + expected,
                1_000 * E18
            );
        }

        #[test]
        fn prop_claims_never_exceed_principal(
            amount in 1u128..=(1_000 * E18),
            duration in 1u64..=(400 * DAY),
            steps in proptest::collection::vec(0u64..=(60 * DAY), 1..12),
            panic_at in proptest::option::of(0usize..12),
        ) {
            let (mut ledger, clock) = setup();
            ledger.set_admin(&acct("owner"), &acct("admin")).unwrap();
            approve(&mut ledger, "user1", amount);
            let id = ledger.lock(&acct("user1"), duration, amount).unwrap();
            let mut released: Amount = 0;
            let mut elapsed = 0u64;
            for (i, step) in steps.iter().enumerate() {
                if panic_at == Some(i) {
                    ledger.panic(&acct("admin")).unwrap();
                }
                clock.advance(*step);
                elapsed += step;
                released += ledger.claim(&acct("user1"), id).unwrap();
                let expected = if ledger.is_panicked() {
                    amount
                } else {
                    crate::vesting::vested_amount(amount, elapsed, duration)
                };
                prop_assert_eq!(released, expected);
                prop_assert!(released <= amount);
            }
        }
    }
}
