use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{GraphLock, Store, StoreError, StoreResult, StoreTx};
use crate::types::{
    Earning, NewEarning, NewPackage, NewUser, Package, Purchase, User, UserId, Withdrawal,
    WithdrawalStatus,
};

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    packages: BTreeMap<i64, Package>,
    purchases: BTreeMap<i64, Purchase>,
    earnings: BTreeMap<i64, Earning>,
    withdrawals: BTreeMap<i64, Withdrawal>,
    next_id: i64,
    failing_credits: HashSet<UserId>,
    locked_users: Vec<UserId>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store. Transactions are fully serialized: each one holds the
/// state lock, works on a copy, and publishes it on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later credit to `user_id` fail, as if the backend went away
    /// in the middle of a transaction.
    pub async fn fail_credits_to(&self, user_id: UserId) {
        self.state.lock().await.failing_credits.insert(user_id);
    }

    /// Drains the user ids passed to `lock_user` and `lock_sponsored_users` by
    /// committed transactions, in the order they were locked.
    pub async fn take_locked_users(&self) -> Vec<UserId> {
        std::mem::take(&mut self.state.lock().await.locked_users)
    }

    /// Overwrites a sponsor link without any validation. Only useful to build
    /// corrupted graphs.
    pub async fn force_sponsor(&self, id: UserId, sponsor_id: Option<UserId>) {
        if let Some(user) = self.state.lock().await.users.get_mut(&id) {
            user.sponsor_id = sponsor_id;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx { guard, work })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

impl MemoryTx {
    fn user_mut(&mut self, id: UserId) -> StoreResult<&mut User> {
        self.work
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(anyhow!("user {id} does not exist")))
    }

    fn children(&self, sponsor_id: UserId) -> Vec<User> {
        self.work
            .users
            .values()
            .filter(|u| u.sponsor_id == Some(sponsor_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    // Transactions already run one at a time.
    async fn lock_graph(&mut self, _mode: GraphLock) -> StoreResult<()> {
        Ok(())
    }

    async fn count_users(&mut self) -> StoreResult<i64> {
        Ok(self.work.users.len() as i64)
    }

    async fn user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn lock_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.work.locked_users.push(id);
        self.user(id).await
    }

    async fn user_by_address(&mut self, address: &str) -> StoreResult<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .find(|u| u.answers_to(address))
            .cloned())
    }

    async fn sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>> {
        Ok(self.children(sponsor_id))
    }

    async fn lock_sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>> {
        let children = self.children(sponsor_id);
        self.work.locked_users.extend(children.iter().map(|u| u.id));
        Ok(children)
    }

    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        let taken = self.work.users.values().any(|u| {
            u.email == user.email
                || (user.wallet_address.is_some() && u.wallet_address == user.wallet_address)
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "user with email {} or its wallet already exists",
                user.email
            )));
        }

        let id = self.work.next_id();
        let row = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            wallet_address: user.wallet_address.clone(),
            sponsor_id: None,
            level: 0,
            total_earnings: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            created_at: Utc::now(),
        };
        self.work.users.insert(id, row.clone());
        Ok(row)
    }

    async fn set_sponsor(
        &mut self,
        id: UserId,
        sponsor_id: Option<UserId>,
        level: i32,
    ) -> StoreResult<()> {
        let user = self.user_mut(id)?;
        user.sponsor_id = sponsor_id;
        user.level = level;
        Ok(())
    }

    async fn set_level(&mut self, id: UserId, level: i32) -> StoreResult<()> {
        self.user_mut(id)?.level = level;
        Ok(())
    }

    async fn credit(&mut self, id: UserId, amount: Decimal) -> StoreResult<()> {
        if self.work.failing_credits.contains(&id) {
            return Err(StoreError::Backend(anyhow!("store unavailable")));
        }
        let user = self.user_mut(id)?;
        user.total_earnings += amount;
        user.available_balance += amount;
        Ok(())
    }

    async fn debit_available(&mut self, id: UserId, amount: Decimal) -> StoreResult<()> {
        let user = self.user_mut(id)?;
        if user.available_balance < amount {
            return Err(StoreError::Backend(anyhow!(
                "available balance of user {id} would go negative"
            )));
        }
        user.available_balance -= amount;
        Ok(())
    }

    async fn insert_package(&mut self, package: &NewPackage) -> StoreResult<Package> {
        let id = self.work.next_id();
        let row = Package {
            id,
            name: package.name.clone(),
            price: package.price,
            profit_percentage: package.profit_percentage,
        };
        self.work.packages.insert(id, row.clone());
        Ok(row)
    }

    async fn package(&mut self, id: i64) -> StoreResult<Option<Package>> {
        Ok(self.work.packages.get(&id).cloned())
    }

    async fn packages(&mut self) -> StoreResult<Vec<Package>> {
        Ok(self.work.packages.values().cloned().collect())
    }

    async fn insert_purchase(&mut self, user_id: UserId, package_id: i64) -> StoreResult<Purchase> {
        let id = self.work.next_id();
        let row = Purchase {
            id,
            user_id,
            package_id,
            created_at: Utc::now(),
        };
        self.work.purchases.insert(id, row.clone());
        Ok(row)
    }

    async fn purchases_of(&mut self, user_id: UserId) -> StoreResult<Vec<Purchase>> {
        Ok(self
            .work
            .purchases
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_earning(&mut self, earning: &NewEarning) -> StoreResult<Option<Earning>> {
        let duplicate = self.work.earnings.values().any(|e| {
            e.purchase_id == earning.purchase_id
                && e.user_id == earning.user_id
                && e.tier == earning.tier
        });
        if duplicate {
            return Ok(None);
        }

        let id = self.work.next_id();
        let row = Earning {
            id,
            user_id: earning.user_id,
            purchase_id: earning.purchase_id,
            tier: earning.tier,
            amount: earning.amount,
            description: earning.description.clone(),
            created_at: Utc::now(),
        };
        self.work.earnings.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn earnings_of(&mut self, user_id: UserId) -> StoreResult<Vec<Earning>> {
        Ok(self
            .work
            .earnings
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_withdrawal(
        &mut self,
        user_id: UserId,
        amount: Decimal,
    ) -> StoreResult<Withdrawal> {
        let id = self.work.next_id();
        let row = Withdrawal {
            id,
            user_id,
            amount,
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
        };
        self.work.withdrawals.insert(id, row.clone());
        Ok(row)
    }

    async fn lock_withdrawal(&mut self, id: i64) -> StoreResult<Option<Withdrawal>> {
        Ok(self.work.withdrawals.get(&id).cloned())
    }

    async fn set_withdrawal_status(
        &mut self,
        id: i64,
        status: WithdrawalStatus,
    ) -> StoreResult<()> {
        let withdrawal = self
            .work
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(anyhow!("withdrawal {id} does not exist")))?;
        withdrawal.status = status;
        Ok(())
    }

    async fn withdrawals_of(&mut self, user_id: UserId) -> StoreResult<Vec<Withdrawal>> {
        Ok(self
            .work
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn commit(mut self) -> StoreResult<()> {
        *self.guard = self.work;
        Ok(())
    }
}
