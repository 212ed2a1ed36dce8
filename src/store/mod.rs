//! Repository abstraction over users, packages, purchases, earnings and
//! withdrawals. Every read and write goes through a [`StoreTx`], which either
//! commits as a whole or is dropped and leaves no trace.

mod memory;
mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::types::{
    Earning, NewEarning, NewPackage, NewUser, Package, Purchase, User, UserId, Withdrawal,
    WithdrawalStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

// NOTE: 23505 = unique_violation
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Backend(e.into())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How [`StoreTx::lock_graph`] holds the sponsor graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphLock {
    /// Taken by work that reads sponsor chains and locks users along them.
    /// Shared holders run side by side.
    Shared,
    /// Taken by work that changes sponsor links or levels. Excludes every
    /// other holder, shared or exclusive.
    Exclusive,
}

/// A handle able to open transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction. Methods prefixed with `lock_` take locks that are
/// held until the transaction ends; dropping without `commit` rolls back.
///
/// Lock order: the graph lock first, then user rows from ancestors down to
/// descendants.
#[async_trait]
pub trait StoreTx: Send {
    /// Locks the sponsor graph as a whole. Taking it again in the same
    /// transaction is a no-op.
    async fn lock_graph(&mut self, mode: GraphLock) -> StoreResult<()>;
    async fn count_users(&mut self) -> StoreResult<i64>;
    async fn user(&mut self, id: UserId) -> StoreResult<Option<User>>;
    async fn lock_user(&mut self, id: UserId) -> StoreResult<Option<User>>;
    /// Finds the user whose email or wallet address equals `address`.
    async fn user_by_address(&mut self, address: &str) -> StoreResult<Option<User>>;
    async fn sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>>;
    async fn lock_sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>>;
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User>;
    async fn set_sponsor(
        &mut self,
        id: UserId,
        sponsor_id: Option<UserId>,
        level: i32,
    ) -> StoreResult<()>;
    async fn set_level(&mut self, id: UserId, level: i32) -> StoreResult<()>;
    /// Adds `amount` to both total earnings and available balance.
    async fn credit(&mut self, id: UserId, amount: Decimal) -> StoreResult<()>;
    async fn debit_available(&mut self, id: UserId, amount: Decimal) -> StoreResult<()>;

    async fn insert_package(&mut self, package: &NewPackage) -> StoreResult<Package>;
    async fn package(&mut self, id: i64) -> StoreResult<Option<Package>>;
    async fn packages(&mut self) -> StoreResult<Vec<Package>>;

    async fn insert_purchase(&mut self, user_id: UserId, package_id: i64) -> StoreResult<Purchase>;
    async fn purchases_of(&mut self, user_id: UserId) -> StoreResult<Vec<Purchase>>;

    /// Returns `None` when the same (purchase, user, tier) was already recorded.
    async fn insert_earning(&mut self, earning: &NewEarning) -> StoreResult<Option<Earning>>;
    async fn earnings_of(&mut self, user_id: UserId) -> StoreResult<Vec<Earning>>;

    async fn insert_withdrawal(
        &mut self,
        user_id: UserId,
        amount: Decimal,
    ) -> StoreResult<Withdrawal>;
    async fn lock_withdrawal(&mut self, id: i64) -> StoreResult<Option<Withdrawal>>;
    async fn set_withdrawal_status(&mut self, id: i64, status: WithdrawalStatus)
    -> StoreResult<()>;
    async fn withdrawals_of(&mut self, user_id: UserId) -> StoreResult<Vec<Withdrawal>>;

    async fn commit(self) -> StoreResult<()>;
}
