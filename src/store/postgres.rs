use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use super::{GraphLock, Store, StoreError, StoreResult, StoreTx};
use crate::types::{
    Earning, NewEarning, NewPackage, NewUser, Package, Purchase, User, UserId, Withdrawal,
    WithdrawalStatus,
};

const USER_COLUMNS: &str = "id, username, email, wallet_address, sponsor_id, level, \
     total_earnings, available_balance, created_at";

/// Advisory lock key guarding the sponsor graph.
const GRAPH_LOCK_KEY: i64 = 0x5350_4f4e_534f_52;

/// Store backed by Postgres. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> StoreResult<PgTx> {
        Ok(PgTx(self.pool.begin().await?))
    }
}

pub struct PgTx(Transaction<'static, Postgres>);

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    id: i64,
    user_id: UserId,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = StoreError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        Ok(Withdrawal {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            created_at: row.created_at,
        })
    }
}

impl PgTx {
    async fn fetch_user(&mut self, id: UserId, lock: bool) -> StoreResult<Option<User>> {
        let mut sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        if lock {
            sql.push_str(" FOR NO KEY UPDATE");
        }
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(self.0.as_mut())
            .await?;
        Ok(user)
    }

    async fn fetch_children(&mut self, sponsor_id: UserId, lock: bool) -> StoreResult<Vec<User>> {
        let mut sql = format!("SELECT {USER_COLUMNS} FROM users WHERE sponsor_id = $1 ORDER BY id");
        if lock {
            sql.push_str(" FOR NO KEY UPDATE");
        }
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(sponsor_id)
            .fetch_all(self.0.as_mut())
            .await?;
        Ok(users)
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_graph(&mut self, mode: GraphLock) -> StoreResult<()> {
        let sql = match mode {
            GraphLock::Shared => "SELECT pg_advisory_xact_lock_shared($1)",
            GraphLock::Exclusive => "SELECT pg_advisory_xact_lock($1)",
        };
        sqlx::query(sql)
            .bind(GRAPH_LOCK_KEY)
            .execute(self.0.as_mut())
            .await?;
        Ok(())
    }

    async fn count_users(&mut self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.0.as_mut())
            .await?;
        Ok(count)
    }

    async fn user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.fetch_user(id, false).await
    }

    async fn lock_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.fetch_user(id, true).await
    }

    async fn user_by_address(&mut self, address: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR wallet_address = $1 \
             ORDER BY id LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(address)
            .fetch_optional(self.0.as_mut())
            .await?;
        Ok(user)
    }

    async fn sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>> {
        self.fetch_children(sponsor_id, false).await
    }

    async fn lock_sponsored_users(&mut self, sponsor_id: UserId) -> StoreResult<Vec<User>> {
        self.fetch_children(sponsor_id, true).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (username, email, wallet_address) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.wallet_address)
            .fetch_one(self.0.as_mut())
            .await?;
        Ok(row)
    }

    async fn set_sponsor(
        &mut self,
        id: UserId,
        sponsor_id: Option<UserId>,
        level: i32,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE users SET sponsor_id = $2, level = $3 WHERE id = $1")
            .bind(id)
            .bind(sponsor_id)
            .bind(level)
            .execute(self.0.as_mut())
            .await?;
        Ok(())
    }

    async fn set_level(&mut self, id: UserId, level: i32) -> StoreResult<()> {
        sqlx::query("UPDATE users SET level = $2 WHERE id = $1")
            .bind(id)
            .bind(level)
            .execute(self.0.as_mut())
            .await?;
        Ok(())
    }

    async fn credit(&mut self, id: UserId, amount: Decimal) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE users SET total_earnings = total_earnings + $2,
                 available_balance = available_balance + $2 WHERE id = $1"#,
        )
        .bind(id)
        .bind(amount)
        .execute(self.0.as_mut())
        .await?;
        Ok(())
    }

    async fn debit_available(&mut self, id: UserId, amount: Decimal) -> StoreResult<()> {
        let res = sqlx::query(
            r#"UPDATE users SET available_balance = available_balance - $2
                 WHERE id = $1 AND available_balance >= $2"#,
        )
        .bind(id)
        .bind(amount)
        .execute(self.0.as_mut())
        .await?;
        if res.rows_affected() != 1 {
            return Err(StoreError::Backend(anyhow!(
                "available balance of user {id} would go negative"
            )));
        }
        Ok(())
    }

    async fn insert_package(&mut self, package: &NewPackage) -> StoreResult<Package> {
        let row = sqlx::query_as::<_, Package>(
            r#"INSERT INTO packages (name, price, profit_percentage) VALUES ($1, $2, $3)
               RETURNING id, name, price, profit_percentage"#,
        )
        .bind(&package.name)
        .bind(package.price)
        .bind(package.profit_percentage)
        .fetch_one(self.0.as_mut())
        .await?;
        Ok(row)
    }

    async fn package(&mut self, id: i64) -> StoreResult<Option<Package>> {
        let row = sqlx::query_as::<_, Package>(
            "SELECT id, name, price, profit_percentage FROM packages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.0.as_mut())
        .await?;
        Ok(row)
    }

    async fn packages(&mut self) -> StoreResult<Vec<Package>> {
        let rows = sqlx::query_as::<_, Package>(
            "SELECT id, name, price, profit_percentage FROM packages ORDER BY id",
        )
        .fetch_all(self.0.as_mut())
        .await?;
        Ok(rows)
    }

    async fn insert_purchase(&mut self, user_id: UserId, package_id: i64) -> StoreResult<Purchase> {
        let row = sqlx::query_as::<_, Purchase>(
            r#"INSERT INTO purchases (user_id, package_id) VALUES ($1, $2)
               RETURNING id, user_id, package_id, created_at"#,
        )
        .bind(user_id)
        .bind(package_id)
        .fetch_one(self.0.as_mut())
        .await?;
        Ok(row)
    }

    async fn purchases_of(&mut self, user_id: UserId) -> StoreResult<Vec<Purchase>> {
        let rows = sqlx::query_as::<_, Purchase>(
            "SELECT id, user_id, package_id, created_at FROM purchases WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.0.as_mut())
        .await?;
        Ok(rows)
    }

    async fn insert_earning(&mut self, earning: &NewEarning) -> StoreResult<Option<Earning>> {
        let row = sqlx::query_as::<_, Earning>(
            r#"INSERT INTO earnings (user_id, purchase_id, tier, amount, description)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (purchase_id, user_id, tier) DO NOTHING
               RETURNING id, user_id, purchase_id, tier, amount, description, created_at"#,
        )
        .bind(earning.user_id)
        .bind(earning.purchase_id)
        .bind(earning.tier)
        .bind(earning.amount)
        .bind(&earning.description)
        .fetch_optional(self.0.as_mut())
        .await?;
        Ok(row)
    }

    async fn earnings_of(&mut self, user_id: UserId) -> StoreResult<Vec<Earning>> {
        let rows = sqlx::query_as::<_, Earning>(
            r#"SELECT id, user_id, purchase_id, tier, amount, description, created_at
               FROM earnings WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(self.0.as_mut())
        .await?;
        Ok(rows)
    }

    async fn insert_withdrawal(
        &mut self,
        user_id: UserId,
        amount: Decimal,
    ) -> StoreResult<Withdrawal> {
        let row = sqlx::query_as::<_, WithdrawalRow>(
            r#"INSERT INTO withdrawals (user_id, amount, status) VALUES ($1, $2, $3)
               RETURNING id, user_id, amount, status, created_at"#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(WithdrawalStatus::Pending.as_str())
        .fetch_one(self.0.as_mut())
        .await?;
        row.try_into()
    }

    async fn lock_withdrawal(&mut self, id: i64) -> StoreResult<Option<Withdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT id, user_id, amount, status, created_at FROM withdrawals WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(self.0.as_mut())
        .await?;
        row.map(Withdrawal::try_from).transpose()
    }

    async fn set_withdrawal_status(
        &mut self,
        id: i64,
        status: WithdrawalStatus,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE withdrawals SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(self.0.as_mut())
            .await?;
        Ok(())
    }

    async fn withdrawals_of(&mut self, user_id: UserId) -> StoreResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"SELECT id, user_id, amount, status, created_at
               FROM withdrawals WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(self.0.as_mut())
        .await?;
        rows.into_iter().map(Withdrawal::try_from).collect()
    }

    async fn commit(self) -> StoreResult<()> {
        self.0.commit().await?;
        Ok(())
    }
}
