//! A multi-level sponsorship network: users sponsor users, purchases pay
//! tiered commissions up the sponsor chain, and balances accrue for
//! withdrawal.

mod api;
mod commission;
mod config;
mod error;
mod graph;
mod responses;
mod service;
mod store;
mod team;
mod types;
mod withdrawal;

use anyhow::Context;
use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub use api::{AppState, init_router};
pub use commission::{CommissionRates, Distribution, MONEY_SCALE, distribute};
pub use crate::config::Config;
pub use error::NetworkError;
pub use graph::{
    Attachment, Registration, SponsorRejection, attach, cascade_levels, is_ancestor,
    reassign_sponsor, register,
};
pub use service::{DEFAULT_TEAM_DEPTH, MAX_PRICE, Network};
pub use store::{GraphLock, MemoryStore, PgStore, Store, StoreError, StoreResult, StoreTx};
pub use team::get_team;
pub use types::{
    Earning, NewEarning, NewPackage, NewUser, Package, Purchase, TeamMember, User, UserId,
    Withdrawal, WithdrawalStatus,
};
pub use withdrawal::{complete_withdrawal, reject_withdrawal, request_withdrawal};

/// Initializes the database pool and brings the schema up to date.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

/// Builds the network on top of Postgres with the configured rates.
pub fn init_network(pool: PgPool, config: &Config) -> Result<Network<PgStore>> {
    let rates = config
        .commission_rates()
        .context("Invalid commission rates")?;
    Ok(Network::new(PgStore::new(pool))
        .with_rates(rates)
        .with_team_depth(config.team_depth))
}
