//! Tiered commissions paid up the sponsor chain on every purchase.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{NetworkError, Result};
use crate::store::{GraphLock, StoreTx};
use crate::types::{Earning, NewEarning, Purchase, UserId};

/// Money is stored with two decimal places.
pub const MONEY_SCALE: u32 = 2;

/// Share of a purchase's profit credited to each tier above the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    /// The buyer's sponsor.
    pub sponsor: Decimal,
    /// The sponsor's sponsor.
    pub grand_sponsor: Decimal,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            sponsor: Decimal::new(30, 2),
            grand_sponsor: Decimal::new(10, 2),
        }
    }
}

impl CommissionRates {
    pub fn new(sponsor: Decimal, grand_sponsor: Decimal) -> Result<Self> {
        for rate in [sponsor, grand_sponsor] {
            if rate.is_sign_negative() || rate > Decimal::ONE {
                return Err(NetworkError::InvalidRates(format!(
                    "{rate} is outside [0, 1]"
                )));
            }
        }
        if sponsor + grand_sponsor > Decimal::ONE {
            return Err(NetworkError::InvalidRates(
                "tiers pay out more than the whole profit".into(),
            ));
        }
        Ok(Self {
            sponsor,
            grand_sponsor,
        })
    }

    /// Rates ordered from the nearest tier outwards.
    pub fn tiers(&self) -> [Decimal; 2] {
        [self.sponsor, self.grand_sponsor]
    }
}

/// What one purchase paid out.
#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub purchase: Purchase,
    /// The commission pool, unrounded.
    pub profit: Decimal,
    pub earnings: Vec<Earning>,
}

impl Distribution {
    pub fn total_paid(&self) -> Decimal {
        self.earnings.iter().map(|e| e.amount).sum()
    }
}

/// Credits the purchase's sponsor and grand-sponsor.
///
/// Runs inside the caller's transaction: if any write fails the caller drops
/// the transaction and no tier is credited. Each (purchase, recipient, tier)
/// is credited at most once, so a repeated call pays nothing more.
///
/// The sponsor chain is held still with the shared graph lock, and recipient
/// rows are locked grand-sponsor first.
pub async fn distribute<T: StoreTx>(
    tx: &mut T,
    rates: &CommissionRates,
    purchase: &Purchase,
) -> Result<Distribution> {
    tx.lock_graph(GraphLock::Shared).await?;
    let package = tx
        .package(purchase.package_id)
        .await?
        .ok_or(NetworkError::PackageNotFound(purchase.package_id))?;
    let buyer = tx
        .user(purchase.user_id)
        .await?
        .ok_or(NetworkError::UserNotFound(purchase.user_id))?;

    let profit = package.profit().ok_or_else(|| {
        NetworkError::InvalidPackage(format!("profit of package {} overflows", package.id))
    })?;
    let description = format!(
        "Profit from {}'s purchase of {}",
        buyer.username, package.name
    );

    let tiers = rates.tiers();
    let recipients = recipients(tx, buyer.sponsor_id, tiers.len()).await?;
    for &recipient_id in recipients.iter().rev() {
        tx.lock_user(recipient_id)
            .await?
            .ok_or(NetworkError::UserNotFound(recipient_id))?;
    }

    let mut earnings = Vec::new();
    for (index, (rate, recipient_id)) in tiers.into_iter().zip(recipients).enumerate() {
        let amount = profit
            .checked_mul(rate)
            .ok_or_else(|| {
                NetworkError::InvalidPackage(format!("commission on package {} overflows", package.id))
            })?
            .round_dp(MONEY_SCALE);
        if amount <= Decimal::ZERO {
            debug!(purchase_id = purchase.id, recipient_id, "tier rounds to zero, skipped");
            continue;
        }

        let tier = index as i32 + 1;
        let earning = NewEarning {
            user_id: recipient_id,
            purchase_id: purchase.id,
            tier,
            amount,
            description: description.clone(),
        };
        if let Some(earning) = tx.insert_earning(&earning).await? {
            tx.credit(recipient_id, amount).await?;
            info!(purchase_id = purchase.id, recipient_id, tier, %amount, "commission credited");
            earnings.push(earning);
        }
    }

    Ok(Distribution {
        purchase: purchase.clone(),
        profit,
        earnings,
    })
}

/// Up to `tiers` users up the chain from `sponsor_id`, nearest first.
async fn recipients<T: StoreTx>(
    tx: &mut T,
    sponsor_id: Option<UserId>,
    tiers: usize,
) -> Result<Vec<UserId>> {
    let mut chain = Vec::with_capacity(tiers);
    let mut next = sponsor_id;
    while chain.len() < tiers {
        let Some(id) = next else {
            break;
        };
        let user = tx.user(id).await?.ok_or(NetworkError::UserNotFound(id))?;
        next = user.sponsor_id;
        chain.push(id);
    }
    Ok(chain)
}
