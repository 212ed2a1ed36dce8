use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a user in the sponsorship network.
pub type UserId = i64;

/// A member of the sponsorship network.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    /// The ID of the user.
    pub id: UserId,
    /// The display name of the user.
    pub username: String,
    /// The contact email, unique across the network.
    pub email: String,
    /// The wallet address, unique when present.
    pub wallet_address: Option<String>,
    /// The user who sponsored this one. Not owned; a back-reference only.
    pub sponsor_id: Option<UserId>,
    /// Depth in the sponsorship forest. Roots sit at level 0.
    pub level: i32,
    /// Everything ever credited to the user.
    pub total_earnings: Decimal,
    /// What the user may still withdraw.
    pub available_balance: Decimal,
    /// The timestamp when the user registered.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether `address` identifies this user, by email or wallet.
    pub fn answers_to(&self, address: &str) -> bool {
        self.email == address || self.wallet_address.as_deref() == Some(address)
    }
}

/// The fields needed to insert a user. The sponsor is attached afterwards.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub wallet_address: Option<String>,
}

/// A priced package users can buy.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Package {
    /// The ID of the package.
    pub id: i64,
    /// The name of the package.
    pub name: String,
    /// The price, always positive.
    pub price: Decimal,
    /// Share of the price, in percent, that forms the commission pool.
    pub profit_percentage: Decimal,
}

impl Package {
    /// The commission pool generated by one sale of this package, or `None`
    /// if it does not fit in a `Decimal`.
    pub fn profit(&self) -> Option<Decimal> {
        self.price
            .checked_mul(self.profit_percentage)?
            .checked_div(Decimal::ONE_HUNDRED)
    }
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub name: String,
    pub price: Decimal,
    pub profit_percentage: Decimal,
}

/// A purchase of a package by a user.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Purchase {
    pub id: i64,
    /// The buyer.
    pub user_id: UserId,
    pub package_id: i64,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of commission credited to a user.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Earning {
    /// The ID of the earning.
    pub id: i64,
    /// The recipient.
    pub user_id: UserId,
    /// The purchase that generated it.
    pub purchase_id: i64,
    /// 1 for the sponsor, 2 for the grand-sponsor.
    pub tier: i32,
    /// The credited amount, always positive.
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEarning {
    pub user_id: UserId,
    pub purchase_id: i64,
    pub tier: i32,
    pub amount: Decimal,
    pub description: String,
}

/// The lifecycle state of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "completed" => Ok(WithdrawalStatus::Completed),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(format!("unknown withdrawal status: {other}")),
        }
    }
}

/// A request to withdraw part of the available balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    /// The ID of the withdrawal.
    pub id: i64,
    /// The requesting user.
    pub user_id: UserId,
    /// The requested amount.
    pub amount: Decimal,
    /// Where the request is in its lifecycle.
    pub status: WithdrawalStatus,
    /// The timestamp when the request was made.
    pub created_at: DateTime<Utc>,
}

/// The public view of a user inside someone else's team.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMember {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub level: i32,
    pub total_earnings: Decimal,
    /// Distance below the queried root, 1 for direct sponsees.
    pub depth: u32,
}

impl TeamMember {
    pub fn new(user: User, depth: u32) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            level: user.level,
            total_earnings: user.total_earnings,
            depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_profit_keeps_decimal_precision() {
        let package = Package {
            id: 1,
            name: "Starter".into(),
            price: Decimal::new(10000, 2),
            profit_percentage: Decimal::new(4000, 2),
        };
        assert_eq!(package.profit(), Some(Decimal::new(40, 0)));
    }

    #[test]
    fn package_profit_overflow_is_none() {
        let package = Package {
            id: 1,
            name: "Huge".into(),
            price: Decimal::MAX,
            profit_percentage: Decimal::new(4000, 2),
        };
        assert_eq!(package.profit(), None);
    }

    #[test]
    fn withdrawal_status_parses_its_own_names() {
        for status in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Completed,
            WithdrawalStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<WithdrawalStatus>(), Ok(status));
        }
        assert!("paid".parse::<WithdrawalStatus>().is_err());
    }
}
