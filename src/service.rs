use rust_decimal::Decimal;
use tracing::info;

use crate::commission::{self, CommissionRates, Distribution, MONEY_SCALE};
use crate::error::{NetworkError, Result};
use crate::graph::{self, Attachment, Registration};
use crate::store::{GraphLock, Store, StoreTx};
use crate::team;
use crate::types::{
    Earning, NewPackage, Package, Purchase, TeamMember, User, UserId, Withdrawal,
};
use crate::withdrawal;

/// Depth of the team listing when the caller gives none.
pub const DEFAULT_TEAM_DEPTH: u32 = 2;

/// Largest price a `NUMERIC(12, 2)` column holds.
pub const MAX_PRICE: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// The sponsorship network. Every method runs in its own store transaction
/// and commits only on success.
pub struct Network<S> {
    store: S,
    rates: CommissionRates,
    team_depth: u32,
}

impl<S: Store> Network<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            rates: CommissionRates::default(),
            team_depth: DEFAULT_TEAM_DEPTH,
        }
    }

    pub fn with_rates(mut self, rates: CommissionRates) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_team_depth(mut self, depth: u32) -> Self {
        self.team_depth = depth;
        self
    }

    pub fn rates(&self) -> &CommissionRates {
        &self.rates
    }

    pub fn team_depth(&self) -> u32 {
        self.team_depth
    }

    pub async fn register(&self, registration: &Registration) -> Result<User> {
        let mut tx = self.store.begin().await?;
        let user = graph::register(&mut tx, registration).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn reassign_sponsor(
        &self,
        user_id: UserId,
        sponsor_id: Option<UserId>,
    ) -> Result<Attachment> {
        let mut tx = self.store.begin().await?;
        let attachment = graph::reassign_sponsor(&mut tx, user_id, sponsor_id).await?;
        tx.commit().await?;
        Ok(attachment)
    }

    pub async fn user(&self, id: UserId) -> Result<User> {
        let mut tx = self.store.begin().await?;
        tx.user(id).await?.ok_or(NetworkError::UserNotFound(id))
    }

    pub async fn team(&self, root: UserId, max_depth: Option<u32>) -> Result<Vec<TeamMember>> {
        let mut tx = self.store.begin().await?;
        team::get_team(&mut tx, root, max_depth.unwrap_or(self.team_depth)).await
    }

    pub async fn create_package(&self, package: NewPackage) -> Result<Package> {
        let name = package.name.trim().to_string();
        if name.is_empty() {
            return Err(NetworkError::InvalidPackage("name is required".into()));
        }
        if package.price <= Decimal::ZERO {
            return Err(NetworkError::InvalidPackage("price must be > 0".into()));
        }
        if package.price > MAX_PRICE || package.price.normalize().scale() > MONEY_SCALE {
            return Err(NetworkError::InvalidPackage(format!(
                "price must have at most {MONEY_SCALE} decimal places and not exceed {MAX_PRICE}"
            )));
        }
        if package.profit_percentage < Decimal::ZERO
            || package.profit_percentage > Decimal::ONE_HUNDRED
            || package.profit_percentage.normalize().scale() > MONEY_SCALE
        {
            return Err(NetworkError::InvalidPackage(
                "profit_percentage must be within [0, 100] with at most 2 decimal places".into(),
            ));
        }

        let package = NewPackage { name, ..package };
        let mut tx = self.store.begin().await?;
        let package = tx.insert_package(&package).await?;
        tx.commit().await?;
        info!(package_id = package.id, name = %package.name, "package created");
        Ok(package)
    }

    pub async fn packages(&self) -> Result<Vec<Package>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.packages().await?)
    }

    /// Records a purchase and distributes its commission in one transaction.
    pub async fn purchase(&self, user_id: UserId, package_id: i64) -> Result<Distribution> {
        let mut tx = self.store.begin().await?;
        tx.lock_graph(GraphLock::Shared).await?;
        if tx.user(user_id).await?.is_none() {
            return Err(NetworkError::UserNotFound(user_id));
        }
        if tx.package(package_id).await?.is_none() {
            return Err(NetworkError::PackageNotFound(package_id));
        }

        let purchase = tx.insert_purchase(user_id, package_id).await?;
        let distribution = commission::distribute(&mut tx, &self.rates, &purchase).await?;
        tx.commit().await?;

        info!(
            purchase_id = purchase.id,
            user_id,
            package_id,
            paid = %distribution.total_paid(),
            "purchase recorded"
        );
        Ok(distribution)
    }

    pub async fn purchases(&self, user_id: UserId) -> Result<Vec<Purchase>> {
        let mut tx = self.existing(user_id).await?;
        Ok(tx.purchases_of(user_id).await?)
    }

    pub async fn earnings(&self, user_id: UserId) -> Result<Vec<Earning>> {
        let mut tx = self.existing(user_id).await?;
        Ok(tx.earnings_of(user_id).await?)
    }

    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let mut tx = self.existing(user_id).await?;
        Ok(tx.withdrawals_of(user_id).await?)
    }

    pub async fn request_withdrawal(&self, user_id: UserId, amount: Decimal) -> Result<Withdrawal> {
        let mut tx = self.store.begin().await?;
        let withdrawal = withdrawal::request_withdrawal(&mut tx, user_id, amount).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    pub async fn complete_withdrawal(&self, id: i64) -> Result<Withdrawal> {
        let mut tx = self.store.begin().await?;
        let withdrawal = withdrawal::complete_withdrawal(&mut tx, id).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    pub async fn reject_withdrawal(&self, id: i64) -> Result<Withdrawal> {
        let mut tx = self.store.begin().await?;
        let withdrawal = withdrawal::reject_withdrawal(&mut tx, id).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn existing(&self, user_id: UserId) -> Result<S::Tx> {
        let mut tx = self.store.begin().await?;
        if tx.user(user_id).await?.is_none() {
            return Err(NetworkError::UserNotFound(user_id));
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::tests::registration;
    use crate::store::MemoryStore;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn gold(network: &Network<MemoryStore>) -> Package {
        network
            .create_package(NewPackage {
                name: "Gold".into(),
                price: dec("100.00"),
                profit_percentage: dec("40.00"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn purchase_pays_sponsor_and_grand_sponsor() {
        let network = Network::new(MemoryStore::new());
        let grand = network.register(&registration("grand", None)).await.unwrap();
        let sponsor = network
            .register(&registration("sponsor", Some("grand@example.com")))
            .await
            .unwrap();
        let buyer = network
            .register(&registration("buyer", Some("sponsor@example.com")))
            .await
            .unwrap();
        let gold = gold(&network).await;

        let dist = network.purchase(buyer.id, gold.id).await.unwrap();
        assert_eq!(dist.earnings.len(), 2);

        assert_eq!(network.user(sponsor.id).await.unwrap().total_earnings, dec("12.00"));
        assert_eq!(network.user(grand.id).await.unwrap().available_balance, dec("4.00"));
        assert_eq!(network.purchases(buyer.id).await.unwrap().len(), 1);
        assert_eq!(network.earnings(grand.id).await.unwrap()[0].amount, dec("4.00"));
    }

    #[tokio::test]
    async fn failed_distribution_rolls_everything_back() {
        let store = MemoryStore::new();
        let network = Network::new(store.clone());
        let grand = network.register(&registration("grand", None)).await.unwrap();
        let sponsor = network
            .register(&registration("sponsor", Some("grand@example.com")))
            .await
            .unwrap();
        let buyer = network
            .register(&registration("buyer", Some("sponsor@example.com")))
            .await
            .unwrap();
        let gold = gold(&network).await;

        store.fail_credits_to(grand.id).await;
        let err = network.purchase(buyer.id, gold.id).await.unwrap_err();
        assert!(matches!(err, NetworkError::Store(_)));

        let sponsor_after = network.user(sponsor.id).await.unwrap();
        assert!(sponsor_after.total_earnings.is_zero());
        assert!(sponsor_after.available_balance.is_zero());
        assert!(network.earnings(sponsor.id).await.unwrap().is_empty());
        assert!(network.purchases(buyer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_purchases_credit_a_shared_sponsor_fully() {
        let network = Arc::new(Network::new(MemoryStore::new()));
        let sponsor = network.register(&registration("sponsor", None)).await.unwrap();
        let mut buyers = Vec::new();
        for i in 0..8 {
            let buyer = network
                .register(&registration(&format!("buyer{i}"), Some("sponsor@example.com")))
                .await
                .unwrap();
            buyers.push(buyer.id);
        }
        let package_id = gold(&network).await.id;

        let handles: Vec<_> = buyers
            .into_iter()
            .map(|buyer| {
                let network = network.clone();
                tokio::spawn(async move { network.purchase(buyer, package_id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let sponsor = network.user(sponsor.id).await.unwrap();
        assert_eq!(sponsor.total_earnings, dec("96.00"));
        assert_eq!(sponsor.available_balance, dec("96.00"));
        assert_eq!(network.earnings(sponsor.id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn purchase_of_unknown_package_writes_nothing() {
        let network = Network::new(MemoryStore::new());
        let buyer = network.register(&registration("buyer", None)).await.unwrap();

        assert!(matches!(
            network.purchase(buyer.id, 77).await,
            Err(NetworkError::PackageNotFound(77))
        ));
        assert!(network.purchases(buyer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn package_validation() {
        let network = Network::new(MemoryStore::new());
        for (price, pct) in [
            ("0", "10"),
            ("-5", "10"),
            ("10", "100.01"),
            ("10", "-1"),
            ("10.001", "10"),
            ("10", "10.125"),
            ("10000000000.00", "10"),
            ("79228162514264337593543950335", "40"),
        ] {
            let res = network
                .create_package(NewPackage {
                    name: "Bad".into(),
                    price: dec(price),
                    profit_percentage: dec(pct),
                })
                .await;
            assert!(matches!(res, Err(NetworkError::InvalidPackage(_))));
        }
        assert!(network.packages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn largest_storable_price_is_accepted_and_distributes() {
        let network = Network::new(MemoryStore::new());
        let sponsor = network.register(&registration("sponsor", None)).await.unwrap();
        let buyer = network
            .register(&registration("buyer", Some("sponsor@example.com")))
            .await
            .unwrap();
        let top = network
            .create_package(NewPackage {
                name: "Top".into(),
                price: dec("9999999999.99"),
                profit_percentage: dec("100"),
            })
            .await
            .unwrap();
        assert_eq!(MAX_PRICE, dec("9999999999.99"));
        assert_eq!(top.price, MAX_PRICE);

        network.purchase(buyer.id, top.id).await.unwrap();
        assert_eq!(network.user(sponsor.id).await.unwrap().total_earnings, dec("3000000000.00"));
    }

    #[tokio::test]
    async fn custom_rates_are_applied() {
        let rates = CommissionRates::new(dec("0.5"), dec("0.25")).unwrap();
        let network = Network::new(MemoryStore::new()).with_rates(rates);
        let sponsor = network.register(&registration("sponsor", None)).await.unwrap();
        let buyer = network
            .register(&registration("buyer", Some("sponsor@example.com")))
            .await
            .unwrap();
        let gold = gold(&network).await;

        network.purchase(buyer.id, gold.id).await.unwrap();
        assert_eq!(network.user(sponsor.id).await.unwrap().total_earnings, dec("20.00"));
    }

    #[tokio::test]
    async fn withdrawal_lifecycle() {
        let network = Network::new(MemoryStore::new());
        let sponsor = network.register(&registration("sponsor", None)).await.unwrap();
        let buyer = network
            .register(&registration("buyer", Some("sponsor@example.com")))
            .await
            .unwrap();
        let gold = gold(&network).await;
        network.purchase(buyer.id, gold.id).await.unwrap();

        assert!(matches!(
            network.request_withdrawal(sponsor.id, dec("12.50")).await,
            Err(NetworkError::InsufficientBalance { .. })
        ));
        assert!(network.withdrawals(sponsor.id).await.unwrap().is_empty());

        let w = network.request_withdrawal(sponsor.id, dec("10.00")).await.unwrap();
        network.complete_withdrawal(w.id).await.unwrap();
        let sponsor = network.user(sponsor.id).await.unwrap();
        assert_eq!(sponsor.available_balance, dec("2.00"));
        assert_eq!(sponsor.total_earnings, dec("12.00"));
    }

    #[tokio::test]
    async fn team_uses_configured_depth() {
        let network = Network::new(MemoryStore::new()).with_team_depth(1);
        let root = network.register(&registration("root", None)).await.unwrap();
        network
            .register(&registration("a", Some("root@example.com")))
            .await
            .unwrap();
        network
            .register(&registration("b", Some("a@example.com")))
            .await
            .unwrap();

        assert_eq!(network.team(root.id, None).await.unwrap().len(), 1);
        assert_eq!(network.team(root.id, Some(2)).await.unwrap().len(), 2);
    }
}
