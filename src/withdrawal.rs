//! Withdrawal admission and settlement.
//!
//! A request only checks the balance; the money leaves `available_balance`
//! when the request is completed. Rejecting a request touches no balance.

use rust_decimal::Decimal;
use tracing::info;

use crate::commission::MONEY_SCALE;
use crate::error::{NetworkError, Result};
use crate::store::StoreTx;
use crate::types::{UserId, Withdrawal, WithdrawalStatus};

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(NetworkError::InvalidAmount("amount must be > 0".into()));
    }
    if amount.round_dp(MONEY_SCALE) != amount {
        return Err(NetworkError::InvalidAmount(format!(
            "amount has more than {MONEY_SCALE} decimal places"
        )));
    }
    Ok(())
}

/// Records a pending withdrawal if `amount` is covered by the user's
/// available balance. Nothing is written otherwise.
pub async fn request_withdrawal<T: StoreTx>(
    tx: &mut T,
    user_id: UserId,
    amount: Decimal,
) -> Result<Withdrawal> {
    validate_amount(amount)?;
    let user = tx
        .lock_user(user_id)
        .await?
        .ok_or(NetworkError::UserNotFound(user_id))?;

    if amount > user.available_balance {
        return Err(NetworkError::InsufficientBalance {
            requested: amount,
            available: user.available_balance,
        });
    }

    let withdrawal = tx.insert_withdrawal(user_id, amount).await?;
    info!(withdrawal_id = withdrawal.id, user_id, %amount, "withdrawal requested");
    Ok(withdrawal)
}

async fn pending<T: StoreTx>(tx: &mut T, id: i64, to: WithdrawalStatus) -> Result<Withdrawal> {
    let withdrawal = tx
        .lock_withdrawal(id)
        .await?
        .ok_or(NetworkError::WithdrawalNotFound(id))?;
    if withdrawal.status != WithdrawalStatus::Pending {
        return Err(NetworkError::InvalidTransition {
            id,
            from: withdrawal.status,
            to,
        });
    }
    Ok(withdrawal)
}

/// Marks a pending withdrawal completed and debits the available balance.
pub async fn complete_withdrawal<T: StoreTx>(tx: &mut T, id: i64) -> Result<Withdrawal> {
    let mut withdrawal = pending(tx, id, WithdrawalStatus::Completed).await?;
    let user = tx
        .lock_user(withdrawal.user_id)
        .await?
        .ok_or(NetworkError::UserNotFound(withdrawal.user_id))?;

    if withdrawal.amount > user.available_balance {
        return Err(NetworkError::InsufficientBalance {
            requested: withdrawal.amount,
            available: user.available_balance,
        });
    }

    tx.debit_available(user.id, withdrawal.amount).await?;
    tx.set_withdrawal_status(id, WithdrawalStatus::Completed)
        .await?;
    withdrawal.status = WithdrawalStatus::Completed;
    info!(withdrawal_id = id, user_id = user.id, amount = %withdrawal.amount, "withdrawal completed");
    Ok(withdrawal)
}

pub async fn reject_withdrawal<T: StoreTx>(tx: &mut T, id: i64) -> Result<Withdrawal> {
    let mut withdrawal = pending(tx, id, WithdrawalStatus::Rejected).await?;
    tx.set_withdrawal_status(id, WithdrawalStatus::Rejected)
        .await?;
    withdrawal.status = WithdrawalStatus::Rejected;
    info!(withdrawal_id = id, user_id = withdrawal.user_id, "withdrawal rejected");
    Ok(withdrawal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{register, tests::registration};
    use crate::store::{MemoryStore, Store};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn funded_user(tx: &mut impl StoreTx, balance: &str) -> UserId {
        let user = register(tx, &registration("saver", None)).await.unwrap();
        tx.credit(user.id, dec(balance)).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn request_within_balance_is_pending() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "12.00").await;

        let w = request_withdrawal(&mut tx, user, dec("12.00")).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Pending);
        assert_eq!(w.amount, dec("12.00"));

        let user = tx.user(user).await.unwrap().unwrap();
        assert_eq!(user.available_balance, dec("12.00"));
    }

    #[tokio::test]
    async fn request_over_balance_creates_nothing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "12.00").await;

        let err = request_withdrawal(&mut tx, user, dec("12.01")).await.unwrap_err();
        assert!(matches!(err, NetworkError::InsufficientBalance { .. }));
        assert!(tx.withdrawals_of(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_amounts_are_refused() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "5.00").await;

        for amount in ["0", "-1", "1.001"] {
            assert!(matches!(
                request_withdrawal(&mut tx, user, dec(amount)).await,
                Err(NetworkError::InvalidAmount(_))
            ));
        }
    }

    #[tokio::test]
    async fn completion_debits_available_balance_only() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "10.00").await;
        let w = request_withdrawal(&mut tx, user, dec("4.00")).await.unwrap();

        let done = complete_withdrawal(&mut tx, w.id).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);

        let user = tx.user(user).await.unwrap().unwrap();
        assert_eq!(user.available_balance, dec("6.00"));
        assert_eq!(user.total_earnings, dec("10.00"));
    }

    #[tokio::test]
    async fn completion_fails_when_balance_was_drawn_down() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "10.00").await;
        let first = request_withdrawal(&mut tx, user, dec("8.00")).await.unwrap();
        let second = request_withdrawal(&mut tx, user, dec("8.00")).await.unwrap();

        complete_withdrawal(&mut tx, first.id).await.unwrap();
        assert!(matches!(
            complete_withdrawal(&mut tx, second.id).await,
            Err(NetworkError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn settled_withdrawals_cannot_move_again() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = funded_user(&mut tx, "10.00").await;
        let w = request_withdrawal(&mut tx, user, dec("1.00")).await.unwrap();

        reject_withdrawal(&mut tx, w.id).await.unwrap();
        assert!(matches!(
            complete_withdrawal(&mut tx, w.id).await,
            Err(NetworkError::InvalidTransition {
                from: WithdrawalStatus::Rejected,
                ..
            })
        ));

        let user = tx.user(user).await.unwrap().unwrap();
        assert_eq!(user.available_balance, dec("10.00"));
    }
}
