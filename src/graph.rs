//! The sponsorship forest: who sponsored whom, and how deep everyone sits.
//!
//! All walks are iterative with a visited set, so a corrupted sponsor chain
//! ends the walk instead of looping.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result};
use crate::store::{GraphLock, StoreError, StoreTx};
use crate::types::{NewUser, User, UserId};

/// Why a requested sponsor link was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorRejection {
    SelfSponsorship,
    CircularSponsorship,
}

/// The sponsor link actually persisted by [`attach`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub sponsor_id: Option<UserId>,
    pub level: i32,
    /// Set when the requested sponsor was refused and replaced by the prior one.
    pub rejected: Option<SponsorRejection>,
}

/// A registration request. The sponsor is named by email or wallet address.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub sponsor_address: Option<String>,
}

/// Returns true iff `candidate` is `start` or one of its ancestors.
///
/// The walk stops at the first user seen twice, so it visits each user at
/// most once even on a corrupted chain.
pub async fn is_ancestor<T: StoreTx>(tx: &mut T, candidate: UserId, start: UserId) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut current = Some(start);

    while let Some(id) = current {
        if id == candidate {
            return Ok(true);
        }
        if !visited.insert(id) {
            warn!(start, user_id = id, "sponsor chain loops, stopping ancestor walk");
            return Ok(false);
        }
        current = tx.user(id).await?.and_then(|u| u.sponsor_id);
    }
    Ok(false)
}

/// Points `user_id` at `requested` and recomputes its level.
///
/// A sponsor that is the user itself, or one of the user's descendants, is
/// not an error: the link falls back to the sponsor already persisted for the
/// user (or none) and the returned [`Attachment`] says why.
/// Descendant levels are left alone; run [`cascade_levels`] afterwards.
/// Holds the exclusive graph lock until the transaction ends.
pub async fn attach<T: StoreTx>(
    tx: &mut T,
    user_id: UserId,
    requested: Option<UserId>,
) -> Result<Attachment> {
    tx.lock_graph(GraphLock::Exclusive).await?;
    let user = tx
        .lock_user(user_id)
        .await?
        .ok_or(NetworkError::UserNotFound(user_id))?;
    let prior = user.sponsor_id;

    let rejected = match requested {
        None => None,
        Some(sponsor_id) if sponsor_id == user_id => Some(SponsorRejection::SelfSponsorship),
        Some(sponsor_id) => {
            if tx.user(sponsor_id).await?.is_none() {
                return Err(NetworkError::UserNotFound(sponsor_id));
            }
            if is_ancestor(tx, user_id, sponsor_id).await? {
                Some(SponsorRejection::CircularSponsorship)
            } else {
                None
            }
        }
    };

    let sponsor_id = match rejected {
        Some(reason) => {
            warn!(user_id, ?requested, ?prior, ?reason, "dropping invalid sponsor link");
            prior
        }
        None => requested,
    };

    let level = match sponsor_id {
        Some(id) => match tx.lock_user(id).await? {
            Some(sponsor) => sponsor.level + 1,
            None => return Err(NetworkError::UserNotFound(id)),
        },
        None => 0,
    };

    tx.set_sponsor(user_id, sponsor_id, level).await?;
    debug!(user_id, ?sponsor_id, level, "sponsor attached");

    Ok(Attachment {
        sponsor_id,
        level,
        rejected,
    })
}

/// Rewrites the level of every descendant of `user_id` to its sponsor's level
/// plus one. Returns how many rows actually changed; a second run returns 0.
pub async fn cascade_levels<T: StoreTx>(tx: &mut T, user_id: UserId) -> Result<usize> {
    tx.lock_graph(GraphLock::Exclusive).await?;
    let root = tx
        .lock_user(user_id)
        .await?
        .ok_or(NetworkError::UserNotFound(user_id))?;

    let mut visited = HashSet::from([root.id]);
    let mut queue = VecDeque::from([(root.id, root.level)]);
    let mut updated = 0;

    while let Some((id, level)) = queue.pop_front() {
        for child in tx.lock_sponsored_users(id).await? {
            if !visited.insert(child.id) {
                warn!(user_id = child.id, "user reached twice while cascading levels");
                continue;
            }
            let expected = level + 1;
            if child.level != expected {
                tx.set_level(child.id, expected).await?;
                updated += 1;
            }
            queue.push_back((child.id, expected));
        }
    }

    if updated > 0 {
        info!(user_id, updated, "levels cascaded");
    }
    Ok(updated)
}

/// Creates a user, attaches it under the sponsor named in `registration`, and
/// cascades levels. An unknown sponsor address fails before anything is written.
pub async fn register<T: StoreTx>(tx: &mut T, registration: &Registration) -> Result<User> {
    let username = registration.username.trim();
    let email = registration.email.trim();
    if username.is_empty() {
        return Err(NetworkError::InvalidRegistration("username is required".into()));
    }
    if email.is_empty() {
        return Err(NetworkError::InvalidRegistration("email is required".into()));
    }
    let wallet_address = registration
        .wallet_address
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty());

    tx.lock_graph(GraphLock::Exclusive).await?;
    let sponsor = match registration.sponsor_address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => Some(
            tx.user_by_address(address)
                .await?
                .ok_or_else(|| NetworkError::UnknownSponsor(address.to_string()))?,
        ),
        _ => None,
    };

    for identity in std::iter::once(email).chain(wallet_address) {
        if tx.user_by_address(identity).await?.is_some() {
            return Err(NetworkError::DuplicateIdentity(identity.to_string()));
        }
    }

    let new_user = NewUser {
        username: username.to_string(),
        email: email.to_string(),
        wallet_address: wallet_address.map(str::to_string),
    };
    let user = tx.insert_user(&new_user).await.map_err(|e| match e {
        StoreError::Conflict(_) => NetworkError::DuplicateIdentity(email.to_string()),
        other => other.into(),
    })?;

    let attachment = attach(tx, user.id, sponsor.map(|s| s.id)).await?;
    if attachment.sponsor_id.is_some() {
        cascade_levels(tx, user.id).await?;
    }

    info!(user_id = user.id, sponsor_id = ?attachment.sponsor_id, level = attachment.level, "user registered");
    tx.user(user.id)
        .await?
        .ok_or(NetworkError::UserNotFound(user.id))
}

/// Corrects the sponsor of an existing user and re-levels its whole subtree.
pub async fn reassign_sponsor<T: StoreTx>(
    tx: &mut T,
    user_id: UserId,
    sponsor_id: Option<UserId>,
) -> Result<Attachment> {
    let attachment = attach(tx, user_id, sponsor_id).await?;
    cascade_levels(tx, user_id).await?;
    Ok(attachment)
}
