use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::error::{NetworkError, Result};
use crate::store::StoreTx;
use crate::types::{TeamMember, UserId};

/// Breadth-first walk of the users below `root`, at most `max_depth` levels
/// down. Direct sponsees are depth 1; `root` itself is never included.
pub async fn get_team<T: StoreTx>(
    tx: &mut T,
    root: UserId,
    max_depth: u32,
) -> Result<Vec<TeamMember>> {
    if tx.user(root).await?.is_none() {
        return Err(NetworkError::UserNotFound(root));
    }

    let mut team = Vec::new();
    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([(root, 0u32)]);

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for member in tx.sponsored_users(id).await? {
            if !visited.insert(member.id) {
                warn!(root, user_id = member.id, "user reached twice while walking team");
                continue;
            }
            queue.push_back((member.id, depth + 1));
            team.push(TeamMember::new(member, depth + 1));
        }
    }

    Ok(team)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{register, tests::registration};
    use crate::store::{MemoryStore, Store};
    use crate::types::User;

    async fn add(tx: &mut impl StoreTx, name: &str, sponsor: Option<&User>) -> User {
        let address = sponsor.map(|s| s.email.clone());
        register(tx, &registration(name, address.as_deref()))
            .await
            .unwrap()
    }

    fn names(team: &[TeamMember]) -> Vec<&str> {
        team.iter().map(|m| m.username.as_str()).collect()
    }

    #[tokio::test]
    async fn default_depth_covers_two_levels() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let root = add(&mut tx, "root", None).await;
        let u1 = add(&mut tx, "user1", Some(&root)).await;
        add(&mut tx, "user2", Some(&root)).await;
        let u11 = add(&mut tx, "user1_1", Some(&u1)).await;
        add(&mut tx, "user1_1_1", Some(&u11)).await;

        let team = get_team(&mut tx, root.id, 2).await.unwrap();
        assert_eq!(names(&team), vec!["user1", "user2", "user1_1"]);
        assert_eq!(team.iter().map(|m| m.depth).collect::<Vec<_>>(), vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn depth_bound_is_respected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut last = add(&mut tx, "root", None).await;
        let root_id = last.id;
        for i in 0..5 {
            let next = add(&mut tx, &format!("n{i}"), Some(&last)).await;
            last = next;
        }

        assert!(get_team(&mut tx, root_id, 0).await.unwrap().is_empty());
        assert_eq!(get_team(&mut tx, root_id, 1).await.unwrap().len(), 1);
        assert_eq!(get_team(&mut tx, root_id, 3).await.unwrap().len(), 3);
        assert_eq!(get_team(&mut tx, root_id, 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn leaf_has_empty_team() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let root = add(&mut tx, "root", None).await;
        let leaf = add(&mut tx, "leaf", Some(&root)).await;

        assert!(get_team(&mut tx, leaf.id, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_root_is_an_error() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            get_team(&mut tx, 42, 2).await,
            Err(NetworkError::UserNotFound(42))
        ));
    }

    #[tokio::test]
    async fn corrupted_cycle_yields_no_duplicates() {
        let store = MemoryStore::new();
        let (a, b) = {
            let mut tx = store.begin().await.unwrap();
            let a = add(&mut tx, "a", None).await;
            let b = add(&mut tx, "b", Some(&a)).await;
            add(&mut tx, "c", Some(&b)).await;
            tx.commit().await.unwrap();
            (a.id, b.id)
        };
        store.force_sponsor(a, Some(b)).await;

        let mut tx = store.begin().await.unwrap();
        let team = get_team(&mut tx, a, 10).await.unwrap();
        assert_eq!(names(&team), vec!["b", "c"]);
    }
}
