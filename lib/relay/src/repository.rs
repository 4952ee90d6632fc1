//! Concurrent repositories and the entities they own. Handlers access the
//! stores through the uniform `Store` contract and must treat every read as a
//! point-in-time snapshot.

use chassis::ClientId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexSet;
use std::hash::Hash;

/// Concurrent key→value store. All operations are map-level atomic; there is
/// no way to hold a reference across calls, which keeps handlers from
/// blocking the shards.
pub struct Store<K, V>
where
    K: Eq + Hash,
{
    data: DashMap<K, V>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[inline]
    pub fn new() -> Store<K, V> {
        Store { data: DashMap::new() }
    }

    /// Inserts only if the key is absent. Returns false when the key was
    /// already present (the stored value is untouched).
    pub fn insert_new(&self, key: K, value: V) -> bool {
        match self.data.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Unconditional upsert.
    #[inline]
    pub fn insert(&self, key: K, value: V) {
        self.data.insert(key, value);
    }

    /// Cloned snapshot of the value.
    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Runs the closure against the value without cloning it.
    #[inline]
    pub fn with<R, F: FnOnce(&V) -> R>(&self, key: &K, f: F) -> Option<R> {
        self.data.get(key).map(|entry| f(entry.value()))
    }

    /// Mutates the value in place if present.
    #[inline]
    pub fn update<R, F: FnOnce(&mut V) -> R>(&self, key: &K, f: F) -> Option<R> {
        self.data.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    #[inline]
    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, value)| value)
    }

    /// Removes the entry only when the predicate accepts the stored value.
    #[inline]
    pub fn remove_if<F: FnOnce(&K, &V) -> bool>(&self, key: &K, f: F) -> Option<V> {
        self.data.remove_if(key, f).map(|(_, value)| value)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Keeps only the entries the predicate accepts.
    #[inline]
    pub fn retain<F: FnMut(&K, &mut V) -> bool>(&self, f: F) {
        self.data.retain(f);
    }

    /// True if any entry matches the predicate.
    pub fn any<F: FnMut(&K, &V) -> bool>(&self, mut f: F) -> bool {
        self.data.iter().any(|entry| f(entry.key(), entry.value()))
    }
}

pub type UserRepository = Store<ClientId, UserInfo>;
pub type GroupRepository = Store<ClientId, GroupInfo>;
pub type RequestRepository = Store<String, PendingContactRequest>;

/// A registered user. Mutated only by the user-management and contact
/// handlers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UserInfo {
    pub id: ClientId,
    pub username: String,
    pub contacts: IndexSet<ClientId>,
    pub last_login: DateTime<Utc>,
    pub public_key: Option<[u8; 32]>,
}

impl UserInfo {
    pub fn new(id: ClientId, username: String) -> UserInfo {
        UserInfo {
            id,
            username,
            contacts: IndexSet::new(),
            last_login: Utc::now(),
            public_key: None,
        }
    }

    #[inline]
    pub fn is_contact(&self, other: ClientId) -> bool {
        self.contacts.contains(&other)
    }
}

/// A chat group. The admin is always a member and is the only user allowed to
/// mutate membership or the name, or to delete the group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupInfo {
    pub id: ClientId,
    pub name: String,
    pub admin: ClientId,
    pub members: IndexSet<ClientId>,
}

impl GroupInfo {
    pub fn new(id: ClientId, name: String, admin: ClientId) -> GroupInfo {
        let mut members = IndexSet::new();
        members.insert(admin);

        GroupInfo { id, name, admin, members }
    }

    #[inline]
    pub fn is_member(&self, client: ClientId) -> bool {
        self.members.contains(&client)
    }

    #[inline]
    pub fn is_admin(&self, client: ClientId) -> bool {
        self.admin == client
    }
}

/// A contact request awaiting its response, kept until matched or swept.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingContactRequest {
    pub request_id: String,
    pub sender: ClientId,
    pub receiver: ClientId,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_new_is_insert_if_absent() {
        let users = UserRepository::new();

        assert!(users.insert_new(1, UserInfo::new(1, "alice".to_string())));
        assert!(!users.insert_new(1, UserInfo::new(1, "impostor".to_string())));

        assert_eq!(users.get(&1).unwrap().username, "alice");
    }

    #[test]
    fn test_update_mutates_in_place() {
        let users = UserRepository::new();
        users.insert(1, UserInfo::new(1, "alice".to_string()));

        users.update(&1, |user| {
            user.contacts.insert(2);
        });

        assert!(users.get(&1).unwrap().is_contact(2));
        assert_eq!(users.update(&99, |_| ()), None);
    }

    #[test]
    fn test_group_admin_is_member() {
        let group = GroupInfo::new(10, "g".to_string(), 1);

        assert!(group.is_member(1));
        assert!(group.is_admin(1));
        assert!(!group.is_member(2));
    }

    #[test]
    fn test_retain_sweeps() {
        let requests = RequestRepository::new();

        for index in 0..10u32 {
            requests.insert(
                format!("r{}", index),
                PendingContactRequest {
                    request_id: format!("r{}", index),
                    sender: index,
                    receiver: index + 1,
                    created: Utc::now(),
                },
            );
        }

        requests.retain(|_, request| request.sender % 2 == 0);
        assert_eq!(requests.len(), 5);
    }

    #[test]
    fn test_concurrent_insert_new_single_winner() {
        let users = Arc::new(UserRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let users = users.clone();
                thread::spawn(move || users.insert_new(1, UserInfo::new(1, format!("user{}", index))))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
