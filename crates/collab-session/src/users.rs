//! Display names of the participants connected to a session.

use std::collections::BTreeMap;

use collab_common::{now_millis, ClientId};
use collab_terminal::strip_control;

pub const MAX_NAME_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub connected_at: i64,
}

/// Users keyed by connection, iterated in join order.
#[derive(Debug, Default)]
pub struct UserTable {
    users: BTreeMap<ClientId, User>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under the default name `User N`.
    pub fn add(&mut self, id: ClientId) -> &User {
        let name = format!("User {}", self.users.len() + 1);
        self.users.entry(id).or_insert(User {
            name,
            connected_at: now_millis(),
        })
    }

    pub fn remove(&mut self, id: ClientId) -> Option<User> {
        self.users.remove(&id)
    }

    pub fn name(&self, id: ClientId) -> Option<&str> {
        self.users.get(&id).map(|u| u.name.as_str())
    }

    /// Rename a user. Returns false when the cleaned name is empty or the
    /// user is unknown.
    pub fn set_name(&mut self, id: ClientId, raw: &str) -> bool {
        let Some(name) = sanitize_name(raw) else {
            return false;
        };
        match self.users.get_mut(&id) {
            Some(user) => {
                user.name = name;
                true
            }
            None => false,
        }
    }

    /// Distinct display names, first occurrence wins.
    pub fn unique_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.users.len());
        for user in self.users.values() {
            if !names.contains(&user.name) {
                names.push(user.name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}

/// Strip control characters, trim and truncate to [`MAX_NAME_CHARS`].
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned = strip_control(raw);
    let name: String = cleaned.trim().chars().take(MAX_NAME_CHARS).collect();
    (!name.is_empty()).then_some(name)
}
