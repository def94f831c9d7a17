use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered by cumulative power; each role implies every role before it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Spectator,
    Player,
    Admin,
}

const SPECTATOR_GRANTS: &[Permission] = &[
    Permission::new("vessel", "list"),
    Permission::new("economy", "read"),
    Permission::new("user", "mode"),
];

const PLAYER_GRANTS: &[Permission] = &[
    Permission::new("vessel", "list"),
    Permission::new("vessel", "update"),
    Permission::new("vessel", "control"),
    Permission::new("vessel", "repair"),
    Permission::new("vessel", "join"),
    Permission::new("station", "claim"),
    Permission::new("economy", "read"),
    Permission::new("user", "mode"),
];

const ADMIN_GRANTS: &[Permission] = &[Permission::new("*", "*")];

impl Role {
    pub const ORDER: [Role; 4] = [Role::Guest, Role::Spectator, Role::Player, Role::Admin];

    fn grants(self) -> &'static [Permission] {
        match self {
            Role::Guest => &[],
            Role::Spectator => SPECTATOR_GRANTS,
            Role::Player => PLAYER_GRANTS,
            Role::Admin => ADMIN_GRANTS,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Guest => "guest",
            Self::Spectator => "spectator",
            Self::Player => "player",
            Self::Admin => "admin",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub resource: &'static str,
    pub action: &'static str,
}

impl Permission {
    pub const fn new(resource: &'static str, action: &'static str) -> Self {
        Self { resource, action }
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Expands `roles` to include every role below the highest one given.
/// An empty input resolves to `[Guest]`.
pub fn expand_roles(roles: &[Role]) -> Vec<Role> {
    let highest = roles.iter().copied().max().unwrap_or(Role::Guest);
    Role::ORDER
        .iter()
        .copied()
        .filter(|role| *role <= highest)
        .collect()
}

pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut seen = BTreeSet::new();
    let mut permissions = Vec::new();
    for role in expand_roles(roles) {
        for permission in role.grants() {
            if seen.insert(*permission) {
                permissions.push(*permission);
            }
        }
    }
    permissions
}

pub fn has_permission(permissions: &[Permission], resource: &str, action: &str) -> bool {
    permissions
        .iter()
        .any(|permission| permission.matches(resource, action))
}
