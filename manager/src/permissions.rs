//! Role-based gating of the named operations.
//!
//! Three roles form a chain of strict supersets: whatever a player may do an
//! op may do, whatever an op may do the owner may do. Capability sets are
//! built by explicit composition ([`Role::capabilities`]) rather than by
//! merging tables, so the superset property holds by construction.

use crate::model::OpEntry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Op,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    AddOp,
    AddWhitelist,
    Backup,
    SetDay,
    Save,
    ClearWeather,
    Delete,
    Regenerate,
    Start,
    Stop,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::AddOp,
        Action::AddWhitelist,
        Action::Backup,
        Action::SetDay,
        Action::Save,
        Action::ClearWeather,
        Action::Delete,
        Action::Regenerate,
        Action::Start,
        Action::Stop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::AddOp => "Add Op",
            Action::AddWhitelist => "Add Whitelist",
            Action::Backup => "Backup",
            Action::SetDay => "Set Time Day",
            Action::Save => "Save",
            Action::ClearWeather => "Weather Clear",
            Action::Delete => "Delete",
            Action::Regenerate => "Regen World",
            Action::Start => "Start",
            Action::Stop => "Stop",
        }
    }

    /// Whether the action only makes sense against a running instance.
    pub fn requires_running(self) -> bool {
        matches!(
            self,
            Action::AddOp
                | Action::AddWhitelist
                | Action::SetDay
                | Action::Save
                | Action::ClearWeather
                | Action::Stop
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Player => "player",
            Role::Op => "op",
            Role::Owner => "owner",
        };
        f.write_str(name)
    }
}

const OP_GRANTS: [Action; 6] = [
    Action::AddOp,
    Action::AddWhitelist,
    Action::Backup,
    Action::SetDay,
    Action::Save,
    Action::ClearWeather,
];

const OWNER_GRANTS: [Action; 4] = [
    Action::Delete,
    Action::Regenerate,
    Action::Start,
    Action::Stop,
];

impl Role {
    pub fn capabilities(self) -> BTreeSet<Action> {
        match self {
            Role::Player => BTreeSet::new(),
            Role::Op => {
                let mut caps = Role::Player.capabilities();
                caps.extend(OP_GRANTS);
                caps
            }
            Role::Owner => {
                let mut caps = Role::Op.capabilities();
                caps.extend(OWNER_GRANTS);
                caps
            }
        }
    }

    pub fn allows(self, action: Action) -> bool {
        self.capabilities().contains(&action)
    }
}

/// Works out the caller's role on an instance. Never cached: ops can change
/// between two calls.
pub fn resolve(identity: &str, owner: &str, ops: &[OpEntry]) -> Role {
    if identity == owner {
        Role::Owner
    } else if ops.iter().any(|op| op.name == identity) {
        Role::Op
    } else {
        Role::Player
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub action: Action,
    pub name: &'static str,
    pub allowed: bool,
    #[serde(rename = "reqRunning")]
    pub requires_running: bool,
}

/// The full action table as seen by one role, in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub role: Role,
    pub actions: Vec<Permission>,
}

impl Permissions {
    pub fn for_role(role: Role) -> Self {
        let caps = role.capabilities();
        let actions = Action::ALL
            .into_iter()
            .map(|action| Permission {
                action,
                name: action.name(),
                allowed: caps.contains(&action),
                requires_running: action.requires_running(),
            })
            .collect();

        Self { role, actions }
    }

    pub fn allowed(&self, action: Action) -> bool {
        self.actions
            .iter()
            .any(|perm| perm.action == action && perm.allowed)
    }
}
