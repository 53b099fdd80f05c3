//! Authenticated claims: who the caller is and what they may do.

use serde::{Deserialize, Serialize};

/// Coarse operator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Controller,
}

/// Fine-grained capability scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Control,
    Telemetry,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Control => "control",
            Scope::Telemetry => "telemetry",
        }
    }
}

/// The verified identity attached to every authenticated request.
/// Invariant: both sets are non-empty once verification succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub subject: String,
    pub roles: Vec<Role>,
    pub scopes: Vec<Scope>,
}

impl Claims {
    /// True when every required scope is held.
    pub fn has_all_scopes(&self, required: &[Scope]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }

    /// True when at least one of the allowed roles is held.
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed.iter().any(|r| self.roles.contains(r))
    }
}
