//! Request-scoped identity, operation and resource descriptors.
//!
//! These come from the business layer (resources, operations) or from a
//! validated token (identities). The engine never persists or fetches them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Organization role. Ordered by privilege: `Viewer < Member < Admin`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    /// Read-only member
    Viewer,
    /// Regular contributor
    Member,
    /// Organization administrator
    Admin,
}

/// Business operation a request wants to perform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Operation {
    /// Create a resource
    Create,
    /// Read a resource
    Read,
    /// Modify a resource
    Update,
    /// Remove a resource
    Delete,
    /// Assign a resource to a user
    Assign,
    /// Change a user's role
    ChangeRole,
}

impl Operation {
    /// Whether the operation leaves state untouched.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read)
    }

    /// Whether the operation mutates someone's role.
    pub fn is_role_mutating(self) -> bool {
        matches!(self, Self::ChangeRole)
    }
}

/// Who may see a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Owner, assignee and admins only
    Private,
    /// Everyone in the owning organization
    #[default]
    Organization,
}

/// Target of an operation, as described by the business layer.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_new::new,
)]
#[setters(prefix = "with_", into)]
pub struct ResourceRef {
    /// Resource type, e.g. `task`
    resource_type: String,
    /// Resource identifier
    resource_id: String,
    /// Organization owning the resource
    organization_id: String,
    /// User owning the resource
    owner_id: String,
    /// Visibility flag
    #[serde(default)]
    #[new(default)]
    visibility: Visibility,
    /// User the resource is assigned to, if any
    #[serde(default)]
    #[new(default)]
    assignee_id: Option<String>,
}

impl ResourceRef {
    /// Shorthand for a `task` resource visible to its organization.
    pub fn task(
        resource_id: impl Into<String>,
        organization_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self::new(
            "task".to_string(),
            resource_id.into(),
            organization_id.into(),
            owner_id.into(),
        )
    }
}

/// Claims an identity token is issued for.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters, derive_new::new,
)]
pub struct IdentityClaims {
    /// User identifier
    #[new(into)]
    user_id: String,
    /// Organization identifier
    #[new(into)]
    organization_id: String,
    /// Role within the organization
    role: Role,
}

/// Identity derived from a validated token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct Identity {
    /// User identifier
    user_id: String,
    /// Organization identifier
    organization_id: String,
    /// Role within the organization
    role: Role,
    /// When the token was issued
    issued_at: DateTime<Utc>,
    /// Address the token is bound to
    bound_ip: Option<IpAddr>,
    /// Token identifier
    token_id: String,
}

impl Identity {
    pub(crate) fn new(
        claims: IdentityClaims,
        issued_at: DateTime<Utc>,
        bound_ip: Option<IpAddr>,
        token_id: String,
    ) -> Self {
        Self {
            user_id: claims.user_id,
            organization_id: claims.organization_id,
            role: claims.role,
            issued_at,
            bound_ip,
            token_id,
        }
    }

    /// Whether the identity owns or is assigned the resource.
    pub fn is_party_to(&self, resource: &ResourceRef) -> bool {
        resource.owner_id() == &self.user_id
            || resource.assignee_id().as_deref() == Some(self.user_id.as_str())
    }
}
