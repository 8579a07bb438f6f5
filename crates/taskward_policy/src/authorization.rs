//! Object-level authorization.
//!
//! Strictness is expressed as an ordered chain of layers. Each layer either
//! passes or denies; the first denial wins. An empty chain denies, so a permit
//! only exists when every configured layer explicitly passed.

use crate::{AuthorizationStrictness, Identity, Operation, ResourceRef, Role, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use taskward_error::{AuthorizationError, AuthorizationErrorKind};
use tracing::{debug, instrument};

/// Everything a layer may look at.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Authenticated caller
    pub identity: &'a Identity,
    /// Requested operation
    pub operation: Operation,
    /// Target resource
    pub resource: &'a ResourceRef,
    /// Role being granted, for role-mutating operations
    pub granted_role: Option<Role>,
}

/// One predicate in an authorization chain.
pub trait AuthorizationLayer: Send + Sync + std::fmt::Debug {
    /// Layer name used in logs.
    fn name(&self) -> &'static str;

    /// Pass, or deny with a reason.
    fn check(&self, request: &AccessRequest<'_>) -> Result<(), AuthorizationError>;
}

/// Static role to operation capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTable {
    roles: HashMap<Role, HashSet<Operation>>,
}

impl CapabilityTable {
    /// An empty table; every role is denied everything.
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    /// Grant `operations` to `role`, replacing any previous grant.
    pub fn with_role(mut self, role: Role, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.roles.insert(role, operations.into_iter().collect());
        self
    }

    /// Remove a role entirely.
    pub fn without_role(mut self, role: Role) -> Self {
        self.roles.remove(&role);
        self
    }

    /// Whether `role` may perform `operation`. Roles absent from the table may do nothing.
    pub fn permits(&self, role: Role, operation: Operation) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|operations| operations.contains(&operation))
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        use Operation::*;
        Self::empty()
            .with_role(Role::Admin, [Create, Read, Update, Delete, Assign, ChangeRole])
            .with_role(Role::Member, [Create, Read, Update, Assign])
            .with_role(Role::Viewer, [Read])
    }
}

/// Passes any authenticated identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPresenceLayer;

impl AuthorizationLayer for TokenPresenceLayer {
    fn name(&self) -> &'static str {
        "token_presence"
    }

    fn check(&self, _request: &AccessRequest<'_>) -> Result<(), AuthorizationError> {
        Ok(())
    }
}

/// Single-layer tenant check: same organization, and read-only or owner or admin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantOwnershipLayer;

impl AuthorizationLayer for TenantOwnershipLayer {
    fn name(&self) -> &'static str {
        "tenant_ownership"
    }

    fn check(&self, request: &AccessRequest<'_>) -> Result<(), AuthorizationError> {
        OrganizationLayer.check(request)?;
        let identity = request.identity;
        if request.operation.is_read_only()
            || request.resource.owner_id() == identity.user_id()
            || *identity.role() == Role::Admin
        {
            return Ok(());
        }
        Err(AuthorizationError::new(
            AuthorizationErrorKind::OwnershipDenied,
        ))
    }
}

/// Resource must belong to the caller's organization.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationLayer;

impl AuthorizationLayer for OrganizationLayer {
    fn name(&self) -> &'static str {
        "organization"
    }

    fn check(&self, request: &AccessRequest<'_>) -> Result<(), AuthorizationError> {
        if request.resource.organization_id() == request.identity.organization_id() {
            Ok(())
        } else {
            Err(AuthorizationError::new(AuthorizationErrorKind::OrgMismatch))
        }
    }
}

/// Role must hold the capability; role grants may not exceed the caller's role.
#[derive(Debug, Clone, Default)]
pub struct CapabilityLayer {
    table: CapabilityTable,
}

impl CapabilityLayer {
    /// Create a layer over `table`.
    pub fn new(table: CapabilityTable) -> Self {
        Self { table }
    }
}

impl AuthorizationLayer for CapabilityLayer {
    fn name(&self) -> &'static str {
        "role_capability"
    }

    fn check(&self, request: &AccessRequest<'_>) -> Result<(), AuthorizationError> {
        let role = *request.identity.role();
        if !self.table.permits(role, request.operation) {
            return Err(AuthorizationError::new(AuthorizationErrorKind::RoleDenied));
        }
        if request.operation.is_role_mutating()
            && request.granted_role.is_some_and(|granted| granted > role)
        {
            return Err(AuthorizationError::new(
                AuthorizationErrorKind::EscalationAttempt,
            ));
        }
        Ok(())
    }
}

/// Private resources are reachable only by owner, assignee or admin; mutations
/// of shared resources likewise.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibilityLayer;

impl AuthorizationLayer for VisibilityLayer {
    fn name(&self) -> &'static str {
        "visibility"
    }

    fn check(&self, request: &AccessRequest<'_>) -> Result<(), AuthorizationError> {
        let identity = request.identity;
        let privileged = identity.is_party_to(request.resource) || *identity.role() == Role::Admin;
        let shared_read = *request.resource.visibility() == Visibility::Organization
            && request.operation.is_read_only();
        if privileged || shared_read {
            Ok(())
        } else {
            Err(AuthorizationError::new(
                AuthorizationErrorKind::OwnershipDenied,
            ))
        }
    }
}

/// Outcome of one authorization check.
#[derive(Debug, Clone)]
pub struct AuthorizationVerdict {
    /// Permit, or the first denial
    pub result: Result<(), AuthorizationError>,
    /// Whether the request looked like a privilege-escalation attempt
    pub escalation_attempt: bool,
}

/// Evaluates requests against the chain for one strictness level.
#[derive(Debug)]
pub struct AuthorizationEvaluator {
    strictness: AuthorizationStrictness,
    layers: Vec<Box<dyn AuthorizationLayer>>,
    capabilities: CapabilityTable,
}

impl AuthorizationEvaluator {
    /// Build the chain for `strictness` with the default capability table.
    pub fn new(strictness: AuthorizationStrictness) -> Self {
        Self::with_capabilities(strictness, CapabilityTable::default())
    }

    /// Build the chain for `strictness` with an explicit capability table.
    pub fn with_capabilities(
        strictness: AuthorizationStrictness,
        capabilities: CapabilityTable,
    ) -> Self {
        let layers: Vec<Box<dyn AuthorizationLayer>> = match strictness {
            AuthorizationStrictness::None => vec![Box::new(TokenPresenceLayer)],
            AuthorizationStrictness::ObjectOwnerCheck => vec![Box::new(TenantOwnershipLayer)],
            AuthorizationStrictness::MultiLayer => vec![
                Box::new(OrganizationLayer),
                Box::new(CapabilityLayer::new(capabilities.clone())),
                Box::new(VisibilityLayer),
            ],
        };
        Self {
            strictness,
            layers,
            capabilities,
        }
    }

    /// Strictness this evaluator enforces.
    pub fn strictness(&self) -> AuthorizationStrictness {
        self.strictness
    }

    /// Decide whether `request` may proceed.
    #[instrument(
        skip(self, request),
        fields(
            user_id = %request.identity.user_id(),
            operation = %request.operation,
            resource_id = %request.resource.resource_id()
        )
    )]
    pub fn check(&self, request: &AccessRequest<'_>) -> AuthorizationVerdict {
        let permitted = self.layers.iter().try_fold(false, |_, layer| {
            debug!(layer = layer.name(), "Evaluating authorization layer");
            layer.check(request).map(|()| true).inspect_err(|e| {
                debug!(layer = layer.name(), reason = e.kind().code(), "Layer denied");
            })
        });

        let result = match permitted {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthorizationError::new(AuthorizationErrorKind::RoleDenied)),
            Err(e) => Err(e),
        };

        AuthorizationVerdict {
            escalation_attempt: self.is_escalation_attempt(request),
            result,
        }
    }

    /// A role-mutating request the caller could not legitimately make.
    fn is_escalation_attempt(&self, request: &AccessRequest<'_>) -> bool {
        if self.strictness != AuthorizationStrictness::MultiLayer
            || !request.operation.is_role_mutating()
        {
            return false;
        }
        let role = *request.identity.role();
        !self.capabilities.permits(role, Operation::ChangeRole)
            || request.granted_role.is_some_and(|granted| granted > role)
    }
}
