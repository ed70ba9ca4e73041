//! RBAC/ABAC authorization policy.
//!
//! A request is authorized iff the principal holds the action's required
//! permission and every attribute constraint is satisfied: PII sensitivity
//! needs `pii_access`, sensitive/confidential needs `sensitive_access`,
//! the processing hint must be allowed for the role, and the estimated
//! cost must stay under the per-role ceiling.

use llmgate_core::config::CostCeilings;
use llmgate_core::{Permission, Principal, ProcessingHint, Role, Sensitivity};

/// Attributes of the resource being acted on.
#[derive(Debug, Clone)]
pub struct ResourceAttributes {
    pub sensitivity: Sensitivity,
    pub processing_hint: ProcessingHint,
    pub estimated_cost_usd: f64,
}

/// Result of an authorization check.
#[derive(Debug, Clone)]
pub struct AuthzDecision {
    pub allowed: bool,
    /// Human-readable reason when denied.
    pub reason: Option<String>,
}

impl AuthzDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Authorization policy engine.
pub struct AuthzPolicy {
    ceilings: CostCeilings,
}

impl AuthzPolicy {
    pub fn new(ceilings: CostCeilings) -> Self {
        Self { ceilings }
    }

    /// Per-request cost ceiling for a role, in USD.
    pub fn cost_ceiling(&self, role: Role) -> f64 {
        match role {
            Role::Admin => self.ceilings.admin,
            Role::Service => self.ceilings.service,
            Role::ReadOnly => self.ceilings.read_only,
        }
    }

    /// Processing hints a role may request.
    fn hint_allowed(role: Role, hint: ProcessingHint) -> bool {
        match role {
            Role::Admin => true,
            Role::Service => !matches!(hint, ProcessingHint::ModelPrivate),
            Role::ReadOnly => matches!(hint, ProcessingHint::Auto | ProcessingHint::RuleEngine),
        }
    }

    /// Check whether `principal` may perform `process` on a resource with
    /// the given attributes.
    pub fn authorize(&self, principal: &Principal, resource: &ResourceAttributes) -> AuthzDecision {
        if !principal.has_permission(Permission::Execute) {
            return AuthzDecision::deny(format!(
                "Role '{}' lacks the 'execute' permission",
                principal.role
            ));
        }

        match resource.sensitivity {
            Sensitivity::Pii => {
                if !principal.has_permission(Permission::PiiAccess) {
                    return AuthzDecision::deny(
                        "Permission 'pii_access' required for 'pii' data".to_string(),
                    );
                }
            }
            Sensitivity::Sensitive | Sensitivity::Confidential => {
                if !principal.has_permission(Permission::SensitiveAccess) {
                    return AuthzDecision::deny(format!(
                        "Permission 'sensitive_access' required for '{}' data",
                        resource.sensitivity
                    ));
                }
            }
            Sensitivity::Public | Sensitivity::Internal => {}
        }

        if !Self::hint_allowed(principal.role, resource.processing_hint) {
            return AuthzDecision::deny(format!(
                "Role '{}' may not request processing hint '{}'",
                principal.role, resource.processing_hint
            ));
        }

        let ceiling = self.cost_ceiling(principal.role);
        if resource.estimated_cost_usd > ceiling {
            return AuthzDecision::deny(format!(
                "Estimated cost ${:.4} exceeds ${:.2} ceiling for role '{}'",
                resource.estimated_cost_usd, ceiling, principal.role
            ));
        }

        AuthzDecision::allow()
    }
}

impl Default for AuthzPolicy {
    fn default() -> Self {
        Self::new(CostCeilings::default())
    }
}
