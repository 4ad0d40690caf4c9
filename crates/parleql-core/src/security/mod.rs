//! Role-based access control.
//!
//! Access decisions are pure functions of (user context, policy set,
//! datasource, table). Policies are data loaded from configuration; nothing
//! here talks to the outside world, so checks are infallible and free to
//! call from any node.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identity attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Stable user identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Tenant the request executes under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Roles granted to the user.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    /// Context with a single role, for tests and defaults.
    pub fn with_role(role: impl Into<String>) -> Self {
        Self { user_id: None, tenant_id: None, roles: vec![role.into()] }
    }
}

/// Grants for one role.
///
/// `allowed_datasources` entries are datasource ids or `*`.
/// `allowed_tables` entries are `ds.table`, `ds.*`, or `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePolicy {
    /// Filled from the config map key when omitted in the file.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_datasources: Vec<String>,
    #[serde(default)]
    pub allowed_tables: Vec<String>,
}

/// The full policy set for a deployment.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<RolePolicy>,
}

/// Resources a user may touch, as reported by `get_allowed_resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedResources {
    pub datasources: BTreeSet<String>,
    pub tables: BTreeSet<String>,
}

impl PolicySet {
    pub fn new(policies: Vec<RolePolicy>) -> Self {
        Self { policies }
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn policies_for<'a>(&'a self, ctx: &'a UserContext) -> impl Iterator<Item = &'a RolePolicy> + 'a {
        self.policies
            .iter()
            .filter(|p| p.role == "*" || ctx.roles.iter().any(|r| r == &p.role))
    }

    /// Whether `ctx` may read `table` on `datasource`.
    ///
    /// Pure and infallible: unknown roles simply grant nothing. An empty
    /// policy set denies everything, matching the closed-by-default posture
    /// of the logical validator.
    pub fn check(&self, ctx: &UserContext, datasource: &str, table: &str) -> bool {
        self.policies_for(ctx).any(|p| {
            datasource_allowed(p, datasource) && table_allowed(p, datasource, table)
        })
    }

    /// Whether `ctx` may touch `datasource` at all (any table).
    pub fn datasource_allowed(&self, ctx: &UserContext, datasource: &str) -> bool {
        self.policies_for(ctx).any(|p| datasource_allowed(p, datasource))
    }

    /// Enumerate the grant set for a context.
    ///
    /// Wildcard grants are reported verbatim (`*`, `ds.*`); expansion to
    /// concrete names is the caller's concern since only the registry knows
    /// which datasources exist.
    pub fn allowed_resources(&self, ctx: &UserContext) -> AllowedResources {
        let mut out = AllowedResources::default();
        for p in self.policies_for(ctx) {
            out.datasources.extend(p.allowed_datasources.iter().cloned());
            out.tables.extend(p.allowed_tables.iter().cloned());
        }
        out
    }
}

fn datasource_allowed(policy: &RolePolicy, datasource: &str) -> bool {
    policy
        .allowed_datasources
        .iter()
        .any(|d| d == "*" || d == datasource)
}

fn table_allowed(policy: &RolePolicy, datasource: &str, table: &str) -> bool {
    let qualified = format!("{datasource}.{table}");
    let ds_wildcard = format!("{datasource}.*");
    policy
        .allowed_tables
        .iter()
        .any(|t| t == "*" || t == &ds_wildcard || t == &qualified)
}
