use std::sync::Arc;

use crate::services::education_organization::SyncError;
use crate::services::tenant_service::{TenantConfigurationProvider, TenantsService, DEFAULT_TENANT_NAME};

/// Connection context for one tenant, handed by value to every task that works on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub tenant_identifier: String,
    pub admin_connection_string: String,
    pub security_connection_string: String,
}

/// Decides which tenants a sync run covers
pub struct TenancyRouter {
    multi_tenancy: bool,
    default_admin: Option<String>,
    default_security: Option<String>,
    tenants: Arc<dyn TenantsService>,
    configurations: Arc<dyn TenantConfigurationProvider>,
}

impl TenancyRouter {
    pub fn new(
        multi_tenancy: bool,
        default_admin: Option<String>,
        default_security: Option<String>,
        tenants: Arc<dyn TenantsService>,
        configurations: Arc<dyn TenantConfigurationProvider>,
    ) -> Self {
        Self {
            multi_tenancy,
            default_admin,
            default_security,
            tenants,
            configurations,
        }
    }

    pub fn multi_tenancy(&self) -> bool {
        self.multi_tenancy
    }

    /// Tenants in scope for a run.
    ///
    /// Single-tenant deployments always get the one default scope and ignore
    /// `tenant_name`. With multi-tenancy, listed tenants lacking a configuration are
    /// dropped and the optional filter matches names case-insensitively. No match
    /// is an empty result, not an error.
    pub async fn resolve_scope(&self, tenant_name: Option<&str>) -> Result<Vec<TenantScope>, SyncError> {
        if !self.multi_tenancy {
            let admin = self.default_admin.clone().ok_or(SyncError::MissingAdminConnection)?;
            return Ok(vec![TenantScope {
                tenant_identifier: DEFAULT_TENANT_NAME.to_string(),
                admin_connection_string: admin,
                security_connection_string: self.default_security.clone().unwrap_or_default(),
            }]);
        }

        let configurations = self.configurations.get();
        let scopes = self
            .tenants
            .get_tenants(false)
            .await?
            .into_iter()
            .filter_map(|tenant| configurations.get(&tenant.tenant_name).cloned())
            .filter(|config| match tenant_name {
                Some(name) => config.tenant_identifier.eq_ignore_ascii_case(name),
                None => true,
            })
            .map(|config| TenantScope {
                tenant_identifier: config.tenant_identifier,
                admin_connection_string: config.admin_connection_string,
                security_connection_string: config.security_connection_string,
            })
            .collect();

        Ok(scopes)
    }
}
