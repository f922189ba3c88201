use serde_json::json;

use crate::cli::utils::output_empty_collection;
use crate::cli::OutputFormat;
use crate::services::tenant_service::{TenantService, TenantsService};

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let config = crate::config::config();
    let tenants = TenantService::from_config(config).get_tenants(false).await?;

    if tenants.is_empty() {
        return output_empty_collection(&output_format, "tenants", "No tenants configured");
    }

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "tenants": tenants }))?);
        }
        OutputFormat::Text => {
            println!("{:<20} {}", "NAME", "MODE");
            println!("{}", "-".repeat(40));
            let mode = if config.app.multi_tenancy { "multi-tenant" } else { "single-tenant" };
            for tenant in &tenants {
                println!("{:<20} {}", tenant.tenant_name, mode);
            }
        }
    }
    Ok(())
}
