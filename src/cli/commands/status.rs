use serde_json::json;

use crate::app::AppState;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;

pub async fn handle(job_id: String, output_format: OutputFormat) -> anyhow::Result<()> {
    let state = AppState::from_config(crate::config::config()).await?;

    let Some(record) = state.statuses.get_status(&job_id).await? else {
        anyhow::bail!("job {} has no recorded status", job_id);
    };

    match output_format {
        OutputFormat::Json => output_success(
            &output_format,
            &format!("Job {} is {}", record.job_id, record.status),
            Some(json!(record)),
        ),
        OutputFormat::Text => {
            println!("Job:     {}", record.job_id);
            println!("Status:  {}", record.status);
            if let Some(message) = &record.error_message {
                println!("Error:   {}", message);
            }
            Ok(())
        }
    }
}
