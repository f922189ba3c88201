pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "odsadmin")]
#[command(about = "ODS Admin CLI - education organization sync and job status")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Refresh education organizations now, in this process")]
    Refresh {
        #[arg(long, help = "Only this tenant (multi-tenant deployments)")]
        tenant: Option<String>,

        #[arg(long, help = "Only this ODS instance id")]
        instance: Option<i32>,
    },

    #[command(about = "Show the stored status of a job")]
    Status {
        #[arg(help = "Job id, e.g. RefreshEducationOrganizations_default")]
        job_id: String,
    },

    #[command(about = "List configured tenants")]
    Tenants,

    #[command(about = "Encrypt a connection string with the configured key")]
    Encrypt {
        #[arg(help = "Plain text connection string")]
        plaintext: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Refresh { tenant, instance } => commands::refresh::handle(tenant, instance, output_format).await,
        Commands::Status { job_id } => commands::status::handle(job_id, output_format).await,
        Commands::Tenants => commands::tenants::handle(output_format).await,
        Commands::Encrypt { plaintext } => commands::encrypt::handle(plaintext, output_format).await,
    }
}
