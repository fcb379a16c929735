//! nexcrm-policy - inspect how a role setup resolves.
//!
//! Loads a JSON policy fixture into an in-memory store and answers the access
//! control questions for one of its users.

mod fixture;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use nexcrm_infra::build_service;
use nexcrm_infra::config::EngineConfig;
use nexcrm_infra::store::InMemoryPermissionStore;
use nexcrm_observability::LogConfig;

use crate::fixture::PolicyFixture;

#[derive(Parser)]
#[command(name = "nexcrm-policy")]
#[command(version)]
#[command(about = "Inspect CRM permission resolution against a policy fixture", long_about = None)]
struct Cli {
    /// Policy fixture (JSON)
    #[arg(long, short = 'f', default_value = "policy.json")]
    fixture: PathBuf,

    /// Fixture user to evaluate as
    #[arg(long, short = 'u')]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Coarse capability check (conditions ignored)
    Check {
        resource: String,
        action: String,
    },
    /// Row filter for list/query operations
    Filter {
        resource: String,
        action: String,
        /// Print the predicate tree instead of the query document
        #[arg(long)]
        tree: bool,
    },
    /// Field-level restrictions for a module
    Fields { module: String },
    /// Evaluate the row filter against one record
    Record {
        resource: String,
        action: String,
        /// Record as JSON, e.g. '{"data": {"owner": "..."}}'
        record: String,
    },
    /// Explain a coarse capability decision
    Explain {
        resource: String,
        action: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    nexcrm_observability::init(&LogConfig::from_env());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_env()?;
    let store = Arc::new(InMemoryPermissionStore::new());
    let loaded = PolicyFixture::load(&cli.fixture)?.seed(&store).await?;
    let service = build_service(store, &config);
    let ctx = loaded.context_for(&cli.user)?;

    match cli.command {
        Commands::Check { resource, action } => {
            let allowed = service.check_permission(&ctx, &resource, &action).await?;
            print_json(&serde_json::json!({ "allowed": allowed }))
        }
        Commands::Filter {
            resource,
            action,
            tree,
        } => {
            let filter = service.get_access_filter(&ctx, &resource, &action).await?;
            if tree {
                print_json(&filter)
            } else {
                print_json(&filter.to_document())
            }
        }
        Commands::Fields { module } => {
            let fields = service.get_field_permissions(&ctx, &module).await?;
            print_json(&fields.as_ref().map(|f| f.rules()))
        }
        Commands::Record {
            resource,
            action,
            record,
        } => {
            let record: serde_json::Value =
                serde_json::from_str(&record).context("parse record json")?;
            let allowed = service
                .authorize_record(&ctx, &resource, &action, &record)
                .await?;
            print_json(&serde_json::json!({ "allowed": allowed }))
        }
        Commands::Explain { resource, action } => {
            let explanation = service.explain_permission(&ctx, &resource, &action).await?;
            print_json(&explanation)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
