//! Thin development entry point. Builds a [`vibemcp_core::Configuration`]
//! from `VIBE_*` environment variables, opens the index, runs a full
//! reindex, and prints a summary. The real transport (RPC framing, auth
//! middleware, CLI subcommands) lives outside this crate; see §6 of the
//! specification this core implements for that boundary.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vibemcp_core::config::{Configuration, MIN_AUTH_TOKEN_LEN};
use vibemcp_core::server::Server;

#[derive(Parser)]
#[command(name = "vibemcp-core")]
#[command(about = "Reindex a vibeMCP workspace and print a summary", long_about = None)]
struct Cli {
    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn env_root() -> anyhow::Result<PathBuf> {
    std::env::var("VIBE_ROOT")
        .map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("VIBE_ROOT must be set"))
}

fn env_db_path(root: &std::path::Path) -> PathBuf {
    std::env::var("VIBE_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| root.join(".vibe").join("index.db"))
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vibemcp_core={}", cli.log_level).into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let root = env_root()?;
        let db_path = env_db_path(&root);

        let auth_token = std::env::var("VIBE_AUTH_TOKEN").ok();
        if let Some(token) = &auth_token {
            if token.len() < MIN_AUTH_TOKEN_LEN {
                anyhow::bail!("VIBE_AUTH_TOKEN must be at least {MIN_AUTH_TOKEN_LEN} characters");
            }
        }

        let config = Configuration::new(root.clone(), db_path)
            .with_read_only(env_flag("VIBE_READ_ONLY", false))
            .with_webhooks_enabled(env_flag("VIBE_WEBHOOKS_ENABLED", true))
            .with_auth_token(auth_token);

        tracing::info!(root = %root.display(), "opening vibeMCP workspace");
        let server = Server::new(config).await?;

        let report_count = server.writer().reindex().await?;
        let projects = server.resources().list_projects().await?;

        println!("Reindexed {report_count} document(s) across {} project(s):", projects.len());
        for project in &projects {
            println!(
                "  - {} ({} open task(s), last updated {:?})",
                project.name, project.open_task_count, project.last_updated
            );
        }

        anyhow::Ok(())
    })
}
