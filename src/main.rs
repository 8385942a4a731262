//! ci-dispatch - CI submission resolution and task selection

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use ci_dispatch::{
    config::{default_config_path, get_data_dir, load_config, load_config_from, save_config, Config},
    db::{init_database, SqliteStore, Store},
    domain::{OAuthToken, Submission, User},
    integrations::{GitHubClient, GitHubClientFactory, VcsClient},
    queue::QueueService,
};

#[derive(Parser)]
#[command(name = "ci-dispatch")]
#[command(author = "ci-dispatch Team")]
#[command(version = "0.1.0")]
#[command(about = "Turns pushes and pull requests into CI queue items")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config dir>/ci-dispatch/config.toml)
    #[arg(short, long, env = "CI_DISPATCH_CONFIG")]
    config: Option<String>,

    /// Database path (defaults to <data dir>/ci-dispatch/data.db)
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a default config file if missing
    Init,
    /// Show configuration info
    Config,
    /// Create a user or replace its token
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long, env = "CI_DISPATCH_USER_TOKEN")]
        token: String,
    },
    /// Register a repository with the host and enable it
    EnableRepo {
        /// Repository as owner/name
        #[arg(long)]
        repo: String,
        /// User whose token acts for the repository
        #[arg(long)]
        owner: String,
    },
    /// Process one submission and enqueue its runs
    Submit {
        #[arg(long, default_value = "")]
        parent: String,
        #[arg(long)]
        fork: String,
        /// Head commit or branch
        #[arg(long)]
        head: String,
        #[arg(long, default_value = "")]
        base: String,
        /// Pull request number
        #[arg(long, default_value_t = 0)]
        ticket: i64,
        #[arg(long, default_value = "")]
        submitted_by: String,
        /// Build every task directory (manual submissions only)
        #[arg(long)]
        all: bool,
        #[arg(long)]
        manual: bool,
    },
    /// Claim the next run on a queue
    Next {
        #[arg(long, default_value = "default")]
        queue: String,
        #[arg(long)]
        running_on: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.clone().into());

    let fmt = if config.logging.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry().with(filter).with(fmt).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(Path::new(path)),
        None => load_config(),
    }
    .context("loading configuration")?;

    init_tracing(&config);

    // Determine database path
    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.database.get_path().to_string_lossy().to_string());

    match cli.command {
        Commands::Init => {
            println!("Initializing database at: {}", db_path);
            init_database(&db_path).await?;
            if !default_config_path().exists() && cli.config.is_none() {
                let path = save_config(&config)?;
                println!("Wrote default configuration to: {}", path.display());
            }
            println!("Database initialized successfully!");
        }
        Commands::Config => {
            println!("ci-dispatch Configuration");
            println!("=========================");
            println!("Data directory: {}", get_data_dir().display());
            println!("Database path: {}", db_path);
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::AddUser { username, token } => {
            let store = SqliteStore::open(&db_path).await?;
            let token = OAuthToken {
                token,
                username: username.clone(),
                scopes: vec![],
            };
            let user = store.put_user(&User::new(username, Some(token))).await?;
            println!("User {} saved (id {})", user.username, user.id);
        }
        Commands::EnableRepo { repo, owner } => {
            let store = SqliteStore::open(&db_path).await?;
            let user = store
                .get_user(&owner)
                .await
                .with_context(|| format!("looking up user {}", owner))?;
            let token = user
                .token
                .with_context(|| format!("user {} has no token", owner))?;

            let client = GitHubClient::new(Some(token.token))
                .with_api_url(config.github.api_url.clone())
                .with_readonly(config.github.readonly);
            let host = client
                .get_repository(&repo)
                .await
                .with_context(|| format!("fetching {} from the host", repo))?;

            let saved = store.enable_repository(&host, &owner).await?;
            println!("Enabled {} (id {})", saved.name, saved.id);
        }
        Commands::Submit {
            parent,
            fork,
            head,
            base,
            ticket,
            submitted_by,
            all,
            manual,
        } => {
            let service = queue_service(&config, &db_path).await?;
            let sub = Submission {
                parent,
                fork,
                head_sha: head,
                base_sha: base,
                ticket_id: ticket,
                submitted_by,
                all,
                manual,
            };

            let result = service.submit(sub).await;
            service.flush_statuses().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Next { queue, running_on } => {
            let service = queue_service(&config, &db_path).await?;
            let result = service.next_queue_item(&queue, &running_on).await;
            service.flush_statuses().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }

    Ok(())
}

async fn queue_service(config: &Config, db_path: &str) -> anyhow::Result<QueueService> {
    let store = Arc::new(SqliteStore::open(db_path).await?);
    let vcs = Arc::new(GitHubClientFactory::new(
        config.github.api_url.clone(),
        config.github.readonly,
    ));

    Ok(QueueService::new(
        store,
        vcs,
        config.queue.status_url.clone(),
        Duration::from_secs(config.queue.submit_timeout_seconds),
    ))
}
