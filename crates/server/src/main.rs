//! AppDistrib server binary.

use anyhow::{Context, Result};
use appdistrib_core::config::{AppConfig, ProjectSeed};
use appdistrib_server::bootstrap::{
    create_project, create_token, ensure_project_seeds, hold_asset, release_asset,
};
use appdistrib_server::gc::spawn_gc_tasks;
use appdistrib_server::{AppState, create_router};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_PREFIX: &str = "APPDISTRIB_";
const CONFIG_ENV: &str = "APPDISTRIB_CONFIG";

/// AppDistrib - build artifact ingestion server
#[derive(Parser, Debug)]
#[command(name = "appdistribd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = CONFIG_ENV,
        default_value = "config/server.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default)
    Serve,
    /// Create a project, and its organization if needed
    CreateProject {
        #[arg(long)]
        organization: String,
        #[arg(long)]
        project: String,
        /// Display name (defaults to the project id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Ephemeral builds to retain (defaults to retention.default_historical)
        #[arg(long)]
        historical: Option<u32>,
    },
    /// Mint an upload token for a project and print it once
    CreateToken {
        #[arg(long)]
        organization: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    /// Protect an asset from garbage collection
    HoldAsset {
        /// Asset id (hex) or storage key (base64)
        asset: String,
        #[arg(long)]
        organization: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Clear the hold on an asset
    ReleaseAsset {
        /// Asset id (hex) or storage key (base64)
        asset: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CreateProject {
            organization,
            project,
            name,
            description,
            historical,
        } => {
            let metadata = appdistrib_metadata::from_config(&config.metadata)
                .await
                .context("failed to initialize metadata store")?;
            let seed = ProjectSeed {
                organization,
                organization_name: None,
                project,
                name,
                description,
                historical,
            };
            let row = create_project(
                metadata.as_ref(),
                &seed,
                config.retention.default_historical,
            )
            .await?;
            println!(
                "created project {}/{} (historical = {})",
                row.organization_id, row.project_id, row.historical
            );
            Ok(())
        }
        Command::CreateToken {
            organization,
            project,
            description,
            expires_in_days,
        } => {
            let metadata = appdistrib_metadata::from_config(&config.metadata)
                .await
                .context("failed to initialize metadata store")?;
            let token = create_token(
                metadata.as_ref(),
                &config.auth.secret_key,
                &organization,
                &project,
                description,
                expires_in_days,
            )
            .await?;
            // The plaintext is not stored anywhere; this is the only copy.
            println!("{}", token.plaintext);
            Ok(())
        }
        Command::HoldAsset {
            asset,
            organization,
            project,
        } => {
            let metadata = appdistrib_metadata::from_config(&config.metadata)
                .await
                .context("failed to initialize metadata store")?;
            let asset_id =
                hold_asset(metadata.as_ref(), &asset, &organization, project.as_deref()).await?;
            println!("held asset {asset_id}");
            Ok(())
        }
        Command::ReleaseAsset { asset } => {
            let metadata = appdistrib_metadata::from_config(&config.metadata)
                .await
                .context("failed to initialize metadata store")?;
            let asset_id = release_asset(metadata.as_ref(), &asset).await?;
            println!("released asset {asset_id}");
            Ok(())
        }
    }
}

/// Load configuration from an optional TOML file overlaid with
/// `APPDISTRIB_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_ENV);

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: appdistribd --config /path/to/config.toml\n  \
             2. Environment variables: APPDISTRIB_STORAGE__SECRET_KEY=... \
             APPDISTRIB_AUTH__SECRET_KEY=... appdistribd\n\n\
             Set APPDISTRIB_CONFIG to change the default config file path."
        );
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn serve(config: AppConfig) -> Result<()> {
    tracing::info!("AppDistrib v{}", env!("CARGO_PKG_VERSION"));

    appdistrib_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = appdistrib_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = appdistrib_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_project_seeds(metadata.as_ref(), &config)
        .await
        .context("failed to seed projects")?;

    let state = AppState::new(config.clone(), storage, metadata);

    if config.gc.enabled {
        let _gc_handles = spawn_gc_tasks(state.clone());
    } else {
        tracing::info!("Garbage collection disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_subcommand_is_serve() {
        let args = Args::try_parse_from(["appdistribd"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config, "config/server.toml");
    }

    #[test]
    fn test_create_token_args() {
        let args = Args::try_parse_from([
            "appdistribd",
            "create-token",
            "--organization",
            "acme",
            "--project",
            "rocket",
            "--expires-in-days",
            "30",
        ])
        .unwrap();
        match args.command {
            Some(Command::CreateToken {
                organization,
                project,
                expires_in_days,
                ..
            }) => {
                assert_eq!(organization, "acme");
                assert_eq!(project, "rocket");
                assert_eq!(expires_in_days, Some(30));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_hold_asset_args() {
        let args = Args::try_parse_from([
            "appdistribd",
            "hold-asset",
            "ab12",
            "--organization",
            "acme",
        ])
        .unwrap();
        match args.command {
            Some(Command::HoldAsset {
                asset,
                organization,
                project,
            }) => {
                assert_eq!(asset, "ab12");
                assert_eq!(organization, "acme");
                assert!(project.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = Args::try_parse_from(["appdistribd", "release-asset", "ab12"]).unwrap();
        assert!(matches!(args.command, Some(Command::ReleaseAsset { asset }) if asset == "ab12"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[storage]
path = "/tmp/appdistrib"
secret_key = "s"

[auth]
secret_key = "a"

[[projects]]
organization = "acme"
project = "rocket"
historical = 5
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.storage.secret_key, "s");
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].historical, Some(5));
        assert!(config.validate().is_ok());
    }
}
