mod config;
mod database;
mod entities;
mod http_server;
mod logging;
mod ports;
mod services;
mod spotify_rs;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};

use crate::{
    config::Config,
    database::Database,
    entities::task_status::TaskState,
    logging::{init_tracing, shutdown_tracing},
    ports::spotify::SharedSpotifyApi,
    services::{
        spotify::{
            client::SpotifyHttpAdapter,
            credentials::{CredentialStore, SpotifyApiCredentials},
        },
        import::{ImportMode, ImportService},
        tasks::{TaskKind, TaskRequest, TaskRunner},
        track::TrackService,
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_WATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `playlist_watcher=debug`
    #[arg(long, default_value = "info", global = true, env = "PLAYLIST_WATCHER_LOG")]
    log_level: String,

    /// Export spans to this OTLP/gRPC collector
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    spotify_client_id: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    spotify_client_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP server
    Serve {
        /// The port to run the server on
        #[arg(short, long, default_value = "3000", env = "PLAYLIST_WATCHER_HTTP_PORT")]
        port: u16,
    },
    /// Search Spotify for playlists and store them
    Discover {
        /// Override the configured limit per keyword
        #[arg(long)]
        max_per_keyword: Option<usize>,
        /// Override the configured limit for the whole run
        #[arg(long)]
        max_total: Option<usize>,
    },
    /// Look for the tracked tracks in public playlists
    Scan,
    /// Start tracking a track
    AddTrack {
        /// Spotify track id
        #[arg(long)]
        spotify_id: String,
        #[arg(long)]
        name: String,
        /// Artist name, used to narrow playlist searches
        #[arg(long)]
        artist: Option<String>,
    },
    /// Load a JSON document shaped like the appearance export
    Import {
        file: PathBuf,
        /// `complete` fills empty fields, `overwrite` replaces them
        #[arg(long, default_value = "complete")]
        mode: ImportMode,
        /// The file holds playlists rather than appearances
        #[arg(long)]
        playlists: bool,
        /// Print what would change without saving it
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the status of a background task
    Status {
        /// `discover` or `scan`
        name: TaskKind,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

fn build_runner(args: &Args, config: Arc<Config>, db: Arc<Database>) -> Result<TaskRunner> {
    let (Some(client_id), Some(client_secret)) = (
        args.spotify_client_id.clone(),
        args.spotify_client_secret.clone(),
    ) else {
        return Err(color_eyre::eyre::eyre!(
            "Spotify credentials are required. Set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET"
        ));
    };

    let credentials = Arc::new(CredentialStore::new(
        db.clone(),
        config.spotify.accounts_url.clone(),
        SpotifyApiCredentials::new(client_id, client_secret),
    ));
    let api: SharedSpotifyApi = Arc::new(SpotifyHttpAdapter::new(&config, credentials)?);
    Ok(TaskRunner::new(db, api, config))
}

async fn run_inline(runner: &TaskRunner, request: TaskRequest) -> Result<()> {
    let kind = request.kind();
    let state = runner.run_inline(request).await?;
    let view = runner.status().view(kind.name()).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    if state == TaskState::Error {
        return Err(color_eyre::eyre::eyre!(
            "{kind} failed: {}",
            view.message.unwrap_or_default()
        ));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(args.otlp_endpoint.as_deref(), &args.log_level)?;

    let result = run(args).await;
    shutdown_tracing(tracer_provider);
    result
}

async fn run(args: Args) -> Result<()> {
    tracing::debug!("Loading configuration");
    let config = {
        if let Some(config) = &args.config {
            Config::from_file(config)
        } else {
            Config::load()
        }
    }
    .with_context(|| "Failed to load playlist-watcher config")?;

    if let Commands::Config(config_commands) = &args.command {
        match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                tracing::info!(path = %path.display(), "Default config created");
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        }
        return Ok(());
    }

    tracing::debug!(path = %config.database_path().display(), "Opening database");
    let db = Arc::new(Database::open(&config.database_path()).await?);
    let config = Arc::new(config);

    match &args.command {
        Commands::Serve { port } => {
            let task_runner = build_runner(&args, config, db.clone())?;
            tracing::info!(port, "Starting HTTP server");
            http_server::app::start(
                *port,
                Arc::new(http_server::state::AppState { db, task_runner }),
            )
            .await?;
        }
        Commands::Discover {
            max_per_keyword,
            max_total,
        } => {
            let runner = build_runner(&args, config, db)?;
            let mut request = runner.default_request(TaskKind::Discover);
            if let TaskRequest::Discover(options) = &mut request {
                if let Some(max) = max_per_keyword {
                    options.max_per_keyword = *max;
                }
                if let Some(max) = max_total {
                    options.max_total = *max;
                }
            }
            run_inline(&runner, request).await?;
        }
        Commands::Scan => {
            let runner = build_runner(&args, config, db)?;
            run_inline(&runner, runner.default_request(TaskKind::Scan)).await?;
        }
        Commands::AddTrack {
            spotify_id,
            name,
            artist,
        } => {
            let track = TrackService::new(db)
                .create(spotify_id.clone(), name.clone(), artist.clone())
                .await?;
            tracing::info!(id = track.id, spotify_id = %track.spotify_id, "Track added");
        }
        Commands::Import {
            file,
            mode,
            playlists,
            dry_run,
        } => {
            let document = tokio::fs::read_to_string(file)
                .await
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            let service = ImportService::new(db);
            let summary = if *playlists {
                service
                    .import_playlists(serde_json::from_str(&document)?, *mode, *dry_run)
                    .await?
            } else {
                service
                    .import_appearances(serde_json::from_str(&document)?, *mode, *dry_run)
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status { name } => {
            let view = services::tasks::status::TaskStatusStore::new(db)
                .view(name.name())
                .await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
