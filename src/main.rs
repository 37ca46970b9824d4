use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    db::{MemoryStore, RecordStore, SqliteStore},
    source::{PositionSource, RadioSource, ReplayPosition, ReplayRadio},
    status::Activity,
};

mod api;
mod campaign;
mod config;
mod coordinator;
mod db;
mod error;
mod export;
mod model;
mod results;
mod scheduler;
mod source;
mod status;
mod tracker;

#[cfg(test)]
mod testing;

#[derive(Debug, Parser)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep observations in memory instead of the configured database.
    #[arg(long)]
    ephemeral: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        port: Option<u16>,
    },
    /// Run one sampling campaign at the current location and print its outcome.
    Survey {
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        samples: Option<u32>,
    },
    Results {
        #[arg(long)]
        json: bool,
    },
    Export,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let path = match cli.config.as_deref() {
        Some(x) => x,
        None => Path::new("config.toml"),
    };
    let mut config = config::load(path)?;

    let store: Arc<dyn RecordStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::connect(&config.database_url).await?)
    };

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.http_port);
            serve(config, store, port).await?;
        }
        Command::Survey { label, samples } => {
            if let Some(samples) = samples {
                config.scan.samples = samples;
            }
            survey(config, store, label).await?;
        }
        Command::Results { json } => {
            let summary = results::summarize(store.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", results::Report(&summary));
            }
        }
        Command::Export => export::run(store.as_ref()).await?,
        Command::Clear => {
            let deleted = store.clear_all().await?;
            println!("Deleted {deleted} observations");
        }
    };

    Ok(())
}

fn sources(config: &Config) -> Result<(Arc<dyn RadioSource>, Arc<dyn PositionSource>)> {
    let radio = ReplayRadio::load(&config.radio).context("Failed to load radio scans")?;
    let position =
        ReplayPosition::load(&config.position).context("Failed to load position fixes")?;
    Ok((Arc::new(radio), Arc::new(position)))
}

async fn serve(config: Config, store: Arc<dyn RecordStore>, port: u16) -> Result<()> {
    let (radio, position) = sources(&config)?;
    let (handle, mut labels, task) =
        coordinator::spawn(radio, position, store.clone(), config.scan.clone());

    // answered over HTTP; the status endpoint carries awaiting_label meanwhile
    tokio::spawn(async move {
        while let Some(request) = labels.recv().await {
            info!(location = %request.location_key, "waiting for POST /v1/label");
        }
    });

    let state = handle.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(store.clone()))
            .configure(api::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn survey(config: Config, store: Arc<dyn RecordStore>, label: Option<String>) -> Result<()> {
    let (radio, position) = sources(&config)?;
    let (handle, mut labels, task) = coordinator::spawn(radio, position, store, config.scan);

    let answers = handle.clone();
    tokio::spawn(async move {
        while let Some(request) = labels.recv().await {
            if answers
                .label(request.location_key, label.clone())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut status = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|s| s.can_start() && s.location.key.is_some() && !s.awaiting_label),
    )
    .await
    .with_context(|| format!("Not ready to scan:\n{}", handle.status()))??;

    handle.start().await?;
    let outcome = status
        .wait_for(|s| {
            matches!(
                s.activity,
                Activity::Complete { .. } | Activity::Aborted { .. }
            )
        })
        .await?
        .clone();
    println!("{outcome}");

    handle.shutdown().await?;
    task.await?;

    if let Activity::Aborted { reason, .. } = outcome.activity {
        warn!(%reason, "survey aborted");
        bail!("survey aborted: {reason}");
    }
    Ok(())
}
