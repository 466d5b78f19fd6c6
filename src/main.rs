mod cache;
mod config;
mod error;
mod geometry;
mod html;
mod map;
mod model;
mod pages;
mod server;
mod session;
mod store;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Cli;
use crate::geometry::Reprojector;
use crate::pages::Portal;
use crate::store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, db_settings) = Cli::parse()
        .into_parts()
        .context("invalid portal configuration")?;

    // Pages report a missing setting inline; startup only warns.
    match db_settings.resolve() {
        Ok(target) => info!(?target, "database configured"),
        Err(e) => warn!(error = %e, "database settings incomplete"),
    }

    let reprojector = Reprojector::to_wgs84(&config.source_crs)
        .context("invalid source coordinate system")?;
    let database = Database::new(db_settings);
    let listen = config.listen;
    let portal = Arc::new(Portal::new(
        Arc::new(database.clone()),
        config,
        reprojector,
    ));
    let app = server::router(portal);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let local_addr = listener.local_addr()?;
    eprintln!("data-portal listening on {local_addr}");
    info!(%local_addr, "serving portal");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;

    database.close().await;
    Ok(())
}
