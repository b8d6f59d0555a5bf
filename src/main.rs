use std::{net::SocketAddr, time::Duration};

use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod jobs;
mod locator;
mod manifest;
mod pipeline;
mod retrieval;
mod upstream;
mod video_id;
mod web;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};

use config::Config;
use pipeline::Downloader;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const JANITOR_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let config = Config::from_env();
  info!(?config, "starting");

  let downloader = Downloader::new(&config, CancellationToken::new())?;
  let listen_addr = config.listen_addr;
  let job_retention = config.job_retention;

  let janitor_downloader = downloader.clone();
  let result = Toplevel::new(move |s| async move {
    s.start(SubsystemBuilder::new("server", move |subsys| {
      serve(subsys, listen_addr, downloader)
    }));
    s.start(SubsystemBuilder::new("job-janitor", move |subsys| {
      janitor(subsys, janitor_downloader, job_retention)
    }));
  })
  .catch_signals()
  .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
  .await;

  if let Err(e) = result {
    error!("shutdown was not clean: {}", e);
  }

  Ok(())
}

async fn serve(
  subsys: SubsystemHandle,
  addr: SocketAddr,
  downloader: Downloader,
) -> Result<()> {
  let app = web::router(downloader);

  info!("listening on {}", addr);
  axum::Server::try_bind(&addr)
    .map_err(|e| Error::Server(e.to_string()))?
    .serve(app.into_make_service())
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await
    .map_err(|e| Error::Server(e.to_string()))
}

/// Evicts old finished jobs and, on shutdown, drops pending file removals.
async fn janitor(
  subsys: SubsystemHandle,
  downloader: Downloader,
  retention: Option<Duration>,
) -> Result<()> {
  let mut ticks = tokio::time::interval(JANITOR_PERIOD);

  loop {
    tokio::select! {
      _ = subsys.on_shutdown_requested() => break,
      _ = ticks.tick() => {
        let Some(retention) = retention else { continue };
        let evicted = downloader.registry().evict_finished(retention);
        if evicted > 0 {
          let remaining = downloader.registry().len();
          info!(evicted, remaining, "finished jobs evicted");
        }
      }
    }
  }

  downloader.cancel_pending_removals();
  Ok(())
}
