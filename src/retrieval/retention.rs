use std::{path::PathBuf, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes `path` once `ttl` has passed. Cancelling `shutdown` drops the
/// pending deletion and leaves the file in place.
pub fn schedule_removal(
  path: PathBuf,
  ttl: Duration,
  shutdown: CancellationToken,
) -> JoinHandle<()> {
  debug!(path = %path.display(), ?ttl, "removal scheduled");

  tokio::spawn(async move {
    tokio::select! {
      _ = shutdown.cancelled() => {
        debug!(path = %path.display(), "removal cancelled");
      }
      _ = tokio::time::sleep(ttl) => {
        match tokio::fs::remove_file(&path).await {
          Ok(()) => info!(path = %path.display(), "expired file removed"),
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
          Err(e) => warn!(path = %path.display(), "failed to remove: {}", e),
        }
      }
    }
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test_util::scratch_dir;

  #[tokio::test]
  async fn test_file_is_removed_after_ttl() {
    let dir = scratch_dir();
    let path = dir.path().join("a.mp4");
    std::fs::write(&path, b"data").unwrap();

    let handle = schedule_removal(
      path.clone(),
      Duration::from_millis(20),
      CancellationToken::new(),
    );
    assert!(path.exists());

    handle.await.unwrap();
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn test_shutdown_cancels_removal() {
    let dir = scratch_dir();
    let path = dir.path().join("a.mp4");
    std::fs::write(&path, b"data").unwrap();

    let shutdown = CancellationToken::new();
    let handle = schedule_removal(
      path.clone(),
      Duration::from_secs(3600),
      shutdown.clone(),
    );
    shutdown.cancel();

    handle.await.unwrap();
    assert!(path.exists());
  }
}
