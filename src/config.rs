use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use tracing::warn;
use url::Url;

use crate::retrieval::RetrievalMode;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_UPSTREAM_ORIGIN: &str = "https://rutube.ru";

#[derive(Debug, Clone)]
pub struct Config {
  pub listen_addr: SocketAddr,
  pub download_dir: PathBuf,
  pub upstream_origin: Url,
  pub ffmpeg_path: PathBuf,
  pub retrieval_mode: RetrievalMode,
  pub segment_concurrency: usize,
  // None keeps finished jobs forever
  pub job_retention: Option<Duration>,
}

impl Config {
  /// Defaults, overridden by whichever environment variables are set.
  pub fn from_env() -> Self {
    let d = Self::default();
    let retention_min = d.job_retention.map_or(0, |r| r.as_secs() / 60);

    Self {
      listen_addr: env_or("LISTEN_ADDR", d.listen_addr),
      download_dir: env_or("DOWNLOAD_DIR", d.download_dir),
      upstream_origin: env_or("UPSTREAM_ORIGIN", d.upstream_origin),
      ffmpeg_path: env_or("FFMPEG_PATH", d.ffmpeg_path),
      retrieval_mode: env_or("RETRIEVAL_MODE", d.retrieval_mode),
      segment_concurrency: env_or("SEGMENT_CONCURRENCY", d.segment_concurrency)
        .max(1),
      job_retention: match env_or("JOB_RETENTION_MIN", retention_min) {
        0 => None,
        minutes => Some(Duration::from_secs(minutes * 60)),
      },
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("hard-coded address"),
      download_dir: PathBuf::from("downloads"),
      upstream_origin: Url::parse(DEFAULT_UPSTREAM_ORIGIN)
        .expect("hard-coded url"),
      ffmpeg_path: PathBuf::from("ffmpeg"),
      retrieval_mode: RetrievalMode::default(),
      segment_concurrency: default_concurrency(),
      job_retention: Some(Duration::from_secs(24 * 60 * 60)),
    }
  }
}

/// Output time-to-live, read from `DOWNLOAD_TTL_MIN` every time a retrieval
/// finishes so the value can be changed without a restart.
pub fn download_ttl() -> Option<Duration> {
  parse_ttl_minutes(std::env::var("DOWNLOAD_TTL_MIN").ok().as_deref())
}

fn parse_ttl_minutes(raw: Option<&str>) -> Option<Duration> {
  let minutes: i64 = raw?.trim().parse().ok()?;
  (minutes > 0).then(|| Duration::from_secs(minutes as u64 * 60))
}

fn default_concurrency() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get() * 2)
    .unwrap_or(4)
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
  let Ok(raw) = std::env::var(name) else {
    return default;
  };
  raw.trim().parse().unwrap_or_else(|_| {
    warn!(name, value = %raw, "ignoring invalid environment value");
    default
  })
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_parse_ttl_minutes() {
    assert_eq!(parse_ttl_minutes(None), None);
    assert_eq!(parse_ttl_minutes(Some("")), None);
    assert_eq!(parse_ttl_minutes(Some("abc")), None);
    assert_eq!(parse_ttl_minutes(Some("-5")), None);
    assert_eq!(parse_ttl_minutes(Some("0")), None);
    assert_eq!(
      parse_ttl_minutes(Some(" 15 ")),
      Some(Duration::from_secs(15 * 60))
    );
  }

  #[test]
  fn test_default_concurrency_is_positive() {
    assert!(default_concurrency() >= 2);
  }
}
