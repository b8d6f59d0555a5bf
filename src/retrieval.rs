mod delegated;
mod ffmpeg;
mod manual;
mod naming;
mod retention;

use std::{
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use tracing::{info, warn};
use url::Url;

use crate::{
  manifest::{self, Manifest, Segment},
  upstream::Upstream,
  Error, Result,
};

pub use ffmpeg::Ffmpeg;
pub use naming::output_file_name;
pub use retention::schedule_removal;

/// Progress sink, called with `(done_seconds, total_seconds)`.
/// `total_seconds` is 0 when the duration is unknown.
#[derive(Clone)]
pub struct Progress(Arc<dyn Fn(f64, f64) + Send + Sync>);

impl Progress {
  pub fn new(f: impl Fn(f64, f64) + Send + Sync + 'static) -> Self {
    Self(Arc::new(f))
  }

  pub fn ignore() -> Self {
    Self::new(|_, _| {})
  }

  pub fn report(&self, done: f64, total: f64) {
    (self.0)(done, total)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetrievalMode {
  /// ffmpeg reads the rendition itself.
  #[default]
  Delegated,
  /// Segments are fetched here and ffmpeg only remuxes the result.
  Manual,
}

impl FromStr for RetrievalMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, String> {
    match s.to_ascii_lowercase().as_str() {
      "delegated" | "ffmpeg" => Ok(RetrievalMode::Delegated),
      "manual" | "segments" => Ok(RetrievalMode::Manual),
      other => Err(format!("unknown retrieval mode {other:?}")),
    }
  }
}

/// One selected rendition on its way to a local file.
#[derive(Debug, Clone)]
pub struct RetrievalTask {
  pub selected_url: Url,
  pub output_path: PathBuf,
  // 0 when unknown
  pub total_duration: f64,
  // empty when the media manifest could not be read
  pub segments: Vec<Segment>,
}

impl RetrievalTask {
  pub fn file_name(&self) -> String {
    self
      .output_path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

pub struct RetrievalEngine {
  upstream: Upstream,
  ffmpeg: Ffmpeg,
  mode: RetrievalMode,
  download_dir: PathBuf,
  segment_concurrency: usize,
}

impl RetrievalEngine {
  pub fn new(
    upstream: Upstream,
    ffmpeg: Ffmpeg,
    mode: RetrievalMode,
    download_dir: impl AsRef<Path>,
    segment_concurrency: usize,
  ) -> Self {
    Self {
      upstream,
      ffmpeg,
      mode,
      download_dir: download_dir.as_ref().to_owned(),
      segment_concurrency: segment_concurrency.max(1),
    }
  }

  pub fn download_dir(&self) -> &Path {
    &self.download_dir
  }

  /// Reads the media manifest behind `selected_url` for the segment list
  /// and total duration, and picks the output path. Only manual retrieval
  /// needs the segments; delegated retrieval goes on without them.
  pub async fn plan(
    &self,
    selected_url: Url,
    title: &str,
  ) -> Result<RetrievalTask> {
    tokio::fs::create_dir_all(&self.download_dir).await?;
    let output_path = self.download_dir.join(output_file_name(title));

    let segments = match self.media_segments(&selected_url).await {
      Ok(segments) => segments,
      Err(e) if self.mode == RetrievalMode::Delegated => {
        warn!(%selected_url, "duration unknown: {}", e);
        Vec::new()
      }
      Err(e) => return Err(e),
    };

    Ok(RetrievalTask {
      total_duration: manifest::total_duration(&segments),
      selected_url,
      output_path,
      segments,
    })
  }

  /// Retrieves into a private file next to the output and moves it into
  /// place only on success, so a failed job never touches a file another
  /// job already finished.
  pub async fn retrieve(
    &self,
    task: &RetrievalTask,
    progress: &Progress,
  ) -> Result<()> {
    self.ffmpeg.ensure_available()?;
    info!(
      mode = ?self.mode,
      url = %task.selected_url,
      output = %task.output_path.display(),
      "retrieval started"
    );

    let staged = RetrievalTask {
      output_path: staging_path(&task.output_path),
      ..task.clone()
    };
    let result = match self.mode {
      RetrievalMode::Delegated => {
        delegated::retrieve(&self.ffmpeg, &staged, progress).await
      }
      RetrievalMode::Manual => {
        manual::retrieve(
          &self.upstream,
          &self.ffmpeg,
          &staged,
          self.segment_concurrency,
          progress,
        )
        .await
      }
    };

    match result {
      Ok(()) => {
        tokio::fs::rename(&staged.output_path, &task.output_path).await?;
        Ok(())
      }
      Err(e) => {
        if let Err(e) = tokio::fs::remove_file(&staged.output_path).await {
          if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove partial output: {}", e);
          }
        }
        Err(e)
      }
    }
  }

  async fn media_segments(&self, url: &Url) -> Result<Vec<Segment>> {
    let bytes = self.upstream.get_bytes(url).await?;
    match Manifest::parse(&bytes)? {
      Manifest::Media(media) => manifest::segments(&media, url),
      Manifest::Master(_) => Err(Error::UnrecognizedManifest(
        "expected a media manifest, got a master manifest".into(),
      )),
    }
  }
}

// `.Clip.1a2b3c4d.part.mp4` for `Clip.mp4`, hidden and unique per run
fn staging_path(output: &Path) -> PathBuf {
  let stem = output
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let name = format!(
    ".{stem}.{:08x}.part.{}",
    rand::random::<u32>(),
    naming::EXTENSION
  );
  output.with_file_name(name)
}
