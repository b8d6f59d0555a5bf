use std::{path::Path, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  config::{self, Config},
  jobs::{Job, JobRegistry},
  locator::Locator,
  manifest,
  retrieval::{
    schedule_removal, Ffmpeg, Progress, RetrievalEngine, RetrievalTask,
  },
  upstream::Upstream,
  video_id::VideoReference,
  Result,
};

/// Accepts video urls, runs each download as its own task and keeps track
/// of them in the job registry.
#[derive(Clone)]
pub struct Downloader {
  inner: Arc<Inner>,
}

struct Inner {
  upstream: Upstream,
  locator: Locator,
  engine: RetrievalEngine,
  registry: JobRegistry,
  download_ttl: fn() -> Option<Duration>,
  shutdown: CancellationToken,
}

impl Downloader {
  pub fn new(config: &Config, shutdown: CancellationToken) -> Result<Self> {
    let upstream = Upstream::new(config.upstream_origin.clone())?;
    let engine = RetrievalEngine::new(
      upstream.clone(),
      Ffmpeg::new(&config.ffmpeg_path),
      config.retrieval_mode,
      &config.download_dir,
      config.segment_concurrency,
    );

    Ok(Self::from_parts(
      upstream,
      Locator::standard(),
      engine,
      config::download_ttl,
      shutdown,
    ))
  }

  pub fn from_parts(
    upstream: Upstream,
    locator: Locator,
    engine: RetrievalEngine,
    download_ttl: fn() -> Option<Duration>,
    shutdown: CancellationToken,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        upstream,
        locator,
        engine,
        registry: JobRegistry::default(),
        download_ttl,
        shutdown,
      }),
    }
  }

  pub fn registry(&self) -> &JobRegistry {
    &self.inner.registry
  }

  pub fn download_dir(&self) -> &Path {
    self.inner.engine.download_dir()
  }

  /// Validates `url` and starts the download in the background. Invalid
  /// urls are rejected here and never become a job.
  pub fn submit(&self, url: &str) -> Result<String> {
    let video = VideoReference::parse(url)?;
    let job_id = self.inner.registry.create();
    info!(
      job_id,
      video_id = %video.id,
      source = %video.source_url,
      "job queued"
    );

    tokio::spawn(self.clone().run(job_id.clone(), video));

    Ok(job_id)
  }

  pub fn status(&self, job_id: &str) -> Option<Job> {
    self.inner.registry.get(job_id)
  }

  /// Drops every scheduled file removal. Called once on shutdown.
  pub fn cancel_pending_removals(&self) {
    self.inner.shutdown.cancel();
  }

  async fn run(self, job_id: String, video: VideoReference) {
    let registry = &self.inner.registry;
    registry.start(&job_id);

    let progress = {
      let registry = registry.clone();
      let job_id = job_id.clone();
      Progress::new(move |done, total| {
        registry.report_progress(&job_id, done, total)
      })
    };

    match self.extract(&video, &progress).await {
      Ok(task) => {
        info!(%job_id, file = %task.output_path.display(), "job done");
        registry.finish(&job_id, task.file_name());

        if let Some(ttl) = (self.inner.download_ttl)() {
          schedule_removal(
            task.output_path,
            ttl,
            self.inner.shutdown.child_token(),
          );
        }
      }
      Err(e) => {
        warn!(%job_id, video_id = %video.id, "job failed: {}", e);
        registry.fail(&job_id, e.user_message());
      }
    }
  }

  /// The whole pipeline for one video: locate the manifest, pick the best
  /// rendition and retrieve it into the download directory.
  pub async fn extract(
    &self,
    video: &VideoReference,
    progress: &Progress,
  ) -> Result<RetrievalTask> {
    let Inner {
      upstream,
      locator,
      engine,
      ..
    } = &*self.inner;

    let located = locator.locate(upstream, &video.id).await?;
    let manifest_url = upstream.endpoint(&located.manifest_url)?;
    let body = upstream.get_bytes(&manifest_url).await?;
    let selected = manifest::select_stream(&manifest_url, &body)?;

    let task = engine.plan(selected, &located.title).await?;
    engine.retrieve(&task, progress).await?;
    Ok(task)
  }
}
