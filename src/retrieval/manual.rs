use std::path::{Path, PathBuf};

use futures::{stream, StreamExt, TryStreamExt};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{manifest::Segment, upstream::Upstream, Error, Result};

use super::{Ffmpeg, Progress, RetrievalTask};

/// Fetches the segments here with a bounded number of requests in flight,
/// joins them in manifest order and lets ffmpeg remux the joined stream.
pub async fn retrieve(
  upstream: &Upstream,
  ffmpeg: &Ffmpeg,
  task: &RetrievalTask,
  concurrency: usize,
  progress: &Progress,
) -> Result<()> {
  if task.segments.is_empty() {
    return Err(Error::RetrievalFailed(
      "media manifest has no segments".into(),
    ));
  }

  let parts_dir = parts_dir(&task.output_path);
  tokio::fs::create_dir_all(&parts_dir).await?;

  let result: Result<()> = async {
    let parts = fetch_segments(
      upstream,
      &task.segments,
      &parts_dir,
      concurrency,
      task.total_duration,
      progress,
    )
    .await?;

    let joined = parts_dir.join("joined.ts");
    concatenate(&parts, &joined).await?;

    let args = Ffmpeg::remux_args(&joined, &task.output_path);
    ffmpeg.run(args, 0.0, &Progress::ignore()).await?;
    progress.report(task.total_duration, task.total_duration);

    Ok(())
  }
  .await;

  if let Err(e) = tokio::fs::remove_dir_all(&parts_dir).await {
    warn!(dir = %parts_dir.display(), "failed to clean up segments: {}", e);
  }

  result
}

/// Downloads every segment into its own numbered file under `dir`. The
/// first failure ends the whole download; segments still in flight at that
/// point are dropped. Returns the files in manifest order.
pub async fn fetch_segments(
  upstream: &Upstream,
  segments: &[Segment],
  dir: &Path,
  concurrency: usize,
  total: f64,
  progress: &Progress,
) -> Result<Vec<PathBuf>> {
  let pending: Vec<_> = segments
    .iter()
    .enumerate()
    .map(|(index, segment)| fetch_segment(upstream, index, segment, dir))
    .collect();
  let mut fetches =
    stream::iter(pending).buffer_unordered(concurrency.max(1));

  let mut done = 0.0;
  let mut fetched = 0;
  while let Some(duration) = fetches.try_next().await? {
    done += duration;
    fetched += 1;
    progress.report(done, total);
  }
  info!(segments = fetched, "all segments fetched");

  Ok((0..segments.len()).map(|i| part_path(dir, i)).collect())
}

async fn fetch_segment(
  upstream: &Upstream,
  index: usize,
  segment: &Segment,
  dir: &Path,
) -> Result<f64> {
  let failed = |reason: String| Error::SegmentFetchFailed { index, reason };

  let resp = upstream
    .send(&segment.url)
    .await
    .map_err(|e| failed(e.to_string()))?;
  if !resp.status().is_success() {
    return Err(failed(format!("status {}", resp.status())));
  }

  let path = part_path(dir, index);
  let mut file = File::create(&path).await?;
  let mut body = resp.bytes_stream();
  while let Some(chunk) = body.next().await {
    let chunk = chunk.map_err(|e| failed(e.to_string()))?;
    file.write_all(&chunk).await?;
  }
  file.flush().await?;

  debug!(index, "segment fetched");
  Ok(segment.duration)
}

/// Appends `parts` to a fresh file at `output`, in the given order.
pub async fn concatenate(parts: &[PathBuf], output: &Path) -> Result<()> {
  let mut out = File::create(output).await?;
  for part in parts {
    let mut part = File::open(part).await?;
    tokio::io::copy(&mut part, &mut out).await?;
  }
  out.flush().await?;
  Ok(())
}

fn part_path(dir: &Path, index: usize) -> PathBuf {
  dir.join(format!("{index:06}.ts"))
}

// unique per run, so two jobs with the same title never share segments
fn parts_dir(output: &Path) -> PathBuf {
  let stem = output
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let name = format!(".{stem}.{:08x}.parts", rand::random::<u32>());
  output.with_file_name(name)
}
