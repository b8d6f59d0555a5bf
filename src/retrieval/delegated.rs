use crate::Result;

use super::{Ffmpeg, Progress, RetrievalTask};

/// ffmpeg fetches, decrypts and muxes the rendition on its own.
pub async fn retrieve(
  ffmpeg: &Ffmpeg,
  task: &RetrievalTask,
  progress: &Progress,
) -> Result<()> {
  let args = Ffmpeg::delegated_args(&task.selected_url, &task.output_path);
  ffmpeg.run(args, task.total_duration, progress).await?;

  if task.total_duration > 0.0 {
    progress.report(task.total_duration, task.total_duration);
  }

  Ok(())
}
