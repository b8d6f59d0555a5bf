use std::{
  collections::VecDeque,
  ffi::OsString,
  path::{Path, PathBuf},
  process::Stdio,
};

use tokio::{
  io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader},
  process::Command,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
  upstream::{ORIGIN, REFERER, USER_AGENT},
  Error, Result,
};

use super::Progress;

// progress lines are short, anything longer is noise
const MAX_LINE_LEN: u64 = 4096;
// stderr lines kept for the log when ffmpeg fails
const STDERR_TAIL: usize = 20;
// ffmpeg's -rw_timeout is in microseconds
const READ_TIMEOUT_US: &str = "30000000";

/// The external media tool. Handles decryption, reconnects and muxing.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
  path: PathBuf,
}

impl Ffmpeg {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn ensure_available(&self) -> Result<()> {
    which::which(&self.path).map(|_| ()).map_err(|e| {
      Error::RetrievalFailed(format!("{}: {e}", self.path.display()))
    })
  }

  /// Read the rendition directly over HTTP and copy the streams into `output`.
  pub fn delegated_args(input: &Url, output: &Path) -> Vec<OsString> {
    let headers = format!("Origin: {ORIGIN}\r\n");
    let mut args = common_args();
    args.extend(
      [
        "-protocol_whitelist",
        "file,http,https,tcp,tls,crypto",
        "-allowed_extensions",
        "ALL",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_on_network_error",
        "1",
        "-rw_timeout",
        READ_TIMEOUT_US,
        "-user_agent",
        USER_AGENT,
        "-referer",
        REFERER,
        "-headers",
        headers.as_str(),
        "-i",
        input.as_str(),
        "-c",
        "copy",
      ]
      .map(OsString::from),
    );
    args.push(output.into());
    args
  }

  /// Remux an already downloaded stream without re-encoding.
  pub fn remux_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args = common_args();
    args.push("-i".into());
    args.push(input.into());
    args.extend(["-c", "copy"].map(OsString::from));
    args.push(output.into());
    args
  }

  /// Runs ffmpeg to completion, reporting `out_time` from its progress
  /// stream as `(seconds, total)`.
  pub async fn run(
    &self,
    args: Vec<OsString>,
    total: f64,
    progress: &Progress,
  ) -> Result<()> {
    let mut child = Command::new(&self.path)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| {
        Error::RetrievalFailed(format!(
          "failed to start {}: {e}",
          self.path.display()
        ))
      })?;

    let stdout = child
      .stdout
      .take()
      .ok_or(Error::Missing("ffmpeg stdout not captured"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or(Error::Missing("ffmpeg stderr not captured"))?;
    let stderr_tail = tokio::spawn(collect_tail(BufReader::new(stderr)));

    let mut stdout = BufReader::new(stdout);
    let mut line = Vec::new();
    while next_line(&mut stdout, &mut line).await.unwrap_or(false) {
      let line = String::from_utf8_lossy(&line);
      if let Some(done) = parse_progress_line(&line) {
        progress.report(done, total);
      }
    }

    let status = child.wait().await.map_err(|e| {
      Error::RetrievalFailed(format!("failed to wait for ffmpeg: {e}"))
    })?;
    let tail = stderr_tail.await.unwrap_or_default();

    if !status.success() {
      warn!(%status, "ffmpeg failed:\n{}", tail.join("\n"));
      return Err(Error::RetrievalFailed(format!(
        "ffmpeg exited with {status}"
      )));
    }

    Ok(())
  }
}

fn common_args() -> Vec<OsString> {
  [
    "-y",
    "-hide_banner",
    "-loglevel",
    "warning",
    "-nostats",
    "-stats_period",
    "1",
    "-progress",
    "pipe:1",
  ]
  .map(OsString::from)
  .to_vec()
}

/// Elapsed output time in seconds from one line of ffmpeg's `-progress`
/// output. Every other line is ignored.
pub fn parse_progress_line(line: &str) -> Option<f64> {
  let (key, value) = line.trim().split_once('=')?;
  match key {
    // both are microseconds, despite the name of the first one
    "out_time_ms" | "out_time_us" => {
      let micros: f64 = value.trim().parse().ok()?;
      micros.is_finite().then(|| (micros / 1_000_000.0).max(0.0))
    }
    _ => None,
  }
}

async fn next_line<R>(
  reader: &mut R,
  buf: &mut Vec<u8>,
) -> std::io::Result<bool>
where
  R: AsyncBufRead + Unpin,
{
  buf.clear();
  let n = (&mut *reader)
    .take(MAX_LINE_LEN)
    .read_until(b'\n', buf)
    .await?;
  Ok(n > 0)
}

async fn collect_tail<R>(mut reader: R) -> Vec<String>
where
  R: AsyncBufRead + Unpin,
{
  let mut tail = VecDeque::with_capacity(STDERR_TAIL);
  let mut buf = Vec::new();
  while next_line(&mut reader, &mut buf).await.unwrap_or(false) {
    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
    debug!(target: "ffmpeg", "{}", line);
    if tail.len() == STDERR_TAIL {
      tail.pop_front();
    }
    tail.push_back(line);
  }
  tail.into()
}

#[cfg(test)]
mod test {
  use std::sync::{Arc, Mutex};

  use super::*;

  #[test]
  fn test_parse_progress_line() {
    assert_eq!(parse_progress_line("out_time_ms=1500000"), Some(1.5));
    assert_eq!(parse_progress_line("out_time_us=2000000\n"), Some(2.0));
    assert_eq!(parse_progress_line("out_time_ms=-33000"), Some(0.0));
    assert_eq!(parse_progress_line("out_time_ms=N/A"), None);
    assert_eq!(parse_progress_line("out_time=00:00:01.500000"), None);
    assert_eq!(parse_progress_line("progress=continue"), None);
    assert_eq!(parse_progress_line("frame=12"), None);
    assert_eq!(parse_progress_line("garbage"), None);
    assert_eq!(parse_progress_line(""), None);
  }

  #[test]
  fn test_delegated_args() {
    let url = Url::parse("https://cdn/v/720.m3u8?s=1").unwrap();
    let args = Ffmpeg::delegated_args(&url, Path::new("downloads/Clip.mp4"));
    let args: Vec<_> = args.iter().map(|a| a.to_string_lossy()).collect();

    let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
    assert_eq!(args[pos("-i") + 1], url.as_str());
    assert_eq!(args[pos("-c") + 1], "copy");
    assert_eq!(args[pos("-progress") + 1], "pipe:1");
    assert_eq!(args[pos("-reconnect") + 1], "1");
    assert_eq!(args[pos("-rw_timeout") + 1], READ_TIMEOUT_US);
    assert_eq!(args[pos("-user_agent") + 1], USER_AGENT);
    assert!(args[pos("-protocol_whitelist") + 1].contains("https"));
    // input options have to come before the input
    assert!(pos("-reconnect") < pos("-i"));
    assert_eq!(args.last().unwrap(), "downloads/Clip.mp4");
  }

  #[tokio::test]
  async fn test_next_line_is_bounded() {
    let long = "x".repeat(MAX_LINE_LEN as usize + 10);
    let input = format!("out_time_ms=1000000\n{long}\nprogress=end\n");
    let mut reader = BufReader::new(input.as_bytes());

    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while next_line(&mut reader, &mut buf).await.unwrap() {
      assert!(buf.len() as u64 <= MAX_LINE_LEN);
      lines.push(String::from_utf8_lossy(&buf).into_owned());
    }

    assert_eq!(lines.first().unwrap(), "out_time_ms=1000000\n");
    assert_eq!(lines.last().unwrap(), "progress=end\n");
    assert_eq!(lines.len(), 4);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_non_zero_exit_is_retrieval_failure() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let progress = Progress::new(move |_, _| *counter.lock().unwrap() += 1);
    let result = Ffmpeg::new("false").run(Vec::new(), 10.0, &progress).await;

    assert!(matches!(result, Err(Error::RetrievalFailed(_))));
    assert_eq!(*calls.lock().unwrap(), 0);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_progress_is_read_from_stdout() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let progress = Progress::new(move |done, total| {
      record.lock().unwrap().push((done, total))
    });
    let ffmpeg = Ffmpeg::new("sh");
    let script = "printf 'frame=1\\nout_time_ms=1000000\\nout_time_ms=N/A\\n\
                  out_time_us=2500000\\nprogress=end\\n'";
    let args = ["-c", script].map(OsString::from).to_vec();

    ffmpeg.run(args, 5.0, &progress).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(1.0, 5.0), (2.5, 5.0)]);
  }

  #[test]
  fn test_missing_executable() {
    let ffmpeg = Ffmpeg::new("definitely-not-a-real-ffmpeg-binary");
    assert!(matches!(
      ffmpeg.ensure_available(),
      Err(Error::RetrievalFailed(_))
    ));
  }

  #[cfg(unix)]
  #[test]
  fn test_file_without_exec_bit_is_not_available() {
    use std::os::unix::fs::PermissionsExt;

    let dir = crate::test_util::scratch_dir();
    let path = dir.path().join("ffmpeg");
    std::fs::write(&path, "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
      .unwrap();
    assert!(matches!(
      Ffmpeg::new(&path).ensure_available(),
      Err(Error::RetrievalFailed(_))
    ));

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
      .unwrap();
    assert!(Ffmpeg::new(&path).ensure_available().is_ok());
  }
}
