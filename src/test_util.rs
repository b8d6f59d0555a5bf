use std::net::SocketAddr;

use axum::Router;
use tempfile::TempDir;
use url::Url;

/// Serves `app` on an ephemeral local port and returns its origin.
pub async fn serve(app: Router) -> Url {
  let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
  let server = axum::Server::bind(&addr).serve(app.into_make_service());
  let addr = server.local_addr();
  tokio::spawn(server);

  Url::parse(&format!("http://{addr}")).unwrap()
}

/// Scratch directory, removed when the returned guard is dropped.
pub fn scratch_dir() -> TempDir {
  tempfile::tempdir().unwrap()
}

/// A stand-in for ffmpeg, written into `dir`. A local `-i` input is copied
/// to the output. A remote input prints one progress line and writes
/// `remote:<url>`, unless the url contains "broken": then it leaves a
/// partial output behind and exits with 1.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &std::path::Path) -> std::path::PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join("fake-ffmpeg");
  std::fs::write(
    &path,
    r#"#!/bin/sh
while [ $# -gt 1 ]; do
  if [ "$1" = "-i" ]; then input="$2"; fi
  shift
done
case "$input" in
  http*broken*) echo partial > "$1"; echo "connection reset" >&2; exit 1 ;;
  http*) echo out_time_us=1500000; printf 'remote:%s' "$input" > "$1" ;;
  *) cp "$input" "$1" ;;
esac
"#,
  )
  .unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
    .unwrap();
  path
}
