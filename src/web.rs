use axum::{
  body::{Body, StreamBody},
  extract::{FromRequest, Path, Query, State},
  headers::ContentType,
  http::{header, Request, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Form, Json, Router, TypedHeader,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{pipeline::Downloader, Error, Result};

pub const HOMEPAGE_HTML: &str = include_str!("../html/index.html");

pub fn router(downloader: Downloader) -> Router {
  Router::new()
    .route("/", get(homepage))
    .route("/health", get(health))
    .route("/download", post(submit_download))
    .route("/progress", get(progress))
    .route("/downloads/:file", get(download_file))
    .with_state(downloader)
}

async fn homepage() -> impl IntoResponse {
  (TypedHeader(ContentType::html()), HOMEPAGE_HTML)
}

async fn health() -> impl IntoResponse {
  "ok".to_owned()
}

#[derive(Debug, Default, Deserialize)]
struct DownloadForm {
  #[serde(default)]
  url: String,
}

/// Accepts the url as a form field or as JSON and answers with the job id
/// right away.
async fn submit_download(
  State(downloader): State<Downloader>,
  request: Request<Body>,
) -> Result<impl IntoResponse> {
  let is_json = request
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map_or(false, |v| v.starts_with("application/json"));

  let form = if is_json {
    Json::<DownloadForm>::from_request(request, &())
      .await
      .map(|Json(form)| form)
      .map_err(|e| Error::InvalidURL(e.body_text()))?
  } else {
    Form::<DownloadForm>::from_request(request, &())
      .await
      .map(|Form(form)| form)
      .map_err(|e| Error::InvalidURL(e.body_text()))?
  };

  let job_id = downloader.submit(&form.url)?;
  Ok(Json(json!({ "job_id": job_id })))
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
  id: Option<String>,
}

async fn progress(
  State(downloader): State<Downloader>,
  Query(query): Query<ProgressQuery>,
) -> Response {
  let Some(id) = query.id.filter(|id| !id.is_empty()) else {
    return (StatusCode::BAD_REQUEST, "missing id").into_response();
  };

  match downloader.status(&id) {
    Some(job) => Json(job).into_response(),
    None => (StatusCode::NOT_FOUND, "not found").into_response(),
  }
}

async fn download_file(
  State(downloader): State<Downloader>,
  Path(file): Path<String>,
) -> Result<Response> {
  // only plain names of finished files, never the segment directories
  if file.is_empty()
    || file.starts_with('.')
    || file.contains(['/', '\\'])
  {
    return Ok((StatusCode::BAD_REQUEST, "invalid file name").into_response());
  }

  let path = downloader.download_dir().join(&file);
  let handle = match tokio::fs::File::open(&path).await {
    Ok(handle) => handle,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "requested file does not exist");
      return Ok((StatusCode::NOT_FOUND, "not found").into_response());
    }
    Err(e) => return Err(e.into()),
  };

  let disposition = format!(
    "attachment; filename=\"{}\"; filename*=UTF-8''{}",
    ascii_fallback(&file),
    url::form_urlencoded::byte_serialize(file.as_bytes())
      .collect::<String>()
      .replace('+', "%20")
  );
  let resp = (
    [
      (header::CONTENT_TYPE, "video/mp4".to_string()),
      (header::CONTENT_DISPOSITION, disposition),
    ],
    StreamBody::new(ReaderStream::new(handle)),
  );

  Ok(resp.into_response())
}

// header values are ASCII only, the full name goes into `filename*`
fn ascii_fallback(name: &str) -> String {
  name
    .chars()
    .map(|c| match c {
      ' '..='~' if c != '"' && c != '\\' => c,
      _ => '_',
    })
    .collect()
}
