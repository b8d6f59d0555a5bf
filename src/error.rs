use axum::response::{IntoResponse, Response};
use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("invalid video url: {0}")]
  InvalidURL(String),

  #[error("manifest not found for {video_id}: {last_error}")]
  ManifestNotFound {
    video_id: String,
    last_error: String,
  },

  #[error("unrecognized manifest, excerpt: {0:?}")]
  UnrecognizedManifest(String),

  #[error("segment {index} failed: {reason}")]
  SegmentFetchFailed { index: usize, reason: String },

  #[error("retrieval failed: {0}")]
  RetrievalFailed(String),

  #[error("storage error: {0}")]
  StorageError(#[from] std::io::Error),

  #[error("upstream {url} responded with {status}: {excerpt}")]
  UpstreamStatus {
    url: String,
    status: StatusCode,
    excerpt: String,
  },

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("url error: {0}")]
  Url(#[from] url::ParseError),

  #[error("server error: {0}")]
  Server(String),

  #[error("{0}")]
  Missing(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Text that is safe to show to whoever submitted the job. Status codes,
  /// upstream bodies and tool output stay in the logs.
  pub fn user_message(&self) -> &'static str {
    match self {
      Error::InvalidURL(_) => "Please enter a valid RuTube video link.",
      Error::ManifestNotFound { .. } => {
        "Could not find a playable stream for this video."
      }
      Error::UnrecognizedManifest(_) => {
        "The video stream has an unsupported format."
      }
      Error::SegmentFetchFailed { .. } => {
        "A part of the video could not be downloaded. Please try again later."
      }
      Error::StorageError(_) => "The video could not be saved on the server.",
      _ => "Failed to extract the video. Please try again later.",
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match self {
      Error::InvalidURL(_) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, self.user_message()).into_response()
  }
}
