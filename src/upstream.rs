use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use url::Url;

use crate::{Error, Result};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
  AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const REFERER: &str = "https://rutube.ru/";
pub const ORIGIN: &str = "https://rutube.ru";
const ACCEPT: &str = "application/json, text/plain, */*";
const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en;q=0.8";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
// how much of an error body ends up in the logs
const EXCERPT_LEN: usize = 2048;

/// HTTP access to the video site. Every request carries the browser-like
/// header set, the site rejects anything without it.
#[derive(Clone)]
pub struct Upstream {
  client: reqwest::Client,
  origin: Url,
}

impl Upstream {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .default_headers(browser_headers())
      .timeout(REQUEST_TIMEOUT)
      .build()?;

    Ok(Self { client, origin })
  }

  /// Absolute url for a path on the video site.
  pub fn endpoint(&self, path_and_query: &str) -> Result<Url> {
    Ok(self.origin.join(path_and_query)?)
  }

  pub async fn get(&self, url: &Url) -> Result<reqwest::Response> {
    let resp = self.send(url).await?;
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }

    Err(Error::UpstreamStatus {
      url: url.to_string(),
      status,
      excerpt: body_excerpt(resp).await,
    })
  }

  pub async fn get_bytes(&self, url: &Url) -> Result<Bytes> {
    Ok(self.get(url).await?.bytes().await?)
  }

  pub async fn get_text(&self, url: &Url) -> Result<String> {
    Ok(self.get(url).await?.text().await?)
  }

  /// Raw request without the status check, for callers that map failures
  /// themselves.
  pub async fn send(&self, url: &Url) -> Result<reqwest::Response> {
    Ok(self.client.get(url.clone()).send().await?)
  }
}

fn browser_headers() -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
  headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
  headers.insert(header::ORIGIN, HeaderValue::from_static(ORIGIN));
  headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
  headers.insert(
    header::ACCEPT_LANGUAGE,
    HeaderValue::from_static(ACCEPT_LANGUAGE),
  );
  headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
  headers.insert(
    "X-Requested-With",
    HeaderValue::from_static("XMLHttpRequest"),
  );
  headers
}

// reads no more of the body than the excerpt keeps
async fn body_excerpt(resp: reqwest::Response) -> String {
  let mut head = Vec::with_capacity(EXCERPT_LEN);
  let mut body = resp.bytes_stream();
  while head.len() < EXCERPT_LEN {
    match body.next().await {
      Some(Ok(chunk)) => {
        let room = EXCERPT_LEN - head.len();
        head.extend_from_slice(&chunk[..chunk.len().min(room)]);
      }
      _ => break,
    }
  }

  let text = String::from_utf8_lossy(&head);
  excerpt(text.trim(), EXCERPT_LEN)
}

/// At most `max_chars` characters of `s`, cut on a char boundary.
pub fn excerpt(s: &str, max_chars: usize) -> String {
  s.chars().take(max_chars).collect()
}
