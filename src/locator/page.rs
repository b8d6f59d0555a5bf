use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{upstream::Upstream, Error, Result};

use super::{ManifestReference, ManifestSource};

static BALANCER_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#""video_balancer"\s*:\s*\{[^}]+\}"#).unwrap());
static M3U8_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#""m3u8"\s*:\s*"([^"]+)""#).unwrap());
static TITLE_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#""title"\s*:\s*"([^"]+)""#).unwrap());

// last resort: the json inlined into the html video page
pub struct PageScrape;

#[async_trait]
impl ManifestSource for PageScrape {
  fn name(&self) -> &'static str {
    "page"
  }

  async fn locate(
    &self,
    upstream: &Upstream,
    video_id: &str,
  ) -> Result<ManifestReference> {
    let url = upstream.endpoint(&format!("/video/{video_id}/"))?;
    let html = upstream.get_text(&url).await?;

    scrape(&html)
  }
}

fn scrape(html: &str) -> Result<ManifestReference> {
  let balancer = BALANCER_REGEX
    .find(html)
    .ok_or(Error::Missing("video_balancer not found in page"))?;

  let manifest_url = M3U8_REGEX
    .captures(balancer.as_str())
    .and_then(|caps| caps.get(1))
    .map(|m| unescape(m.as_str()))
    .ok_or(Error::Missing("m3u8 not found in video_balancer"))?;

  // not having a title is fine
  let title = TITLE_REGEX
    .captures(html)
    .and_then(|caps| caps.get(1))
    .map(|m| unescape(m.as_str()))
    .unwrap_or_default();

  Ok(ManifestReference {
    title,
    manifest_url,
  })
}

// the page json-escapes ampersands and slashes
fn unescape(s: &str) -> String {
  s.replace(r"\u0026", "&").replace(r"\/", "/")
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_scrape_page() {
    let html = r#"<script>{"id":"x","title":"Кино \u0026 музыка",
      "video_balancer":{"default":"https:\/\/cdn\/d","m3u8":"https:\/\/cdn\/v.m3u8?s=1\u0026e=2"}}
      </script>"#;

    let manifest = scrape(html).unwrap();
    assert_eq!(manifest.manifest_url, "https://cdn/v.m3u8?s=1&e=2");
    assert_eq!(manifest.title, "Кино & музыка");
  }

  #[test]
  fn test_scrape_without_title() {
    let html = r#"{"video_balancer": {"m3u8": "https://cdn/v.m3u8"}}"#;
    let manifest = scrape(html).unwrap();
    assert_eq!(manifest.manifest_url, "https://cdn/v.m3u8");
    assert_eq!(manifest.title, "");
  }

  #[test]
  fn test_scrape_failures() {
    assert!(scrape("<html>nothing</html>").is_err());
    assert!(
      scrape(r#"{"video_balancer":{"mpd":"https://cdn/v.mpd"}}"#).is_err()
    );
  }
}
