use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

static VIDEO_PAGE_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^https?://(?:www\.)?rutube\.ru/video/([0-9a-f]{32})/?$")
    .unwrap()
});

/// A video the caller asked for. Never changes after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
  pub id: String,
  pub source_url: String,
}

impl VideoReference {
  pub fn parse(input: &str) -> Result<Self> {
    let source_url = input.trim();
    let id = extract_video_id(source_url)?;

    Ok(Self {
      id,
      source_url: source_url.to_string(),
    })
  }
}

pub fn extract_video_id(input: &str) -> Result<String> {
  VIDEO_PAGE_REGEX
    .captures(input.trim())
    .and_then(|caps| caps.get(1))
    .map(|id| id.as_str().to_ascii_lowercase())
    .ok_or_else(|| Error::InvalidURL(input.to_string()))
}
