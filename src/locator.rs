mod init;
mod options;
mod page;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tracing::{info, warn};

use crate::{upstream::Upstream, Error, Result};

pub use init::InitEndpoint;
pub use options::OptionsEndpoint;
pub use page::PageScrape;

/// Where the HLS manifest of a video lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestReference {
  // best effort, may be empty
  pub title: String,
  pub manifest_url: String,
}

/// One way of asking the video site for a manifest. The site's API shape is
/// undocumented, so there are several and they are tried in order.
#[async_trait]
pub trait ManifestSource: Send + Sync {
  fn name(&self) -> &'static str;

  async fn locate(
    &self,
    upstream: &Upstream,
    video_id: &str,
  ) -> Result<ManifestReference>;
}

pub struct Locator {
  sources: Vec<Box<dyn ManifestSource>>,
}

impl Locator {
  pub fn new(sources: Vec<Box<dyn ManifestSource>>) -> Self {
    Self { sources }
  }

  /// Init endpoint, then the play options endpoint, then the video page.
  pub fn standard() -> Self {
    Self::new(vec![
      Box::new(InitEndpoint),
      Box::new(OptionsEndpoint),
      Box::new(PageScrape),
    ])
  }

  pub async fn locate(
    &self,
    upstream: &Upstream,
    video_id: &str,
  ) -> Result<ManifestReference> {
    let mut last_error = String::from("no manifest sources configured");

    for source in &self.sources {
      match source.locate(upstream, video_id).await {
        Ok(manifest) if !manifest.manifest_url.is_empty() => {
          info!(video_id, source = source.name(), "manifest located");
          return Ok(manifest);
        }
        Ok(_) => {
          warn!(video_id, source = source.name(), "empty manifest url");
          last_error = format!("{}: empty manifest url", source.name());
        }
        Err(e) => {
          warn!(video_id, source = source.name(), "source failed: {}", e);
          last_error = format!("{}: {}", source.name(), e);
        }
      }
    }

    Err(Error::ManifestNotFound {
      video_id: video_id.to_string(),
      last_error,
    })
  }
}

/// The part of the init and play options documents we care about. Fields
/// that are missing or of an unexpected type read as absent.
#[derive(Debug, Default, Deserialize)]
struct PlayOptions {
  #[serde(default, deserialize_with = "lenient")]
  title: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  video_balancer: Option<VideoBalancer>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoBalancer {
  #[serde(default, deserialize_with = "lenient")]
  m3u8: Option<String>,
}

impl PlayOptions {
  fn into_reference(self) -> Result<ManifestReference> {
    let manifest_url = self
      .video_balancer
      .and_then(|vb| vb.m3u8)
      .filter(|url| !url.is_empty())
      .ok_or(Error::Missing("video_balancer.m3u8 is empty"))?;

    Ok(ManifestReference {
      title: self.title.unwrap_or_default(),
      manifest_url,
    })
  }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(T::deserialize(value).ok())
}
