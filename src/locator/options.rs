use async_trait::async_trait;

use crate::{
  upstream::{Upstream, REFERER},
  Result,
};

use super::{ManifestReference, ManifestSource, PlayOptions};

// GET /api/play/options/<id>/, the referer has to be echoed in the query
pub struct OptionsEndpoint;

#[async_trait]
impl ManifestSource for OptionsEndpoint {
  fn name(&self) -> &'static str {
    "play/options"
  }

  async fn locate(
    &self,
    upstream: &Upstream,
    video_id: &str,
  ) -> Result<ManifestReference> {
    let path = format!("/api/play/options/{video_id}/");
    let mut url = upstream.endpoint(&path)?;
    url
      .query_pairs_mut()
      .append_pair("no_404", "true")
      .append_pair("referer", REFERER.trim_end_matches('/'));

    let body = upstream.get_bytes(&url).await?;
    let options: PlayOptions = serde_json::from_slice(&body)?;

    options.into_reference()
  }
}
