use async_trait::async_trait;

use crate::{upstream::Upstream, Result};

use super::{ManifestReference, ManifestSource, PlayOptions};

// GET /api/video/<id>/init
pub struct InitEndpoint;

#[async_trait]
impl ManifestSource for InitEndpoint {
  fn name(&self) -> &'static str {
    "init"
  }

  async fn locate(
    &self,
    upstream: &Upstream,
    video_id: &str,
  ) -> Result<ManifestReference> {
    let url = upstream.endpoint(&format!("/api/video/{video_id}/init"))?;
    let body = upstream.get_bytes(&url).await?;
    let options: PlayOptions = serde_json::from_slice(&body)?;

    options.into_reference()
  }
}
