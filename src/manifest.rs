use m3u8_rs::MediaPlaylist;
use tracing::{debug, warn};
use url::Url;

use crate::{upstream::excerpt, Error, Result};

// how much of an unparseable manifest goes into the error
const EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
  // bits per second, only used for ranking
  pub bandwidth: u64,
  pub uri: String,
}

#[derive(Debug)]
pub enum Manifest {
  /// Lists renditions, always at least one.
  Master(Vec<Rendition>),
  /// Lists segments directly and is itself playable.
  Media(MediaPlaylist),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
  pub url: Url,
  pub duration: f64,
}

impl Manifest {
  pub fn parse(bytes: &[u8]) -> Result<Self> {
    if let Ok(master) = m3u8_rs::parse_master_playlist_res(bytes) {
      let renditions: Vec<_> = master
        .variants
        .into_iter()
        .filter(|v| !v.is_i_frame && !v.uri.is_empty())
        .map(|v| Rendition {
          bandwidth: v.bandwidth,
          uri: v.uri,
        })
        .collect();

      if !renditions.is_empty() {
        return Ok(Manifest::Master(renditions));
      }
    }

    match m3u8_rs::parse_media_playlist_res(bytes) {
      Ok(media) => Ok(Manifest::Media(media)),
      Err(e) => {
        debug!("manifest is neither master nor media: {:?}", e);
        let payload = String::from_utf8_lossy(bytes);
        Err(Error::UnrecognizedManifest(excerpt(&payload, EXCERPT_LEN)))
      }
    }
  }
}

/// Highest bandwidth first. Equal bandwidths keep manifest order.
pub fn best_rendition(renditions: &[Rendition]) -> Option<&Rendition> {
  let mut ranked: Vec<&Rendition> = renditions.iter().collect();
  ranked.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
  ranked.first().copied()
}

/// Resolve `reference` against the manifest it appeared in. Absolute
/// references pass through unchanged.
pub fn resolve(base: &Url, reference: &str) -> Result<Url> {
  Ok(base.join(reference)?)
}

/// The url of the stream to retrieve: the best rendition of a master
/// manifest, or the manifest itself when it is a media manifest.
pub fn select_stream(manifest_url: &Url, bytes: &[u8]) -> Result<Url> {
  match Manifest::parse(bytes)? {
    Manifest::Master(renditions) => {
      let best = best_rendition(&renditions)
        .ok_or(Error::Missing("master manifest without renditions"))?;
      debug!(bandwidth = best.bandwidth, uri = %best.uri, "rendition selected");
      resolve(manifest_url, &best.uri)
    }
    Manifest::Media(_) => {
      warn!(%manifest_url, "manifest has no renditions, using it as media");
      Ok(manifest_url.clone())
    }
  }
}

/// Segments of a media manifest in playback order, with absolute urls.
pub fn segments(media: &MediaPlaylist, base: &Url) -> Result<Vec<Segment>> {
  media
    .segments
    .iter()
    .map(|s| {
      Ok(Segment {
        url: resolve(base, &s.uri)?,
        duration: s.duration as f64,
      })
    })
    .collect()
}

pub fn total_duration(segments: &[Segment]) -> f64 {
  segments.iter().map(|s| s.duration).sum()
}

#[cfg(test)]
mod test {
  use super::*;

  const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=300000,RESOLUTION=426x240
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=1280x720
https://other.cdn/hd/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=854x480
mid/index.m3u8
";

  const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:10.0,
seg-0.ts
#EXTINF:10.0,
seg-1.ts
#EXTINF:4.5,
https://edge.cdn/seg-2.ts
#EXT-X-ENDLIST
";

  fn base() -> Url {
    Url::parse("https://cdn.example/video/abc/master.m3u8?sign=1").unwrap()
  }

  fn rendition(bandwidth: u64, uri: &str) -> Rendition {
    Rendition {
      bandwidth,
      uri: uri.to_string(),
    }
  }

  #[test]
  fn test_select_highest_bandwidth() {
    let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=500000
low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2000000
high.m3u8
";
    for _ in 0..3 {
      let url = select_stream(&base(), master.as_bytes()).unwrap();
      assert_eq!(url.as_str(), "https://cdn.example/video/abc/high.m3u8");
    }
  }

  #[test]
  fn test_select_among_three_renditions() {
    let url = select_stream(&base(), MASTER.as_bytes()).unwrap();
    assert_eq!(url.as_str(), "https://other.cdn/hd/index.m3u8");
  }

  #[test]
  fn test_media_manifest_is_returned_unchanged() {
    let url = select_stream(&base(), MEDIA.as_bytes()).unwrap();
    assert_eq!(url, base());
  }

  #[test]
  fn test_ties_keep_manifest_order() {
    let renditions = vec![
      rendition(100, "a.m3u8"),
      rendition(900, "b.m3u8"),
      rendition(900, "c.m3u8"),
    ];
    assert_eq!(best_rendition(&renditions).unwrap().uri, "b.m3u8");
    assert_eq!(best_rendition(&[]), None);
  }

  #[test]
  fn test_unrecognized_manifest() {
    let html = "<html><body>".repeat(50);
    match select_stream(&base(), html.as_bytes()) {
      Err(Error::UnrecognizedManifest(sample)) => {
        assert_eq!(sample.chars().count(), EXCERPT_LEN);
        assert!(sample.starts_with("<html>"));
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn test_media_segments_and_duration() {
    let Manifest::Media(media) = Manifest::parse(MEDIA.as_bytes()).unwrap()
    else {
      panic!("expected media manifest");
    };
    let media_url =
      Url::parse("https://cdn.example/video/abc/hd/index.m3u8").unwrap();
    let segments = segments(&media, &media_url).unwrap();

    let urls: Vec<_> = segments.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
      urls,
      [
        "https://cdn.example/video/abc/hd/seg-0.ts",
        "https://cdn.example/video/abc/hd/seg-1.ts",
        "https://edge.cdn/seg-2.ts",
      ]
    );
    assert!((total_duration(&segments) - 24.5).abs() < 1e-6);
  }

  #[test]
  fn test_resolve() {
    assert_eq!(
      resolve(&base(), "720p/index.m3u8").unwrap().as_str(),
      "https://cdn.example/video/abc/720p/index.m3u8"
    );
    assert_eq!(
      resolve(&base(), "/root.m3u8").unwrap().as_str(),
      "https://cdn.example/root.m3u8"
    );
    assert_eq!(
      resolve(&base(), "https://x.cdn/a.m3u8?t=1").unwrap().as_str(),
      "https://x.cdn/a.m3u8?t=1"
    );
  }
}
