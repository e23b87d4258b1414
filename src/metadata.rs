use crate::errors::{DaemonError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// How long a fetched metadata entry stays usable.
pub const METADATA_TTL: Duration = Duration::from_secs(30);

const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

/// Parsed Moonraker file metadata, reduced to the fields we consume.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileMetadata {
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailInfo {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub relative_path: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    result: FileMetadata,
}

struct CacheEntry {
    metadata: FileMetadata,
    fetched_at: Instant,
}

/// Time-bounded cache of per-file metadata.
///
/// Keyed by filename exactly as Moonraker reports it. Expired entries are
/// treated as absent and refetched lazily; nothing is proactively evicted.
/// The key space (recently printed files) stays small in practice, so
/// unbounded growth is accepted. Concurrent gets for the same file may both
/// fetch; that is a redundant request, not a correctness problem.
pub struct MetadataCache {
    client: Client,
    base_url: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MetadataCache {
    pub fn new(moonraker_url: &str, ttl: Duration) -> Self {
        let client = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to create HTTP client with custom config: {}. Using defaults.", e);
                Client::new()
            });

        Self {
            client,
            base_url: moonraker_url.trim_end_matches('/').to_string(),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return metadata for `filename`, from cache when fresh, fetching
    /// otherwise. Any fetch failure is an expected absence, never an error.
    pub async fn get(&self, filename: &str) -> Option<FileMetadata> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(filename) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Some(entry.metadata.clone());
                }
                debug!("Metadata for '{}' expired, refetching", filename);
            }
        }

        match self.fetch(filename).await {
            Ok(metadata) => {
                let mut entries = self.entries.lock().await;
                entries.insert(
                    filename.to_string(),
                    CacheEntry {
                        metadata: metadata.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(metadata)
            }
            Err(e) => {
                debug!("No metadata for '{}': {}", filename, e);
                None
            }
        }
    }

    async fn fetch(&self, filename: &str) -> Result<FileMetadata> {
        let url = format!("{}/server/files/metadata", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("filename", filename)])
            .send()
            .await
            .map_err(|e| DaemonError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DaemonError::Upstream(format!(
                "metadata query returned {}",
                response.status()
            )));
        }

        let body: MetadataResponse = response
            .json()
            .await
            .map_err(|e| DaemonError::Network(format!("Parse error: {}", e)))?;

        Ok(body.result)
    }

    /// Resolve the preview image for a job into a reference a remote
    /// display can load.
    ///
    /// Picks the last thumbnail entry, since slicers list them smallest first.
    /// Inline data becomes a data URL; a relative path is joined against
    /// the job file's directory and routed through the local `/thumbnail`
    /// proxy so clients never need to reach the Moonraker host directly.
    pub fn resolve_thumbnail(filename: &str, metadata: &FileMetadata) -> Option<String> {
        let thumb = metadata.thumbnails.last()?;

        if let Some(data) = &thumb.data {
            return Some(format!("data:image/png;base64,{}", data));
        }

        let relative_path = thumb.relative_path.as_deref()?;
        match filename.rsplit_once('/') {
            Some((dir, _)) => Some(format!("/thumbnail/{}/{}", dir, relative_path)),
            None => Some(format!("/thumbnail/{}", relative_path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata_with(relative_path: Option<&str>, data: Option<&str>) -> FileMetadata {
        FileMetadata {
            estimated_time: None,
            thumbnails: vec![ThumbnailInfo {
                width: 300,
                height: 300,
                relative_path: relative_path.map(String::from),
                data: data.map(String::from),
            }],
        }
    }

    #[test]
    fn test_resolve_inline_data() {
        let metadata = metadata_with(None, Some("iVBORw0KGgo="));
        assert_eq!(
            MetadataCache::resolve_thumbnail("benchy.gcode", &metadata),
            Some("data:image/png;base64,iVBORw0KGgo=".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_path_in_subdirectory() {
        let metadata = metadata_with(Some(".thumbs/benchy-300x300.png"), None);
        assert_eq!(
            MetadataCache::resolve_thumbnail("boats/benchy.gcode", &metadata),
            Some("/thumbnail/boats/.thumbs/benchy-300x300.png".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_path_at_root() {
        let metadata = metadata_with(Some(".thumbs/benchy-300x300.png"), None);
        assert_eq!(
            MetadataCache::resolve_thumbnail("benchy.gcode", &metadata),
            Some("/thumbnail/.thumbs/benchy-300x300.png".to_string())
        );
    }

    #[test]
    fn test_resolve_picks_last_thumbnail() {
        let metadata = FileMetadata {
            estimated_time: None,
            thumbnails: vec![
                ThumbnailInfo {
                    width: 32,
                    height: 32,
                    relative_path: Some(".thumbs/small.png".to_string()),
                    data: None,
                },
                ThumbnailInfo {
                    width: 300,
                    height: 300,
                    relative_path: Some(".thumbs/large.png".to_string()),
                    data: None,
                },
            ],
        };
        assert_eq!(
            MetadataCache::resolve_thumbnail("benchy.gcode", &metadata),
            Some("/thumbnail/.thumbs/large.png".to_string())
        );
    }

    #[test]
    fn test_resolve_without_thumbnails() {
        let metadata = FileMetadata::default();
        assert_eq!(MetadataCache::resolve_thumbnail("benchy.gcode", &metadata), None);
    }

    #[test]
    fn test_resolve_entry_without_path_or_data() {
        let metadata = metadata_with(None, None);
        assert_eq!(MetadataCache::resolve_thumbnail("benchy.gcode", &metadata), None);
    }
}
