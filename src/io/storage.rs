//! Object-store listings
//!
//! Keys are returned as `bucket/object-name`, the form the catalog builder
//! parses and the form joined with the public URL prefix.

use crate::config::PipelineConfig;
use crate::types::{CubeError, CubeResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Read-only listing of object keys under a prefix
pub trait ObjectStore {
    /// List keys under `prefix` (`bucket` or `bucket/path/prefix`)
    fn list(&self, prefix: &str) -> CubeResult<Vec<String>>;
}

/// One page of the Cloud Storage JSON API object listing
#[derive(Debug, Deserialize)]
struct ObjectPage {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

/// Google Cloud Storage listing client for public buckets
pub struct GcsClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl GcsClient {
    pub fn new(endpoint: &str, timeout: Duration) -> CubeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sarcube/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CubeError::Storage(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> CubeResult<Self> {
        Self::new(
            &config.listing_endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn fetch_page(&self, bucket: &str, object_prefix: &str, page_token: Option<&str>) -> CubeResult<ObjectPage> {
        let url = format!("{}/{}/o", self.endpoint, bucket);
        let mut query = vec![
            ("prefix", object_prefix),
            ("fields", "items(name),nextPageToken"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        log::debug!("Listing {} (prefix '{}', page token {:?})", url, object_prefix, page_token);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .map_err(|e| CubeError::Storage(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CubeError::Storage(format!(
                "HTTP {} {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or(""),
                url
            )));
        }

        let body = response
            .text()
            .map_err(|e| CubeError::Storage(format!("Failed to read response body: {}", e)))?;
        parse_object_page(&body)
    }
}

impl ObjectStore for GcsClient {
    fn list(&self, prefix: &str) -> CubeResult<Vec<String>> {
        let (bucket, object_prefix) = split_bucket(prefix)?;
        log::info!("Listing gs://{}/{}", bucket, object_prefix);

        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.fetch_page(bucket, object_prefix, page_token.as_deref())?;
            keys.extend(page.items.into_iter().map(|item| format!("{}/{}", bucket, item.name)));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        log::info!("Found {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }
}

fn parse_object_page(body: &str) -> CubeResult<ObjectPage> {
    Ok(serde_json::from_str(body)?)
}

/// Split `bucket/path/prefix` into the bucket and the object prefix
fn split_bucket(prefix: &str) -> CubeResult<(&str, &str)> {
    let trimmed = prefix.trim_start_matches("gs://").trim_start_matches('/');
    let (bucket, object_prefix) = match trimmed.split_once('/') {
        Some((bucket, rest)) => (bucket, rest),
        None => (trimmed, ""),
    };
    if bucket.is_empty() {
        return Err(CubeError::Storage(format!("No bucket in prefix '{}'", prefix)));
    }
    Ok((bucket, object_prefix))
}

/// Listing of files below a local directory, keyed relative to that directory
pub struct LocalListing {
    root: PathBuf,
}

impl LocalListing {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn walk(&self, dir: &Path, keys: &mut Vec<String>) -> CubeResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalListing {
    fn list(&self, prefix: &str) -> CubeResult<Vec<String>> {
        let start = self.root.join(prefix.trim_start_matches('/'));
        let mut keys = Vec::new();
        if start.is_dir() {
            self.walk(&start, &mut keys)?;
        } else if let Some(parent) = start.parent().filter(|p| p.is_dir()) {
            // Treat the last component as a filename prefix
            self.walk(parent, &mut keys)?;
            keys.retain(|key| key.starts_with(prefix.trim_start_matches('/')));
        }
        keys.sort();
        log::debug!("Found {} local objects under {}", keys.len(), start.display());
        Ok(keys)
    }
}

/// Fixed in-memory listing
pub struct StaticListing {
    keys: Vec<String>,
}

impl StaticListing {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl ObjectStore for StaticListing {
    fn list(&self, prefix: &str) -> CubeResult<Vec<String>> {
        Ok(self
            .keys
            .iter()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
