//! Pipeline configuration
//!
//! Settings are read from a JSON file. Every field has a default, so a
//! partial file (or no file at all) is valid.

use crate::types::{CubeError, CubeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable pointing at a configuration file
pub const CONFIG_ENV_VAR: &str = "SARCUBE_CONFIG";

/// Public HTTP prefix for Google Cloud Storage objects
pub const DEFAULT_URL_PREFIX: &str = "http://storage.googleapis.com/";

/// Google Cloud Storage JSON API bucket endpoint
pub const DEFAULT_LISTING_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1/b";

/// Chunk sizes for lazy reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Acquisitions per chunk
    pub band: usize,
    /// Rows per chunk
    pub rows: usize,
    /// Columns per chunk
    pub cols: usize,
}

impl Default for ChunkSpec {
    fn default() -> Self {
        Self {
            band: 1,
            rows: 2048,
            cols: 2048,
        }
    }
}

/// How layer grids are verified when a cube is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridCheck {
    /// Open every layer's metadata and compare its grid with the first
    #[default]
    Metadata,
    /// Only open the first layer; every chunk read re-checks its layer's size
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix joined with object keys to form download URLs
    pub url_prefix: String,
    /// Object listing endpoint
    pub listing_endpoint: String,
    pub request_timeout_secs: u64,
    pub chunks: ChunkSpec,
    pub grid_check: GridCheck,
    /// Raster band holding the phase values (1-based)
    pub band: usize,
    /// Worker threads for realisation (0 = one per core)
    pub workers: usize,
    /// Directory for extracted windows and time series
    pub output_dir: PathBuf,
    /// GDAL configuration options applied by the execution context
    pub gdal_options: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut gdal_options = BTreeMap::new();
        gdal_options.insert("GDAL_DISABLE_READDIR_ON_OPEN".to_string(), "EMPTY_DIR".to_string());
        gdal_options.insert("CPL_VSIL_CURL_ALLOWED_EXTENSIONS".to_string(), ".tif,.tiff".to_string());

        Self {
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
            listing_endpoint: DEFAULT_LISTING_ENDPOINT.to_string(),
            request_timeout_secs: 60,
            chunks: ChunkSpec::default(),
            grid_check: GridCheck::default(),
            band: 1,
            workers: 0,
            output_dir: PathBuf::from("."),
            gdal_options,
        }
    }
}

impl PipelineConfig {
    /// Read configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CubeResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> CubeResult<Self> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration: explicit path, then `SARCUBE_CONFIG`, then the
    /// platform config directory, then defaults
    pub fn load(path: Option<&Path>) -> CubeResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(env_path);
        }
        if let Some(default_path) = Self::default_path() {
            if default_path.exists() {
                return Self::from_file(default_path);
            }
        }
        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// `<config dir>/sarcube/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sarcube").join("config.json"))
    }

    pub fn validate(&self) -> CubeResult<()> {
        if self.chunks.band == 0 || self.chunks.rows == 0 || self.chunks.cols == 0 {
            return Err(CubeError::Config(format!(
                "Chunk sizes must be positive, got {:?}",
                self.chunks
            )));
        }
        if self.band == 0 {
            return Err(CubeError::Config("Raster bands are numbered from 1".to_string()));
        }
        if self.url_prefix.is_empty() {
            return Err(CubeError::Config("url_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Builder-style chunk override
    pub fn with_chunks(mut self, chunks: ChunkSpec) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_grid_check(mut self, grid_check: GridCheck) -> Self {
        self.grid_check = grid_check;
        self
    }

    pub fn with_url_prefix(mut self, url_prefix: impl Into<String>) -> Self {
        self.url_prefix = url_prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.url_prefix, "http://storage.googleapis.com/");
        assert_eq!(config.chunks, ChunkSpec { band: 1, rows: 2048, cols: 2048 });
        assert_eq!(config.grid_check, GridCheck::Metadata);
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{ "chunks": { "band": 2, "rows": 512, "cols": 256 }, "grid_check": "deferred" }"#,
        )
        .unwrap();
        assert_eq!(config.chunks.rows, 512);
        assert_eq!(config.chunks.cols, 256);
        assert_eq!(config.grid_check, GridCheck::Deferred);
        // Untouched fields keep their defaults
        assert_eq!(config.band, 1);
        assert!(config.gdal_options.contains_key("GDAL_DISABLE_READDIR_ON_OPEN"));
    }

    #[test]
    fn test_invalid_chunks_rejected() {
        let result = PipelineConfig::from_json(r#"{ "chunks": { "band": 1, "rows": 0, "cols": 256 } }"#);
        assert!(matches!(result, Err(CubeError::Config(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = PipelineConfig::from_json("{ not json");
        assert!(matches!(result, Err(CubeError::Json(_))));
    }
}
