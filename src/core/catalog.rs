//! Catalog of interferograms built from object-store keys
//!
//! Keys follow `<project>/<bucket>/<YYYYMMDD>-<YYYYMMDD>-<format>`, for
//! example `insar/track64/20200101-20200115-unw.tif`.

use crate::config::PipelineConfig;
use crate::io::storage::ObjectStore;
use crate::types::{CubeError, CubeResult};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y%m%d";

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<project>[^/]+)/(?P<bucket>.+)/(?P<date1>\d{8})-(?P<date2>\d{8})-(?P<format>[^/]+)$")
            .expect("static key pattern is valid")
    })
}

/// One interferogram in the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRow {
    remote_path: String,
    url: String,
    project: String,
    bucket: String,
    format: String,
    date1: NaiveDate,
    date2: NaiveDate,
    #[serde(skip)]
    date_delta: Duration,
}

impl CatalogRow {
    /// Parse one object key
    pub fn parse(key: &str, url_prefix: &str) -> CubeResult<Self> {
        let captures = key_pattern().captures(key).ok_or_else(|| CubeError::FilenameParse {
            key: key.to_string(),
            reason: "expected <project>/<bucket>/<YYYYMMDD>-<YYYYMMDD>-<format>".to_string(),
        })?;

        let parse_date = |name: &str| {
            NaiveDate::parse_from_str(&captures[name], DATE_FORMAT).map_err(|e| CubeError::FilenameParse {
                key: key.to_string(),
                reason: format!("invalid {} '{}': {}", name, &captures[name], e),
            })
        };
        let date1 = parse_date("date1")?;
        let date2 = parse_date("date2")?;

        Ok(Self {
            remote_path: key.to_string(),
            url: format!("{}{}", url_prefix, key),
            project: captures["project"].to_string(),
            bucket: captures["bucket"].to_string(),
            format: captures["format"].to_string(),
            date1,
            date2,
            date_delta: date1 - date2,
        })
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Product suffix, e.g. `unw.tif`
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn date1(&self) -> NaiveDate {
        self.date1
    }

    pub fn date2(&self) -> NaiveDate {
        self.date2
    }

    /// Signed `date1 - date2`
    pub fn date_delta(&self) -> Duration {
        self.date_delta
    }

    /// Unsigned separation of the two acquisitions in days
    pub fn temporal_baseline_days(&self) -> i64 {
        self.date_delta.num_days().abs()
    }

    /// File name part of the key
    pub fn basename(&self) -> &str {
        self.remote_path.rsplit('/').next().unwrap_or(&self.remote_path)
    }
}

/// Sorted, immutable catalog of interferograms
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    rows: Vec<CatalogRow>,
}

/// Keys a lenient build could not parse
#[derive(Debug)]
pub struct RejectedKey {
    pub key: String,
    pub error: CubeError,
}

impl Catalog {
    /// Build a catalog; any key that does not match fails the whole build
    pub fn from_keys<I, S>(keys: I, url_prefix: &str) -> CubeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows = keys
            .into_iter()
            .map(|key| CatalogRow::parse(key.as_ref(), url_prefix))
            .collect::<CubeResult<Vec<_>>>()?;
        Ok(Self::from_rows(rows))
    }

    /// Build a catalog from the keys that parse, returning the rest
    pub fn from_keys_lenient<I, S>(keys: I, url_prefix: &str) -> (Self, Vec<RejectedKey>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rows = Vec::new();
        let mut rejected = Vec::new();
        for key in keys {
            let key = key.as_ref();
            match CatalogRow::parse(key, url_prefix) {
                Ok(row) => rows.push(row),
                Err(error) => {
                    log::warn!("Skipping object: {}", error);
                    rejected.push(RejectedKey {
                        key: key.to_string(),
                        error,
                    });
                }
            }
        }
        (Self::from_rows(rows), rejected)
    }

    /// List `prefix` in `store` and build a catalog from every key
    pub fn from_store(store: &dyn ObjectStore, prefix: &str, config: &PipelineConfig) -> CubeResult<Self> {
        let keys = store.list(prefix)?;
        let catalog = Self::from_keys(&keys, &config.url_prefix)?;
        log::info!("Catalog built with {} interferograms from {}", catalog.len(), prefix);
        Ok(catalog)
    }

    fn from_rows(mut rows: Vec<CatalogRow>) -> Self {
        rows.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
        Self { rows }
    }

    /// Keep only rows with the given product suffix
    pub fn with_format(&self, format: &str) -> Self {
        Self {
            rows: self.rows.iter().filter(|row| row.format == format).cloned().collect(),
        }
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&CatalogRow> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CatalogRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Earliest and latest acquisition date across both date columns
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let dates = self.rows.iter().flat_map(|row| [row.date1, row.date2]);
        let min = dates.clone().min()?;
        let max = dates.max()?;
        Some((min, max))
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogRow;
    type IntoIter = std::slice::Iter<'a, CatalogRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
