//! CISA Known Exploited Vulnerabilities (KEV) catalog client.
//!
//! The catalog is a single JSON document. [`KevClient`] fetches it once and
//! reuses it for `cache_ttl`, then answers "what was added recently" and
//! vendor/product filters locally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use vaultzero_shared::{FeedsConfig, Result, VaultZeroError};

/// Default timeout in seconds for fetching the catalog.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("VaultZero/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Catalog types
// ---------------------------------------------------------------------------

/// The full KEV catalog as published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KevCatalog {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub catalog_version: String,
    #[serde(default)]
    pub date_released: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub vulnerabilities: Vec<KevEntry>,
}

/// One exploited vulnerability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KevEntry {
    #[serde(rename = "cveID")]
    pub cve_id: String,
    #[serde(default)]
    pub vendor_project: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub vulnerability_name: String,
    #[serde(default)]
    pub date_added: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub required_action: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub known_ransomware_campaign_use: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub cwes: Vec<String>,
}

impl KevEntry {
    pub fn added_on(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date_added, "%Y-%m-%d").ok()
    }

    pub fn ransomware_known(&self) -> bool {
        self.known_ransomware_campaign_use.eq_ignore_ascii_case("known")
    }
}

/// Case-insensitive substring filters on vendor and product.
#[derive(Debug, Clone, Default)]
pub struct KevFilter {
    pub vendor: Option<String>,
    pub product: Option<String>,
}

impl KevFilter {
    pub fn matches(&self, entry: &KevEntry) -> bool {
        contains_ci(&entry.vendor_project, self.vendor.as_deref())
            && contains_ci(&entry.product, self.product.as_deref())
    }

    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a KevEntry>) -> Vec<KevEntry> {
        entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect()
    }
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(n) if !n.is_empty() => haystack.to_lowercase().contains(&n.to_lowercase()),
        _ => true,
    }
}

/// Summary numbers for a catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub catalog_version: String,
    pub date_released: String,
    pub ransomware_known: usize,
    /// Vendors with the most entries, descending.
    pub top_vendors: Vec<(String, usize)>,
}

impl KevCatalog {
    /// Entries added on or after `since`.
    pub fn added_since(&self, since: NaiveDate) -> Vec<&KevEntry> {
        self.vulnerabilities
            .iter()
            .filter(|e| e.added_on().is_some_and(|d| d >= since))
            .collect()
    }

    pub fn stats(&self, top: usize) -> CatalogStats {
        let mut vendors: HashMap<&str, usize> = HashMap::new();
        for entry in &self.vulnerabilities {
            *vendors.entry(entry.vendor_project.as_str()).or_default() += 1;
        }
        let mut top_vendors: Vec<(String, usize)> = vendors
            .into_iter()
            .map(|(v, n)| (v.to_string(), n))
            .collect();
        top_vendors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_vendors.truncate(top);

        CatalogStats {
            total: self.vulnerabilities.len(),
            catalog_version: self.catalog_version.clone(),
            date_released: self.date_released.clone(),
            ransomware_known: self
                .vulnerabilities
                .iter()
                .filter(|e| e.ransomware_known())
                .count(),
            top_vendors,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Fetches and caches the KEV catalog.
pub struct KevClient {
    http: Client,
    url: String,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<KevCatalog>)>>,
}

impl KevClient {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| VaultZeroError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            ttl,
            cache: Mutex::new(None),
        })
    }

    pub fn from_config(config: &FeedsConfig) -> Result<Self> {
        Self::new(&config.kev_url, Duration::from_secs(config.cache_ttl_secs))
    }

    /// The catalog, fetched at most once per TTL window.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn catalog(&self) -> Result<Arc<KevCatalog>> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, catalog)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!("using cached KEV catalog");
                return Ok(Arc::clone(catalog));
            }
        }

        let catalog = Arc::new(self.fetch().await?);
        info!(
            entries = catalog.vulnerabilities.len(),
            version = %catalog.catalog_version,
            "fetched KEV catalog"
        );
        *cache = Some((Instant::now(), Arc::clone(&catalog)));
        Ok(catalog)
    }

    /// Entries added within the last `days` days (today included).
    pub async fn recent(&self, days: u32, filter: &KevFilter) -> Result<Vec<KevEntry>> {
        let today = Utc::now().date_naive();
        let since = today - chrono::Duration::days(i64::from(days));
        self.added_since(since, filter).await
    }

    pub async fn added_since(&self, since: NaiveDate, filter: &KevFilter) -> Result<Vec<KevEntry>> {
        let catalog = self.catalog().await?;
        let mut entries = filter.apply(catalog.added_since(since));
        entries.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        Ok(entries)
    }

    pub async fn stats(&self, top: usize) -> Result<CatalogStats> {
        Ok(self.catalog().await?.stats(top))
    }

    async fn fetch(&self) -> Result<KevCatalog> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VaultZeroError::Network(format!("{}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VaultZeroError::Network(format!(
                "{}: HTTP {status}",
                self.url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VaultZeroError::parse(format!("invalid KEV catalog: {e}")))
    }
}
