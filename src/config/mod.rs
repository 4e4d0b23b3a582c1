//! Configuration for the worker, the push presenter and the host server.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rules deciding which runtime responses are worth persisting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeCacheConfig {
    /// File extensions (without the dot) cached when fetched.
    pub extensions: Vec<String>,
    /// Hosts whose responses are always cached.
    pub hosts: Vec<String>,
    /// Same-origin path prefixes whose responses are always cached.
    pub path_prefixes: Vec<String>,
}

impl Default for RuntimeCacheConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "webp", "css", "js"]
                .map(String::from)
                .to_vec(),
            hosts: vec!["fonts.gstatic.com".to_string(), "unpkg.com".to_string()],
            path_prefixes: vec!["/images/renders/".to_string()],
        }
    }
}

/// Configuration of one deployed worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of every bucket name this site owns.
    pub cache_prefix: String,
    /// Deployed version; the current bucket is `<cache_prefix>-<version>`.
    pub version: String,
    /// Human-readable site name used in the synthesized offline page.
    pub site_name: String,
    /// Origin of the site the worker is scoped to.
    pub origin: String,
    /// App root, the second rung of the navigation fallback ladder.
    pub root_url: String,
    /// Offline page, the first rung of the navigation fallback ladder.
    pub offline_url: String,
    /// Assets stored during install, in order.
    pub precache: Vec<String>,
    /// Cross-origin hosts whose requests are intercepted.
    pub cross_origin_hosts: Vec<String>,
    pub runtime_cache: RuntimeCacheConfig,
    /// Background sync tag for contact-form retries.
    pub sync_tag: String,
    /// Endpoint queued submissions are posted to.
    pub submit_endpoint: String,
    /// Maximum precache fetches in flight during install.
    pub precache_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "milewska-design".to_string(),
            version: "v1.1.0".to_string(),
            site_name: "Milewska Design".to_string(),
            origin: "https://milewska.design".to_string(),
            root_url: "/".to_string(),
            offline_url: "/offline.html".to_string(),
            precache: [
                "/",
                "/index.html",
                "/offline.html",
                "/styles.css",
                "/script.js",
                "/manifest.json",
                "/images/milewska_design_pic.jpg",
                "/images/renders/Project_2_wil/caly salon_medium.webp",
                "/images/renders/Project_1_zab/Kuchnia_medium.webp",
                "/images/renders/Project_3_mag/Sypialnia_medium.webp",
                "https://fonts.googleapis.com/css2?family=Playfair+Display:wght@400;500;600;700&family=Inter:wght@300;400;500;600&display=swap",
                "https://unpkg.com/aos@2.3.1/dist/aos.css",
                "https://unpkg.com/aos@2.3.1/dist/aos.js",
            ]
            .map(String::from)
            .to_vec(),
            cross_origin_hosts: ["fonts.googleapis.com", "fonts.gstatic.com", "unpkg.com"]
                .map(String::from)
                .to_vec(),
            runtime_cache: RuntimeCacheConfig::default(),
            sync_tag: "contact-form-sync".to_string(),
            submit_endpoint: "/api/contact".to_string(),
            precache_concurrency: 4,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deployed version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the site origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replaces the precache list.
    #[must_use]
    pub fn with_precache<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the bucket owned by this version.
    #[must_use]
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Parses the configured origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the origin is not an absolute URL.
    pub fn origin_url(&self) -> Result<Url> {
        parse_url(&self.origin)
    }

    /// Resolves a manifest entry against the origin. Absolute URLs pass
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the result is not a valid URL.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.origin_url()?.join(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolves every precache entry, preserving order.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|u| self.resolve(u)).collect()
    }

    /// Checks the invariants the worker relies on at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the version is empty, the offline page
    /// is not precached or concurrency is zero, and [`Error::InvalidUrl`]
    /// when any URL fails to resolve.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::Config("version must not be empty".to_string()));
        }
        if self.precache_concurrency == 0 {
            return Err(Error::Config(
                "precache_concurrency must be at least 1".to_string(),
            ));
        }
        let offline = self.resolve(&self.offline_url)?;
        let precache = self.precache_urls()?;
        if !precache.contains(&offline) {
            return Err(Error::Config(format!(
                "offline page {} is not in the precache list",
                self.offline_url
            )));
        }
        self.resolve(&self.root_url)?;
        self.resolve(&self.submit_endpoint)?;
        Ok(())
    }
}

/// Content of the notifications shown on push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub title: String,
    /// Body used when the push carries no payload.
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Where the "explore" action leads.
    pub explore_url: String,
    pub explore_title: String,
    pub close_title: String,
    pub action_icon: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            title: "Milewska Design".to_string(),
            default_body: "Nowa wiadomość od Milewska Design".to_string(),
            icon: "/images/icons/icon-192x192.png".to_string(),
            badge: "/images/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            explore_url: "/#portfolio".to_string(),
            explore_title: "Zobacz portfolio".to_string(),
            close_title: "Zamknij".to_string(),
            action_icon: "/images/icons/icon-96x96.png".to_string(),
        }
    }
}

/// HTTP client settings for the network boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whole-request timeout. `None` leaves it to the platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            pool_idle_timeout_secs: 60,
            pool_max_idle_per_host: 8,
        }
    }
}

/// Host server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Seconds between sync opportunities while submissions are queued.
    pub sync_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            sync_interval_secs: 30,
        }
    }
}

/// Directories for persisted cache buckets and the submission queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let base = std::env::var("STATE_DIRECTORY").map_or_else(
            |_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("offline-cache")
            },
            PathBuf::from,
        );

        Self {
            cache_dir: base.join("caches"),
            state_dir: base.join("queue"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub push: PushConfig,
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-cache")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Loads configuration, writing the defaults to `path` first if the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, written or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        log::info!("Wrote default config to {}", path.display());
        Ok(config)
    }

    /// Saves the configuration atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize config: {e}")))?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml_str)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn parse_url(s: &str) -> Result<Url> {
    Url::parse(s).map_err(|e| Error::InvalidUrl {
        url: s.to_string(),
        reason: e.to_string(),
    })
}
