use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "playcache";

#[derive(Debug, Clone)]
pub struct Config {
    // Paths
    pub cache_dir: PathBuf,

    // Modo
    pub mock_mode: bool,
    pub debug: bool,
    pub youtube_api_key: Option<String>,

    // Caché de URLs resueltas
    pub url_cache_ttl: Duration,
    pub url_cache_max_entries: u32,

    // Caché de búsquedas
    pub search_cache_ttl: Duration,
    pub search_cache_max_entries: u32,
    pub search_results_limit: usize,

    // Caché de miniaturas
    pub thumbnail_cache_ttl: Duration,
    pub thumbnail_cache_max_files: u32,
    pub thumbnail_cache_max_mb: u64,

    // Caché de audio completo
    pub audio_cache_max_files: u32,
    pub audio_cache_max_mb: u64,

    // Herramientas externas
    pub player_binary: String,
    pub ytdlp_binary: String,

    // Tiempos
    pub control_timeout: Duration,
    pub stop_grace_period: Duration,
    pub resolve_timeout: Duration,
    pub download_timeout: Duration,
    pub cache_sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            cache_dir: std::env::var("PLAYCACHE_CACHE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),

            mock_mode: env_flag("PLAYCACHE_MOCK_MODE"),
            debug: env_flag("PLAYCACHE_DEBUG"),
            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            url_cache_ttl: env_duration("URL_CACHE_TTL", "6h")?,
            url_cache_max_entries: std::env::var("URL_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            search_cache_ttl: env_duration("SEARCH_CACHE_TTL", "7days")?,
            search_cache_max_entries: std::env::var("SEARCH_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            search_results_limit: std::env::var("SEARCH_RESULTS_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            thumbnail_cache_ttl: env_duration("THUMBNAIL_CACHE_TTL", "7days")?,
            thumbnail_cache_max_files: std::env::var("THUMBNAIL_CACHE_MAX_FILES")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            thumbnail_cache_max_mb: std::env::var("THUMBNAIL_CACHE_MAX_MB")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            audio_cache_max_files: std::env::var("AUDIO_CACHE_MAX_FILES")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            audio_cache_max_mb: std::env::var("AUDIO_CACHE_MAX_MB")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,

            player_binary: std::env::var("PLAYER_BINARY").unwrap_or(defaults.player_binary),
            ytdlp_binary: std::env::var("YTDLP_BINARY").unwrap_or(defaults.ytdlp_binary),

            control_timeout: env_duration("CONTROL_TIMEOUT", "500ms")?,
            stop_grace_period: env_duration("STOP_GRACE_PERIOD", "2s")?,
            resolve_timeout: env_duration("RESOLVE_TIMEOUT", "15s")?,
            download_timeout: env_duration("DOWNLOAD_TIMEOUT", "5m")?,
            cache_sweep_interval: env_duration("CACHE_SWEEP_INTERVAL", "1h")?,
        };

        std::fs::create_dir_all(&config.cache_dir).with_context(|| {
            format!("could not create cache dir {}", config.cache_dir.display())
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Blob tiers (thumbnails, audio) must be bounded
    /// - Timeouts must be non-zero
    /// - At least one search result must be requested
    pub fn validate(&self) -> Result<()> {
        if self.thumbnail_cache_max_files == 0 || self.thumbnail_cache_max_mb == 0 {
            anyhow::bail!("Thumbnail cache limits must be greater than 0");
        }

        if self.audio_cache_max_files == 0 || self.audio_cache_max_mb == 0 {
            anyhow::bail!("Audio cache limits must be greater than 0");
        }

        if self.url_cache_max_entries == 0 || self.search_cache_max_entries == 0 {
            anyhow::bail!("Metadata cache sizes must be greater than 0");
        }

        if self.search_results_limit == 0 {
            anyhow::bail!("Search results limit must be greater than 0");
        }

        for (name, value) in [
            ("CONTROL_TIMEOUT", self.control_timeout),
            ("STOP_GRACE_PERIOD", self.stop_grace_period),
            ("RESOLVE_TIMEOUT", self.resolve_timeout),
            ("DOWNLOAD_TIMEOUT", self.download_timeout),
            ("CACHE_SWEEP_INTERVAL", self.cache_sweep_interval),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The API key is never printed, only whether one is set.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache dir: {}\n  \
            Mode: {} (API key: {})\n  \
            URLs: ttl {}, {} entries\n  \
            Searches: ttl {}, {} entries, {} results per query\n  \
            Thumbnails: ttl {}, {} files, {} MB\n  \
            Audio: {} files, {} MB\n  \
            Tools: player={}, resolver={}",
            self.cache_dir.display(),
            if self.mock_mode { "mock" } else { "online" },
            if self.youtube_api_key.is_some() { "set" } else { "not set" },
            humantime::format_duration(self.url_cache_ttl),
            self.url_cache_max_entries,
            humantime::format_duration(self.search_cache_ttl),
            self.search_cache_max_entries,
            self.search_results_limit,
            humantime::format_duration(self.thumbnail_cache_ttl),
            self.thumbnail_cache_max_files,
            self.thumbnail_cache_max_mb,
            self.audio_cache_max_files,
            self.audio_cache_max_mb,
            self.player_binary,
            self.ytdlp_binary,
        )
    }

    pub fn history_path(&self) -> PathBuf {
        self.cache_dir.join("history.json")
    }

    /// Directory for per-session player control sockets.
    pub fn runtime_dir(&self) -> PathBuf {
        self.cache_dir.join("ipc")
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR),

            mock_mode: false,
            debug: false,
            youtube_api_key: None,

            url_cache_ttl: Duration::from_secs(6 * 3600),
            url_cache_max_entries: 1000,

            search_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            search_cache_max_entries: 100,
            search_results_limit: 20,

            thumbnail_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            thumbnail_cache_max_files: 200,
            thumbnail_cache_max_mb: 50,

            audio_cache_max_files: 100,
            audio_cache_max_mb: 500,

            player_binary: "mpv".to_string(),
            ytdlp_binary: "yt-dlp".to_string(),

            control_timeout: Duration::from_millis(500),
            stop_grace_period: Duration::from_secs(2),
            resolve_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(3600),
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| parse_flag(&v)).unwrap_or(false)
}

fn env_duration(name: &str, default: &str) -> Result<Duration> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    humantime::parse_duration(raw.trim())
        .with_context(|| format!("{} is not a valid duration: {:?}", name, raw))
}
