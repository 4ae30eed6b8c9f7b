use std::path::{Path, PathBuf};

/// Application configuration
///
/// Assembled from flat environment variables with per-field defaults. The
/// server refuses to start when `MEDIA_ROOT` is missing or not absolute.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub database: DatabaseConfig,
    pub tls: TlsConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Exact allowed CORS origin; `None` means permissive.
    pub cors_origin: Option<String>,
    /// Directory served as the static web UI.
    pub public_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origin: None,
            public_dir: PathBuf::from("public"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Root of the indexed media tree. Must be an absolute path.
    pub root: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/media"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mediaviewer.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub use_ssl: bool,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    /// Generate a self-signed certificate when key/cert paths are absent.
    pub auto_self_signed: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            use_ssl: false,
            key_path: None,
            cert_path: None,
            auto_self_signed: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub thumb_cache_dir: PathBuf,
    /// Substring matched (case-insensitively) against the User-Agent to
    /// recognize DeoVR stream requests.
    pub deovr_ua_token: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            thumb_cache_dir: std::env::temp_dir().join("mediaviewer-thumbs"),
            deovr_ua_token: "deovr".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Coerce a boolean-ish environment string.
///
/// Accepted tokens: `0/1/true/false/yes/no/on/off` (case-insensitive).
/// Anything else yields `None` so the caller can fall back to a default.
pub fn parse_boolish(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from the environment, applying defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_var("PORT").and_then(|v| v.parse().ok()) {
            config.server.port = v;
        }
        if let Some(v) = env_var("HOST") {
            config.server.host = v;
        }
        if let Some(v) = env_var("CORS_ORIGIN") {
            config.server.cors_origin = Some(v);
        }
        if let Some(v) = env_var("MV_PUBLIC_DIR") {
            config.server.public_dir = PathBuf::from(v);
        }

        if let Some(v) = env_var("MEDIA_ROOT") {
            config.media.root = PathBuf::from(v);
        }

        if let Some(v) = env_var("DATABASE_URL") {
            config.database.url = v;
        }

        if let Some(v) = env_var("USE_SSL").as_deref().and_then(parse_boolish) {
            config.tls.use_ssl = v;
        }
        if let Some(v) = env_var("HTTPS_KEY_PATH") {
            config.tls.key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("HTTPS_CERT_PATH") {
            config.tls.cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("HTTPS_AUTO_SELF_SIGNED")
            .as_deref()
            .and_then(parse_boolish)
        {
            config.tls.auto_self_signed = v;
        }

        if let Some(v) = env_var("FFPROBE_PATH") {
            config.tools.ffprobe_path = v;
        }
        if let Some(v) = env_var("FFMPEG_PATH") {
            config.tools.ffmpeg_path = v;
        }
        if let Some(v) = env_var("MV_THUMB_CACHE_DIR") {
            config.tools.thumb_cache_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("MV_DEOVR_UA_TOKEN") {
            config.tools.deovr_ua_token = v.to_ascii_lowercase();
        }

        if let Some(v) = env_var("LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_var("LOG_FORMAT") {
            config.logging.format = v;
        }

        config
    }

    /// Validate configuration, returning all problems at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.media.root.is_absolute() {
            errors.push(format!(
                "MEDIA_ROOT must be an absolute path, got {:?}",
                self.media.root
            ));
        }
        if self.server.port == 0 {
            errors.push("PORT must be non-zero".to_string());
        }
        if self.tls.use_ssl && !self.tls.auto_self_signed {
            let missing = |p: &Option<PathBuf>| p.as_deref().map_or(true, |p| !Path::new(p).exists());
            if missing(&self.tls.key_path) || missing(&self.tls.cert_path) {
                errors.push(
                    "USE_SSL is on with HTTPS_AUTO_SELF_SIGNED off, but HTTPS_KEY_PATH/HTTPS_CERT_PATH are missing"
                        .to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
