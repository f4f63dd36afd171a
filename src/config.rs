use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Safeplate";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Allergen threshold used when the lab has no setting of its own.
pub const DEFAULT_ALLERGEN_THRESHOLD: f64 = 10.0;

/// Recipes per course used when neither patient nor lab sets a quota.
pub const DEFAULT_RECIPES_PER_COURSE: u32 = 5;

/// Default catalog language for searches.
pub const DEFAULT_CATALOG_LANGUAGE: &str = "en";

pub const DEFAULT_CATALOG_URL: &str = "http://localhost:8088/api";
pub const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 30;

/// Transient catalog failures are retried this many times after the first attempt.
pub const DEFAULT_CATALOG_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Page size for the available-recipes stream.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// Get the application data directory
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default location of the curation database.
pub fn database_path() -> PathBuf {
    app_data_dir().join("curation.db")
}

/// Log filter used when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "safeplate=debug,warn"
    } else {
        "safeplate=info,warn"
    }
}

/// Runtime configuration for the curation engine.
///
/// Built from defaults, then overridden by `SAFEPLATE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct CurationConfig {
    pub catalog_url: String,
    pub catalog_language: String,
    pub catalog_timeout_secs: u64,
    pub catalog_retries: u32,
    pub retry_backoff_ms: u64,
    pub page_size: u32,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            catalog_language: DEFAULT_CATALOG_LANGUAGE.to_string(),
            catalog_timeout_secs: DEFAULT_CATALOG_TIMEOUT_SECS,
            catalog_retries: DEFAULT_CATALOG_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CurationConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (env in production, a map in tests).
    /// Unparseable numeric values keep the default and log a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SAFEPLATE_CATALOG_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.catalog_url = url.to_string();
            }
        }
        if let Some(lang) = lookup("SAFEPLATE_CATALOG_LANGUAGE") {
            if !lang.trim().is_empty() {
                config.catalog_language = lang.trim().to_lowercase();
            }
        }
        parse_override(&lookup, "SAFEPLATE_CATALOG_TIMEOUT_SECS", &mut config.catalog_timeout_secs);
        parse_override(&lookup, "SAFEPLATE_CATALOG_RETRIES", &mut config.catalog_retries);
        parse_override(&lookup, "SAFEPLATE_RETRY_BACKOFF_MS", &mut config.retry_backoff_ms);
        parse_override(&lookup, "SAFEPLATE_PAGE_SIZE", &mut config.page_size);

        config
    }
}

fn parse_override<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable config override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn database_path_under_app_data() {
        let db = database_path();
        assert!(db.starts_with(app_data_dir()));
        assert!(db.ends_with("curation.db"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.3.0");
    }

    #[test]
    fn defaults_match_constants() {
        let config = CurationConfig::default();
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.catalog_retries, 2);
        assert_eq!(config.page_size, 12);
    }

    #[test]
    fn lookup_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SAFEPLATE_CATALOG_URL", "https://catalog.example.org/v2/"),
            ("SAFEPLATE_CATALOG_LANGUAGE", "FR"),
            ("SAFEPLATE_CATALOG_RETRIES", "4"),
        ]);
        let config = CurationConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.catalog_url, "https://catalog.example.org/v2");
        assert_eq!(config.catalog_language, "fr");
        assert_eq!(config.catalog_retries, 4);
        assert_eq!(config.catalog_timeout_secs, DEFAULT_CATALOG_TIMEOUT_SECS);
    }

    #[test]
    fn unparseable_override_keeps_default() {
        let config = CurationConfig::from_lookup(|k| {
            (k == "SAFEPLATE_PAGE_SIZE").then(|| "lots".to_string())
        });
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }
}
