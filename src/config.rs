use std::path::PathBuf;

use crate::badges::DEFAULT_CREST_PROXY;
use crate::fixtures::FixtureSource;
use crate::storage::default_data_dir;

pub const DEFAULT_FIXTURES_PATH: &str = "fixtures-2025-26.json";
pub const DEFAULT_UTC_OFFSET: i32 = 3;
pub const DEFAULT_TZ_LABEL: &str = "AST";
const MAX_UTC_OFFSET: i32 = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub fixtures: FixtureSource,
    pub data_dir: Option<PathBuf>,
    pub crest_proxy: String,
    pub export_dir: PathBuf,
    pub share_url: Option<String>,
    pub kickoff_offset_hours: i32,
    pub kickoff_tz_label: String,
    pub show_all_fixtures: bool,
    pub platform: Option<String>,
}

impl Config {
    /// Loads `.env.local` then `.env` before reading the environment.
    pub fn load() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let fixtures = match non_empty("FIXTURES_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                FixtureSource::Url(url)
            }
            _ => FixtureSource::File(PathBuf::from(
                non_empty("FIXTURES_PATH").unwrap_or_else(|| DEFAULT_FIXTURES_PATH.to_string()),
            )),
        };
        let kickoff_offset_hours = non_empty("KICKOFF_UTC_OFFSET")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_UTC_OFFSET)
            .clamp(-MAX_UTC_OFFSET, MAX_UTC_OFFSET);
        let show_all_fixtures = non_empty("SHOW_ALL_FIXTURES")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let platform = non_empty("PREDICTOR_PLATFORM")
            .map(|v| v.to_ascii_lowercase())
            .filter(|v| matches!(v.as_str(), "ios" | "android" | "desktop"));

        Self {
            fixtures,
            data_dir: non_empty("PREDICTOR_DATA_DIR")
                .map(PathBuf::from)
                .or_else(default_data_dir),
            // An explicitly empty proxy means fetch crests directly.
            crest_proxy: get("CREST_PROXY")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| DEFAULT_CREST_PROXY.to_string()),
            export_dir: PathBuf::from(non_empty("EXPORT_DIR").unwrap_or_else(|| ".".to_string())),
            share_url: non_empty("SHARE_URL"),
            kickoff_offset_hours,
            kickoff_tz_label: get("KICKOFF_TZ_LABEL")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| DEFAULT_TZ_LABEL.to_string()),
            show_all_fixtures,
            platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(
            cfg.fixtures,
            FixtureSource::File(PathBuf::from(DEFAULT_FIXTURES_PATH))
        );
        assert_eq!(cfg.crest_proxy, DEFAULT_CREST_PROXY);
        assert_eq!(cfg.kickoff_offset_hours, 3);
        assert_eq!(cfg.kickoff_tz_label, "AST");
        assert_eq!(cfg.export_dir, PathBuf::from("."));
        assert!(!cfg.show_all_fixtures);
        assert!(cfg.platform.is_none());
    }

    #[test]
    fn url_wins_over_path() {
        let cfg = config(&[
            ("FIXTURES_URL", "https://example.com/pl.json"),
            ("FIXTURES_PATH", "local.json"),
        ]);
        assert_eq!(
            cfg.fixtures,
            FixtureSource::Url("https://example.com/pl.json".to_string())
        );
        let cfg = config(&[("FIXTURES_URL", "ftp://nope"), ("FIXTURES_PATH", "local.json")]);
        assert_eq!(cfg.fixtures, FixtureSource::File(PathBuf::from("local.json")));
    }

    #[test]
    fn offset_is_clamped_and_flags_parse() {
        let cfg = config(&[
            ("KICKOFF_UTC_OFFSET", "-40"),
            ("SHOW_ALL_FIXTURES", "Yes"),
            ("PREDICTOR_PLATFORM", "IOS"),
            ("CREST_PROXY", ""),
        ]);
        assert_eq!(cfg.kickoff_offset_hours, -14);
        assert!(cfg.show_all_fixtures);
        assert_eq!(cfg.platform.as_deref(), Some("ios"));
        assert_eq!(cfg.crest_proxy, "");
        let cfg = config(&[("KICKOFF_UTC_OFFSET", "abc"), ("PREDICTOR_PLATFORM", "palm")]);
        assert_eq!(cfg.kickoff_offset_hours, 3);
        assert!(cfg.platform.is_none());
    }
}
