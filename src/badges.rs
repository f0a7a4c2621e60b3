use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::http_client;
use crate::normalize::CrestLookup;
use crate::storage::{BADGE_CACHE_KEY, Storage, StorageError};

pub const DEFAULT_CREST_PROXY: &str = "https://corsproxy.io/?";

/// 1x1 transparent PNG used whenever a crest cannot be fetched.
pub const FALLBACK_BADGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait BadgeFetcher: Send {
    fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

/// Fetches crests over HTTP, optionally through a URL-prefix proxy.
pub struct HttpBadgeFetcher {
    proxy: String,
}

impl HttpBadgeFetcher {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
        }
    }
}

impl BadgeFetcher for HttpBadgeFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let target = format!("{}{url}", self.proxy);
        let body = http_client::fetch(&target).context("badge request failed")?;
        Ok(FetchedImage {
            bytes: body.bytes,
            content_type: body.content_type,
        })
    }
}

/// Anything that can hand out a displayable badge for a team name.
pub trait BadgeSource {
    fn badge(&mut self, team: &str) -> String;
}

/// Crest cache keyed by the raw team name, persisted as one JSON map.
pub struct BadgeResolver {
    cache: HashMap<String, String>,
    lookup: CrestLookup,
    fetcher: Box<dyn BadgeFetcher>,
    storage: Arc<Storage>,
    failures: usize,
    storage_error: Option<StorageError>,
}

impl BadgeResolver {
    pub fn new(storage: Arc<Storage>, fetcher: Box<dyn BadgeFetcher>) -> Self {
        let cache = storage
            .get(BADGE_CACHE_KEY)
            .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
            .unwrap_or_default();
        Self {
            cache,
            lookup: CrestLookup::builtin(),
            fetcher,
            storage,
            failures: 0,
            storage_error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of lookups that fell back to the placeholder image.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// The write error from the last cache save, if it failed.
    pub fn take_storage_error(&mut self) -> Option<StorageError> {
        self.storage_error.take()
    }

    /// Returns a data URL for `team`. Never fails; network or decoding
    /// problems yield [`FALLBACK_BADGE`].
    pub fn resolve(&mut self, team: &str) -> String {
        if let Some(hit) = self.cache.get(team) {
            return hit.clone();
        }
        let url = self.lookup.crest_url(team);
        match self.download(&url) {
            Ok(data_url) => {
                self.cache.insert(team.to_string(), data_url.clone());
                self.save();
                data_url
            }
            Err(_) => {
                self.failures += 1;
                FALLBACK_BADGE.to_string()
            }
        }
    }

    fn download(&self, url: &str) -> Result<String> {
        let image = self.fetcher.fetch(url)?;
        if image.bytes.is_empty() {
            return Err(anyhow::anyhow!("empty badge body"));
        }
        let mime = image
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| ct.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime(url).to_string());
        Ok(encode_data_url(&mime, &image.bytes))
    }

    fn save(&mut self) {
        let Ok(json) = serde_json::to_string(&self.cache) else {
            return;
        };
        if let Err(err) = self.storage.set(BADGE_CACHE_KEY, &json) {
            self.storage_error = Some(err);
        }
    }
}

impl BadgeSource for BadgeResolver {
    fn badge(&mut self, team: &str) -> String {
        self.resolve(team)
    }
}

fn guess_mime(url: &str) -> &'static str {
    let lowered = url.to_ascii_lowercase();
    if lowered.ends_with(".svg") {
        "image/svg+xml"
    } else if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Splits a base64 data URL into its mime type and payload.
pub fn decode_data_url(data_url: &str) -> Option<(String, Vec<u8>)> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = BASE64.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};

    struct CountingFetcher {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl BadgeFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<FetchedImage> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(anyhow::anyhow!("proxy down"));
            }
            Ok(FetchedImage {
                bytes: b"<svg/>".to_vec(),
                content_type: Some("image/svg+xml; charset=utf-8".to_string()),
            })
        }
    }

    fn resolver(fail: bool) -> (Arc<Storage>, Arc<Mutex<Vec<String>>>, BadgeResolver) {
        let storage = Arc::new(Storage::new(Box::new(MemoryStore::default())));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fetcher = CountingFetcher {
            calls: calls.clone(),
            fail,
        };
        let resolver = BadgeResolver::new(storage.clone(), Box::new(fetcher));
        (storage, calls, resolver)
    }

    #[test]
    fn second_lookup_is_served_from_cache() {
        let (storage, calls, mut badges) = resolver(false);
        let first = badges.resolve("Arsenal");
        let second = badges.resolve("Arsenal");
        assert_eq!(first, second);
        assert!(first.starts_with("data:image/svg+xml;base64,"));
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["https://crests.football-data.org/57.svg"]
        );
        let persisted = storage.get(BADGE_CACHE_KEY).unwrap();
        assert!(persisted.contains("Arsenal"));
    }

    #[test]
    fn cache_is_keyed_by_raw_name() {
        let (_, calls, mut badges) = resolver(false);
        badges.resolve("Man Utd");
        badges.resolve("Manchester United");
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(badges.len(), 2);
    }

    #[test]
    fn failures_return_placeholder_and_are_not_cached() {
        let (storage, calls, mut badges) = resolver(true);
        assert_eq!(badges.resolve("Nowhere Rovers"), FALLBACK_BADGE);
        assert_eq!(badges.resolve("Nowhere Rovers"), FALLBACK_BADGE);
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(
            calls.lock().unwrap()[0],
            crate::normalize::DEFAULT_CREST_URL
        );
        assert!(badges.is_empty());
        assert_eq!(badges.failures(), 2);
        assert!(storage.get(BADGE_CACHE_KEY).is_none());
    }

    #[test]
    fn persisted_cache_is_loaded_at_construction() {
        let storage = Arc::new(Storage::new(Box::new(MemoryStore::default())));
        storage
            .set(BADGE_CACHE_KEY, r#"{"Chelsea":"data:image/png;base64,AAAA"}"#)
            .unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut badges = BadgeResolver::new(
            storage,
            Box::new(CountingFetcher {
                calls: calls.clone(),
                fail: true,
            }),
        );
        assert_eq!(badges.resolve("Chelsea"), "data:image/png;base64,AAAA");
        assert!(calls.lock().unwrap().is_empty());
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[test]
    fn cache_write_failure_is_reported_once() {
        let storage = Arc::new(Storage::new(Box::new(ReadOnlyStore)));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut badges = BadgeResolver::new(
            storage.clone(),
            Box::new(CountingFetcher { calls, fail: false }),
        );
        assert!(badges.resolve("Arsenal").starts_with("data:image/svg+xml"));
        let err = badges.take_storage_error().unwrap();
        assert!(err.to_string().contains("disk full"), "{err}");
        assert!(badges.take_storage_error().is_none());

        badges.resolve("Chelsea");
        assert!(badges.take_storage_error().is_none());
        assert!(storage.get(BADGE_CACHE_KEY).unwrap().contains("Chelsea"));
    }

    #[test]
    fn data_url_round_trip() {
        let url = encode_data_url("image/png", &[1, 2, 3]);
        assert_eq!(decode_data_url(&url), Some(("image/png".to_string(), vec![1, 2, 3])));
        assert_eq!(decode_data_url("https://example.com/a.png"), None);
    }
}
