use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

const REQUEST_TIMEOUT_SECS: u64 = 10;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared blocking client for fixture and crest requests.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("pl_predictor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug, Clone)]
pub struct HttpBody {
    pub bytes: Vec<u8>,
    /// Media type without parameters, e.g. `image/png`.
    pub content_type: Option<String>,
}

impl HttpBody {
    pub fn into_text(self) -> Result<String> {
        String::from_utf8(self.bytes).context("response body is not utf-8")
    }
}

/// GETs `url` and fails on any non-2xx status.
pub fn fetch(url: &str) -> Result<HttpBody> {
    let client = http_client()?;
    let resp = client.get(url).send().context("request failed")?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("HTTP {}", status.as_u16()));
    }
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    let bytes = resp.bytes().context("failed reading body")?.to_vec();
    Ok(HttpBody {
        bytes,
        content_type,
    })
}
