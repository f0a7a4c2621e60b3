use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::debug_log::DebugLog;

pub const SHARE_TIMEOUT: Duration = Duration::from_secs(8);
pub const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    /// iPhone/iPad style devices: file shares are unreliable, text shares work.
    Apple,
    Android,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub mobile: bool,
    pub platform: PlatformFamily,
    pub share: bool,
    pub share_files: bool,
    pub clipboard_image: bool,
}

impl Capabilities {
    pub fn desktop() -> Self {
        Self {
            mobile: false,
            platform: PlatformFamily::Other,
            share: false,
            share_files: false,
            clipboard_image: false,
        }
    }
}

/// Probed once per export so the chain never inspects the environment itself.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> Capabilities;
}

impl CapabilityProbe for Capabilities {
    fn probe(&self) -> Capabilities {
        *self
    }
}

#[derive(Debug, Clone)]
pub struct SharedFile {
    pub name: String,
    pub mime: &'static str,
    pub bytes: Arc<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub title: String,
    pub text: String,
    pub url: Option<String>,
    pub file: Option<SharedFile>,
}

/// Outbound surfaces an export can be handed to.
pub trait DeliveryTarget: Send + Sync {
    fn share(&self, request: ShareRequest) -> Result<()>;
    fn write_clipboard_image(&self, png: Arc<Vec<u8>>) -> Result<()>;
    fn download(&self, file_name: &str, png: &[u8]) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Share,
    Clipboard,
    Download,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::Share => "share",
            DeliveryMethod::Clipboard => "clipboard",
            DeliveryMethod::Download => "download",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            DeliveryMethod::Share => "Shared successfully!",
            DeliveryMethod::Clipboard => "Copied to clipboard!",
            DeliveryMethod::Download => "Downloaded successfully!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Share,
    Clipboard,
    Download,
    /// Second download attempt on Apple devices when everything else failed.
    SafetyNetDownload,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Share => "share",
            Strategy::Clipboard => "clipboard",
            Strategy::Download => "download",
            Strategy::SafetyNetDownload => "safety-net download",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub share_timeout: Duration,
    pub clipboard_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            share_timeout: SHARE_TIMEOUT,
            clipboard_timeout: CLIPBOARD_TIMEOUT,
        }
    }
}

/// What the chain hands to each strategy.
#[derive(Debug, Clone)]
pub struct Deliverable {
    pub week: u32,
    pub file_name: String,
    pub png: Arc<Vec<u8>>,
    pub share_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: Strategy,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub method: Option<DeliveryMethod>,
    pub saved_to: Option<PathBuf>,
    pub attempts: Vec<Attempt>,
}

/// Ordered strategies for the given capabilities. Strategies that do not
/// apply are left out, so the chain only runs what the device can do.
pub fn plan(caps: &Capabilities) -> Vec<Strategy> {
    let mut out = Vec::new();
    if caps.mobile && caps.share {
        out.push(Strategy::Share);
    }
    if caps.mobile && caps.clipboard_image {
        out.push(Strategy::Clipboard);
    }
    out.push(Strategy::Download);
    if caps.platform == PlatformFamily::Apple {
        out.push(Strategy::SafetyNetDownload);
    }
    out
}

/// Runs the strategies in order and stops at the first success.
pub fn deliver(
    item: &Deliverable,
    target: &Arc<dyn DeliveryTarget>,
    caps: &Capabilities,
    policy: &DeliveryPolicy,
    log: &mut DebugLog,
) -> DeliveryReport {
    let mut report = DeliveryReport {
        method: None,
        saved_to: None,
        attempts: Vec::new(),
    };
    log.info(format!(
        "Device detection - Mobile: {}, Platform: {:?}",
        caps.mobile, caps.platform
    ));

    for strategy in plan(caps) {
        let result = match strategy {
            Strategy::Share => attempt_share(item, target, caps, policy, log),
            Strategy::Clipboard => attempt_clipboard(item, target, policy, log),
            Strategy::Download | Strategy::SafetyNetDownload => {
                if strategy == Strategy::SafetyNetDownload {
                    log.info("Apple safety net: forcing download");
                } else {
                    log.info("Downloading image");
                }
                target
                    .download(&item.file_name, &item.png)
                    .map(|path| {
                        report.saved_to = Some(path);
                        DeliveryMethod::Download
                    })
            }
        };
        match result {
            Ok(method) => {
                log.success(format!("Export delivered using method: {}", method.as_str()));
                report.attempts.push(Attempt {
                    strategy,
                    error: None,
                });
                report.method = Some(method);
                return report;
            }
            Err(err) => {
                log.error(format!("{strategy:?} failed: {err:#}"));
                report.attempts.push(Attempt {
                    strategy,
                    error: Some(format!("{err:#}")),
                });
            }
        }
    }
    report
}

fn attempt_share(
    item: &Deliverable,
    target: &Arc<dyn DeliveryTarget>,
    caps: &Capabilities,
    policy: &DeliveryPolicy,
    log: &mut DebugLog,
) -> Result<DeliveryMethod> {
    let title = format!("GW {} Predictions", item.week);
    let text = format!("Check out my predictions for GW {}!", item.week);
    let with_file = caps.platform != PlatformFamily::Apple && caps.share_files;
    let request = if with_file {
        log.info(format!(
            "Sharing file {} ({} bytes)",
            item.file_name,
            item.png.len()
        ));
        ShareRequest {
            title,
            text,
            url: None,
            file: Some(SharedFile {
                name: item.file_name.clone(),
                mime: "image/png",
                bytes: item.png.clone(),
            }),
        }
    } else {
        log.info("Sharing text/link");
        ShareRequest {
            title,
            text,
            url: item.share_url.clone(),
            file: None,
        }
    };
    let target = target.clone();
    run_with_timeout(policy.share_timeout, "Share operation", move || {
        target.share(request)
    })?;
    Ok(DeliveryMethod::Share)
}

fn attempt_clipboard(
    item: &Deliverable,
    target: &Arc<dyn DeliveryTarget>,
    policy: &DeliveryPolicy,
    log: &mut DebugLog,
) -> Result<DeliveryMethod> {
    log.info("Copying image to clipboard");
    let target = target.clone();
    let png = item.png.clone();
    run_with_timeout(policy.clipboard_timeout, "Clipboard operation", move || {
        target.write_clipboard_image(png)
    })?;
    Ok(DeliveryMethod::Clipboard)
}

#[derive(Debug, thiserror::Error)]
#[error("{0} timed out")]
pub struct TimedOut(pub String);

/// Races `op` on a helper thread against `timeout`. Losing the race only
/// stops waiting; the operation itself keeps running to completion.
pub fn run_with_timeout<T, F>(timeout: Duration, what: &str, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("timed-op".to_string())
        .spawn(move || {
            let _ = tx.send(op());
        })
        .context("spawn worker thread")?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(TimedOut(what.to_string()).into()),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow::anyhow!("{what} aborted")),
    }
}

/// Reads capabilities from the environment: `PREDICTOR_PLATFORM` overrides,
/// otherwise Termux counts as an Android device with its share helper.
pub struct EnvCapabilityProbe {
    pub platform_override: Option<String>,
}

impl CapabilityProbe for EnvCapabilityProbe {
    fn probe(&self) -> Capabilities {
        let termux = std::env::var_os("TERMUX_VERSION").is_some();
        let platform = match self.platform_override.as_deref() {
            Some("ios") => Some(PlatformFamily::Apple),
            Some("android") => Some(PlatformFamily::Android),
            Some("desktop") => None,
            _ if termux => Some(PlatformFamily::Android),
            _ => None,
        };
        match platform {
            Some(platform) => Capabilities {
                mobile: true,
                platform,
                share: termux,
                share_files: termux,
                clipboard_image: false,
            },
            None => Capabilities::desktop(),
        }
    }
}

/// Writes downloads into a directory; shares through `termux-share` when present.
pub struct LocalDelivery {
    pub export_dir: PathBuf,
}

impl DeliveryTarget for LocalDelivery {
    fn share(&self, request: ShareRequest) -> Result<()> {
        let mut cmd = Command::new("termux-share");
        cmd.args(["-a", "send"]);
        let path = match &request.file {
            Some(file) => {
                let path = std::env::temp_dir().join(&file.name);
                std::fs::write(&path, file.bytes.as_slice())
                    .with_context(|| format!("write {}", path.display()))?;
                path
            }
            None => {
                let text = match &request.url {
                    Some(url) => format!("{}\n{}", request.text, url),
                    None => request.text.clone(),
                };
                cmd.args(["-c", "text/plain"]);
                let path = std::env::temp_dir().join("pl-predictor-share.txt");
                std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
                path
            }
        };
        let status = cmd.arg(&path).status().context("termux-share unavailable")?;
        if !status.success() {
            return Err(anyhow::anyhow!("termux-share exited with {status}"));
        }
        Ok(())
    }

    fn write_clipboard_image(&self, _png: Arc<Vec<u8>>) -> Result<()> {
        Err(anyhow::anyhow!("image clipboard not supported"))
    }

    fn download(&self, file_name: &str, png: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.export_dir)
            .with_context(|| format!("create {}", self.export_dir.display()))?;
        let path = self.export_dir.join(file_name);
        let tmp = path.with_extension("png.tmp");
        std::fs::write(&tmp, png).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("move to {}", path.display()))?;
        Ok(path)
    }
}
