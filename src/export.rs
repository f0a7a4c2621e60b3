use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::badges::{BadgeSource, encode_data_url};
use crate::debug_log::DebugLog;
use crate::delivery::{
    CapabilityProbe, Deliverable, DeliveryMethod, DeliveryPolicy, DeliveryTarget, TimedOut,
    deliver, run_with_timeout,
};
use crate::fixtures::{Fixture, format_kickoff};
use crate::normalize::{crest_id, normalize_club_key};
use crate::predictions::PredictionStore;
use crate::render::{CardRow, ExportCard, Rasterizer};

pub const RENDER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSide {
    pub team: String,
    pub score: String,
}

/// Compact JSON carried in the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub week: u32,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
    pub matches: Vec<BTreeMap<String, PayloadSide>>,
}

fn payload_key(team: &str) -> String {
    crest_id(team)
        .map(|id| id.to_string())
        .unwrap_or_else(|| normalize_club_key(team))
}

pub fn build_export_payload(
    fixture: &Fixture,
    predictions: &PredictionStore,
    now: DateTime<Utc>,
) -> ExportPayload {
    let matches = fixture
        .match_ids()
        .map(|(id, m)| {
            let entry = predictions.get(&id).cloned().unwrap_or_default();
            let home_key = payload_key(&m.home);
            let mut away_key = payload_key(&m.away);
            if away_key == home_key {
                away_key.push_str("#away");
            }
            let mut sides = BTreeMap::new();
            sides.insert(
                home_key,
                PayloadSide {
                    team: m.home.clone(),
                    score: entry.home,
                },
            );
            sides.insert(
                away_key,
                PayloadSide {
                    team: m.away.clone(),
                    score: entry.away,
                },
            );
            sides
        })
        .collect();
    ExportPayload {
        week: fixture.week,
        generated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        matches,
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("Export timed out. Please try again.")]
    TimedOut,
    #[error("Export tool not available. Please restart the app and try again.")]
    RasterizerUnavailable,
    #[error("Export failed: {0}")]
    Failed(String),
}

impl ExportError {
    fn from_render(err: anyhow::Error) -> Self {
        if err.downcast_ref::<TimedOut>().is_some() {
            ExportError::TimedOut
        } else {
            ExportError::Failed(format!("{err:#}"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub week: u32,
    pub payload: ExportPayload,
    pub payload_json: String,
    pub png: Arc<Vec<u8>>,
    pub data_url: String,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    /// Another export was already running; nothing happened.
    Busy,
    Delivered {
        method: DeliveryMethod,
        saved_to: Option<PathBuf>,
        artifact: ExportArtifact,
    },
    Failed(ExportError),
}

pub fn export_file_name(week: u32) -> String {
    format!("gw-{week}-predictions.png")
}

/// Kickoff display settings used on the card.
#[derive(Debug, Clone)]
pub struct KickoffDisplay {
    pub offset_hours: i32,
    pub tz_label: String,
}

impl Default for KickoffDisplay {
    fn default() -> Self {
        Self {
            offset_hours: 3,
            tz_label: "AST".to_string(),
        }
    }
}

pub struct Exporter {
    busy: AtomicBool,
    rasterizer: Arc<dyn Rasterizer>,
    target: Arc<dyn DeliveryTarget>,
    probe: Box<dyn CapabilityProbe>,
    pub policy: DeliveryPolicy,
    pub render_timeout: Duration,
    pub share_url: Option<String>,
    pub kickoff: KickoffDisplay,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Exporter {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        target: Arc<dyn DeliveryTarget>,
        probe: Box<dyn CapabilityProbe>,
    ) -> Self {
        Self {
            busy: AtomicBool::new(false),
            rasterizer,
            target,
            probe,
            policy: DeliveryPolicy::default(),
            render_timeout: RENDER_TIMEOUT,
            share_url: None,
            kickoff: KickoffDisplay::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn export_active_week(
        &self,
        fixture: &Fixture,
        predictions: &PredictionStore,
        badges: &mut dyn BadgeSource,
        log: &mut DebugLog,
        now: DateTime<Utc>,
    ) -> ExportOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log.warn("Export already in progress");
            return ExportOutcome::Busy;
        }
        let _guard = BusyGuard(&self.busy);
        log.info(format!("Starting export for GW {}", fixture.week));

        let artifact = match self.render(fixture, predictions, badges, now) {
            Ok(artifact) => artifact,
            Err(err) => {
                log.error(format!("Export failed with error: {err}"));
                return ExportOutcome::Failed(err);
            }
        };
        log.info(format!("Rendered {} ({} bytes)", artifact.file_name, artifact.png.len()));

        let caps = self.probe.probe();
        let item = Deliverable {
            week: artifact.week,
            file_name: artifact.file_name.clone(),
            png: artifact.png.clone(),
            share_url: self.share_url.clone(),
        };
        let report = deliver(&item, &self.target, &caps, &self.policy, log);
        match report.method {
            Some(method) => ExportOutcome::Delivered {
                method,
                saved_to: report.saved_to,
                artifact,
            },
            None => {
                let tried: Vec<&str> = report
                    .attempts
                    .iter()
                    .map(|attempt| attempt.strategy.as_str())
                    .collect();
                log.error(format!("All delivery methods failed ({})", tried.join(", ")));
                let err = ExportError::Failed("no delivery method succeeded.".to_string());
                log.error(err.to_string());
                ExportOutcome::Failed(err)
            }
        }
    }

    fn render(
        &self,
        fixture: &Fixture,
        predictions: &PredictionStore,
        badges: &mut dyn BadgeSource,
        now: DateTime<Utc>,
    ) -> Result<ExportArtifact, ExportError> {
        if !self.rasterizer.is_available() {
            return Err(ExportError::RasterizerUnavailable);
        }
        let payload = build_export_payload(fixture, predictions, now);
        let payload_json = serde_json::to_string(&payload)
            .map_err(|err| ExportError::Failed(format!("payload encode: {err}")))?;
        let card = self.compose_card(fixture, predictions, badges, &payload_json, now);

        let rasterizer = self.rasterizer.clone();
        let png = run_with_timeout(self.render_timeout, "Rasterization", move || {
            rasterizer.rasterize(&card)
        })
        .map_err(ExportError::from_render)?;
        if png.is_empty() {
            return Err(ExportError::Failed("rasterizer returned no image".to_string()));
        }

        Ok(ExportArtifact {
            week: fixture.week,
            data_url: encode_data_url("image/png", &png),
            png: Arc::new(png),
            payload,
            payload_json,
            file_name: export_file_name(fixture.week),
        })
    }

    fn compose_card(
        &self,
        fixture: &Fixture,
        predictions: &PredictionStore,
        badges: &mut dyn BadgeSource,
        payload_json: &str,
        now: DateTime<Utc>,
    ) -> ExportCard {
        let KickoffDisplay {
            offset_hours,
            tz_label,
        } = &self.kickoff;
        let rows = fixture
            .match_ids()
            .map(|(id, m)| {
                let entry = predictions.get(&id).cloned().unwrap_or_default();
                CardRow {
                    home_badge: badges.badge(&m.home),
                    away_badge: badges.badge(&m.away),
                    home: m.home.clone(),
                    away: m.away.clone(),
                    home_score: entry.home,
                    away_score: entry.away,
                    kickoff_label: format_kickoff(&m.kickoff, *offset_hours, tz_label),
                    venue: m.venue.clone(),
                }
            })
            .collect();
        ExportCard {
            title: format!("GW {} PREDICTIONS", fixture.week),
            subtitle: format!(
                "Exported {}",
                format_kickoff(&now.to_rfc3339(), *offset_hours, tz_label)
            ),
            rows,
            qr_payload: payload_json.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;

    use super::*;
    use crate::delivery::{Capabilities, ShareRequest};
    use crate::fixtures::Match;
    use crate::predictions::Side;
    use crate::storage::{MemoryStore, Storage};

    struct NoBadges;

    impl BadgeSource for NoBadges {
        fn badge(&mut self, _team: &str) -> String {
            crate::badges::FALLBACK_BADGE.to_string()
        }
    }

    struct StubRasterizer {
        available: bool,
        delay: Duration,
    }

    impl Rasterizer for StubRasterizer {
        fn is_available(&self) -> bool {
            self.available
        }

        fn rasterize(&self, card: &ExportCard) -> Result<Vec<u8>> {
            std::thread::sleep(self.delay);
            Ok(card.qr_payload.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        downloads: Mutex<Vec<String>>,
        fail_download: bool,
    }

    impl DeliveryTarget for RecordingTarget {
        fn share(&self, _request: ShareRequest) -> Result<()> {
            Err(anyhow::anyhow!("share cancelled"))
        }

        fn write_clipboard_image(&self, _png: Arc<Vec<u8>>) -> Result<()> {
            Err(anyhow::anyhow!("clipboard denied"))
        }

        fn download(&self, file_name: &str, _png: &[u8]) -> Result<PathBuf> {
            if self.fail_download {
                return Err(anyhow::anyhow!("disk full"));
            }
            self.downloads.lock().unwrap().push(file_name.to_string());
            Ok(PathBuf::from(file_name))
        }
    }

    fn fixture() -> Fixture {
        let m = |home: &str, away: &str| Match {
            home: home.to_string(),
            away: away.to_string(),
            kickoff: "2025-08-16T16:00:00Z".to_string(),
            venue: "Ground".to_string(),
        };
        Fixture {
            week: 4,
            matches: vec![
                m("Arsenal", "Chelsea"),
                m("Nowhere Rovers", "Arsenal"),
                m("Man Utd", "Manchester United"),
            ],
        }
    }

    fn store() -> PredictionStore {
        PredictionStore::load(Arc::new(Storage::new(Box::new(MemoryStore::default()))))
    }

    fn exporter(rasterizer: StubRasterizer, target: Arc<RecordingTarget>) -> Exporter {
        Exporter::new(
            Arc::new(rasterizer),
            target,
            Box::new(Capabilities::desktop()),
        )
    }

    fn now() -> DateTime<Utc> {
        "2025-08-16T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn payload_keys_use_crest_ids_and_mark_collisions() {
        let fixture = fixture();
        let mut predictions = store();
        let (id, _) = fixture.match_ids().next().unwrap();
        predictions.set_score(&id, Side::Home, "2").unwrap();

        let payload = build_export_payload(&fixture, &predictions, now());
        assert_eq!(payload.week, 4);
        assert_eq!(payload.generated_at, "2025-08-16T12:00:00.000Z");
        let first = &payload.matches[0];
        assert_eq!(first["57"].team, "Arsenal");
        assert_eq!(first["57"].score, "2");
        assert_eq!(first["61"].score, "");
        assert!(payload.matches[1].contains_key("NOWHEREROVERS"));
        let derby = &payload.matches[2];
        assert_eq!(derby["66"].team, "Man Utd");
        assert_eq!(derby["66#away"].team, "Manchester United");
    }

    #[test]
    fn desktop_export_downloads_named_file() {
        let target = Arc::new(RecordingTarget::default());
        let exporter = exporter(
            StubRasterizer {
                available: true,
                delay: Duration::ZERO,
            },
            target.clone(),
        );
        let mut log = DebugLog::detached();
        let outcome =
            exporter.export_active_week(&fixture(), &store(), &mut NoBadges, &mut log, now());
        match outcome {
            ExportOutcome::Delivered {
                method, artifact, ..
            } => {
                assert_eq!(method, DeliveryMethod::Download);
                assert_eq!(artifact.file_name, "gw-4-predictions.png");
                assert!(artifact.data_url.starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(target.downloads.lock().unwrap().as_slice(), ["gw-4-predictions.png"]);
        assert!(!exporter.is_busy());
    }

    #[test]
    fn second_export_while_busy_is_a_no_op() {
        let target = Arc::new(RecordingTarget::default());
        let exporter = exporter(
            StubRasterizer {
                available: true,
                delay: Duration::ZERO,
            },
            target.clone(),
        );
        exporter.busy.store(true, Ordering::Release);
        let mut log = DebugLog::detached();
        let outcome =
            exporter.export_active_week(&fixture(), &store(), &mut NoBadges, &mut log, now());
        assert!(matches!(outcome, ExportOutcome::Busy));
        assert!(target.downloads.lock().unwrap().is_empty());
    }

    #[test]
    fn unavailable_rasterizer_reports_tool_message() {
        let exporter = exporter(
            StubRasterizer {
                available: false,
                delay: Duration::ZERO,
            },
            Arc::new(RecordingTarget::default()),
        );
        let mut log = DebugLog::detached();
        let outcome =
            exporter.export_active_week(&fixture(), &store(), &mut NoBadges, &mut log, now());
        let ExportOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err, ExportError::RasterizerUnavailable);
        assert!(err.to_string().starts_with("Export tool not available."));
        assert!(!exporter.is_busy());
    }

    #[test]
    fn slow_render_times_out_and_clears_busy() {
        let mut exporter = exporter(
            StubRasterizer {
                available: true,
                delay: Duration::from_millis(500),
            },
            Arc::new(RecordingTarget::default()),
        );
        exporter.render_timeout = Duration::from_millis(20);
        let mut log = DebugLog::detached();
        let outcome =
            exporter.export_active_week(&fixture(), &store(), &mut NoBadges, &mut log, now());
        let ExportOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err.to_string(), "Export timed out. Please try again.");
        assert!(!exporter.is_busy());
    }

    #[test]
    fn total_delivery_failure_is_reported() {
        let target = Arc::new(RecordingTarget {
            fail_download: true,
            ..Default::default()
        });
        let exporter = exporter(
            StubRasterizer {
                available: true,
                delay: Duration::ZERO,
            },
            target,
        );
        let mut log = DebugLog::detached();
        let outcome =
            exporter.export_active_week(&fixture(), &store(), &mut NoBadges, &mut log, now());
        let ExportOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(
            err.to_string(),
            "Export failed: no delivery method succeeded."
        );
        assert!(log.entries().any(|line| line.contains("Download failed: disk full")));
        assert!(
            log.entries()
                .any(|line| line.ends_with("All delivery methods failed (download)"))
        );
    }
}
