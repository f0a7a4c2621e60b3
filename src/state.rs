use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::badges::{BadgeFetcher, BadgeResolver};
use crate::debug_log::DebugLog;
use crate::delivery::DeliveryMethod;
use crate::export::{ExportOutcome, Exporter};
use crate::fixtures::{
    Fixture, FixtureLoad, Match, MatchId, filter_current_week_matches, get_current_week,
};
use crate::predictions::{Prediction, PredictionStore, Side, SummaryRow};
use crate::storage::Storage;
use crate::theme::Theme;

#[derive(Debug, Clone)]
pub struct LastExport {
    pub week: u32,
    pub method: DeliveryMethod,
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportStatus {
    pub busy: bool,
    pub error: Option<String>,
    pub last: Option<LastExport>,
}

impl ExportStatus {
    pub fn line(&self) -> Option<String> {
        if self.busy {
            return Some("Preparing image...".to_string());
        }
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        let last = self.last.as_ref()?;
        let mut line = format!("GW {}: {}", last.week, last.method.success_message());
        if let Some(path) = &last.saved_to {
            line.push_str(&format!(" Saved to {}", path.display()));
        }
        Some(line)
    }
}

pub struct AppState {
    pub storage: Arc<Storage>,
    /// Everything the fixture source returned.
    pub all_fixtures: Vec<Fixture>,
    /// Weeks shown in the UI.
    pub fixtures: Vec<Fixture>,
    pub active_week: Option<u32>,
    pub notice: Option<String>,
    pub predictions: PredictionStore,
    pub badges: BadgeResolver,
    pub debug: DebugLog,
    pub theme: Theme,
    pub export: ExportStatus,
    pub selected: usize,
    pub side: Side,
    pub help_overlay: bool,
}

impl AppState {
    pub fn new(
        storage: Arc<Storage>,
        load: FixtureLoad,
        fetcher: Box<dyn BadgeFetcher>,
        show_all: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let mut debug = DebugLog::load(storage.clone());
        if let Some(reason) = storage.degraded_reason() {
            debug.warn(format!("Storage unavailable, keeping data for this session only: {reason}"));
        }
        if let Some(notice) = &load.notice {
            debug.warn(notice);
        }

        let fixtures = if show_all {
            load.fixtures.clone()
        } else {
            filter_current_week_matches(&load.fixtures, now)
        };
        let active_week = get_current_week(&load.fixtures, now);
        debug.info(format!(
            "Loaded {} matchweeks, showing {}, current week {}",
            load.fixtures.len(),
            fixtures.len(),
            active_week.map_or_else(|| "none".to_string(), |w| w.to_string())
        ));

        Self {
            predictions: PredictionStore::load(storage.clone()),
            badges: BadgeResolver::new(storage.clone(), fetcher),
            theme: Theme::load(&storage),
            storage,
            all_fixtures: load.fixtures,
            fixtures,
            active_week,
            notice: load.notice,
            debug,
            export: ExportStatus::default(),
            selected: 0,
            side: Side::Home,
            help_overlay: false,
        }
    }

    pub fn weeks(&self) -> Vec<u32> {
        let mut weeks: Vec<u32> = self.fixtures.iter().map(|f| f.week).collect();
        weeks.sort_unstable();
        weeks
    }

    pub fn active_week_data(&self) -> Option<&Fixture> {
        let week = self.active_week?;
        self.fixtures.iter().find(|f| f.week == week)
    }

    pub fn active_matches(&self) -> Vec<(MatchId, &Match)> {
        self.active_week_data()
            .map(|f| f.match_ids().collect())
            .unwrap_or_default()
    }

    pub fn selected_match_id(&self) -> Option<MatchId> {
        let fixture = self.active_week_data()?;
        let m = fixture.matches.get(self.selected)?;
        Some(MatchId::new(fixture.week, m, self.selected))
    }

    pub fn prediction_for(&self, id: &MatchId) -> Prediction {
        self.predictions.get(id).cloned().unwrap_or_default()
    }

    pub fn has_predictions_this_week(&self) -> bool {
        self.active_week_data()
            .is_some_and(|f| self.predictions.has_predictions_for(f))
    }

    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.predictions.summary_rows()
    }

    pub fn next_week(&mut self) {
        self.step_week(true);
    }

    pub fn prev_week(&mut self) {
        self.step_week(false);
    }

    fn step_week(&mut self, forward: bool) {
        let weeks = self.weeks();
        let (Some(&first), Some(&last)) = (weeks.first(), weeks.last()) else {
            return;
        };
        let target = match self.active_week.and_then(|w| weeks.iter().position(|x| *x == w)) {
            Some(pos) if forward => weeks.get(pos + 1).copied().unwrap_or(last),
            Some(pos) => weeks[pos.saturating_sub(1)],
            None if forward => first,
            None => last,
        };
        if self.active_week != Some(target) {
            self.active_week = Some(target);
            self.selected = 0;
            self.side = Side::Home;
        }
    }

    pub fn select_next(&mut self) {
        let total = self.active_week_data().map_or(0, |f| f.matches.len());
        if total > 0 {
            self.selected = (self.selected + 1).min(total - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn switch_side(&mut self) {
        self.side = self.side.other();
    }

    pub fn type_digit(&mut self, digit: char) {
        if !digit.is_ascii_digit() {
            return;
        }
        let Some(id) = self.selected_match_id() else {
            return;
        };
        let mut raw = self.prediction_for(&id).side(self.side).to_string();
        // A lone zero is replaced rather than extended.
        if raw == "0" {
            raw.clear();
        }
        raw.push(digit);
        self.set_score(&id, self.side, &raw);
    }

    pub fn backspace(&mut self) {
        let Some(id) = self.selected_match_id() else {
            return;
        };
        let mut raw = self.prediction_for(&id).side(self.side).to_string();
        raw.pop();
        self.set_score(&id, self.side, &raw);
    }

    pub fn clear_selected(&mut self) {
        let Some(id) = self.selected_match_id() else {
            return;
        };
        self.set_score(&id, Side::Home, "");
        self.set_score(&id, Side::Away, "");
    }

    pub fn set_score(&mut self, id: &MatchId, side: Side, raw: &str) {
        if let Err(err) = self.predictions.set_score(id, side, raw) {
            self.debug.warn(format!("Could not persist predictions: {err}"));
        }
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        if let Err(err) = self.theme.save(&self.storage) {
            self.debug.warn(format!("Could not persist theme: {err}"));
        }
    }

    pub fn toggle_debug(&mut self) {
        let enabled = !self.debug.enabled();
        self.debug.set_enabled(enabled);
    }

    pub fn clear_debug(&mut self) {
        self.debug.clear();
    }

    /// Runs an export for the active week and records the result.
    pub fn export_active_week(&mut self, exporter: &Exporter, now: DateTime<Utc>) {
        let Some(week) = self.active_week else {
            self.export.error = Some("Select a matchweek to export.".to_string());
            return;
        };
        let Some(fixture) = self.fixtures.iter().find(|f| f.week == week) else {
            self.export.error = Some("Select a matchweek to export.".to_string());
            return;
        };
        self.export.busy = true;
        let outcome = exporter.export_active_week(
            fixture,
            &self.predictions,
            &mut self.badges,
            &mut self.debug,
            now,
        );
        self.export.busy = false;
        if let Some(err) = self.badges.take_storage_error() {
            self.debug.warn(format!("Could not persist badge cache: {err}"));
        }
        match outcome {
            ExportOutcome::Busy => {}
            ExportOutcome::Delivered {
                method,
                saved_to,
                artifact,
            } => {
                self.export.error = None;
                self.export.last = Some(LastExport {
                    week: artifact.week,
                    method,
                    saved_to,
                });
            }
            ExportOutcome::Failed(err) => {
                self.export.error = Some(err.to_string());
                self.export.last = None;
            }
        }
    }
}
