use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fixtures::{Fixture, MatchId};
use crate::storage::{PREDICTIONS_KEY, Storage, StorageError};

pub const MAX_SCORE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub away: String,
}

impl Prediction {
    pub fn side(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut String {
        match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.away.is_empty()
    }
}

/// Cleans a raw score: blank or invalid input becomes `""`, numbers are
/// rounded and capped at 20.
pub fn sanitize_score(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let Ok(numeric) = trimmed.parse::<f64>() else {
        return String::new();
    };
    if !numeric.is_finite() || numeric < 0.0 {
        return String::new();
    }
    let clamped = numeric.round().min(MAX_SCORE);
    format!("{}", clamped as u32)
}

fn sanitize_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => sanitize_score(s),
        Some(Value::Number(n)) => sanitize_score(&n.to_string()),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub match_id: MatchId,
    pub week: u32,
    pub label: String,
    pub result: &'static str,
}

pub struct PredictionStore {
    entries: BTreeMap<MatchId, Prediction>,
    storage: Arc<Storage>,
}

impl PredictionStore {
    /// Loads persisted predictions, dropping entries with no valid side.
    pub fn load(storage: Arc<Storage>) -> Self {
        let entries = storage
            .get(PREDICTIONS_KEY)
            .map(|raw| parse_persisted(&raw))
            .unwrap_or_default();
        Self { entries, storage }
    }

    pub fn get(&self, id: &MatchId) -> Option<&Prediction> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> &BTreeMap<MatchId, Prediction> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Updates one side and rewrites the whole map to storage. The in-memory
    /// update always applies; an error only reports that persistence degraded.
    pub fn set_score(&mut self, id: &MatchId, side: Side, raw: &str) -> Result<(), StorageError> {
        let cleaned = sanitize_score(raw);
        let mut entry = self.entries.get(id).cloned().unwrap_or_default();
        *entry.side_mut(side) = cleaned;
        if entry.is_empty() {
            self.entries.remove(id);
        } else {
            self.entries.insert(id.clone(), entry);
        }
        self.persist()
    }

    pub fn has_predictions_for(&self, fixture: &Fixture) -> bool {
        fixture
            .match_ids()
            .any(|(id, _)| self.entries.contains_key(&id))
    }

    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        let mut rows: Vec<SummaryRow> = self
            .entries
            .iter()
            .filter_map(|(id, prediction)| {
                let (week, home, away) = id.parts()?;
                let home_score = prediction.home.parse::<u32>().ok()?;
                let away_score = prediction.away.parse::<u32>().ok()?;
                Some(SummaryRow {
                    match_id: id.clone(),
                    week,
                    label: format!("{home} {home_score} - {away_score} {away}"),
                    result: determine_result(home_score, away_score),
                })
            })
            .collect();
        rows.sort_by_key(|row| row.week);
        rows
    }

    fn persist(&self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string());
        self.storage.set(PREDICTIONS_KEY, &json)
    }
}

fn parse_persisted(raw: &str) -> BTreeMap<MatchId, Prediction> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .filter_map(|(id, value)| {
            let prediction = Prediction {
                home: sanitize_value(value.get("home")),
                away: sanitize_value(value.get("away")),
            };
            if prediction.is_empty() {
                None
            } else {
                Some((MatchId::from_raw(id), prediction))
            }
        })
        .collect()
}

fn determine_result(home: u32, away: u32) -> &'static str {
    if home > away {
        "Home win"
    } else if home < away {
        "Away win"
    } else {
        "Draw"
    }
}
