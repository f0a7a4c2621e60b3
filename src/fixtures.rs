use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http_client::fetch;

/// How long after kickoff a match stays on screen.
pub const LIVE_GRACE_MINUTES: i64 = 20;
/// How far ahead a kickoff may be and still count as current.
pub const LOOK_AHEAD_MINUTES: i64 = 150;
/// Window around now in which a week counts as being played.
pub const LIVE_WINDOW_MINUTES: i64 = 150;
/// Horizon for picking the default week.
pub const UPCOMING_WEEK_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub home: String,
    pub away: String,
    #[serde(default)]
    pub kickoff: String,
    #[serde(default)]
    pub venue: String,
}

impl Match {
    pub fn kickoff_time(&self) -> Option<DateTime<Utc>> {
        parse_kickoff(&self.kickoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub week: u32,
    pub matches: Vec<Match>,
}

impl Fixture {
    pub fn match_ids(&self) -> impl Iterator<Item = (MatchId, &Match)> + '_ {
        self.matches
            .iter()
            .enumerate()
            .map(|(index, m)| (MatchId::new(self.week, m, index), m))
    }
}

/// Join key between fixtures and predictions: `WW::home::away::index`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn new(week: u32, m: &Match, index: usize) -> Self {
        Self(format!("{week:02}::{}::{}::{index}", m.home, m.away))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Week, home, and away parts, when the id has the usual shape.
    pub fn parts(&self) -> Option<(u32, &str, &str)> {
        let mut parts = self.0.split("::");
        let week = parts.next()?.parse::<u32>().ok()?;
        let home = parts.next()?;
        let away = parts.next()?;
        Some((week, home, away))
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureSource {
    File(PathBuf),
    Url(String),
}

impl FixtureSource {
    pub fn describe(&self) -> String {
        match self {
            FixtureSource::File(path) => path.display().to_string(),
            FixtureSource::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureLoad {
    pub fixtures: Vec<Fixture>,
    /// Set when the bundled sample set replaced the configured source.
    pub notice: Option<String>,
}

pub fn load_fixtures(source: &FixtureSource) -> FixtureLoad {
    match fetch_fixtures(source) {
        Ok(fixtures) => FixtureLoad {
            fixtures,
            notice: None,
        },
        Err(err) => FixtureLoad {
            fixtures: fallback_fixtures(),
            notice: Some(format!("Using bundled sample fixtures ({err:#}).")),
        },
    }
}

fn fetch_fixtures(source: &FixtureSource) -> Result<Vec<Fixture>> {
    let body = match source {
        FixtureSource::File(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?,
        FixtureSource::Url(url) => fetch(url)?.into_text()?,
    };
    let fixtures = parse_fixtures_json(&body)?;
    if fixtures.is_empty() {
        return Err(anyhow::anyhow!(
            "Fixture file did not include any valid matchweeks."
        ));
    }
    Ok(fixtures)
}

/// Parses `{ "weeks": [...] }` or a bare array of weeks. Invalid weeks and
/// matches are skipped; the result is sorted by week with duplicates dropped.
pub fn parse_fixtures_json(raw: &str) -> Result<Vec<Fixture>> {
    let root: Value = serde_json::from_str(raw.trim()).context("invalid fixtures json")?;
    Ok(normalize_fixtures(&root))
}

pub fn normalize_fixtures(root: &Value) -> Vec<Fixture> {
    let weeks = match root.get("weeks") {
        Some(Value::Array(weeks)) => weeks,
        _ => match root {
            Value::Array(weeks) => weeks,
            _ => return Vec::new(),
        },
    };

    let mut out: Vec<Fixture> = weeks.iter().filter_map(normalize_week).collect();
    out.sort_by_key(|f| f.week);
    out.dedup_by_key(|f| f.week);
    out
}

fn normalize_week(value: &Value) -> Option<Fixture> {
    let week = parse_week_number(value.get("week")?)?;
    let matches: Vec<Match> = value
        .get("matches")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(normalize_match).collect())
        .unwrap_or_default();
    if matches.is_empty() {
        return None;
    }
    Some(Fixture { week, matches })
}

fn parse_week_number(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() || number < 1.0 || number.fract() != 0.0 || number > u32::MAX as f64 {
        return None;
    }
    Some(number as u32)
}

fn normalize_match(value: &Value) -> Option<Match> {
    let home = trimmed_str(value.get("home"))?;
    let away = trimmed_str(value.get("away"))?;
    let kickoff = value
        .get("kickoff")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let venue = trimmed_str(value.get("venue")).unwrap_or_default();
    Some(Match {
        home,
        away,
        kickoff,
        venue,
    })
}

fn trimmed_str(value: Option<&Value>) -> Option<String> {
    let trimmed = value?.as_str()?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_kickoff(raw: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(dt.and_utc());
        }
    }
    None
}

/// Keeps matches that kicked off at most 20 minutes ago or start within the
/// next 2.5 hours. Weeks left without matches are dropped.
pub fn filter_current_week_matches(fixtures: &[Fixture], now: DateTime<Utc>) -> Vec<Fixture> {
    let earliest = now - ChronoDuration::minutes(LIVE_GRACE_MINUTES);
    let latest = now + ChronoDuration::minutes(LOOK_AHEAD_MINUTES);
    fixtures
        .iter()
        .filter_map(|fixture| {
            let matches: Vec<Match> = fixture
                .matches
                .iter()
                .filter(|m| {
                    m.kickoff_time()
                        .is_some_and(|kickoff| kickoff >= earliest && kickoff <= latest)
                })
                .cloned()
                .collect();
            if matches.is_empty() {
                None
            } else {
                Some(Fixture {
                    week: fixture.week,
                    matches,
                })
            }
        })
        .collect()
}

/// First week (ascending) with a match being played around now or starting
/// within the next seven days.
pub fn get_current_week(fixtures: &[Fixture], now: DateTime<Utc>) -> Option<u32> {
    let live_window = ChronoDuration::minutes(LIVE_WINDOW_MINUTES);
    let horizon = ChronoDuration::days(UPCOMING_WEEK_DAYS);
    let mut sorted: Vec<&Fixture> = fixtures.iter().collect();
    sorted.sort_by_key(|f| f.week);
    sorted
        .into_iter()
        .find(|fixture| {
            fixture.matches.iter().any(|m| {
                let Some(kickoff) = m.kickoff_time() else {
                    return false;
                };
                let live = kickoff >= now - live_window && kickoff <= now + live_window;
                let upcoming = kickoff >= now && kickoff <= now + horizon;
                live || upcoming
            })
        })
        .map(|f| f.week)
}

pub fn fallback_fixtures() -> Vec<Fixture> {
    fn m(home: &str, away: &str, kickoff: &str, venue: &str) -> Match {
        Match {
            home: home.to_string(),
            away: away.to_string(),
            kickoff: kickoff.to_string(),
            venue: venue.to_string(),
        }
    }

    vec![
        Fixture {
            week: 1,
            matches: vec![
                m("Manchester United", "Fulham", "2024-08-16T19:00:00Z", "Old Trafford"),
                m("Ipswich Town", "Liverpool", "2024-08-17T11:30:00Z", "Portman Road"),
                m("Chelsea", "Manchester City", "2024-08-18T15:30:00Z", "Stamford Bridge"),
            ],
        },
        Fixture {
            week: 2,
            matches: vec![
                m("Arsenal", "Leicester City", "2024-08-24T14:00:00Z", "Emirates Stadium"),
                m("Everton", "Brighton", "2024-08-24T14:00:00Z", "Goodison Park"),
                m(
                    "Tottenham Hotspur",
                    "Newcastle United",
                    "2024-08-25T16:30:00Z",
                    "Tottenham Hotspur Stadium",
                ),
            ],
        },
        Fixture {
            week: 3,
            matches: vec![
                m("Liverpool", "Chelsea", "2024-08-31T11:30:00Z", "Anfield"),
                m("Manchester City", "Arsenal", "2024-09-01T15:30:00Z", "Etihad Stadium"),
                m("Aston Villa", "West Ham United", "2024-09-02T19:00:00Z", "Villa Park"),
            ],
        },
    ]
}

/// Kickoff label in the configured display offset, e.g. `Sat 16 Aug 22:00 AST`.
pub fn format_kickoff(raw: &str, offset_hours: i32, tz_label: &str) -> String {
    let Some(kickoff) = parse_kickoff(raw) else {
        return "Kick-off TBC".to_string();
    };
    let local = kickoff.naive_utc() + ChronoDuration::hours(offset_hours as i64);
    let text = local.format("%a %-d %b %H:%M").to_string();
    if tz_label.is_empty() {
        text
    } else {
        format!("{text} {tz_label}")
    }
}
