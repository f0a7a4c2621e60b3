use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use pl_predictor::fixtures::{
    Fixture, FixtureSource, Match, MatchId, fallback_fixtures, filter_current_week_matches,
    get_current_week, load_fixtures, parse_fixtures_json,
};

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

fn read_fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).expect("fixture file should be readable")
}

fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("valid timestamp")
}

#[test]
fn window_keeps_recent_and_near_kickoffs() {
    let fixtures = parse_fixtures_json(&read_fixture("window.json")).unwrap();
    let filtered = filter_current_week_matches(&fixtures, at("2025-03-01T12:00:00Z"));

    assert_eq!(filtered.len(), 1, "week 28 has nothing in the window");
    let week = &filtered[0];
    assert_eq!(week.week, 27);
    let homes: Vec<&str> = week.matches.iter().map(|m| m.home.as_str()).collect();
    assert_eq!(homes, ["Arsenal", "Brentford"]);
}

#[test]
fn window_edges_are_inclusive() {
    let now = at("2025-03-01T12:00:00Z");
    let week = |kickoffs: &[&str]| Fixture {
        week: 27,
        matches: kickoffs
            .iter()
            .enumerate()
            .map(|(i, kickoff)| Match {
                home: format!("Home {i}"),
                away: format!("Away {i}"),
                kickoff: kickoff.to_string(),
                venue: String::new(),
            })
            .collect(),
    };

    // Exactly 20 minutes ago and exactly 2.5 hours ahead.
    let edges = [week(&["2025-03-01T11:40:00Z", "2025-03-01T14:30:00Z"])];
    let filtered = filter_current_week_matches(&edges, now);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].matches.len(), 2);

    let outside = [week(&["2025-03-01T11:39:59Z", "2025-03-01T14:30:01Z"])];
    assert!(filter_current_week_matches(&outside, now).is_empty());
}

#[test]
fn current_week_is_the_one_starting_soon() {
    let fixtures = parse_fixtures_json(&read_fixture("weeks.json")).unwrap();
    assert_eq!(get_current_week(&fixtures, at("2025-03-01T12:00:00Z")), Some(2));
    // Nothing live and nothing within seven days.
    assert_eq!(get_current_week(&fixtures, at("2025-03-20T12:00:00Z")), None);
    // A match that kicked off two hours ago still counts as live.
    assert_eq!(get_current_week(&fixtures, at("2025-02-01T21:00:00Z")), Some(1));
}

#[test]
fn ingestion_sorts_dedups_and_cleans_matches() {
    let fixtures = parse_fixtures_json(&read_fixture("weeks.json")).unwrap();
    let weeks: Vec<u32> = fixtures.iter().map(|f| f.week).collect();
    assert_eq!(weeks, [1, 2, 3]);

    let week2 = &fixtures[1];
    assert_eq!(week2.matches.len(), 2, "match without an away side is dropped");
    assert_eq!(week2.matches[0].home, "Arsenal");
    let brighton = &week2.matches[1];
    assert_eq!(brighton.kickoff, "");
    assert_eq!(brighton.venue, "Amex Stadium");
}

#[test]
fn match_ids_are_unique_within_a_week() {
    let fixtures = parse_fixtures_json(&read_fixture("window.json")).unwrap();
    let ids: Vec<MatchId> = fixtures[0].match_ids().map(|(id, _)| id).collect();
    let mut deduped = ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(ids.len(), deduped.len());
    assert_eq!(ids[0].as_str(), "27::Arsenal::Chelsea::0");
    let again: Vec<MatchId> = fixtures[0].match_ids().map(|(id, _)| id).collect();
    assert_eq!(ids, again);
}

#[test]
fn file_source_loads_without_notice() {
    let load = load_fixtures(&FixtureSource::File(fixture_path("weeks.json")));
    assert!(load.notice.is_none());
    assert_eq!(load.fixtures.len(), 3);
}

#[test]
fn missing_or_empty_source_uses_bundled_fixtures() {
    let load = load_fixtures(&FixtureSource::File(fixture_path("does-not-exist.json")));
    assert_eq!(load.fixtures, fallback_fixtures());
    let notice = load.notice.unwrap();
    assert!(notice.starts_with("Using bundled sample fixtures ("), "{notice}");

    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.json");
    fs::write(&empty, r#"{"weeks": []}"#).unwrap();
    let load = load_fixtures(&FixtureSource::File(empty));
    assert_eq!(load.fixtures, fallback_fixtures());
    assert!(
        load.notice
            .unwrap()
            .contains("Fixture file did not include any valid matchweeks.")
    );
}
