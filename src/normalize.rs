use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

pub const CREST_BASE_URL: &str = "https://crests.football-data.org";
pub const DEFAULT_CREST_URL: &str = "https://crests.football-data.org/PL.svg";

const CREST_CANONICAL_IDS: &[(&str, u32)] = &[
    ("Arsenal", 57),
    ("Aston Villa", 58),
    ("Bournemouth", 1044),
    ("Brentford", 402),
    ("Brighton", 397),
    ("Brighton and Hove Albion", 397),
    ("Brighton & Hove Albion", 397),
    ("Burnley", 328),
    ("Chelsea", 61),
    ("Crystal Palace", 354),
    ("Everton", 62),
    ("Fulham", 63),
    ("Ipswich Town", 349),
    ("Leeds United", 341),
    ("Leicester City", 338),
    ("Liverpool", 64),
    ("Luton Town", 389),
    ("Manchester City", 65),
    ("Manchester United", 66),
    ("Newcastle United", 67),
    ("Nottingham Forest", 351),
    ("Sheffield United", 356),
    ("Spurs", 73),
    ("Sunderland", 71),
    ("Southampton", 340),
    ("Tottenham Hotspur", 73),
    ("West Ham United", 563),
    ("Wolverhampton Wanderers", 76),
];

const CREST_ALIASES: &[(&str, &str)] = &[
    ("AFC Bournemouth", "Bournemouth"),
    ("Bournemouth AFC", "Bournemouth"),
    ("Brighton", "Brighton & Hove Albion"),
    ("Brighton and Hove Albion", "Brighton & Hove Albion"),
    ("Brighton Hove Albion", "Brighton & Hove Albion"),
    ("Brighton & Hove", "Brighton & Hove Albion"),
    ("Forest", "Nottingham Forest"),
    ("Nottingham Forest FC", "Nottingham Forest"),
    ("Wolverhampton", "Wolverhampton Wanderers"),
    ("Wolves", "Wolverhampton Wanderers"),
    ("Spurs", "Tottenham Hotspur"),
    ("Sunderland AFC", "Sunderland"),
    ("Tottenham", "Tottenham Hotspur"),
    ("West Ham", "West Ham United"),
    ("Leicester", "Leicester City"),
    ("Leicester City FC", "Leicester City"),
    ("Leeds", "Leeds United"),
    ("Leeds Utd", "Leeds United"),
    ("Newcastle", "Newcastle United"),
    ("Newcastle Utd", "Newcastle United"),
    ("Ipswich", "Ipswich Town"),
    ("Ipswich Town FC", "Ipswich Town"),
    ("Manchester Utd", "Manchester United"),
    ("Manchester United FC", "Manchester United"),
    ("Man United", "Manchester United"),
    ("Man Utd", "Manchester United"),
    ("Man City", "Manchester City"),
    ("Manchester City FC", "Manchester City"),
    ("West Ham Utd", "West Ham United"),
    ("Sheffield Utd", "Sheffield United"),
];

static CLUB_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b)A?FC(?-u:\b)").expect("club suffix regex"));

static CREST_LOOKUP: Lazy<CrestLookup> = Lazy::new(CrestLookup::builtin);

/// Canonical lookup key for a club name.
///
/// Diacritics are stripped, the name is uppercased, `FOOTBALL CLUB` and
/// standalone `FC`/`AFC` tokens are removed, and anything that is not an
/// ASCII letter or digit is dropped. A key made only of a club-suffix token
/// (e.g. from `"F.C."`) collapses to the empty key, which keeps the function
/// idempotent.
pub fn normalize_club_key(name: &str) -> String {
    let folded: String = name
        .nfd()
        .filter(|ch| !('\u{0300}'..='\u{036f}').contains(ch))
        .collect::<String>()
        .to_uppercase()
        .replace("FOOTBALL CLUB", "");
    let key: String = CLUB_SUFFIX
        .replace_all(&folded, "")
        .chars()
        .filter(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
        .collect();
    if key == "FC" || key == "AFC" {
        return String::new();
    }
    key
}

#[derive(Debug, Clone, Default)]
pub struct CrestLookup {
    ids: HashMap<String, u32>,
}

impl CrestLookup {
    pub fn builtin() -> Self {
        Self::from_tables(CREST_CANONICAL_IDS, CREST_ALIASES)
    }

    pub fn from_tables(canonical: &[(&str, u32)], aliases: &[(&str, &str)]) -> Self {
        let mut ids = HashMap::new();
        for (name, id) in canonical {
            ids.insert(normalize_club_key(name), *id);
        }
        for (alias, target) in aliases {
            let Some((_, id)) = canonical.iter().find(|(name, _)| name == target) else {
                continue;
            };
            ids.insert(normalize_club_key(alias), *id);
        }
        ids.remove("");
        Self { ids }
    }

    pub fn crest_id(&self, name: &str) -> Option<u32> {
        let key = normalize_club_key(name);
        if key.is_empty() {
            return None;
        }
        self.ids.get(&key).copied()
    }

    pub fn crest_url(&self, name: &str) -> String {
        match self.crest_id(name) {
            Some(id) => format!("{CREST_BASE_URL}/{id}.svg"),
            None => DEFAULT_CREST_URL.to_string(),
        }
    }
}

pub fn crest_id(name: &str) -> Option<u32> {
    CREST_LOOKUP.crest_id(name)
}

pub fn crest_url(name: &str) -> String {
    CREST_LOOKUP.crest_url(name)
}
