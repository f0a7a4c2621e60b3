use ratatui::style::Color;

use crate::storage::{Storage, StorageError, THEME_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

pub struct Palette {
    pub fg: Color,
    pub bg: Color,
    pub muted: Color,
    pub accent: Color,
    pub highlight: Color,
    pub error: Color,
}

impl Theme {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn load(storage: &Storage) -> Self {
        storage
            .get(THEME_KEY)
            .and_then(|raw| Theme::parse(&raw))
            .unwrap_or_default()
    }

    pub fn save(self, storage: &Storage) -> Result<(), StorageError> {
        storage.set(THEME_KEY, self.as_str())
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Dark => Palette {
                fg: Color::Rgb(248, 250, 252),
                bg: Color::Rgb(2, 6, 23),
                muted: Color::Rgb(148, 163, 184),
                accent: Color::Rgb(37, 99, 235),
                highlight: Color::Rgb(124, 58, 237),
                error: Color::Rgb(248, 113, 113),
            },
            Theme::Light => Palette {
                fg: Color::Rgb(15, 23, 42),
                bg: Color::Rgb(248, 250, 252),
                muted: Color::Rgb(71, 85, 105),
                accent: Color::Rgb(29, 78, 216),
                highlight: Color::Rgb(109, 40, 217),
                error: Color::Rgb(185, 28, 28),
            },
        }
    }
}
