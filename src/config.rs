//! Runtime configuration: the selectable player palette, the country set
//! seeded onto fresh boards and the default mission pool.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the library looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WARBOARD_CONFIG_PATH";

/// A selectable player color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerColor {
    /// Display name of the color.
    pub name: String,
    /// Hex value stored in the shared documents.
    pub hex: String,
}

/// Immutable runtime configuration shared across a session.
#[derive(Debug, Clone)]
pub struct AppConfig {
    colors: Vec<PlayerColor>,
    countries: Vec<String>,
    missions: Vec<String>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to the baked-in
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        colors = config.colors.len(),
                        countries = config.countries.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// The selectable palette.
    pub fn colors(&self) -> &[PlayerColor] {
        &self.colors
    }

    /// Country names seeded onto a fresh board.
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    /// Mission pool seeded into a fresh game.
    pub fn missions(&self) -> &[String] {
        &self.missions
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            colors: default_colors(),
            countries: default_countries(),
            missions: default_missions(),
        }
    }
}

/// JSON representation of the configuration file. Every section is optional
/// and falls back to its built-in default independently.
#[derive(Debug, Deserialize)]
struct RawConfig {
    colors: Option<Vec<RawColor>>,
    countries: Option<Vec<String>>,
    missions: Option<Vec<String>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            colors: value
                .colors
                .map(|colors| colors.into_iter().map(Into::into).collect())
                .unwrap_or_else(default_colors),
            countries: value.countries.unwrap_or_else(default_countries),
            missions: value.missions.unwrap_or_else(default_missions),
        }
    }
}

/// JSON representation of a single palette entry.
#[derive(Debug, Deserialize)]
struct RawColor {
    name: String,
    hex: String,
}

impl From<RawColor> for PlayerColor {
    fn from(value: RawColor) -> Self {
        Self {
            name: value.name,
            hex: value.hex,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in palette shipped with the library.
fn default_colors() -> Vec<PlayerColor> {
    [
        ("Red", "#ff0000"),
        ("Blue", "#0000ff"),
        ("Green", "#008000"),
        ("Yellow", "#ffd700"),
        ("Black", "#000000"),
        ("Purple", "#800080"),
        ("Orange", "#ffa500"),
        ("Pink", "#ff69b4"),
    ]
    .into_iter()
    .map(|(name, hex)| PlayerColor {
        name: name.to_owned(),
        hex: hex.to_owned(),
    })
    .collect()
}

/// The classic 42-territory board.
fn default_countries() -> Vec<String> {
    [
        "Alaska",
        "Northwest Territory",
        "Greenland",
        "Alberta",
        "Ontario",
        "Quebec",
        "Western United States",
        "Eastern United States",
        "Central America",
        "Venezuela",
        "Peru",
        "Brazil",
        "Argentina",
        "Iceland",
        "Scandinavia",
        "Ukraine",
        "Great Britain",
        "Northern Europe",
        "Western Europe",
        "Southern Europe",
        "North Africa",
        "Egypt",
        "East Africa",
        "Congo",
        "South Africa",
        "Madagascar",
        "Ural",
        "Siberia",
        "Yakutsk",
        "Kamchatka",
        "Irkutsk",
        "Mongolia",
        "Japan",
        "Afghanistan",
        "China",
        "Middle East",
        "India",
        "Siam",
        "Indonesia",
        "New Guinea",
        "Western Australia",
        "Eastern Australia",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Default mission pool handed out at join time.
fn default_missions() -> Vec<String> {
    [
        "Conquer the whole of Asia",
        "Conquer the whole of North America and Africa",
        "Conquer the whole of Europe and South America",
        "Conquer the whole of Europe and Australia",
        "Hold 24 territories at the same time",
        "Hold 18 territories with at least two armies on each",
        "Eliminate every army of one opposing color",
        "Conquer the whole of South America and Africa",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}
