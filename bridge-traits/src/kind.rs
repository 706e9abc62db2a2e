//! Media kinds handled by the catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the eight catalog families.
///
/// Every kind owns its own item table partition, its own identity namespace
/// (internal ids carry a one-letter prefix) and its own remote lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Books,
    Movies,
    Music,
    Apparel,
    Gadgets,
    Toys,
    Comics,
    BoardGames,
}

impl MediaKind {
    pub const ALL: [MediaKind; 8] = [
        MediaKind::Books,
        MediaKind::Movies,
        MediaKind::Music,
        MediaKind::Apparel,
        MediaKind::Gadgets,
        MediaKind::Toys,
        MediaKind::Comics,
        MediaKind::BoardGames,
    ];

    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Books => "books",
            MediaKind::Movies => "movies",
            MediaKind::Music => "music",
            MediaKind::Apparel => "apparel",
            MediaKind::Gadgets => "gadgets",
            MediaKind::Toys => "toys",
            MediaKind::Comics => "comics",
            MediaKind::BoardGames => "board_games",
        }
    }

    /// Prefix character of internal ids minted for this kind.
    pub fn id_prefix(&self) -> char {
        match self {
            MediaKind::Books => 'b',
            MediaKind::Movies => 'm',
            MediaKind::Music => 'u',
            MediaKind::Apparel => 'a',
            MediaKind::Gadgets => 'g',
            MediaKind::Toys => 't',
            MediaKind::Comics => 'c',
            MediaKind::BoardGames => 'o',
        }
    }

    /// Whether `id` looks like an internal id of this kind.
    pub fn owns_id(&self, id: &str) -> bool {
        let mut chars = id.chars();
        matches!(chars.next(), Some(c) if c == self.id_prefix())
            && chars.next().is_some()
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        MediaKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower || kind.as_str().replace('_', "") == lower)
            .ok_or_else(|| format!("Unknown media kind: {}", s))
    }
}
