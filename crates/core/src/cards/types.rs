//! Types for the card reference catalog.
//!
//! Cards are oracle-level identities (one row per distinct card, keyed by
//! the Scryfall oracle UUID); printings are per-set physical showings.
//! The ingestion pipeline consumes this data, it never authors it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Color identity as the five WUBRG flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorIdentity {
    pub white: bool,
    pub blue: bool,
    pub black: bool,
    pub red: bool,
    pub green: bool,
}

impl ColorIdentity {
    pub const COLORLESS: ColorIdentity = ColorIdentity {
        white: false,
        blue: false,
        black: false,
        red: false,
        green: false,
    };

    pub fn new(white: bool, blue: bool, black: bool, red: bool, green: bool) -> Self {
        Self {
            white,
            blue,
            black,
            red,
            green,
        }
    }

    /// Parse from a WUBRG letter string, e.g. "WU" or "brg".
    pub fn from_letters(letters: &str) -> Self {
        let mut identity = ColorIdentity::COLORLESS;
        for letter in letters.chars() {
            match letter.to_ascii_uppercase() {
                'W' => identity.white = true,
                'U' => identity.blue = true,
                'B' => identity.black = true,
                'R' => identity.red = true,
                'G' => identity.green = true,
                _ => {}
            }
        }
        identity
    }

    pub fn union(self, other: ColorIdentity) -> ColorIdentity {
        ColorIdentity {
            white: self.white || other.white,
            blue: self.blue || other.blue,
            black: self.black || other.black,
            red: self.red || other.red,
            green: self.green || other.green,
        }
    }

    /// True when every color of `self` is also in `other`.
    pub fn within(self, other: ColorIdentity) -> bool {
        (!self.white || other.white)
            && (!self.blue || other.blue)
            && (!self.black || other.black)
            && (!self.red || other.red)
            && (!self.green || other.green)
    }

    pub fn is_five_color(self) -> bool {
        self.white && self.blue && self.black && self.red && self.green
    }

    pub fn is_colorless(self) -> bool {
        self == ColorIdentity::COLORLESS
    }
}

impl std::fmt::Display for ColorIdentity {
    /// Renders as the WUBRG subset, or "C" for colorless.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_colorless() {
            return f.write_str("C");
        }
        for (flag, letter) in [
            (self.white, 'W'),
            (self.blue, 'U'),
            (self.black, 'B'),
            (self.red, 'R'),
            (self.green, 'G'),
        ] {
            if flag {
                f.write_str(&letter.to_string())?;
            }
        }
        Ok(())
    }
}

/// Printed rarity, stored as the single-character Scryfall code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Special,
    Mythic,
    Bonus,
}

impl Rarity {
    pub fn as_char(&self) -> char {
        match self {
            Rarity::Common => 'C',
            Rarity::Uncommon => 'U',
            Rarity::Rare => 'R',
            Rarity::Special => 'S',
            Rarity::Mythic => 'M',
            Rarity::Bonus => 'B',
        }
    }

    pub fn from_char(c: char) -> Option<Rarity> {
        match c.to_ascii_uppercase() {
            'C' => Some(Rarity::Common),
            'U' => Some(Rarity::Uncommon),
            'R' => Some(Rarity::Rare),
            'S' => Some(Rarity::Special),
            'M' => Some(Rarity::Mythic),
            'B' => Some(Rarity::Bonus),
            _ => None,
        }
    }
}

/// Why a card may share the command zone with another.
///
/// The partner-with variants are the five named pairs from Battlebond;
/// each member of a pair carries the same tag. This is versioned
/// reference data: extending it means a new variant, not new logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerKind {
    None,
    Partner,
    ChooseABackground,
    Background,
    PartnerWithBlaring,
    PartnerWithChakram,
    PartnerWithProtege,
    PartnerWithSoulblade,
    PartnerWithWeaver,
}

impl PartnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerKind::None => "none",
            PartnerKind::Partner => "partner",
            PartnerKind::ChooseABackground => "choose_a_background",
            PartnerKind::Background => "background",
            PartnerKind::PartnerWithBlaring => "partner_with_blaring",
            PartnerKind::PartnerWithChakram => "partner_with_chakram",
            PartnerKind::PartnerWithProtege => "partner_with_protege",
            PartnerKind::PartnerWithSoulblade => "partner_with_soulblade",
            PartnerKind::PartnerWithWeaver => "partner_with_weaver",
        }
    }

    pub fn parse(s: &str) -> Option<PartnerKind> {
        match s {
            "none" => Some(PartnerKind::None),
            "partner" => Some(PartnerKind::Partner),
            "choose_a_background" => Some(PartnerKind::ChooseABackground),
            "background" => Some(PartnerKind::Background),
            "partner_with_blaring" => Some(PartnerKind::PartnerWithBlaring),
            "partner_with_chakram" => Some(PartnerKind::PartnerWithChakram),
            "partner_with_protege" => Some(PartnerKind::PartnerWithProtege),
            "partner_with_soulblade" => Some(PartnerKind::PartnerWithSoulblade),
            "partner_with_weaver" => Some(PartnerKind::PartnerWithWeaver),
            _ => None,
        }
    }

    /// True for the named partner-with pair tags.
    pub fn is_named_pair(&self) -> bool {
        matches!(
            self,
            PartnerKind::PartnerWithBlaring
                | PartnerKind::PartnerWithChakram
                | PartnerKind::PartnerWithProtege
                | PartnerKind::PartnerWithSoulblade
                | PartnerKind::PartnerWithWeaver
        )
    }
}

/// An oracle-level card with the facts legality checking needs.
///
/// `ever_common` and `ever_uncommon` are derived from the stored
/// printings when the catalog reads a card; writers do not supply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Scryfall oracle id.
    pub id: Uuid,
    pub name: String,
    /// Double-faced cards carry both faces joined with " // ".
    pub type_line: String,
    pub identity: ColorIdentity,
    pub partner: PartnerKind,
    /// Printed at common in at least one set.
    pub ever_common: bool,
    /// Printed at uncommon in at least one set.
    pub ever_uncommon: bool,
}

impl Card {
    pub fn is_creature(&self) -> bool {
        self.type_line.contains("Creature")
    }
}

/// One physical printing of a card in a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printing {
    /// Scryfall printing id.
    pub id: Uuid,
    pub card_id: Uuid,
    pub set_code: String,
    pub rarity: Rarity,
}

/// Errors for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
