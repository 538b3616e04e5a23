//! # Category Model
//!
//! Canonicalizes a raw weapon identifier into a [`WeaponCategory`] and a raw
//! hit-location code into a [`HitLocation`]. Both functions are pure and total:
//! every input, including the empty string, maps to a defined output.
//!
//! ## Table-Driven
//!
//! ```text
//! "WEAPON_M4A1_SILENCER_OFF"
//!        │ trim + lowercase
//!        ▼
//! "weapon_m4a1_silencer_off"
//!        │ strip "weapon_"
//!        ▼
//! "m4a1_silencer_off" ──► ALIASES ──► M4a1S
//!                            │ miss
//!                            ▼
//!                      PREFIX_ALIASES ──► (knife skins) ──► Knife
//!                            │ miss
//!                            ▼
//!                       Unclassified
//! ```
//!
//! Adding a weapon is an edit to [`ALIASES`]. Attachment variants
//! (suppressor on/off) are listed as separate aliases of one category; that
//! many-to-one mapping is intentional.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::types::HitLocation;

// =============================================================================
// Weapon Category
// =============================================================================

/// Canonical weapon bucket used as a map key and a storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeaponCategory {
    // Rifles
    Ak47,
    M4a4,
    M4a1S,
    Aug,
    Sg553,
    GalilAr,
    Famas,
    // Snipers
    Awp,
    Ssg08,
    Scar20,
    G3sg1,
    // Pistols
    Deagle,
    Glock,
    UspS,
    P250,
    P2000,
    FiveSeven,
    Tec9,
    Cz75,
    Dualies,
    Revolver,
    // SMGs
    Mac10,
    Mp9,
    Mp7,
    Mp5Sd,
    Ump45,
    P90,
    Bizon,
    // Shotguns
    Nova,
    Xm1014,
    SawedOff,
    Mag7,
    // Machine guns
    Negev,
    M249,
    // Utility and melee
    HeGrenade,
    Molotov,
    Incendiary,
    Flashbang,
    Smoke,
    Decoy,
    Taser,
    Knife,
    /// Anything the tables do not recognize. Counts toward scalar totals only.
    Unclassified,
}

/// Raw identifier (without the `weapon_` prefix, lowercase) to category.
pub const ALIASES: &[(&str, WeaponCategory)] = &[
    ("ak47", WeaponCategory::Ak47),
    ("m4a1", WeaponCategory::M4a4),
    ("m4a4", WeaponCategory::M4a4),
    ("m4a1_silencer", WeaponCategory::M4a1S),
    ("m4a1_silencer_off", WeaponCategory::M4a1S),
    ("m4a1s", WeaponCategory::M4a1S),
    ("aug", WeaponCategory::Aug),
    ("sg556", WeaponCategory::Sg553),
    ("sg553", WeaponCategory::Sg553),
    ("galilar", WeaponCategory::GalilAr),
    ("famas", WeaponCategory::Famas),
    ("awp", WeaponCategory::Awp),
    ("ssg08", WeaponCategory::Ssg08),
    ("scout", WeaponCategory::Ssg08),
    ("scar20", WeaponCategory::Scar20),
    ("g3sg1", WeaponCategory::G3sg1),
    ("deagle", WeaponCategory::Deagle),
    ("glock", WeaponCategory::Glock),
    ("usp_silencer", WeaponCategory::UspS),
    ("usp_silencer_off", WeaponCategory::UspS),
    ("usps", WeaponCategory::UspS),
    ("p250", WeaponCategory::P250),
    ("hkp2000", WeaponCategory::P2000),
    ("p2000", WeaponCategory::P2000),
    ("fiveseven", WeaponCategory::FiveSeven),
    ("tec9", WeaponCategory::Tec9),
    ("cz75a", WeaponCategory::Cz75),
    ("cz75", WeaponCategory::Cz75),
    ("elite", WeaponCategory::Dualies),
    ("dualies", WeaponCategory::Dualies),
    ("revolver", WeaponCategory::Revolver),
    ("mac10", WeaponCategory::Mac10),
    ("mp9", WeaponCategory::Mp9),
    ("mp7", WeaponCategory::Mp7),
    ("mp5sd", WeaponCategory::Mp5Sd),
    ("ump45", WeaponCategory::Ump45),
    ("p90", WeaponCategory::P90),
    ("bizon", WeaponCategory::Bizon),
    ("nova", WeaponCategory::Nova),
    ("xm1014", WeaponCategory::Xm1014),
    ("sawedoff", WeaponCategory::SawedOff),
    ("mag7", WeaponCategory::Mag7),
    ("negev", WeaponCategory::Negev),
    ("m249", WeaponCategory::M249),
    ("hegrenade", WeaponCategory::HeGrenade),
    ("molotov", WeaponCategory::Molotov),
    ("inferno", WeaponCategory::Molotov),
    ("incgrenade", WeaponCategory::Incendiary),
    ("flashbang", WeaponCategory::Flashbang),
    ("smokegrenade", WeaponCategory::Smoke),
    ("decoy", WeaponCategory::Decoy),
    ("taser", WeaponCategory::Taser),
    ("knife", WeaponCategory::Knife),
];

/// Prefix rules for families too large to enumerate (knife skins).
pub const PREFIX_ALIASES: &[(&str, WeaponCategory)] = &[
    ("knife", WeaponCategory::Knife),
    ("bayonet", WeaponCategory::Knife),
];

const WEAPON_PREFIX: &str = "weapon_";

fn alias_table() -> &'static HashMap<&'static str, WeaponCategory> {
    static TABLE: OnceLock<HashMap<&'static str, WeaponCategory>> = OnceLock::new();
    TABLE.get_or_init(|| ALIASES.iter().copied().collect())
}

/// Maps a raw weapon identifier to its category.
///
/// Case-insensitive, tolerant of surrounding whitespace and of the
/// `weapon_` entity prefix. Never fails.
///
/// ```rust
/// use roundstats::category::{normalize, WeaponCategory};
///
/// assert_eq!(normalize("weapon_usp_silencer_off"), WeaponCategory::UspS);
/// assert_eq!(normalize("USP_SILENCER"), WeaponCategory::UspS);
/// assert_eq!(normalize(""), WeaponCategory::Unclassified);
/// ```
pub fn normalize(raw: &str) -> WeaponCategory {
    let lowered = raw.trim().to_ascii_lowercase();
    let name = lowered.strip_prefix(WEAPON_PREFIX).unwrap_or(&lowered);

    if let Some(category) = alias_table().get(name) {
        return *category;
    }

    PREFIX_ALIASES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, category)| *category)
        .unwrap_or(WeaponCategory::Unclassified)
}

impl WeaponCategory {
    /// Every tracked category, in declaration order.
    pub const TRACKED: [WeaponCategory; 42] = [
        WeaponCategory::Ak47,
        WeaponCategory::M4a4,
        WeaponCategory::M4a1S,
        WeaponCategory::Aug,
        WeaponCategory::Sg553,
        WeaponCategory::GalilAr,
        WeaponCategory::Famas,
        WeaponCategory::Awp,
        WeaponCategory::Ssg08,
        WeaponCategory::Scar20,
        WeaponCategory::G3sg1,
        WeaponCategory::Deagle,
        WeaponCategory::Glock,
        WeaponCategory::UspS,
        WeaponCategory::P250,
        WeaponCategory::P2000,
        WeaponCategory::FiveSeven,
        WeaponCategory::Tec9,
        WeaponCategory::Cz75,
        WeaponCategory::Dualies,
        WeaponCategory::Revolver,
        WeaponCategory::Mac10,
        WeaponCategory::Mp9,
        WeaponCategory::Mp7,
        WeaponCategory::Mp5Sd,
        WeaponCategory::Ump45,
        WeaponCategory::P90,
        WeaponCategory::Bizon,
        WeaponCategory::Nova,
        WeaponCategory::Xm1014,
        WeaponCategory::SawedOff,
        WeaponCategory::Mag7,
        WeaponCategory::Negev,
        WeaponCategory::M249,
        WeaponCategory::HeGrenade,
        WeaponCategory::Molotov,
        WeaponCategory::Incendiary,
        WeaponCategory::Flashbang,
        WeaponCategory::Smoke,
        WeaponCategory::Decoy,
        WeaponCategory::Taser,
        WeaponCategory::Knife,
    ];

    /// False only for [`WeaponCategory::Unclassified`].
    pub fn is_tracked(&self) -> bool {
        *self != WeaponCategory::Unclassified
    }

    /// Stable key written to the `weapon` column of `weapon_stats`.
    pub fn key(&self) -> &'static str {
        match self {
            WeaponCategory::Ak47 => "ak47",
            WeaponCategory::M4a4 => "m4a4",
            WeaponCategory::M4a1S => "m4a1s",
            WeaponCategory::Aug => "aug",
            WeaponCategory::Sg553 => "sg553",
            WeaponCategory::GalilAr => "galilar",
            WeaponCategory::Famas => "famas",
            WeaponCategory::Awp => "awp",
            WeaponCategory::Ssg08 => "ssg08",
            WeaponCategory::Scar20 => "scar20",
            WeaponCategory::G3sg1 => "g3sg1",
            WeaponCategory::Deagle => "deagle",
            WeaponCategory::Glock => "glock",
            WeaponCategory::UspS => "usps",
            WeaponCategory::P250 => "p250",
            WeaponCategory::P2000 => "p2000",
            WeaponCategory::FiveSeven => "fiveseven",
            WeaponCategory::Tec9 => "tec9",
            WeaponCategory::Cz75 => "cz75",
            WeaponCategory::Dualies => "dualies",
            WeaponCategory::Revolver => "revolver",
            WeaponCategory::Mac10 => "mac10",
            WeaponCategory::Mp9 => "mp9",
            WeaponCategory::Mp7 => "mp7",
            WeaponCategory::Mp5Sd => "mp5sd",
            WeaponCategory::Ump45 => "ump45",
            WeaponCategory::P90 => "p90",
            WeaponCategory::Bizon => "bizon",
            WeaponCategory::Nova => "nova",
            WeaponCategory::Xm1014 => "xm1014",
            WeaponCategory::SawedOff => "sawedoff",
            WeaponCategory::Mag7 => "mag7",
            WeaponCategory::Negev => "negev",
            WeaponCategory::M249 => "m249",
            WeaponCategory::HeGrenade => "hegrenade",
            WeaponCategory::Molotov => "molotov",
            WeaponCategory::Incendiary => "incendiary",
            WeaponCategory::Flashbang => "flashbang",
            WeaponCategory::Smoke => "smoke",
            WeaponCategory::Decoy => "decoy",
            WeaponCategory::Taser => "taser",
            WeaponCategory::Knife => "knife",
            WeaponCategory::Unclassified => "unclassified",
        }
    }

    /// Inverse of [`key`](Self::key) over tracked categories.
    pub fn from_key(key: &str) -> Option<WeaponCategory> {
        Self::TRACKED.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for WeaponCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// =============================================================================
// Hit Location
// =============================================================================

/// Maps a raw hit-location code to a canonical location.
///
/// Accepts the engine's numeric hit-group codes (`1` head, `2` chest,
/// `3` stomach, `6` left leg, `7` right leg) or their names in any case.
/// Arms, "generic" and anything unrecognized map to `None`.
pub fn classify_hit_location(raw: &str) -> Option<HitLocation> {
    let code = raw.trim();
    if let Ok(group) = code.parse::<i64>() {
        return HitLocation::from_hit_group(group);
    }

    let name: String = code
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect::<String>()
        .to_ascii_lowercase();

    match name.as_str() {
        "head" => Some(HitLocation::Head),
        "chest" => Some(HitLocation::Chest),
        "stomach" => Some(HitLocation::Stomach),
        "leftleg" => Some(HitLocation::LeftLeg),
        "rightleg" => Some(HitLocation::RightLeg),
        _ => None,
    }
}

impl HitLocation {
    /// Maps an engine hit-group number.
    pub fn from_hit_group(group: i64) -> Option<HitLocation> {
        match group {
            1 => Some(HitLocation::Head),
            2 => Some(HitLocation::Chest),
            3 => Some(HitLocation::Stomach),
            6 => Some(HitLocation::LeftLeg),
            7 => Some(HitLocation::RightLeg),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
