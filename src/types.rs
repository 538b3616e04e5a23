//! # Domain Types for roundstats
//!
//! This module defines the small value types shared by every layer: the
//! player identity key, the names of the counters we keep, and the increment
//! descriptor that travels through the dispatcher.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! An identity is "just a string" on the wire, but mixing it up with a
//! display name would silently split one player's stats across two rows.
//! Wrapping it in [`Identity`] makes that mistake a compile error.
//!
//! ## Invariants
//!
//! - [`Identity`]: opaque, stable per player, the only key for cache and store
//! - [`StatDelta`]: always a non-negative increment; there is no decrement

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::category::WeaponCategory;
use crate::error::{Error, Result};

// =============================================================================
// Identity
// =============================================================================

/// A stable per-player key (a platform account identifier).
///
/// # Example
///
/// ```rust
/// use roundstats::types::Identity;
///
/// let id = Identity::new("76561198000000001");
/// assert_eq!(id.as_str(), "76561198000000001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form used as the store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty identity, which some event sources send for "nobody".
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Counter Names
// =============================================================================

/// The per-identity scalar totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Kills,
    Deaths,
    Assists,
    Headshots,
    RoundsPlayed,
    DamageDealt,
    DamageTaken,
}

impl ScalarField {
    /// Every scalar, in storage column order.
    pub const ALL: [ScalarField; 7] = [
        ScalarField::Kills,
        ScalarField::Deaths,
        ScalarField::Assists,
        ScalarField::Headshots,
        ScalarField::RoundsPlayed,
        ScalarField::DamageDealt,
        ScalarField::DamageTaken,
    ];

    /// Column name in the `player_stats` table.
    pub fn column(&self) -> &'static str {
        match self {
            ScalarField::Kills => "total_kills",
            ScalarField::Deaths => "total_deaths",
            ScalarField::Assists => "total_assists",
            ScalarField::Headshots => "total_headshots",
            ScalarField::RoundsPlayed => "total_rounds_played",
            ScalarField::DamageDealt => "total_damage_dealt",
            ScalarField::DamageTaken => "total_damage_taken",
        }
    }

    /// Short name accepted on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarField::Kills => "kills",
            ScalarField::Deaths => "deaths",
            ScalarField::Assists => "assists",
            ScalarField::Headshots => "headshots",
            ScalarField::RoundsPlayed => "rounds_played",
            ScalarField::DamageDealt => "damage_dealt",
            ScalarField::DamageTaken => "damage_taken",
        }
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ScalarField::ALL
            .into_iter()
            .find(|field| field.name() == wanted || field.column() == wanted)
            .ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

/// How a player was involved with a weapon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Kill,
    Death,
    Assist,
}

/// Canonical body region a killing shot landed on.
///
/// Arms and generic hits have no bucket: a kill through the arm counts as a
/// weapon kill with no location refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLocation {
    Head,
    Chest,
    Stomach,
    LeftLeg,
    RightLeg,
}

impl HitLocation {
    /// Every location, in storage column order.
    pub const ALL: [HitLocation; 5] = [
        HitLocation::Head,
        HitLocation::Chest,
        HitLocation::Stomach,
        HitLocation::LeftLeg,
        HitLocation::RightLeg,
    ];

    /// Column name in the `weapon_stats` table, also used as the display label.
    pub fn column(&self) -> &'static str {
        match self {
            HitLocation::Head => "head",
            HitLocation::Chest => "chest",
            HitLocation::Stomach => "stomach",
            HitLocation::LeftLeg => "left_leg",
            HitLocation::RightLeg => "right_leg",
        }
    }

    /// Dense index into per-location counter arrays.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

// =============================================================================
// Increment Descriptor
// =============================================================================

/// One increment to apply to an identity's aggregate record.
///
/// This is the value captured into a deferred action: it is plain data, owned,
/// and carries nothing whose validity can expire before the action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatDelta {
    /// Add `amount` to a scalar total.
    Scalar { field: ScalarField, amount: u64 },

    /// Add `amount` to a weapon cell.
    ///
    /// A `Kill` with `location == Some(Head)` also counts toward the scalar
    /// `headshots` total. Cells for [`WeaponCategory::Unclassified`] are not
    /// tracked, but that scalar side effect still applies.
    Weapon {
        category: WeaponCategory,
        kind: InteractionKind,
        location: Option<HitLocation>,
        amount: u64,
    },
}

impl StatDelta {
    /// `+1` on a scalar.
    pub fn scalar(field: ScalarField) -> Self {
        StatDelta::Scalar { field, amount: 1 }
    }

    /// `+1` on a weapon cell.
    pub fn weapon(
        category: WeaponCategory,
        kind: InteractionKind,
        location: Option<HitLocation>,
    ) -> Self {
        StatDelta::Weapon {
            category,
            kind,
            location,
            amount: 1,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
