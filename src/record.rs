//! # Aggregate Records
//!
//! One [`AggregateRecord`] per identity: seven scalar totals plus a map of
//! per-weapon counters. The same type serves three roles:
//!
//! - **running total**: what the cache answers queries with
//! - **pending delta**: increments not yet reflected in the store
//! - **stored row**: what [`StatsStore::load`](crate::store::StatsStore::load) returns
//!
//! Counters only ever grow through [`AggregateRecord::apply`] and
//! [`AggregateRecord::merge`]. [`AggregateRecord::subtract`] exists solely to
//! retire a delta after the store confirmed it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::category::WeaponCategory;
use crate::types::{HitLocation, Identity, InteractionKind, ScalarField, StatDelta};

// =============================================================================
// Counter Arithmetic
// =============================================================================

/// Adds `amount` to a counter.
///
/// Overflow is an invariant violation: assert in debug builds, saturate and
/// log in release builds.
fn bump(slot: &mut u64, amount: u64) {
    match slot.checked_add(amount) {
        Some(v) => *slot = v,
        None => {
            debug_assert!(false, "counter overflow: {} + {}", slot, amount);
            error!(current = *slot, amount, "counter overflow, saturating");
            *slot = u64::MAX;
        }
    }
}

// =============================================================================
// Scalar Totals
// =============================================================================

/// The per-identity scalar counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalarTotals {
    pub kills: u64,
    pub deaths: u64,
    pub assists: u64,
    pub headshots: u64,
    pub rounds_played: u64,
    pub damage_dealt: u64,
    pub damage_taken: u64,
}

impl ScalarTotals {
    pub fn get(&self, field: ScalarField) -> u64 {
        match field {
            ScalarField::Kills => self.kills,
            ScalarField::Deaths => self.deaths,
            ScalarField::Assists => self.assists,
            ScalarField::Headshots => self.headshots,
            ScalarField::RoundsPlayed => self.rounds_played,
            ScalarField::DamageDealt => self.damage_dealt,
            ScalarField::DamageTaken => self.damage_taken,
        }
    }

    fn slot_mut(&mut self, field: ScalarField) -> &mut u64 {
        match field {
            ScalarField::Kills => &mut self.kills,
            ScalarField::Deaths => &mut self.deaths,
            ScalarField::Assists => &mut self.assists,
            ScalarField::Headshots => &mut self.headshots,
            ScalarField::RoundsPlayed => &mut self.rounds_played,
            ScalarField::DamageDealt => &mut self.damage_dealt,
            ScalarField::DamageTaken => &mut self.damage_taken,
        }
    }

    pub fn add(&mut self, field: ScalarField, amount: u64) {
        bump(self.slot_mut(field), amount);
    }

    fn is_zero(&self) -> bool {
        ScalarField::ALL.iter().all(|f| self.get(*f) == 0)
    }
}

// =============================================================================
// Weapon Counters
// =============================================================================

/// Counters for one weapon category.
///
/// `locations` refines `kills`: each kill with a known location bumps exactly
/// one slot, so the slots sum to at most `kills`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeaponCounters {
    pub kills: u64,
    pub deaths: u64,
    pub assists: u64,
    pub locations: [u64; 5],
}

impl WeaponCounters {
    pub fn get(&self, kind: InteractionKind) -> u64 {
        match kind {
            InteractionKind::Kill => self.kills,
            InteractionKind::Death => self.deaths,
            InteractionKind::Assist => self.assists,
        }
    }

    /// Kills refined by the given location.
    pub fn location(&self, location: HitLocation) -> u64 {
        self.locations[location.index()]
    }

    pub fn headshots(&self) -> u64 {
        self.location(HitLocation::Head)
    }

    pub fn is_zero(&self) -> bool {
        self.kills == 0 && self.deaths == 0 && self.assists == 0 && self.locations.iter().all(|v| *v == 0)
    }

    fn add(&mut self, kind: InteractionKind, location: Option<HitLocation>, amount: u64) {
        match kind {
            InteractionKind::Kill => {
                bump(&mut self.kills, amount);
                if let Some(loc) = location {
                    bump(&mut self.locations[loc.index()], amount);
                }
            }
            InteractionKind::Death => bump(&mut self.deaths, amount),
            InteractionKind::Assist => bump(&mut self.assists, amount),
        }
    }

    fn merge(&mut self, other: &WeaponCounters) {
        bump(&mut self.kills, other.kills);
        bump(&mut self.deaths, other.deaths);
        bump(&mut self.assists, other.assists);
        for (slot, v) in self.locations.iter_mut().zip(other.locations) {
            bump(slot, v);
        }
    }

    fn subtract(&mut self, other: &WeaponCounters) {
        self.kills = self.kills.saturating_sub(other.kills);
        self.deaths = self.deaths.saturating_sub(other.deaths);
        self.assists = self.assists.saturating_sub(other.assists);
        for (slot, v) in self.locations.iter_mut().zip(other.locations) {
            *slot = slot.saturating_sub(v);
        }
    }
}

// =============================================================================
// Aggregate Record
// =============================================================================

/// Everything we know about one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRecord {
    pub identity: Identity,
    /// Last observed name. Not identity-bearing.
    pub display_name: String,
    pub totals: ScalarTotals,
    /// Only tracked categories appear as keys.
    pub weapons: BTreeMap<WeaponCategory, WeaponCounters>,
    pub last_updated: DateTime<Utc>,
}

impl AggregateRecord {
    /// A zero-valued record.
    pub fn new(identity: Identity, display_name: impl Into<String>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            totals: ScalarTotals::default(),
            weapons: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn scalar(&self, field: ScalarField) -> u64 {
        self.totals.get(field)
    }

    /// Counters for a category; zero when never touched.
    pub fn weapon(&self, category: WeaponCategory) -> WeaponCounters {
        self.weapons.get(&category).copied().unwrap_or_default()
    }

    /// Applies one increment.
    pub fn apply(&mut self, delta: StatDelta) {
        match delta {
            StatDelta::Scalar { field, amount } => self.totals.add(field, amount),
            StatDelta::Weapon {
                category,
                kind,
                location,
                amount,
            } => {
                if kind == InteractionKind::Kill && location == Some(HitLocation::Head) {
                    self.totals.add(ScalarField::Headshots, amount);
                }
                if category.is_tracked() {
                    self.weapons
                        .entry(category)
                        .or_default()
                        .add(kind, location, amount);
                }
            }
        }
    }

    /// Adds every counter of `other` into `self`.
    pub fn merge(&mut self, other: &AggregateRecord) {
        for field in ScalarField::ALL {
            self.totals.add(field, other.totals.get(field));
        }
        for (category, counters) in &other.weapons {
            self.weapons.entry(*category).or_default().merge(counters);
        }
    }

    /// Removes a delta that has been persisted. Empty weapon entries are dropped.
    pub fn subtract(&mut self, other: &AggregateRecord) {
        for field in ScalarField::ALL {
            let slot = self.totals.slot_mut(field);
            *slot = slot.saturating_sub(other.totals.get(field));
        }
        for (category, counters) in &other.weapons {
            if let Some(mine) = self.weapons.get_mut(category) {
                mine.subtract(counters);
            }
        }
        self.weapons.retain(|_, c| !c.is_zero());
    }

    /// True when no counter holds a value.
    pub fn is_zero(&self) -> bool {
        self.totals.is_zero() && self.weapons.values().all(WeaponCounters::is_zero)
    }
}

// =============================================================================
// Tests
// =============================================================================
