//! # Event Translation and Session Policy
//!
//! Turns typed game events into cache increments and decides when deltas are
//! flushed.
//!
//! ## Where Each Step Runs
//!
//! ```text
//!   producer thread                         consumer tick
//!   ───────────────                         ─────────────
//!   GameEvent
//!     │ StatsHandle::submit
//!     ├─ bot filter, suicide check
//!     ├─ normalize weapon + hit location
//!     ├─ build Vec<Increment> (owned)
//!     └─ enqueue ───────────────────────►  Dispatcher::drain
//!                                            │
//!                                            ▼
//!                                          StatsTracker
//!                                            ├─ cache.increment(...)
//!                                            ├─ roster (connect/disconnect)
//!                                            └─ flushes (round end, periodic,
//!                                               disconnect, shutdown)
//! ```
//!
//! Translation is pure and happens on the producer side, so an action
//! captures only owned values: identities, names and deltas. The consumer
//! side never sees a raw event.
//!
//! ## Flush Policy
//!
//! | trigger         | who is flushed                 |
//! |-----------------|--------------------------------|
//! | round end       | every connected player         |
//! | periodic        | every connected player         |
//! | disconnect      | the leaving player             |
//! | shutdown        | every resident record          |

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{FlushSummary, StatsCache};
use crate::category::{classify_hit_location, normalize, WeaponCategory};
use crate::config::TrackerConfig;
use crate::dispatcher::{self, DispatchHandle, Dispatcher, DrainReport};
use crate::error::Result;
use crate::store::StatsStore;
use crate::types::{HitLocation, Identity, InteractionKind, ScalarField, StatDelta};

// =============================================================================
// Events
// =============================================================================

/// A participant as reported by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub identity: Identity,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
}

impl PlayerRef {
    pub fn human(identity: impl Into<Identity>, name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            is_bot: false,
        }
    }

    pub fn bot(identity: impl Into<Identity>, name: impl Into<String>) -> Self {
        Self {
            is_bot: true,
            ..Self::human(identity, name)
        }
    }
}

/// A raw hit-location code: either the engine's numeric hit group or a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawHitLocation {
    Group(i64),
    Name(String),
}

impl RawHitLocation {
    pub fn classify(&self) -> Option<HitLocation> {
        match self {
            RawHitLocation::Group(g) => HitLocation::from_hit_group(*g),
            RawHitLocation::Name(s) => classify_hit_location(s),
        }
    }
}

/// Notifications from the game server, one JSON object per line on the wire.
///
/// ```json
/// {"type":"kill","attacker":{"identity":"765...1","name":"alice"},
///  "victim":{"identity":"765...2","name":"bob"},"weapon":"weapon_ak47",
///  "headshot":true,"hit_location":1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Kill {
        attacker: Option<PlayerRef>,
        victim: Option<PlayerRef>,
        assister: Option<PlayerRef>,
        #[serde(default)]
        weapon: String,
        #[serde(default)]
        headshot: bool,
        hit_location: Option<RawHitLocation>,
    },
    Hurt {
        attacker: Option<PlayerRef>,
        victim: Option<PlayerRef>,
        #[serde(default)]
        weapon: String,
        damage: i64,
        hit_location: Option<RawHitLocation>,
    },
    RoundEnd {
        winner: Option<String>,
    },
    Connect {
        player: PlayerRef,
    },
    Disconnect {
        player: PlayerRef,
    },
}

impl GameEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::Kill { .. } => "kill",
            GameEvent::Hurt { .. } => "hurt",
            GameEvent::RoundEnd { .. } => "round_end",
            GameEvent::Connect { .. } => "connect",
            GameEvent::Disconnect { .. } => "disconnect",
        }
    }
}

// =============================================================================
// Translation
// =============================================================================

/// One increment addressed to one identity, ready to be captured by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub identity: Identity,
    pub name: String,
    pub delta: StatDelta,
}

impl Increment {
    fn new(player: &PlayerRef, delta: StatDelta) -> Self {
        Self {
            identity: player.identity.clone(),
            name: player.name.clone(),
            delta,
        }
    }
}

/// A participant whose side of an event is counted.
fn counted(player: Option<&PlayerRef>, track_bots: bool) -> Option<&PlayerRef> {
    player.filter(|p| !p.identity.is_empty() && (track_bots || !p.is_bot))
}

/// A participant with a usable identity, bot or not.
fn present(player: Option<&PlayerRef>) -> Option<&PlayerRef> {
    player.filter(|p| !p.identity.is_empty())
}

/// True when untracked bots are on either side of an attacker/victim pair.
fn involves_untracked_bot(
    attacker: Option<&PlayerRef>,
    victim: Option<&PlayerRef>,
    track_bots: bool,
) -> bool {
    !track_bots && [attacker, victim].into_iter().flatten().any(|p| p.is_bot)
}

fn same_player(a: Option<&PlayerRef>, b: Option<&PlayerRef>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a.identity == b.identity)
}

/// Increments for a kill event.
///
/// - Nothing counts when bots are untracked and either side is a bot.
/// - The attacker is credited only when a different victim exists.
/// - The victim is charged a death even without an attacker.
/// - The assister is credited only alongside a credited kill.
/// - `headshot` forces the `Head` location; otherwise the code decides.
pub fn kill_increments(
    attacker: Option<&PlayerRef>,
    victim: Option<&PlayerRef>,
    assister: Option<&PlayerRef>,
    weapon: &str,
    headshot: bool,
    hit_location: Option<&RawHitLocation>,
    track_bots: bool,
) -> Vec<Increment> {
    if involves_untracked_bot(attacker, victim, track_bots) {
        return Vec::new();
    }

    let category = normalize(weapon);
    let location = if headshot {
        Some(HitLocation::Head)
    } else {
        hit_location.and_then(RawHitLocation::classify)
    };

    let mut out = Vec::with_capacity(6);
    let suicide = same_player(attacker, victim);
    let kill_happened = present(victim).is_some() && present(attacker).is_some() && !suicide;

    if kill_happened {
        if let Some(a) = counted(attacker, track_bots) {
            out.push(Increment::new(a, StatDelta::scalar(ScalarField::Kills)));
            out.push(Increment::new(
                a,
                StatDelta::weapon(category, InteractionKind::Kill, location),
            ));
        }
    }

    if let Some(v) = counted(victim, track_bots) {
        out.push(Increment::new(v, StatDelta::scalar(ScalarField::Deaths)));
        out.push(Increment::new(
            v,
            StatDelta::weapon(category, InteractionKind::Death, None),
        ));
    }

    if kill_happened && !same_player(assister, attacker) && !same_player(assister, victim) {
        if let Some(s) = counted(assister, track_bots) {
            out.push(Increment::new(s, StatDelta::scalar(ScalarField::Assists)));
            out.push(Increment::new(
                s,
                StatDelta::weapon(category, InteractionKind::Assist, None),
            ));
        }
    }

    out
}

/// Increments for a damage event. Negative damage is dropped with a warning,
/// and untracked bots on either side drop the whole event.
pub fn hurt_increments(
    attacker: Option<&PlayerRef>,
    victim: Option<&PlayerRef>,
    damage: i64,
    track_bots: bool,
) -> Vec<Increment> {
    if damage < 0 {
        warn!(damage, "negative damage in hurt event, ignoring");
        return Vec::new();
    }
    if damage == 0
        || same_player(attacker, victim)
        || involves_untracked_bot(attacker, victim, track_bots)
    {
        return Vec::new();
    }
    let amount = damage.unsigned_abs();

    let mut out = Vec::with_capacity(2);
    if present(victim).is_some() {
        if let Some(a) = counted(attacker, track_bots) {
            out.push(Increment::new(
                a,
                StatDelta::Scalar {
                    field: ScalarField::DamageDealt,
                    amount,
                },
            ));
        }
    }
    if let Some(v) = counted(victim, track_bots) {
        out.push(Increment::new(
            v,
            StatDelta::Scalar {
                field: ScalarField::DamageTaken,
                amount,
            },
        ));
    }
    out
}

// =============================================================================
// Consumer Context
// =============================================================================

/// Everything the dispatched actions mutate. Lives on the consumer side only.
pub struct StatsTracker<S> {
    cache: StatsCache<S>,
    /// Connected identities and their current names.
    roster: HashMap<Identity, String>,
    /// Left the session with a delta the store has not accepted yet.
    departed: HashMap<Identity, String>,
    config: TrackerConfig,
    last_flush: Instant,
}

impl<S: StatsStore> StatsTracker<S> {
    pub fn new(store: S, config: TrackerConfig) -> Self {
        Self {
            cache: StatsCache::new(store),
            roster: HashMap::new(),
            departed: HashMap::new(),
            config,
            last_flush: Instant::now(),
        }
    }

    pub fn cache(&self) -> &StatsCache<S> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut StatsCache<S> {
        &mut self.cache
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.roster.contains_key(identity)
    }

    pub fn connected(&self) -> usize {
        self.roster.len()
    }

    /// Disconnected identities whose final flush is still outstanding.
    pub fn is_departed_unflushed(&self, identity: &Identity) -> bool {
        self.departed.contains_key(identity)
    }

    pub fn apply(&mut self, increments: Vec<Increment>) {
        for inc in increments {
            self.cache.increment(&inc.identity, &inc.name, inc.delta);
        }
    }

    pub fn connect(&mut self, player: &PlayerRef) {
        self.departed.remove(&player.identity);
        self.roster
            .insert(player.identity.clone(), player.name.clone());
        self.cache.get_or_create(&player.identity, &player.name);
        if self.config.log_connects {
            info!(identity = %player.identity, name = %player.name, "player connected");
        }
    }

    /// Flushes the leaving player and drops them from the roster.
    ///
    /// The record is demoted only after a clean flush. On failure it stays
    /// resident with its delta, the identity is remembered as departed so the
    /// next round-end or periodic flush retries it, and the error is returned.
    pub fn disconnect(&mut self, player: &PlayerRef) -> Result<()> {
        let name = self
            .roster
            .remove(&player.identity)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| player.name.clone());
        if self.config.log_disconnects {
            info!(identity = %player.identity, name = %player.name, "player disconnected");
        }

        if let Err(e) = self.cache.flush(&player.identity) {
            self.departed.insert(player.identity.clone(), name);
            return Err(e);
        }
        self.departed.remove(&player.identity);
        self.cache.evict_or_demote(&player.identity);
        Ok(())
    }

    /// Credits a round to every connected player, then flushes them.
    pub fn end_round(&mut self, winner: Option<&str>) -> FlushSummary {
        for (id, name) in &self.roster {
            self.cache
                .increment(id, name, StatDelta::scalar(ScalarField::RoundsPlayed));
        }
        let summary = self.flush_connected();
        if self.config.log_round_end {
            info!(
                winner = winner.unwrap_or("none"),
                players = self.roster.len(),
                written = summary.written,
                failed = summary.failed.len(),
                "round ended"
            );
        }
        summary
    }

    /// Flushes every connected player under their roster name, plus departed
    /// players whose disconnect flush failed.
    ///
    /// A departed player whose retry succeeds is demoted and forgotten.
    pub fn flush_connected(&mut self) -> FlushSummary {
        let (roster, departed) = (&self.roster, &self.departed);
        let summary = self
            .cache
            .flush_all(|id| roster.get(id).or_else(|| departed.get(id)).cloned());
        self.last_flush = Instant::now();
        if !summary.is_ok() {
            warn!(failed = summary.failed.len(), "some pending deltas were not persisted");
        }

        let retried: Vec<Identity> = self
            .departed
            .keys()
            .filter(|id| !summary.failed.iter().any(|(failed, _)| failed == *id))
            .cloned()
            .collect();
        for id in retried {
            self.departed.remove(&id);
            self.cache.evict_or_demote(&id);
            debug!(identity = %id, "departed player persisted on retry");
        }
        summary
    }

    /// Runs [`flush_connected`](Self::flush_connected) when the configured
    /// interval has elapsed. Returns whether it ran.
    pub fn maybe_periodic_flush(&mut self) -> bool {
        let Some(interval) = self.config.flush_interval() else {
            return false;
        };
        if self.last_flush.elapsed() < interval {
            return false;
        }
        let summary = self.flush_connected();
        debug!(written = summary.written, "periodic flush");
        true
    }

    pub fn reset(&mut self, identity: &Identity) -> Result<bool> {
        let existed = self.cache.reset(identity)?;
        info!(identity = %identity, existed, "stats reset");
        Ok(existed)
    }

    fn log_kill(
        &self,
        attacker: Option<&PlayerRef>,
        victim: Option<&PlayerRef>,
        assister: Option<&PlayerRef>,
        weapon: WeaponCategory,
        headshot: bool,
    ) {
        let name = |p: Option<&PlayerRef>| p.map(|p| p.name.clone()).unwrap_or_default();
        if self.config.log_kills && attacker.is_some() {
            info!(attacker = %name(attacker), victim = %name(victim), %weapon, headshot, "kill");
        }
        if self.config.log_deaths && victim.is_some() {
            info!(victim = %name(victim), killer = %name(attacker), %weapon, "death");
        }
        if self.config.log_assists && assister.is_some() {
            info!(assister = %name(assister), attacker = %name(attacker), %weapon, "assist");
        }
    }
}

// =============================================================================
// Producer Handle
// =============================================================================

/// Producer side of the tracker. Clone it into every thread that sees events.
pub struct StatsHandle<S> {
    dispatch: DispatchHandle<StatsTracker<S>>,
    track_bots: bool,
}

impl<S> Clone for StatsHandle<S> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            track_bots: self.track_bots,
        }
    }
}

impl<S: StatsStore + 'static> StatsHandle<S> {
    /// Translates an event and enqueues the resulting work. Never blocks.
    pub fn submit(&self, event: GameEvent) {
        let track_bots = self.track_bots;
        match event {
            GameEvent::Kill {
                attacker,
                victim,
                assister,
                weapon,
                headshot,
                hit_location,
            } => {
                let increments = kill_increments(
                    attacker.as_ref(),
                    victim.as_ref(),
                    assister.as_ref(),
                    &weapon,
                    headshot,
                    hit_location.as_ref(),
                    track_bots,
                );
                if increments.is_empty() {
                    return;
                }
                let category = normalize(&weapon);
                let subject = attacker.as_ref().or(victim.as_ref()).map(|p| p.identity.clone());
                self.dispatch.submit("kill", subject, move |t: &mut StatsTracker<S>| {
                    t.log_kill(
                        counted(attacker.as_ref(), track_bots),
                        counted(victim.as_ref(), track_bots),
                        counted(assister.as_ref(), track_bots),
                        category,
                        headshot,
                    );
                    t.apply(increments);
                    Ok(())
                });
            }
            GameEvent::Hurt {
                attacker,
                victim,
                damage,
                ..
            } => {
                let increments = hurt_increments(attacker.as_ref(), victim.as_ref(), damage, track_bots);
                if increments.is_empty() {
                    return;
                }
                let subject = increments.first().map(|i| i.identity.clone());
                self.dispatch.submit("hurt", subject, move |t: &mut StatsTracker<S>| {
                    t.apply(increments);
                    Ok(())
                });
            }
            GameEvent::RoundEnd { winner } => {
                self.dispatch.submit("round_end", None, move |t: &mut StatsTracker<S>| {
                    t.end_round(winner.as_deref());
                    Ok(())
                });
            }
            GameEvent::Connect { player } => {
                if counted(Some(&player), track_bots).is_none() {
                    return;
                }
                let id = Some(player.identity.clone());
                self.dispatch.submit("connect", id, move |t: &mut StatsTracker<S>| {
                    t.connect(&player);
                    Ok(())
                });
            }
            GameEvent::Disconnect { player } => {
                if counted(Some(&player), track_bots).is_none() {
                    return;
                }
                let id = Some(player.identity.clone());
                self.dispatch.submit("disconnect", id, move |t: &mut StatsTracker<S>| {
                    t.disconnect(&player)
                });
            }
        }
    }

    /// Enqueues a reset of one identity's stats.
    pub fn reset(&self, identity: Identity) {
        let id = Some(identity.clone());
        self.dispatch.submit("reset", id, move |t: &mut StatsTracker<S>| {
            t.reset(&identity).map(|_| ())
        });
    }

    /// Actions dropped because the tracker was shutting down.
    pub fn dropped(&self) -> u64 {
        self.dispatch.dropped()
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Owns the dispatcher and the consumer context. Drive it with [`tick`](Self::tick).
pub struct Tracker<S> {
    dispatcher: Dispatcher<StatsTracker<S>>,
    state: StatsTracker<S>,
    track_bots: bool,
}

impl<S: StatsStore + 'static> Tracker<S> {
    pub fn new(store: S, config: TrackerConfig) -> Self {
        let (_, dispatcher) = dispatcher::channel::<StatsTracker<S>>();
        let track_bots = config.track_bot_events;
        Self {
            dispatcher,
            state: StatsTracker::new(store, config),
            track_bots,
        }
    }

    pub fn handle(&self) -> StatsHandle<S> {
        StatsHandle {
            dispatch: self.dispatcher.handle(),
            track_bots: self.track_bots,
        }
    }

    pub fn state(&self) -> &StatsTracker<S> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StatsTracker<S> {
        &mut self.state
    }

    /// Actions waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    /// One consumer tick: drain queued actions, then flush if due.
    pub fn tick(&mut self) -> DrainReport {
        let report = self.dispatcher.drain(&mut self.state);
        self.state.maybe_periodic_flush();
        report
    }

    /// Stops intake, runs everything already queued and flushes every
    /// resident record.
    ///
    /// Returns the number of identities written, or
    /// [`Error::FlushFailed`](crate::Error::FlushFailed) when any delta
    /// could not be persisted.
    pub fn shutdown(mut self) -> Result<usize> {
        let report = self.dispatcher.close_and_drain(&mut self.state);
        info!(
            executed = report.executed,
            failed = report.failed,
            "drained queue for shutdown"
        );
        let written = self.state.cache.flush_everything()?;
        info!(written, "final flush complete");
        Ok(written)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn alice() -> PlayerRef {
        PlayerRef::human("76561198000000001", "alice")
    }

    fn bob() -> PlayerRef {
        PlayerRef::human("76561198000000002", "bob")
    }

    fn carol() -> PlayerRef {
        PlayerRef::human("76561198000000003", "carol")
    }

    fn tracker() -> Tracker<SqliteStore> {
        Tracker::new(SqliteStore::open_in_memory().unwrap(), TrackerConfig::default())
    }

    fn kills_of(inc: &[Increment], who: &PlayerRef) -> usize {
        inc.iter()
            .filter(|i| i.identity == who.identity && i.delta == StatDelta::scalar(ScalarField::Kills))
            .count()
    }

    #[test]
    fn test_kill_credits_attacker_victim_assister() {
        let inc = kill_increments(
            Some(&alice()),
            Some(&bob()),
            Some(&carol()),
            "weapon_ak47",
            false,
            Some(&RawHitLocation::Group(2)),
            false,
        );
        assert_eq!(inc.len(), 6);
        assert_eq!(kills_of(&inc, &alice()), 1);
        assert!(inc.contains(&Increment::new(
            &alice(),
            StatDelta::weapon(WeaponCategory::Ak47, InteractionKind::Kill, Some(HitLocation::Chest))
        )));
        assert!(inc.contains(&Increment::new(&bob(), StatDelta::scalar(ScalarField::Deaths))));
        assert!(inc.contains(&Increment::new(&carol(), StatDelta::scalar(ScalarField::Assists))));
    }

    #[test]
    fn test_suicide_counts_only_the_death() {
        let inc = kill_increments(Some(&alice()), Some(&alice()), Some(&bob()), "hegrenade", false, None, false);
        assert_eq!(kills_of(&inc, &alice()), 0);
        assert_eq!(inc.len(), 2);
        assert!(inc.iter().all(|i| i.identity == alice().identity));
    }

    #[test]
    fn test_world_kill_charges_victim() {
        let inc = kill_increments(None, Some(&bob()), None, "world", false, None, false);
        assert_eq!(inc.len(), 2);
        assert!(inc.contains(&Increment::new(&bob(), StatDelta::scalar(ScalarField::Deaths))));
    }

    #[test]
    fn test_missing_victim_counts_nothing() {
        let inc = kill_increments(Some(&alice()), None, Some(&bob()), "awp", true, None, false);
        assert!(inc.is_empty());
    }

    #[test]
    fn test_assister_equal_to_attacker_is_ignored() {
        let inc = kill_increments(Some(&alice()), Some(&bob()), Some(&alice()), "awp", false, None, false);
        assert_eq!(inc.len(), 4);
    }

    #[test]
    fn test_headshot_flag_forces_head() {
        let inc = kill_increments(
            Some(&alice()),
            Some(&bob()),
            None,
            "deagle",
            true,
            Some(&RawHitLocation::Name("chest".into())),
            false,
        );
        assert!(inc.contains(&Increment::new(
            &alice(),
            StatDelta::weapon(WeaponCategory::Deagle, InteractionKind::Kill, Some(HitLocation::Head))
        )));
    }

    #[test]
    fn test_untracked_bot_drops_the_whole_kill() {
        let bot = PlayerRef::bot("BOT_1", "Bot Ivan");
        assert!(kill_increments(Some(&alice()), Some(&bot), Some(&carol()), "ak47", true, None, false).is_empty());
        assert!(kill_increments(Some(&bot), Some(&alice()), None, "ak47", false, None, false).is_empty());
        assert!(hurt_increments(Some(&alice()), Some(&bot), 30, false).is_empty());
        assert!(hurt_increments(Some(&bot), Some(&alice()), 30, false).is_empty());

        let tracked = kill_increments(Some(&bot), Some(&bob()), None, "ak47", false, None, true);
        assert_eq!(tracked.len(), 4);
    }

    #[test]
    fn test_bot_assister_alone_is_not_credited() {
        let bot = PlayerRef::bot("BOT_2", "Bot Oleg");
        let inc = kill_increments(Some(&alice()), Some(&bob()), Some(&bot), "m4a1", false, None, false);
        assert_eq!(inc.len(), 4);
        assert!(inc.iter().all(|i| i.identity != bot.identity));
    }

    #[test]
    fn test_human_vs_bot_leaves_human_untouched() {
        let mut tracker = tracker();
        let handle = tracker.handle();
        let bot = PlayerRef::bot("BOT_1", "Bot Ivan");

        handle.submit(GameEvent::Connect { player: alice() });
        for (attacker, victim) in [(alice(), bot.clone()), (bot.clone(), alice())] {
            handle.submit(GameEvent::Kill {
                attacker: Some(attacker),
                victim: Some(victim),
                assister: None,
                weapon: "ak47".into(),
                headshot: false,
                hit_location: None,
            });
        }
        tracker.tick();

        let r = tracker.state().cache().snapshot(&alice().identity).unwrap();
        assert_eq!(r.scalar(ScalarField::Kills), 0);
        assert_eq!(r.scalar(ScalarField::Deaths), 0);
        assert!(!tracker.state().cache().contains(&bot.identity));
    }

    #[test]
    fn test_blank_attacker_is_a_world_kill() {
        let world = PlayerRef::human("", "");
        let inc = kill_increments(Some(&world), Some(&bob()), Some(&carol()), "world", false, None, false);
        assert_eq!(inc.len(), 2);
        assert!(inc.iter().all(|i| i.identity == bob().identity));
    }

    #[test]
    fn test_hurt_rules() {
        let inc = hurt_increments(Some(&alice()), Some(&bob()), 27, false);
        assert_eq!(inc.len(), 2);
        assert!(hurt_increments(Some(&alice()), Some(&alice()), 27, false).is_empty());
        assert!(hurt_increments(Some(&alice()), Some(&bob()), -5, false).is_empty());
        assert!(hurt_increments(Some(&alice()), Some(&bob()), 0, false).is_empty());
        assert_eq!(hurt_increments(None, Some(&bob()), 10, false).len(), 1);
    }

    #[test]
    fn test_events_only_apply_on_tick() {
        let mut tracker = tracker();
        let handle = tracker.handle();

        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Kill {
            attacker: Some(alice()),
            victim: Some(bob()),
            assister: None,
            weapon: "weapon_ak47".into(),
            headshot: true,
            hit_location: None,
        });
        assert!(tracker.state().cache().is_empty());

        let report = tracker.tick();
        assert_eq!(report.executed, 2);

        let r = tracker.state().cache().snapshot(&alice().identity).unwrap();
        assert_eq!(r.scalar(ScalarField::Kills), 1);
        assert_eq!(r.scalar(ScalarField::Headshots), 1);
        assert_eq!(r.weapon(WeaponCategory::Ak47).headshots(), 1);
        assert!(tracker.state().is_connected(&alice().identity));
    }

    #[test]
    fn test_round_end_credits_and_flushes_connected_only() {
        let mut tracker = tracker();
        let handle = tracker.handle();

        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Hurt {
            attacker: Some(alice()),
            victim: Some(bob()),
            weapon: "glock".into(),
            damage: 40,
            hit_location: None,
        });
        handle.submit(GameEvent::RoundEnd { winner: Some("ct".into()) });
        tracker.tick();

        let cache = tracker.state().cache();
        assert!(cache.pending_delta(&alice().identity).unwrap().is_zero());
        // bob never connected: counted in memory, not flushed
        assert_eq!(
            cache.pending_delta(&bob().identity).unwrap().scalar(ScalarField::DamageTaken),
            40
        );
        assert_eq!(
            cache.snapshot(&alice().identity).unwrap().scalar(ScalarField::RoundsPlayed),
            1
        );
    }

    #[test]
    fn test_disconnect_flushes_and_demotes() {
        let mut tracker = tracker();
        let handle = tracker.handle();

        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Hurt {
            attacker: Some(alice()),
            victim: Some(bob()),
            weapon: "glock".into(),
            damage: 12,
            hit_location: None,
        });
        handle.submit(GameEvent::Disconnect { player: alice() });
        tracker.tick();

        let state = tracker.state_mut();
        assert!(!state.is_connected(&alice().identity));
        assert!(!state.cache().contains(&alice().identity));
        assert_eq!(state.cache().idle_len(), 1);
        let stored = state.cache_mut().store_mut().load(&alice().identity).unwrap().unwrap();
        assert_eq!(stored.scalar(ScalarField::DamageDealt), 12);
    }

    #[test]
    fn test_reset_through_handle() {
        let mut tracker = tracker();
        let handle = tracker.handle();
        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Kill {
            attacker: Some(alice()),
            victim: Some(bob()),
            assister: None,
            weapon: "ak47".into(),
            headshot: false,
            hit_location: None,
        });
        handle.reset(alice().identity);
        tracker.tick();

        assert!(tracker.state().cache().snapshot(&alice().identity).unwrap().is_zero());
    }

    #[test]
    fn test_shutdown_persists_everything_and_rejects_late_events() {
        let mut tracker = tracker();
        let handle = tracker.handle();
        handle.submit(GameEvent::Kill {
            attacker: Some(alice()),
            victim: Some(bob()),
            assister: None,
            weapon: "ak47".into(),
            headshot: false,
            hit_location: None,
        });
        tracker.tick();

        handle.submit(GameEvent::RoundEnd { winner: None });
        let written = tracker.shutdown().unwrap();
        assert_eq!(written, 2);

        handle.submit(GameEvent::RoundEnd { winner: None });
        assert_eq!(handle.dropped(), 1);
    }

    #[test]
    fn test_event_json_shape() {
        let line = r#"{"type":"kill","attacker":{"identity":"1","name":"a"},"victim":{"identity":"2","name":"b","is_bot":true},"weapon":"weapon_m4a1_silencer","headshot":false,"hit_location":"left leg"}"#;
        let event: GameEvent = serde_json::from_str(line).unwrap();
        let GameEvent::Kill { victim, hit_location, .. } = event else {
            panic!("expected kill");
        };
        assert!(victim.unwrap().is_bot);
        assert_eq!(hit_location.unwrap().classify(), Some(HitLocation::LeftLeg));

        let round: GameEvent = serde_json::from_str(r#"{"type":"round_end"}"#).unwrap();
        assert_eq!(round, GameEvent::RoundEnd { winner: None });
    }

    /// Wraps the SQLite store with a switch that fails every call.
    struct FlakyStore {
        inner: SqliteStore,
        failing: bool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.failing {
                Err(crate::Error::Sqlite(rusqlite::Error::InvalidQuery))
            } else {
                Ok(())
            }
        }
    }

    impl StatsStore for FlakyStore {
        fn load(&mut self, identity: &Identity) -> Result<Option<crate::AggregateRecord>> {
            self.check()?;
            self.inner.load(identity)
        }

        fn merge_upsert(&mut self, delta: &crate::AggregateRecord) -> Result<()> {
            self.check()?;
            self.inner.merge_upsert(delta)
        }

        fn top(&mut self, field: ScalarField, limit: usize) -> Result<Vec<crate::AggregateRecord>> {
            self.check()?;
            self.inner.top(field, limit)
        }

        fn reset(&mut self, identity: &Identity) -> Result<bool> {
            self.check()?;
            self.inner.reset(identity)
        }
    }

    fn set_failing(tracker: &mut Tracker<FlakyStore>, failing: bool) {
        tracker.state_mut().cache_mut().store_mut().failing = failing;
    }

    #[test]
    fn test_failed_disconnect_flush_is_retried_at_round_end() {
        let store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            failing: false,
        };
        let mut tracker = Tracker::new(store, TrackerConfig::default());
        let handle = tracker.handle();

        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Connect { player: bob() });
        handle.submit(GameEvent::Kill {
            attacker: Some(alice()),
            victim: Some(bob()),
            assister: None,
            weapon: "ak47".into(),
            headshot: false,
            hit_location: None,
        });
        tracker.tick();

        set_failing(&mut tracker, true);
        handle.submit(GameEvent::Disconnect { player: alice() });
        let report = tracker.tick();
        assert_eq!(report.failed, 1);
        assert!(!tracker.state().is_connected(&alice().identity));
        assert!(tracker.state().is_departed_unflushed(&alice().identity));
        assert!(tracker.state().cache().contains(&alice().identity));

        set_failing(&mut tracker, false);
        handle.submit(GameEvent::RoundEnd { winner: None });
        tracker.tick();

        let state = tracker.state_mut();
        assert!(!state.is_departed_unflushed(&alice().identity));
        assert!(!state.cache().contains(&alice().identity));
        let stored = state.cache_mut().store_mut().inner.load(&alice().identity).unwrap().unwrap();
        assert_eq!(stored.scalar(ScalarField::Kills), 1);
        assert_eq!(stored.display_name, "alice");
        // departed players are retried, not credited with the round
        assert_eq!(stored.scalar(ScalarField::RoundsPlayed), 0);
    }

    #[test]
    fn test_reconnect_clears_departed_state() {
        let store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            failing: false,
        };
        let mut tracker = Tracker::new(store, TrackerConfig::default());
        let handle = tracker.handle();

        handle.submit(GameEvent::Connect { player: alice() });
        handle.submit(GameEvent::Hurt {
            attacker: Some(alice()),
            victim: Some(bob()),
            weapon: "glock".into(),
            damage: 20,
            hit_location: None,
        });
        tracker.tick();

        set_failing(&mut tracker, true);
        handle.submit(GameEvent::Disconnect { player: alice() });
        tracker.tick();
        assert!(tracker.state().is_departed_unflushed(&alice().identity));

        set_failing(&mut tracker, false);
        handle.submit(GameEvent::Connect { player: alice() });
        tracker.tick();
        assert!(!tracker.state().is_departed_unflushed(&alice().identity));
        assert!(tracker.state().is_connected(&alice().identity));
        assert_eq!(
            tracker.state().cache().pending_delta(&alice().identity).unwrap().scalar(ScalarField::DamageDealt),
            20
        );
    }
}
