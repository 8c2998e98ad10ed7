//! Cancellable timers on the session tick clock.
//!
//! Timers live inside the session task as plain data, so cancelling on
//! disconnect is synchronous with the tick and can never race a firing.

use uuid::Uuid;

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Return the player to Active with resources reset
    Respawn,
    /// Spawn-protection window ends
    InvulnerabilityEnd,
    /// Equipped ability effect ends
    AbilityEnd,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduledTimer {
    pub fires_at_tick: u64,
    pub owner: Uuid,
    pub kind: TimerKind,
}

/// Session-scoped timer queue keyed by owning player
#[derive(Debug, Default)]
pub struct TickScheduler {
    timers: Vec<ScheduledTimer>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, fires_at_tick: u64, owner: Uuid, kind: TimerKind) {
        self.timers.push(ScheduledTimer {
            fires_at_tick,
            owner,
            kind,
        });
    }

    /// Remove every pending timer for a player (disconnect/leave)
    pub fn cancel_owner(&mut self, owner: Uuid) {
        self.timers.retain(|t| t.owner != owner);
    }

    pub fn is_scheduled(&self, owner: Uuid, kind: TimerKind) -> bool {
        self.timers
            .iter()
            .any(|t| t.owner == owner && t.kind == kind)
    }

    /// Pop all timers due at or before the given tick
    pub fn fire_due(&mut self, tick: u64) -> Vec<ScheduledTimer> {
        let mut due = Vec::new();
        self.timers.retain(|t| {
            if t.fires_at_tick <= tick {
                due.push(*t);
                false
            } else {
                true
            }
        });
        due
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_at_the_scheduled_tick_not_before() {
        let mut scheduler = TickScheduler::new();
        let player = Uuid::new_v4();
        scheduler.schedule(100, player, TimerKind::Respawn);

        assert!(scheduler.fire_due(99).is_empty());
        let due = scheduler.fire_due(100);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, TimerKind::Respawn);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn cancel_owner_drops_only_that_players_timers() {
        let mut scheduler = TickScheduler::new();
        let leaving = Uuid::new_v4();
        let staying = Uuid::new_v4();
        scheduler.schedule(50, leaving, TimerKind::Respawn);
        scheduler.schedule(50, leaving, TimerKind::InvulnerabilityEnd);
        scheduler.schedule(50, staying, TimerKind::Respawn);

        scheduler.cancel_owner(leaving);

        let due = scheduler.fire_due(50);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].owner, staying);
    }

    #[test]
    fn is_scheduled_matches_kind() {
        let mut scheduler = TickScheduler::new();
        let player = Uuid::new_v4();
        scheduler.schedule(10, player, TimerKind::AbilityEnd);

        assert!(scheduler.is_scheduled(player, TimerKind::AbilityEnd));
        assert!(!scheduler.is_scheduled(player, TimerKind::Respawn));
    }
}
