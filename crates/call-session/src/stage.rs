//! Bounded volume-ranked stage admission with join-order fairness.
//!
//! The stage is the ordered subset of roster participants granted a
//! visible slot, `len <= capacity`. Membership changes on two triggers:
//! immediate admission while the room is still filling (so early
//! joiners are visible without waiting for a tick), and a fixed
//! interval recompute that reconciles the stage against the roster and
//! live volumes once the room is full. The two-phase design avoids both
//! perceptible join lag and per-frame volume flicker destabilizing the
//! visible set.
//!
//! Ranking is by descending volume; equal volumes fall back to stable
//! join order (earlier joiner wins). Eviction uses the same total
//! order, so a candidate can never evict itself.

use uuid::Uuid;

/// One stage membership change produced by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageChange {
    Added(Uuid),
    Removed(Uuid),
}

/// Bounded, volume-aware subset of the roster designated "on stage".
#[derive(Debug)]
pub struct StageSelector {
    capacity: usize,
    stage: Vec<Uuid>,
}

impl StageSelector {
    /// `capacity` is the number of remote stage slots (the configured
    /// maximum minus the slot reserved for the local self view).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stage: Vec::new(),
        }
    }

    /// Current stage membership in admission order.
    #[must_use]
    pub fn stage(&self) -> &[Uuid] {
        &self.stage
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.stage.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stage.is_empty()
    }

    /// Immediate admission on join: while a free slot remains, the
    /// joiner is appended right away, preserving join order.
    pub fn on_participant_joined(&mut self, id: Uuid) -> Option<StageChange> {
        if self.stage.len() >= self.capacity || self.contains(id) {
            return None;
        }
        self.stage.push(id);
        Some(StageChange::Added(id))
    }

    /// Explicit removal: drop the id and backfill within the same pass
    /// rather than waiting for the next interval.
    pub fn on_participant_left(
        &mut self,
        id: Uuid,
        roster: &[Uuid],
        volume: impl Fn(Uuid) -> f64,
    ) -> Vec<StageChange> {
        let mut changes = Vec::new();
        if let Some(position) = self.stage.iter().position(|staged| *staged == id) {
            self.stage.remove(position);
            changes.push(StageChange::Removed(id));
        }
        changes.extend(self.reconcile(roster, volume));
        changes
    }

    /// Interval recompute: reconcile the stage against the roster and
    /// current volumes.
    pub fn reconcile(
        &mut self,
        roster: &[Uuid],
        volume: impl Fn(Uuid) -> f64,
    ) -> Vec<StageChange> {
        let mut changes = Vec::new();

        // Staged ids that left the roster are dropped first.
        self.stage.retain(|id| {
            let keep = roster.contains(id);
            if !keep {
                changes.push(StageChange::Removed(*id));
            }
            keep
        });

        let capacity = self.capacity;

        // Everyone already visible: no-op.
        if self.stage.len() == roster.len() && self.stage.len() <= capacity {
            return changes;
        }

        // Free slots remain: top up in stable join order, no eviction.
        if self.stage.len() < capacity {
            for id in roster {
                if self.stage.len() >= capacity {
                    break;
                }
                if !self.contains(*id) {
                    self.stage.push(*id);
                    changes.push(StageChange::Added(*id));
                }
            }
            return changes;
        }

        // Stage is full and contenders remain: the top-capacity roster
        // members by (volume desc, join order) displace the quietest.
        let join_index =
            |id: Uuid| roster.iter().position(|r| *r == id).unwrap_or(usize::MAX);

        let mut ranked: Vec<Uuid> = roster.to_vec();
        ranked.sort_by(|a, b| {
            volume(*b)
                .total_cmp(&volume(*a))
                .then_with(|| join_index(*a).cmp(&join_index(*b)))
        });

        for id in ranked.into_iter().take(capacity) {
            if self.contains(id) {
                continue;
            }
            self.stage.push(id);
            changes.push(StageChange::Added(id));

            while self.stage.len() > capacity {
                let evict = self
                    .stage
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        volume(**a)
                            .total_cmp(&volume(**b))
                            .then_with(|| join_index(**b).cmp(&join_index(**a)))
                    })
                    .map(|(position, id)| (position, *id));
                let Some((position, evicted)) = evict else {
                    break;
                };
                self.stage.remove(position);
                changes.push(StageChange::Removed(evicted));
            }
        }

        changes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ids(count: usize) -> Vec<Uuid> {
        (0..count).map(|_| Uuid::new_v4()).collect()
    }

    fn silent(_: Uuid) -> f64 {
        f64::NEG_INFINITY
    }

    fn volumes(map: &HashMap<Uuid, f64>) -> impl Fn(Uuid) -> f64 + '_ {
        |id| map.get(&id).copied().unwrap_or(f64::NEG_INFINITY)
    }

    #[test]
    fn test_immediate_admission_until_full() {
        // Scenario A, first half: capacity 2, joiners 1 and 2 admitted
        // immediately, joiner 3 waits off stage.
        let roster = ids(3);
        let mut stage = StageSelector::new(2);

        for id in &roster {
            stage.on_participant_joined(*id);
        }
        let (a, b) = (roster.first().unwrap(), roster.get(1).unwrap());
        assert_eq!(stage.stage(), &[*a, *b]);
    }

    #[test]
    fn test_fairness_small_roster_everyone_on_stage() {
        // roster.size <= capacity implies stage == roster at all times.
        let roster = ids(3);
        let mut stage = StageSelector::new(5);
        for id in &roster {
            stage.on_participant_joined(*id);
        }
        for _ in 0..4 {
            let changes = stage.reconcile(&roster, silent);
            assert!(changes.is_empty());
            assert_eq!(stage.stage(), roster.as_slice());
        }
    }

    #[test]
    fn test_reconcile_tops_up_without_eviction() {
        let roster = ids(4);
        let mut stage = StageSelector::new(3);
        // Only the first joiner was admitted immediately.
        stage.on_participant_joined(*roster.first().unwrap());

        let changes = stage.reconcile(&roster, silent);
        // Topped up in join order: no Removed entries at all.
        assert!(changes
            .iter()
            .all(|change| matches!(change, StageChange::Added(_))));
        assert_eq!(stage.stage(), &roster[..3]);
    }

    #[test]
    fn test_bound_invariant_under_churn() {
        // stage.len <= min(capacity, roster.len) at every observed tick.
        let all = ids(6);
        let mut stage = StageSelector::new(3);
        let mut roster: Vec<Uuid> = Vec::new();

        for id in &all {
            roster.push(*id);
            stage.on_participant_joined(*id);
            stage.reconcile(&roster, silent);
            assert!(stage.len() <= roster.len().min(3));
        }
        while let Some(id) = roster.pop() {
            stage.on_participant_left(id, &roster, silent);
            assert!(stage.len() <= roster.len().min(3));
        }
        assert!(stage.is_empty());
    }

    #[test]
    fn test_louder_contender_evicts_quietest() {
        // Scenario A, second half + the eviction property: an off-stage
        // participant whose volume exceeds the quietest on-stage member
        // takes that member's slot on the next recompute.
        let roster = ids(3);
        let (a, b, c) = (
            *roster.first().unwrap(),
            *roster.get(1).unwrap(),
            *roster.get(2).unwrap(),
        );
        let mut stage = StageSelector::new(2);
        for id in &roster {
            stage.on_participant_joined(*id);
        }
        assert_eq!(stage.stage(), &[a, b]);

        let mut levels = HashMap::from([(a, -20.0), (b, -45.0), (c, -12.0)]);
        let changes = stage.reconcile(&roster, volumes(&levels));
        assert!(changes.contains(&StageChange::Added(c)));
        assert!(changes.contains(&StageChange::Removed(b)));
        assert!(stage.contains(a) && stage.contains(c));

        // A sustained ranking keeps the stage stable on later ticks.
        levels.insert(b, f64::NEG_INFINITY);
        assert!(stage.reconcile(&roster, volumes(&levels)).is_empty());
    }

    #[test]
    fn test_silent_room_has_no_volume_churn() {
        // All volumes at the floor: the tie-break (join order) matches
        // the admitted set, so ticks cause no reshuffle.
        let roster = ids(4);
        let mut stage = StageSelector::new(2);
        for id in &roster {
            stage.on_participant_joined(*id);
        }
        let before = stage.stage().to_vec();
        for _ in 0..3 {
            assert!(stage.reconcile(&roster, silent).is_empty());
        }
        assert_eq!(stage.stage(), before.as_slice());
    }

    #[test]
    fn test_removal_backfills_in_same_pass() {
        // Scenario B: an on-stage participant leaves; the highest
        // ranked off-stage participant is promoted in the same pass.
        let roster = ids(4);
        let (a, b, c, d) = (
            *roster.first().unwrap(),
            *roster.get(1).unwrap(),
            *roster.get(2).unwrap(),
            *roster.get(3).unwrap(),
        );
        let mut stage = StageSelector::new(2);
        for id in &roster {
            stage.on_participant_joined(*id);
        }
        assert_eq!(stage.stage(), &[a, b]);

        let levels = HashMap::from([(c, -40.0), (d, -15.0)]);
        let remaining = vec![b, c, d];
        let changes = stage.on_participant_left(a, &remaining, volumes(&levels));

        assert!(changes.contains(&StageChange::Removed(a)));
        // d outranks c, so d is the one promoted.
        assert!(changes.contains(&StageChange::Added(d)));
        assert!(stage.contains(b) && stage.contains(d));
        assert_eq!(stage.len(), 2);
    }

    #[test]
    fn test_roster_departure_discovered_at_tick() {
        let roster = ids(3);
        let (a, b, c) = (
            *roster.first().unwrap(),
            *roster.get(1).unwrap(),
            *roster.get(2).unwrap(),
        );
        let mut stage = StageSelector::new(2);
        for id in &roster {
            stage.on_participant_joined(*id);
        }

        // a vanished from the roster without an explicit removal call.
        let remaining = vec![b, c];
        let changes = stage.reconcile(&remaining, silent);
        assert!(changes.contains(&StageChange::Removed(a)));
        assert!(changes.contains(&StageChange::Added(c)));
        assert_eq!(stage.len(), 2);
    }

    #[test]
    fn test_equal_volume_tie_breaks_by_join_order() {
        let roster = ids(3);
        let (a, b, c) = (
            *roster.first().unwrap(),
            *roster.get(1).unwrap(),
            *roster.get(2).unwrap(),
        );
        let mut stage = StageSelector::new(2);
        // Admit b and c first (a was late to be admitted).
        stage.on_participant_joined(b);
        stage.on_participant_joined(c);

        // Everyone equally loud: the top 2 by join order are a and b,
        // so a displaces c (the latest joiner among the quietest).
        let levels = HashMap::from([(a, -20.0), (b, -20.0), (c, -20.0)]);
        let changes = stage.reconcile(&roster, volumes(&levels));
        assert!(changes.contains(&StageChange::Added(a)));
        assert!(changes.contains(&StageChange::Removed(c)));
        assert!(stage.contains(a) && stage.contains(b));
    }
}
