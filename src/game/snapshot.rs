//! Snapshot building

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{CombatantSnapshot, PropSnapshot, ServerMsg};

use super::combatant::Combatant;
use super::prop::PropRegistry;

/// Builds periodic state snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message. Combatants are ordered by user id.
    pub fn build(
        &self,
        tick: u64,
        round_remaining: f32,
        combatants: &HashMap<Uuid, Combatant>,
        props: &PropRegistry,
    ) -> ServerMsg {
        let mut combatant_snapshots: Vec<CombatantSnapshot> = combatants
            .values()
            .map(|c| CombatantSnapshot {
                user_id: c.user_id,
                position: c.position,
                yaw: c.yaw,
                pitch: c.pitch,
                max_walk_speed: c.max_walk_speed,
                stamina: c.stamina,
                headbutt_phase: c.headbutt_phase,
                headbutt_on_cooldown: c.headbutt_on_cooldown,
                invincible: c.invincible,
                stunned: c.stunned,
                score: c.score,
                last_input_seq: c.last_input_seq,
            })
            .collect();
        combatant_snapshots.sort_by_key(|c| c.user_id);

        let prop_snapshots = props
            .iter()
            .filter(|p| !p.is_destroyed())
            .map(|p| PropSnapshot {
                prop_id: p.id,
                position: p.position,
                point_value: p.point_value(),
            })
            .collect();

        ServerMsg::Snapshot {
            tick,
            round_remaining: round_remaining.max(0.0),
            combatants: combatant_snapshots,
            props: prop_snapshots,
        }
    }
}
