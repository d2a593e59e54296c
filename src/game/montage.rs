//! Server-side montage tracking
//!
//! The authority never blends animation, it only needs to know whether a
//! gameplay-relevant montage is still playing. Each montage is modelled as
//! a timed section that expires after its length divided by play rate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::util::time::ticks_for;

/// Montages that gate combat decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MontageId {
    HeadbuttCharge,
    HeadbuttRelease,
}

#[derive(Debug, Clone)]
struct ActiveMontage {
    section: &'static str,
    remaining_ticks: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MontageTracker {
    active: HashMap<MontageId, ActiveMontage>,
}

impl MontageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a montage section
    pub fn play(&mut self, id: MontageId, rate: f32, section: &'static str, length_secs: f32) {
        let rate = if rate > 0.0 { rate } else { 1.0 };
        self.active.insert(
            id,
            ActiveMontage {
                section,
                remaining_ticks: ticks_for(length_secs / rate),
            },
        );
    }

    pub fn stop(&mut self, id: MontageId) {
        self.active.remove(&id);
    }

    pub fn is_active(&self, id: MontageId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn section(&self, id: MontageId) -> Option<&'static str> {
        self.active.get(&id).map(|m| m.section)
    }

    /// Advance all montages by one tick, dropping finished ones
    pub fn tick(&mut self) {
        self.active.retain(|_, montage| {
            montage.remaining_ticks = montage.remaining_ticks.saturating_sub(1);
            montage.remaining_ticks > 0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn montage_expires_after_its_length() {
        let mut montages = MontageTracker::new();
        montages.play(MontageId::HeadbuttRelease, 1.0, "ReleaseAttack", 0.1);
        assert_eq!(montages.section(MontageId::HeadbuttRelease), Some("ReleaseAttack"));

        montages.tick();
        montages.tick();
        assert!(montages.is_active(MontageId::HeadbuttRelease));
        montages.tick();
        assert!(!montages.is_active(MontageId::HeadbuttRelease));
    }

    #[test]
    fn faster_rate_shortens_montage() {
        let mut montages = MontageTracker::new();
        montages.play(MontageId::HeadbuttCharge, 2.0, "Charge", 0.2);
        montages.tick();
        montages.tick();
        montages.tick();
        assert!(!montages.is_active(MontageId::HeadbuttCharge));
    }

    #[test]
    fn stop_clears_immediately() {
        let mut montages = MontageTracker::new();
        montages.play(MontageId::HeadbuttCharge, 1.0, "Charge", 1.0);
        montages.stop(MontageId::HeadbuttCharge);
        assert!(!montages.is_active(MontageId::HeadbuttCharge));
    }
}
