//! Destructible props and the arena layout they are spawned from

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::CombatEffect;

use super::combat::CombatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropId(pub u32);

/// A world object worth points that can be destroyed exactly once
#[derive(Debug)]
pub struct DestructibleProp {
    pub id: PropId,
    pub position: Vec3,
    /// Hitbox radius used by the sweep
    pub radius: f32,
    point_value: i32,
    destroyed: AtomicBool,
}

impl DestructibleProp {
    pub fn new(id: PropId, position: Vec3, radius: f32, point_value: i32) -> Self {
        Self {
            id,
            position,
            radius,
            point_value,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Points awarded to whoever destroys this prop
    pub fn point_value(&self) -> i32 {
        self.point_value
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Flip `destroyed` false -> true. Only the first caller succeeds.
    pub fn destroy(&self) -> Result<(), CombatError> {
        self.destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| CombatError::AlreadyDestroyed(self.id))
    }
}

impl Default for DestructibleProp {
    fn default() -> Self {
        Self::new(PropId(0), Vec3::ZERO, 50.0, 0)
    }
}

/// Live props in a match, keyed by id for deterministic iteration
#[derive(Debug, Default)]
pub struct PropRegistry {
    props: BTreeMap<PropId, Arc<DestructibleProp>>,
}

impl PropRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn every prop in a layout
    pub fn from_layout(layout: &ArenaLayout) -> Self {
        let mut registry = Self::new();
        for (idx, spawn) in layout.props.iter().enumerate() {
            let id = PropId(idx as u32 + 1);
            registry.insert(DestructibleProp::new(id, spawn.position, spawn.radius, spawn.point_value));
        }
        registry
    }

    pub fn insert(&mut self, prop: DestructibleProp) {
        self.props.insert(prop.id, Arc::new(prop));
    }

    pub fn get(&self, id: PropId) -> Option<&Arc<DestructibleProp>> {
        self.props.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DestructibleProp>> {
        self.props.values()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Destroy a prop and remove it from the world.
    ///
    /// Emits the destruction cue and returns the payout. A prop that is
    /// already gone (removed or flagged) yields `AlreadyDestroyed`.
    pub fn destroy(
        &mut self,
        id: PropId,
        destroyed_by: Option<Uuid>,
        effects: &mut Vec<CombatEffect>,
    ) -> Result<i32, CombatError> {
        let prop = self
            .props
            .get(&id)
            .cloned()
            .ok_or(CombatError::AlreadyDestroyed(id))?;

        prop.destroy()?;
        self.props.remove(&id);

        debug!(prop_id = id.0, points = prop.point_value(), "Prop destroyed");
        effects.push(CombatEffect::PropDestroyed {
            prop_id: id,
            destroyed_by,
        });

        Ok(prop.point_value())
    }
}

/// Placement of one prop in the arena
#[derive(Debug, Clone)]
pub struct PropSpawn {
    pub position: Vec3,
    pub radius: f32,
    pub point_value: i32,
}

/// Static geometry that blocks sweeps but is not a gameplay target
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub position: Vec3,
    pub radius: f32,
}

/// Level content loaded when a match is created
#[derive(Debug, Clone)]
pub struct ArenaLayout {
    pub props: Vec<PropSpawn>,
    pub obstacles: Vec<Obstacle>,
    /// Players spawn on a ring of this radius around the origin
    pub spawn_radius: f32,
}

impl Default for ArenaLayout {
    fn default() -> Self {
        let prop = |x: f32, y: f32, point_value: i32| PropSpawn {
            position: Vec3::new(x, y, 40.0),
            radius: 40.0,
            point_value,
        };
        Self {
            props: vec![
                // Hay bales
                prop(300.0, 0.0, 10),
                prop(-300.0, 0.0, 10),
                prop(0.0, 300.0, 10),
                prop(0.0, -300.0, 10),
                // Fences
                prop(600.0, 600.0, 25),
                prop(-600.0, -600.0, 25),
                // Tractor
                prop(0.0, 0.0, 50),
            ],
            obstacles: vec![
                Obstacle {
                    position: Vec3::new(900.0, 0.0, 100.0),
                    radius: 150.0,
                },
                Obstacle {
                    position: Vec3::new(-900.0, 0.0, 100.0),
                    radius: 150.0,
                },
            ],
            spawn_radius: 700.0,
        }
    }
}
