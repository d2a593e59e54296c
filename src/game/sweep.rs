//! Hit detection: directional sphere sweeps against the arena
//!
//! The detector classifies what it hit, so callers branch on a closed
//! [`HitTarget`] instead of inspecting actor types.

use glam::Vec3;
use std::collections::HashMap;
use uuid::Uuid;

use super::combat::CombatError;
use super::combatant::Combatant;
use super::physics::MovementStats;
use super::prop::{Obstacle, PropId, PropRegistry};

/// Skeleton bones used as sweep reference points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bone {
    Neck3,
    Head,
}

/// First blocking object found by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    Combatant(Uuid),
    Prop(PropId),
    /// Blocking geometry that is not a gameplay target
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepQuery {
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    pub distance: f32,
    pub radius: f32,
    /// The attacker never hits itself
    pub ignore: Uuid,
}

/// World capability injected into the combat controller
pub trait WorldQuery {
    fn sweep(&self, query: &SweepQuery) -> Result<Option<HitTarget>, CombatError>;

    fn bone_location(&self, actor: Uuid, bone: Bone) -> Result<Vec3, CombatError>;
}

/// No world loaded means no sweeps
impl<W: WorldQuery> WorldQuery for Option<W> {
    fn sweep(&self, query: &SweepQuery) -> Result<Option<HitTarget>, CombatError> {
        self.as_ref().ok_or(CombatError::NoWorldContext)?.sweep(query)
    }

    fn bone_location(&self, actor: Uuid, bone: Bone) -> Result<Vec3, CombatError> {
        self.as_ref()
            .ok_or(CombatError::NoWorldContext)?
            .bone_location(actor, bone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BodyKind {
    Combatant(Uuid),
    Prop(PropId),
    Static(u32),
}

impl BodyKind {
    fn target(&self) -> HitTarget {
        match *self {
            BodyKind::Combatant(id) => HitTarget::Combatant(id),
            BodyKind::Prop(id) => HitTarget::Prop(id),
            BodyKind::Static(_) => HitTarget::Other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Body {
    kind: BodyKind,
    center: Vec3,
    radius: f32,
}

#[derive(Debug, Clone, Copy)]
struct Skeleton {
    neck: Vec3,
    head: Vec3,
}

/// Height of the neck bone above the pawn origin
const NECK_HEIGHT: f32 = 50.0;
/// Forward offset of the neck and head bones
const NECK_FORWARD: f32 = 30.0;
const HEAD_FORWARD: f32 = 60.0;

/// Snapshot of arena geometry taken for one hit-check
#[derive(Debug, Clone, Default)]
pub struct ArenaWorld {
    bodies: Vec<Body>,
    skeletons: HashMap<Uuid, Skeleton>,
}

impl ArenaWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture combatants, live props and static geometry
    pub fn capture<'a>(
        combatants: impl IntoIterator<Item = &'a Combatant>,
        props: &PropRegistry,
        obstacles: &[Obstacle],
        stats: &MovementStats,
    ) -> Self {
        let mut world = Self::new();
        for c in combatants {
            world.add_combatant(c, stats);
        }
        for prop in props.iter().filter(|p| !p.is_destroyed()) {
            world.add_prop(prop.id, prop.position, prop.radius);
        }
        for (idx, obstacle) in obstacles.iter().enumerate() {
            world.add_static(idx as u32, obstacle.position, obstacle.radius);
        }
        world
    }

    pub fn add_combatant(&mut self, combatant: &Combatant, stats: &MovementStats) {
        let forward = combatant.forward();
        let up = Vec3::Z * NECK_HEIGHT;
        self.skeletons.insert(
            combatant.user_id,
            Skeleton {
                neck: combatant.position + up + forward * NECK_FORWARD,
                head: combatant.position + up + forward * HEAD_FORWARD,
            },
        );
        self.bodies.push(Body {
            kind: BodyKind::Combatant(combatant.user_id),
            center: combatant.position + up,
            radius: stats.capsule_radius,
        });
    }

    pub fn add_prop(&mut self, id: PropId, center: Vec3, radius: f32) {
        self.bodies.push(Body {
            kind: BodyKind::Prop(id),
            center,
            radius,
        });
    }

    pub fn add_static(&mut self, idx: u32, center: Vec3, radius: f32) {
        self.bodies.push(Body {
            kind: BodyKind::Static(idx),
            center,
            radius,
        });
    }
}

/// Entry distance of a sphere moving from `origin` along unit `dir` into a
/// sphere at `center` with the combined radius, or None if it never touches
/// within `max_dist`.
fn sphere_cast(origin: Vec3, dir: Vec3, max_dist: f32, center: Vec3, combined_radius: f32) -> Option<f32> {
    let to_origin = origin - center;
    let c = to_origin.length_squared() - combined_radius * combined_radius;
    if c <= 0.0 {
        // Already overlapping
        return Some(0.0);
    }
    let b = to_origin.dot(dir);
    if b > 0.0 {
        // Moving away
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    (t <= max_dist).then_some(t.max(0.0))
}

impl WorldQuery for ArenaWorld {
    fn sweep(&self, query: &SweepQuery) -> Result<Option<HitTarget>, CombatError> {
        let dir = query.direction.normalize_or_zero();
        if dir == Vec3::ZERO {
            return Ok(None);
        }

        let hit = self
            .bodies
            .iter()
            .filter(|b| b.kind != BodyKind::Combatant(query.ignore))
            .filter_map(|b| {
                sphere_cast(query.origin, dir, query.distance, b.center, b.radius + query.radius)
                    .map(|t| (t, b.kind))
            })
            .min_by(|(ta, ka), (tb, kb)| ta.total_cmp(tb).then_with(|| ka.cmp(kb)));

        Ok(hit.map(|(_, kind)| kind.target()))
    }

    fn bone_location(&self, actor: Uuid, bone: Bone) -> Result<Vec3, CombatError> {
        let skeleton = self.skeletons.get(&actor).ok_or(CombatError::NoWorldContext)?;
        Ok(match bone {
            Bone::Neck3 => skeleton.neck,
            Bone::Head => skeleton.head,
        })
    }
}
