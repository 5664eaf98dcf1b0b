use glam::Vec2;

use crate::math::{is_finite, EPSILON};

/// Stable slot index of an agent inside its world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub u32);

impl AgentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque formation/constellation tag. Only compared for equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// AI-controlled burst movement along a fixed direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DashOverride {
    pub direction: Vec2,
    pub speed: f32,
}

/// What the AI wants this agent to do on the next tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MovementIntent {
    target_direction: Option<Vec2>,
    dash: Option<DashOverride>,
}

impl MovementIntent {
    pub fn toward(direction: Vec2) -> Self {
        Self {
            target_direction: unit_or_none(direction),
            dash: None,
        }
    }

    pub fn target_direction(&self) -> Option<Vec2> {
        self.target_direction
    }

    pub fn dash(&self) -> Option<DashOverride> {
        self.dash
    }

    /// Stores a unit direction; zero or non-finite input clears the target.
    pub fn set_target_direction(&mut self, direction: Vec2) {
        self.target_direction = unit_or_none(direction);
    }

    pub fn clear_target(&mut self) {
        self.target_direction = None;
    }

    /// Starts a dash. Ignored when the direction is degenerate or the speed is not positive.
    pub fn start_dash(&mut self, direction: Vec2, speed: f32) -> bool {
        match unit_or_none(direction) {
            Some(direction) if speed.is_finite() && speed > 0.0 => {
                self.dash = Some(DashOverride { direction, speed });
                true
            }
            _ => false,
        }
    }

    pub fn end_dash(&mut self) {
        self.dash = None;
    }
}

fn unit_or_none(direction: Vec2) -> Option<Vec2> {
    if !is_finite(direction) || direction.length_squared() <= EPSILON {
        return None;
    }
    Some(direction.normalize())
}

/// Autonomous movement used when the AI supplies no direction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FallbackPattern {
    Orbit {
        center: Vec2,
        radius: f32,
        clockwise: bool,
    },
    Zigzag {
        heading: Vec2,
        period: f32,
        amplitude: f32,
    },
    #[default]
    IdleDrift,
    Hold,
}

/// Whether a neighbor contributes its velocity to alignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mobility {
    #[default]
    Mobile,
    /// Pinned in place; has no meaningful heading to align with.
    Anchored,
}

#[derive(Clone, Debug)]
pub struct Agent {
    pub id: AgentId,
    pub position: Vec2,
    pub radius: f32,
    /// Cruising speed used when following a target direction.
    pub speed: f32,
    pub max_speed: f32,
    pub velocity: Vec2,
    pub knockback: Vec2,
    /// Facing, radians.
    pub rotation: f32,
    pub intent: MovementIntent,
    pub fallback: FallbackPattern,
    pub formation: Option<GroupId>,
    pub constellation: Option<GroupId>,
    pub mobility: Mobility,
    pub is_dead: bool,
}

impl Agent {
    pub fn new(id: AgentId, position: Vec2, radius: f32, speed: f32) -> Self {
        Self {
            id,
            position,
            radius,
            speed,
            max_speed: speed,
            velocity: Vec2::ZERO,
            knockback: Vec2::ZERO,
            rotation: 0.0,
            intent: MovementIntent::default(),
            fallback: FallbackPattern::default(),
            formation: None,
            constellation: None,
            mobility: Mobility::Mobile,
            is_dead: false,
        }
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPattern) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_groups(
        mut self,
        formation: Option<GroupId>,
        constellation: Option<GroupId>,
    ) -> Self {
        self.formation = formation;
        self.constellation = constellation;
        self
    }

    /// Group-level motion is driven by a formation or constellation controller.
    pub fn is_managed(&self) -> bool {
        self.formation.is_some() || self.constellation.is_some()
    }

    pub fn shares_group_with(&self, other: &Agent) -> bool {
        let same = |a: Option<GroupId>, b: Option<GroupId>| {
            matches!((a, b), (Some(a), Some(b)) if a == b)
        };
        same(self.formation, other.formation) || same(self.constellation, other.constellation)
    }

    pub fn alignment_velocity(&self) -> Option<Vec2> {
        match self.mobility {
            Mobility::Mobile => Some(self.velocity),
            Mobility::Anchored => None,
        }
    }

    /// Adds an instantaneous impulse. Magnitude is the caller's business.
    pub fn apply_knockback(&mut self, fx: f32, fy: f32) {
        self.knockback += Vec2::new(fx, fy);
    }

    pub fn has_knockback(&self) -> bool {
        self.knockback != Vec2::ZERO
    }
}
