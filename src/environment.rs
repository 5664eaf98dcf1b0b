use glam::Vec2;

use crate::forces::{ForceAccumulator, ForceCategory};
use crate::math::{direction_and_distance, MIN_DISTANCE};

/// Area-effect pull (gravity wells, vortices, lures).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaField {
    pub position: Vec2,
    pub radius: f32,
    pub strength: f32,
}

/// Axis-aligned arena, origin at the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

/// External inputs to the environment step. Either part may be absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct Environment<'a> {
    pub fields: &'a [AreaField],
    pub bounds: Option<Bounds>,
}

impl Environment<'_> {
    pub fn apply(
        &self,
        position: Vec2,
        margin: f32,
        boundary_strength: f32,
        forces: &mut ForceAccumulator,
        dt: f32,
    ) {
        forces.add(ForceCategory::External, self.field_pull(position) * dt);
        if let Some(bounds) = self.bounds {
            forces.add(
                ForceCategory::External,
                boundary_push(bounds, position, margin, boundary_strength) * dt,
            );
        }
    }

    fn field_pull(&self, position: Vec2) -> Vec2 {
        self.fields
            .iter()
            .filter(|field| field.radius > MIN_DISTANCE && field.strength.is_finite())
            .map(|field| {
                let (dir, distance) = direction_and_distance(position, field.position);
                if distance >= field.radius || distance <= MIN_DISTANCE {
                    return Vec2::ZERO;
                }
                dir * field.strength * (1.0 - distance / field.radius)
            })
            .sum()
    }
}

/// Inward push that grows linearly from zero at `margin` to `strength` at the wall.
fn boundary_push(bounds: Bounds, position: Vec2, margin: f32, strength: f32) -> Vec2 {
    if margin <= MIN_DISTANCE {
        return Vec2::ZERO;
    }
    let ramp = |gap: f32| ((margin - gap) / margin).clamp(0.0, 1.0);

    Vec2::new(
        ramp(position.x) - ramp(bounds.width - position.x),
        ramp(position.y) - ramp(bounds.height - position.y),
    ) * strength
}
