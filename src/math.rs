use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Floor applied to every distance before it is used as a divisor.
pub const MIN_DISTANCE: f32 = 1.0e-3;
pub const EPSILON: f32 = 1.0e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathMode {
    #[default]
    Accurate,
    Fast,
}

impl MathMode {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Fast,
            _ => Self::Accurate,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Accurate => 0,
            Self::Fast => 1,
        }
    }
}

/// Rescales `v` to `magnitude`, or returns zero when `v` is degenerate.
pub fn normalize_to_magnitude(mode: MathMode, v: Vec2, magnitude: f32) -> Vec2 {
    let mag_sq = v.length_squared();
    if mag_sq <= EPSILON || !mag_sq.is_finite() {
        return Vec2::ZERO;
    }

    v * (magnitude * inverse_sqrt(mode, mag_sq))
}

pub fn limit_magnitude(mode: MathMode, v: Vec2, max_magnitude: f32) -> Vec2 {
    if max_magnitude <= 0.0 {
        return Vec2::ZERO;
    }

    let mag_sq = v.length_squared();
    if mag_sq <= max_magnitude * max_magnitude {
        return v;
    }

    let limited = v * (max_magnitude * inverse_sqrt(mode, mag_sq));
    // The fast path can overshoot by a hair; never hand back more than asked for.
    if limited.length_squared() > max_magnitude * max_magnitude {
        limited * (max_magnitude / limited.length())
    } else {
        limited
    }
}

/// Unit vector from `from` towards `to` plus the guarded distance between them.
pub fn direction_and_distance(from: Vec2, to: Vec2) -> (Vec2, f32) {
    let delta = to - from;
    let distance = delta.length();
    let guarded = distance.max(MIN_DISTANCE);
    (delta / guarded, distance)
}

pub fn is_finite(v: Vec2) -> bool {
    v.x.is_finite() && v.y.is_finite()
}

fn inverse_sqrt(mode: MathMode, value: f32) -> f32 {
    match mode {
        MathMode::Accurate => 1.0 / value.sqrt(),
        MathMode::Fast => fast_inverse_sqrt(value),
    }
}

// One Newton-Raphson refinement keeps this fast while staying stable enough
// for steering vectors where small precision drift is acceptable.
fn fast_inverse_sqrt(value: f32) -> f32 {
    let half = 0.5 * value;
    let mut i = value.to_bits();
    i = 0x5f37_59df_u32.wrapping_sub(i >> 1);
    let mut y = f32::from_bits(i);
    y *= 1.5 - half * y * y;
    y.max(0.0)
}
