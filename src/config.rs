use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::MathMode;

pub const MAX_NEIGHBOR_CAP: usize = 64;
pub const MAX_REFRESH_INTERVAL: u32 = 8;

/// Errors raised when a configuration or parameter update cannot be used.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be finite and positive, got {value}")]
    NotPositive { field: &'static str, value: f32 },
    #[error("{field} must be finite and non-negative, got {value}")]
    Negative { field: &'static str, value: f32 },
    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("neighbor_radius {neighbor} must be at least separation_radius {separation}")]
    NeighborRadiusTooSmall { neighbor: f32, separation: f32 },
    #[error("max_neighbors must be between 1 and {max}, got {0}", max = MAX_NEIGHBOR_CAP)]
    InvalidNeighborCap(usize),
    #[error(
        "local_force_refresh_interval must be between 1 and {max}, got {0}",
        max = MAX_REFRESH_INTERVAL
    )]
    InvalidRefreshInterval(u32),
    #[error("cell_size {cell_size} must be at least neighbor_radius {neighbor_radius}")]
    CellSmallerThanNeighborhood { cell_size: f32, neighbor_radius: f32 },
}

/// Tunables of the neighbor pass. Hot-swappable through [`LocalForceParamsPatch`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalForceParams {
    pub separation_radius: f32,
    pub neighbor_radius: f32,
    pub separation_strength: f32,
    pub collision_strength: f32,
    pub alignment_strength: f32,
    pub cohesion_strength: f32,
    /// Fraction of the combined radii below which two agents count as overlapping.
    pub hard_overlap_ratio: f32,
    pub same_group_separation_scale: f32,
    pub same_group_collision_scale: f32,
    pub max_neighbors: usize,
}

impl Default for LocalForceParams {
    fn default() -> Self {
        Self {
            separation_radius: 33.0,
            neighbor_radius: 60.0,
            separation_strength: 300.0,
            collision_strength: 600.0,
            alignment_strength: 40.0,
            cohesion_strength: 0.8,
            hard_overlap_ratio: 0.9,
            same_group_separation_scale: 0.35,
            same_group_collision_scale: 0.5,
            max_neighbors: 12,
        }
    }
}

impl LocalForceParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("separation_radius", self.separation_radius)?;
        positive("neighbor_radius", self.neighbor_radius)?;
        if self.neighbor_radius < self.separation_radius {
            return Err(ConfigError::NeighborRadiusTooSmall {
                neighbor: self.neighbor_radius,
                separation: self.separation_radius,
            });
        }
        non_negative("separation_strength", self.separation_strength)?;
        non_negative("collision_strength", self.collision_strength)?;
        non_negative("alignment_strength", self.alignment_strength)?;
        non_negative("cohesion_strength", self.cohesion_strength)?;
        in_range("hard_overlap_ratio", self.hard_overlap_ratio, 0.1, 1.0)?;
        // Same-group pairs are dampened, never exempt.
        in_range(
            "same_group_separation_scale",
            self.same_group_separation_scale,
            0.01,
            1.0,
        )?;
        in_range(
            "same_group_collision_scale",
            self.same_group_collision_scale,
            0.01,
            1.0,
        )?;
        if self.max_neighbors == 0 || self.max_neighbors > MAX_NEIGHBOR_CAP {
            return Err(ConfigError::InvalidNeighborCap(self.max_neighbors));
        }
        Ok(())
    }

    /// Returns a copy with `patch` applied, or the first validation failure.
    pub fn patched(&self, patch: &LocalForceParamsPatch) -> Result<Self, ConfigError> {
        let mut next = *self;
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    next.$field = value;
                })*
            };
        }
        take!(
            separation_radius,
            neighbor_radius,
            separation_strength,
            collision_strength,
            alignment_strength,
            cohesion_strength,
            hard_overlap_ratio,
            same_group_separation_scale,
            same_group_collision_scale,
            max_neighbors,
        );
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for [`LocalForceParams`]; absent fields keep their value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalForceParamsPatch {
    pub separation_radius: Option<f32>,
    pub neighbor_radius: Option<f32>,
    pub separation_strength: Option<f32>,
    pub collision_strength: Option<f32>,
    pub alignment_strength: Option<f32>,
    pub cohesion_strength: Option<f32>,
    pub hard_overlap_ratio: Option<f32>,
    pub same_group_separation_scale: Option<f32>,
    pub same_group_collision_scale: Option<f32>,
    pub max_neighbors: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementParams {
    pub steering_gain: f32,
    pub dash_steering_gain: f32,
    /// Exponential velocity damping rate per second.
    pub friction: f32,
    /// Per-frame multiplier applied to knockback velocity.
    pub knockback_drag: f32,
    pub knockback_snap: f32,
    pub min_rotation_speed: f32,
    pub boundary_margin: f32,
    pub boundary_strength: f32,
    pub stuck_check_interval: f32,
    pub stuck_distance: f32,
    pub escape_impulse: f32,
    pub drift_interval: f32,
    pub drift_speed_ratio: f32,
    pub math_mode: MathMode,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            steering_gain: 6.0,
            dash_steering_gain: 20.0,
            friction: 1.0,
            knockback_drag: 0.85,
            knockback_snap: 1.0,
            min_rotation_speed: 5.0,
            boundary_margin: 48.0,
            boundary_strength: 400.0,
            stuck_check_interval: 1.0,
            stuck_distance: 4.0,
            escape_impulse: 120.0,
            drift_interval: 2.0,
            drift_speed_ratio: 0.3,
            math_mode: MathMode::Accurate,
        }
    }
}

impl MovementParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("steering_gain", self.steering_gain)?;
        non_negative("dash_steering_gain", self.dash_steering_gain)?;
        non_negative("friction", self.friction)?;
        in_range("knockback_drag", self.knockback_drag, 0.0, 0.999)?;
        positive("knockback_snap", self.knockback_snap)?;
        non_negative("min_rotation_speed", self.min_rotation_speed)?;
        non_negative("boundary_margin", self.boundary_margin)?;
        non_negative("boundary_strength", self.boundary_strength)?;
        positive("stuck_check_interval", self.stuck_check_interval)?;
        non_negative("stuck_distance", self.stuck_distance)?;
        non_negative("escape_impulse", self.escape_impulse)?;
        positive("drift_interval", self.drift_interval)?;
        in_range("drift_speed_ratio", self.drift_speed_ratio, 0.0, 1.0)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldParams {
    pub width: f32,
    pub height: f32,
    pub cell_size: f32,
    /// Active-agent count above which the neighbor pass is suspended.
    pub critical_agent_threshold: usize,
    pub local_force_refresh_interval: u32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            width: 1_920.0,
            height: 1_080.0,
            cell_size: 64.0,
            critical_agent_threshold: 4_000,
            local_force_refresh_interval: 1,
        }
    }
}

impl WorldParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("width", self.width)?;
        positive("height", self.height)?;
        positive("cell_size", self.cell_size)?;
        if !(1..=MAX_REFRESH_INTERVAL).contains(&self.local_force_refresh_interval) {
            return Err(ConfigError::InvalidRefreshInterval(
                self.local_force_refresh_interval,
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub local: LocalForceParams,
    pub movement: MovementParams,
    pub world: WorldParams,
}

impl SwarmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local.validate()?;
        self.movement.validate()?;
        self.world.validate()?;
        check_cell_covers(&self.world, &self.local)
    }

    /// Parses and validates a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigLoadError> {
        let config: SwarmConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// The neighbor pass only looks at the 3x3 block of cells, so a cell must span
/// the whole neighbor radius.
pub fn check_cell_covers(world: &WorldParams, local: &LocalForceParams) -> Result<(), ConfigError> {
    if world.cell_size < local.neighbor_radius {
        return Err(ConfigError::CellSmallerThanNeighborhood {
            cell_size: world.cell_size,
            neighbor_radius: local.neighbor_radius,
        });
    }
    Ok(())
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn in_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SwarmConfig::default().validate().expect("default config");
    }

    #[test]
    fn patch_replaces_only_named_fields() {
        let base = LocalForceParams::default();
        let patch = LocalForceParamsPatch {
            cohesion_strength: Some(2.5),
            max_neighbors: Some(20),
            ..Default::default()
        };
        let next = base.patched(&patch).expect("valid patch");

        assert_eq!(next.cohesion_strength, 2.5);
        assert_eq!(next.max_neighbors, 20);
        assert_eq!(next.separation_radius, base.separation_radius);
        assert_eq!(next.alignment_strength, base.alignment_strength);
    }

    #[test]
    fn patch_rejects_zeroed_group_scale() {
        let patch = LocalForceParamsPatch {
            same_group_collision_scale: Some(0.0),
            ..Default::default()
        };
        let err = LocalForceParams::default().patched(&patch).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "same_group_collision_scale",
                ..
            }
        ));
    }

    #[test]
    fn neighbor_radius_must_cover_separation() {
        let params = LocalForceParams {
            neighbor_radius: 10.0,
            ..Default::default()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::NeighborRadiusTooSmall {
                neighbor: 10.0,
                separation: 33.0
            })
        );
    }

    #[test]
    fn cell_must_cover_neighbor_radius() {
        let mut config = SwarmConfig::default();
        config.world.cell_size = 40.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CellSmallerThanNeighborhood { .. })
        ));
    }

    #[test]
    fn limit_errors_quote_the_current_limits() {
        assert_eq!(
            ConfigError::InvalidNeighborCap(0).to_string(),
            format!("max_neighbors must be between 1 and {MAX_NEIGHBOR_CAP}, got 0")
        );
        assert!(ConfigError::InvalidRefreshInterval(9)
            .to_string()
            .contains(&format!("between 1 and {MAX_REFRESH_INTERVAL}, got 9")));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = SwarmConfig::from_json(
            r#"{ "local": { "max_neighbors": 8 }, "movement": { "math_mode": "fast" } }"#,
        )
        .expect("parse");

        assert_eq!(config.local.max_neighbors, 8);
        assert_eq!(config.local.separation_radius, 33.0);
        assert_eq!(config.movement.math_mode, MathMode::Fast);
        assert_eq!(config.world, WorldParams::default());
    }

    #[test]
    fn json_rejects_invalid_values() {
        let err = SwarmConfig::from_json(r#"{ "world": { "cell_size": -1.0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));

        let err = SwarmConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse(_)));
    }
}
