//! Neighbor-driven forces: separation, hard collision, alignment and cohesion,
//! gathered in a single walk over the 3x3 cell block around an agent.
//!
//! The walk stops after `max_neighbors` live neighbors have been examined. In a
//! dense clump this ignores agents further along the bucket order; the cap is
//! what bounds the worst-case cost of a tick.

use glam::Vec2;

use crate::agent::{Agent, AgentId};
use crate::config::{ConfigError, LocalForceParams, LocalForceParamsPatch};
use crate::forces::{ForceAccumulator, ForceCategory};
use crate::math::{EPSILON, MIN_DISTANCE};
use crate::spatial::{EntityRef, SpatialIndex};

const GOLDEN_ANGLE: f32 = 2.399_963;

/// Read-only view of the world a neighbor pass runs against.
#[derive(Clone, Copy)]
pub struct Neighborhood<'a> {
    pub index: Option<&'a dyn SpatialIndex>,
    pub agents: &'a [Agent],
    pub critical_performance: bool,
}

impl<'a> Neighborhood<'a> {
    pub fn new(index: &'a dyn SpatialIndex, agents: &'a [Agent]) -> Self {
        Self {
            index: Some(index),
            agents,
            critical_performance: false,
        }
    }

    fn usable_index(&self) -> Option<&'a dyn SpatialIndex> {
        if self.critical_performance {
            return None;
        }
        let index = self.index?;
        let cell_size = index.cell_size();
        (cell_size.is_finite() && cell_size > 0.0).then_some(index)
    }

    fn lookup(&self, id: AgentId) -> Option<&'a Agent> {
        self.agents
            .get(id.index())
            .filter(|agent| agent.id == id && !agent.is_dead)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub skipped: bool,
    /// Live neighbors looked at, bounded by `max_neighbors`.
    pub examined: usize,
    /// Neighbors inside `neighbor_radius`.
    pub contributed: usize,
    pub collisions: usize,
    pub capped: bool,
}

impl TraversalReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassMode {
    Full,
    CollisionOnly,
}

#[derive(Clone, Debug)]
pub struct LocalForceProducer {
    params: LocalForceParams,
}

impl LocalForceProducer {
    pub fn new(params: LocalForceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LocalForceParams {
        &self.params
    }

    /// Applies a partial update. On error the current parameters stay untouched.
    pub fn update_parameters(&mut self, patch: &LocalForceParamsPatch) -> Result<(), ConfigError> {
        self.params = self.params.patched(patch)?;
        Ok(())
    }

    pub fn set_parameters(&mut self, params: LocalForceParams) {
        self.params = params;
    }

    /// Pushes this agent's neighbor forces into `forces`.
    pub fn apply(
        &self,
        agent: &Agent,
        hood: &Neighborhood<'_>,
        forces: &mut ForceAccumulator,
        dt: f32,
    ) -> TraversalReport {
        self.traverse(agent, hood, forces, dt, PassMode::Full)
    }

    fn traverse(
        &self,
        agent: &Agent,
        hood: &Neighborhood<'_>,
        forces: &mut ForceAccumulator,
        dt: f32,
        mode: PassMode,
    ) -> TraversalReport {
        let Some(index) = hood.usable_index() else {
            return TraversalReport::skipped();
        };

        let p = &self.params;
        let managed = agent.is_managed();
        let neighbor_radius_sq = p.neighbor_radius * p.neighbor_radius;
        let (cell_x, cell_y) = index.cell_of(agent.position);

        let mut report = TraversalReport::default();
        let mut separation = Vec2::ZERO;
        let mut align_sum = Vec2::ZERO;
        let mut align_count = 0usize;
        let mut cohesion_sum = Vec2::ZERO;

        'cells: for dy in -1..=1 {
            for dx in -1..=1 {
                let key = index.encode_grid_key(cell_x + dx, cell_y + dy);
                for entity in index.get(key) {
                    let EntityRef::Agent(id) = *entity else {
                        continue;
                    };
                    if id == agent.id {
                        continue;
                    }
                    let Some(other) = hood.lookup(id) else {
                        continue;
                    };

                    report.examined += 1;

                    let offset = agent.position - other.position;
                    let dist_sq = offset.length_squared();
                    if dist_sq <= neighbor_radius_sq && dist_sq.is_finite() {
                        report.contributed += 1;

                        let distance = dist_sq.sqrt();
                        let away = if distance > MIN_DISTANCE {
                            offset / distance.max(MIN_DISTANCE)
                        } else {
                            tie_break_direction(agent.id, other.id)
                        };
                        let same_group = agent.shares_group_with(other);

                        let combined = agent.radius + other.radius;
                        let overlap_at = combined * p.hard_overlap_ratio;
                        if distance < overlap_at && distance > MIN_DISTANCE {
                            let penetration = overlap_at - distance;
                            let scale = if same_group {
                                p.same_group_collision_scale
                            } else {
                                1.0
                            };
                            let magnitude = p.collision_strength
                                * (penetration / combined.max(MIN_DISTANCE))
                                * scale;
                            forces.add(ForceCategory::Collision, away * magnitude * dt);
                            report.collisions += 1;
                        }

                        if mode == PassMode::Full {
                            if distance < p.separation_radius {
                                let proximity = 1.0 - distance / p.separation_radius;
                                let scale = if same_group {
                                    p.same_group_separation_scale
                                } else {
                                    1.0
                                };
                                separation +=
                                    away * proximity * proximity * p.separation_strength * scale;
                            }

                            if let Some(velocity) = other.alignment_velocity() {
                                align_sum += velocity;
                                align_count += 1;
                            }
                            cohesion_sum += other.position;
                        }
                    }

                    if report.examined >= p.max_neighbors {
                        report.capped = true;
                        break 'cells;
                    }
                }
            }
        }

        if mode == PassMode::CollisionOnly {
            return report;
        }

        forces.add(ForceCategory::Local, separation * dt);

        if report.contributed > 0 && !managed {
            if align_count > 0 {
                let average = align_sum / align_count as f32;
                if average.length_squared() > EPSILON {
                    forces.add(
                        ForceCategory::Local,
                        average.normalize() * p.alignment_strength * dt,
                    );
                }
            }

            let centroid = cohesion_sum / report.contributed as f32;
            forces.add(
                ForceCategory::Local,
                (centroid - agent.position) * p.cohesion_strength * dt,
            );
        }

        report
    }
}

/// Deterministic push direction for coincident agents; opposite for each side
/// of the pair.
fn tie_break_direction(a: AgentId, b: AgentId) -> Vec2 {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let angle = (low.0 as f32 + high.0 as f32 * 0.5) * GOLDEN_ANGLE;
    let dir = Vec2::from_angle(angle);
    if a == low {
        -dir
    } else {
        dir
    }
}

/// Runs the producer every frame, or every `refresh_interval` frames with the
/// `Local` contribution replayed in between. Collision is recomputed on every
/// frame either way.
#[derive(Clone, Debug)]
pub struct LocalForceStrategy {
    producer: LocalForceProducer,
    refresh_interval: u32,
    cached_local: Option<(Vec2, f32)>,
}

impl LocalForceStrategy {
    pub fn new(params: LocalForceParams, refresh_interval: u32) -> Self {
        Self {
            producer: LocalForceProducer::new(params),
            refresh_interval: refresh_interval.max(1),
            cached_local: None,
        }
    }

    pub fn producer(&self) -> &LocalForceProducer {
        &self.producer
    }

    pub fn refresh_interval(&self) -> u32 {
        self.refresh_interval
    }

    pub fn set_refresh_interval(&mut self, refresh_interval: u32) {
        self.refresh_interval = refresh_interval.max(1);
        self.cached_local = None;
    }

    pub fn update_parameters(&mut self, patch: &LocalForceParamsPatch) -> Result<(), ConfigError> {
        self.producer.update_parameters(patch)?;
        self.cached_local = None;
        Ok(())
    }

    pub fn set_parameters(&mut self, params: LocalForceParams) {
        self.producer.set_parameters(params);
        self.cached_local = None;
    }

    pub fn apply(
        &mut self,
        agent: &Agent,
        hood: &Neighborhood<'_>,
        frame: u64,
        forces: &mut ForceAccumulator,
        dt: f32,
    ) -> TraversalReport {
        if hood.usable_index().is_none() {
            self.cached_local = None;
            return TraversalReport::skipped();
        }

        let interval = u64::from(self.refresh_interval);
        let due = interval <= 1 || (frame.wrapping_add(u64::from(agent.id.0))) % interval == 0;

        match self.cached_local {
            Some((local, cached_dt)) if !due => {
                if cached_dt > EPSILON {
                    forces.add(ForceCategory::Local, local * (dt / cached_dt));
                }
                self.producer
                    .traverse(agent, hood, forces, dt, PassMode::CollisionOnly)
            }
            _ => {
                let before = forces.force(ForceCategory::Local);
                let report = self.producer.apply(agent, hood, forces, dt);
                if interval > 1 && !report.skipped {
                    self.cached_local = Some((forces.force(ForceCategory::Local) - before, dt));
                }
                report
            }
        }
    }
}
