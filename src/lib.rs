pub mod agent;
pub mod config;
pub mod context;
pub mod environment;
pub mod forces;
pub mod local_forces;
pub mod math;
pub mod movement;
pub mod spatial;
pub mod world;

use glam::Vec2;
use rand::Rng;
use wasm_bindgen::prelude::*;

pub use agent::{Agent, AgentId, FallbackPattern, GroupId, Mobility, MovementIntent};
pub use config::{ConfigError, LocalForceParams, LocalForceParamsPatch, MovementParams, SwarmConfig};
pub use context::SimContext;
pub use environment::AreaField;
pub use forces::{ForceAccumulator, ForceCategory};
pub use local_forces::{LocalForceProducer, LocalForceStrategy};
pub use math::MathMode;
pub use movement::MovementIntegrator;
pub use spatial::{SpatialGrid, SpatialIndex};
pub use world::{TickStats, World};

const DEFAULT_RADIUS: f32 = 10.0;
const DEFAULT_SPEED: f32 = 80.0;

#[wasm_bindgen]
pub struct Sim {
    world: World,
}

#[wasm_bindgen]
impl Sim {
    /// A zero `seed` draws one from the platform entropy source.
    #[wasm_bindgen(constructor)]
    pub fn new(count: usize, seed: u32, width: f32, height: f32) -> Result<Sim, JsError> {
        let mut config = SwarmConfig::default();
        config.world.width = width;
        config.world.height = height;
        let context = if seed == 0 {
            SimContext::from_entropy()
        } else {
            SimContext::new(u64::from(seed))
        };

        let mut world = World::with_context(config, context)?;
        for _ in 0..count {
            let rng = &mut world.context_mut().rng;
            let position = Vec2::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
            world.spawn(position, DEFAULT_RADIUS, DEFAULT_SPEED);
        }
        Ok(Sim { world })
    }

    pub fn step(&mut self, dt: f32) {
        self.world.step(dt);
    }

    pub fn set_bounds(&mut self, width: f32, height: f32) -> Result<(), JsError> {
        self.world.set_bounds(width, height)?;
        Ok(())
    }

    /// Slot count; dead slots are included and flagged by [`Sim::alive`].
    pub fn count(&self) -> usize {
        self.world.slot_count()
    }

    pub fn active_count(&self) -> usize {
        self.world.active_count()
    }

    /// Interleaved `x, y` per slot.
    pub fn positions(&self) -> Vec<f32> {
        self.slots()
            .flat_map(|agent| match agent {
                Some(agent) => [agent.position.x, agent.position.y],
                None => [0.0, 0.0],
            })
            .collect()
    }

    pub fn rotations(&self) -> Vec<f32> {
        self.slots()
            .map(|agent| agent.map_or(0.0, |agent| agent.rotation))
            .collect()
    }

    pub fn alive(&self) -> Vec<u8> {
        self.slots().map(|agent| u8::from(agent.is_some())).collect()
    }

    pub fn spawn(&mut self, x: f32, y: f32, radius: f32, speed: f32) -> u32 {
        self.world.spawn(Vec2::new(x, y), radius, speed).0
    }

    pub fn kill(&mut self, id: u32) -> bool {
        self.world.kill(AgentId(id))
    }

    pub fn despawn(&mut self, id: u32) -> bool {
        self.world.despawn(AgentId(id))
    }

    pub fn set_target_direction(&mut self, id: u32, x: f32, y: f32) -> bool {
        self.world.set_target_direction(AgentId(id), Vec2::new(x, y))
    }

    pub fn clear_target(&mut self, id: u32) -> bool {
        self.world.clear_target(AgentId(id))
    }

    pub fn start_dash(&mut self, id: u32, x: f32, y: f32, speed: f32) -> bool {
        self.world.start_dash(AgentId(id), Vec2::new(x, y), speed)
    }

    pub fn end_dash(&mut self, id: u32) -> bool {
        self.world.end_dash(AgentId(id))
    }

    pub fn apply_knockback(&mut self, id: u32, fx: f32, fy: f32) -> bool {
        self.world.apply_knockback(AgentId(id), fx, fy)
    }

    pub fn set_groups(
        &mut self,
        id: u32,
        formation: Option<u32>,
        constellation: Option<u32>,
    ) -> bool {
        self.world
            .set_groups(AgentId(id), formation.map(GroupId), constellation.map(GroupId))
    }

    pub fn add_field(&mut self, x: f32, y: f32, radius: f32, strength: f32) -> usize {
        self.world.add_field(AreaField {
            position: Vec2::new(x, y),
            radius,
            strength,
        })
    }

    pub fn clear_fields(&mut self) {
        self.world.clear_fields();
    }

    pub fn set_critical_performance(&mut self, enabled: bool) {
        self.world.set_critical_performance(enabled);
    }

    pub fn set_math_mode(&mut self, mode: u32) -> Result<(), JsError> {
        let mut config = *self.world.config();
        config.movement.math_mode = MathMode::from_u32(mode);
        self.world.apply_config(config)?;
        Ok(())
    }

    pub fn math_mode(&self) -> u32 {
        self.world.config().movement.math_mode.as_u32()
    }

    pub fn config_json(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string(self.world.config())?)
    }

    pub fn set_config_json(&mut self, json: &str) -> Result<(), JsError> {
        let config = SwarmConfig::from_json(json)?;
        self.world.apply_config(config)?;
        Ok(())
    }

    /// Partial update of the neighbor-pass tunables, e.g. `{"max_neighbors": 8}`.
    pub fn update_local_params_json(&mut self, json: &str) -> Result<(), JsError> {
        let patch: LocalForceParamsPatch = serde_json::from_str(json)?;
        self.world.update_local_parameters(&patch)?;
        Ok(())
    }

    pub fn frame(&self) -> u64 {
        self.world.context().frame
    }

    pub fn neighbors_examined_last_step(&self) -> usize {
        self.world.last_tick().neighbors_examined
    }

    pub fn critical_performance(&self) -> bool {
        self.world.last_tick().critical_performance
    }
}

impl Sim {
    pub fn world(&self) -> &World {
        &self.world
    }

    fn slots(&self) -> impl Iterator<Item = Option<&Agent>> + '_ {
        (0..self.world.slot_count() as u32).map(|id| self.world.agent(AgentId(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Error paths build a `JsError`, which needs a JS host; only success paths run here.

    #[test]
    fn scatters_agents_inside_bounds() {
        let sim = Sim::new(50, 3, 800.0, 600.0).expect("valid bounds");
        assert_eq!(sim.count(), 50);

        let positions = sim.positions();
        assert_eq!(positions.len(), 100);
        for xy in positions.chunks_exact(2) {
            assert!((0.0..800.0).contains(&xy[0]));
            assert!((0.0..600.0).contains(&xy[1]));
        }
        assert!(sim.alive().iter().all(|&flag| flag == 1));
    }

    #[test]
    fn step_moves_a_steered_agent() {
        let mut sim = Sim::new(0, 1, 800.0, 600.0).expect("valid bounds");
        let id = sim.spawn(400.0, 300.0, 10.0, 60.0);
        assert!(sim.set_target_direction(id, 1.0, 0.0));
        for _ in 0..30 {
            sim.step(1.0 / 60.0);
        }
        assert!(sim.positions()[0] > 400.0);
        assert_eq!(sim.frame(), 30);
        assert!(sim.rotations()[0].abs() < 1.0e-3);
    }

    #[test]
    fn despawned_slot_reads_as_dead() {
        let mut sim = Sim::new(3, 5, 800.0, 600.0).expect("valid bounds");
        assert!(sim.despawn(1));
        assert_eq!(sim.alive(), vec![1, 0, 1]);
        assert_eq!(sim.active_count(), 2);
        assert_eq!(&sim.positions()[2..4], &[0.0, 0.0]);
    }

    #[test]
    fn json_config_round_trips_through_the_facade() {
        let mut sim = Sim::new(10, 9, 800.0, 600.0).expect("valid bounds");
        sim.update_local_params_json(r#"{ "max_neighbors": 5 }"#)
            .expect("valid patch");
        assert_eq!(sim.world().config().local.max_neighbors, 5);

        let json = sim.config_json().expect("serializable");
        sim.set_config_json(&json).expect("own config is valid");
        assert_eq!(sim.world().config().local.max_neighbors, 5);

        sim.set_math_mode(MathMode::Fast.as_u32()).expect("valid mode");
        assert_eq!(sim.math_mode(), MathMode::Fast.as_u32());
    }
}
