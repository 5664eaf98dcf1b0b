//! Host for a swarm: agent slots, their integrators, the shared grid and the
//! simulation context. One `step` updates every live agent in slot order and
//! then refreshes grid membership for the next tick.

use glam::Vec2;

use crate::agent::{Agent, AgentId, GroupId, MovementIntent};
use crate::config::{check_cell_covers, ConfigError, LocalForceParamsPatch, SwarmConfig};
use crate::context::SimContext;
use crate::environment::{AreaField, Bounds, Environment};
use crate::movement::MovementIntegrator;
use crate::spatial::{EntityRef, SpatialGrid};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub frame: u64,
    pub active_agents: usize,
    pub neighbors_examined: usize,
    pub capped_traversals: usize,
    pub collisions: usize,
    pub escapes_queued: usize,
    pub critical_performance: bool,
}

#[derive(Debug)]
pub struct World {
    config: SwarmConfig,
    agents: Vec<Agent>,
    integrators: Vec<MovementIntegrator>,
    free_slots: Vec<usize>,
    grid: SpatialGrid,
    fields: Vec<AreaField>,
    context: SimContext,
    force_critical: bool,
    last_tick: TickStats,
}

impl World {
    pub fn new(config: SwarmConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::with_context(config, SimContext::new(seed))
    }

    pub fn with_context(config: SwarmConfig, context: SimContext) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            seed = context.seed(),
            width = config.world.width,
            height = config.world.height,
            cell_size = config.world.cell_size,
            "swarm world created"
        );
        Ok(Self {
            grid: SpatialGrid::new(config.world.cell_size),
            config,
            agents: Vec::new(),
            integrators: Vec::new(),
            free_slots: Vec::new(),
            fields: Vec::new(),
            context,
            force_critical: false,
            last_tick: TickStats::default(),
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn context(&self) -> &SimContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SimContext {
        &mut self.context
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn last_tick(&self) -> TickStats {
        self.last_tick
    }

    /// Number of slots, live or not. Valid ids are `0..slot_count()`.
    pub fn slot_count(&self) -> usize {
        self.agents.len()
    }

    pub fn active_count(&self) -> usize {
        self.agents.iter().filter(|agent| !agent.is_dead).count()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|agent| !agent.is_dead)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.index()).filter(|agent| !agent.is_dead)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id.index()).filter(|agent| !agent.is_dead)
    }

    pub fn integrator(&self, id: AgentId) -> Option<&MovementIntegrator> {
        self.agent(id)?;
        self.integrators.get(id.index())
    }

    /// Allocates a slot, reusing freed ones first, and indexes the new agent.
    pub fn spawn(&mut self, position: Vec2, radius: f32, speed: f32) -> AgentId {
        let slot = self.free_slots.pop().unwrap_or(self.agents.len());
        let id = AgentId(slot as u32);
        let agent = Agent::new(id, position, radius, speed);

        let mut integrator = MovementIntegrator::new(self.config.movement);
        integrator.attach_to_world(
            self.config.local,
            self.config.world.local_force_refresh_interval,
        );

        if slot == self.agents.len() {
            self.agents.push(agent);
            self.integrators.push(integrator);
        } else {
            self.agents[slot] = agent;
            self.integrators[slot] = integrator;
        }
        self.grid.insert(EntityRef::Agent(id), position);
        tracing::debug!(agent = id.0, x = position.x, y = position.y, "agent spawned");
        id
    }

    /// Marks an agent dead. It stops moving immediately and vanishes from
    /// neighbor passes; the slot stays occupied until [`World::despawn`].
    pub fn kill(&mut self, id: AgentId) -> bool {
        match self.agent_mut(id) {
            Some(agent) => {
                agent.is_dead = true;
                true
            }
            None => false,
        }
    }

    pub fn despawn(&mut self, id: AgentId) -> bool {
        let Some(agent) = self.agents.get_mut(id.index()) else {
            return false;
        };
        if self.free_slots.contains(&id.index()) {
            return false;
        }
        agent.is_dead = true;
        self.grid.remove(EntityRef::Agent(id));
        self.free_slots.push(id.index());
        tracing::debug!(agent = id.0, "agent despawned");
        true
    }

    pub fn set_intent(&mut self, id: AgentId, intent: MovementIntent) -> bool {
        self.with_agent(id, |agent| agent.intent = intent)
    }

    pub fn set_target_direction(&mut self, id: AgentId, direction: Vec2) -> bool {
        self.with_agent(id, |agent| agent.intent.set_target_direction(direction))
    }

    pub fn clear_target(&mut self, id: AgentId) -> bool {
        self.with_agent(id, |agent| agent.intent.clear_target())
    }

    pub fn start_dash(&mut self, id: AgentId, direction: Vec2, speed: f32) -> bool {
        self.agent_mut(id)
            .is_some_and(|agent| agent.intent.start_dash(direction, speed))
    }

    pub fn end_dash(&mut self, id: AgentId) -> bool {
        self.with_agent(id, |agent| agent.intent.end_dash())
    }

    pub fn set_groups(
        &mut self,
        id: AgentId,
        formation: Option<GroupId>,
        constellation: Option<GroupId>,
    ) -> bool {
        self.with_agent(id, |agent| {
            agent.formation = formation;
            agent.constellation = constellation;
        })
    }

    pub fn apply_knockback(&mut self, id: AgentId, fx: f32, fy: f32) -> bool {
        self.with_agent(id, |agent| agent.apply_knockback(fx, fy))
    }

    pub fn add_field(&mut self, field: AreaField) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    /// Non-agent entities sharing the grid, e.g. pickups.
    pub fn insert_prop(&mut self, prop: u32, position: Vec2) {
        self.grid.insert(EntityRef::Prop(prop), position);
    }

    pub fn remove_prop(&mut self, prop: u32) -> bool {
        self.grid.remove(EntityRef::Prop(prop))
    }

    pub fn set_bounds(&mut self, width: f32, height: f32) -> Result<(), ConfigError> {
        let mut next = self.config;
        next.world.width = width;
        next.world.height = height;
        self.apply_config(next)
    }

    pub fn set_critical_performance(&mut self, enabled: bool) {
        self.force_critical = enabled;
    }

    /// Swaps the whole configuration. Invalid configurations are rejected and
    /// the current one stays in force.
    pub fn apply_config(&mut self, config: SwarmConfig) -> Result<(), ConfigError> {
        if let Err(err) = config.validate() {
            tracing::warn!(%err, "rejected swarm config");
            return Err(err);
        }

        let refresh_interval = config.world.local_force_refresh_interval;
        for integrator in &mut self.integrators {
            integrator.set_params(config.movement);
            integrator.set_local_parameters(config.local, refresh_interval);
        }
        if config.world.cell_size != self.config.world.cell_size {
            self.grid.set_cell_size(config.world.cell_size);
            self.grid.rebuild_agents(&self.agents);
        }
        self.config = config;
        tracing::info!(
            cell_size = config.world.cell_size,
            max_neighbors = config.local.max_neighbors,
            "swarm config applied"
        );
        Ok(())
    }

    /// Hot-swaps a subset of the neighbor-pass tunables on every agent.
    pub fn update_local_parameters(
        &mut self,
        patch: &LocalForceParamsPatch,
    ) -> Result<(), ConfigError> {
        let checked = self
            .config
            .local
            .patched(patch)
            .and_then(|local| check_cell_covers(&self.config.world, &local).map(|_| local));
        let local = match checked {
            Ok(local) => local,
            Err(err) => {
                tracing::warn!(%err, "rejected local force parameters");
                return Err(err);
            }
        };

        for integrator in &mut self.integrators {
            integrator.set_local_parameters(local, self.config.world.local_force_refresh_interval);
        }
        self.config.local = local;
        Ok(())
    }

    pub fn step(&mut self, dt: f32) -> TickStats {
        let active = self.active_count();
        let critical = self.force_critical || active > self.config.world.critical_agent_threshold;
        if critical != self.context.critical_performance {
            tracing::info!(active, critical, "critical performance mode changed");
        }
        self.context.active_agents = active;
        self.context.critical_performance = critical;

        let mut stats = TickStats {
            frame: self.context.frame,
            active_agents: active,
            critical_performance: critical,
            ..TickStats::default()
        };

        let env = Environment {
            fields: &self.fields,
            bounds: Some(Bounds {
                width: self.config.world.width,
                height: self.config.world.height,
            }),
        };
        for (index, integrator) in self.integrators.iter_mut().enumerate() {
            let update = integrator.update(
                index,
                &mut self.agents,
                Some(&self.grid),
                &env,
                &mut self.context,
                dt,
            );
            stats.neighbors_examined += update.traversal.examined;
            stats.collisions += update.traversal.collisions;
            stats.capped_traversals += usize::from(update.traversal.capped);
            stats.escapes_queued += usize::from(update.escape_queued);
        }

        self.grid.rebuild_agents(&self.agents);
        self.context.advance(dt);

        tracing::trace!(
            frame = stats.frame,
            active = stats.active_agents,
            examined = stats.neighbors_examined,
            capped = stats.capped_traversals,
            collisions = stats.collisions,
            escapes = stats.escapes_queued,
            "tick"
        );
        self.last_tick = stats;
        stats
    }

    fn with_agent(&mut self, id: AgentId, f: impl FnOnce(&mut Agent)) -> bool {
        match self.agent_mut(id) {
            Some(agent) => {
                f(agent);
                true
            }
            None => false,
        }
    }
}
