use std::collections::HashMap;

use glam::Vec2;

use crate::agent::{Agent, AgentId};

const MIN_CELL_SIZE: f32 = 1.0e-3;

/// Packed cell coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridKey(pub u64);

/// Anything stored in the index. Props share the grid with agents but never
/// take part in local forces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Agent(AgentId),
    Prop(u32),
}

/// Read-only view of a uniform cell index used by the neighbor pass.
pub trait SpatialIndex {
    fn cell_size(&self) -> f32;

    fn encode_grid_key(&self, cell_x: i32, cell_y: i32) -> GridKey {
        encode_grid_key(cell_x, cell_y)
    }

    /// Entities bucketed under `key`; empty when the cell is unoccupied.
    fn get(&self, key: GridKey) -> &[EntityRef];

    fn cell_of(&self, position: Vec2) -> (i32, i32) {
        let size = self.cell_size();
        (
            (position.x / size).floor() as i32,
            (position.y / size).floor() as i32,
        )
    }
}

pub fn encode_grid_key(cell_x: i32, cell_y: i32) -> GridKey {
    GridKey(((cell_x as u32 as u64) << 32) | cell_y as u32 as u64)
}

/// Hashed uniform grid. Unbounded, so agents pushed outside the arena keep
/// their neighbors.
#[derive(Debug, Default)]
pub struct SpatialGrid {
    cell_size: f32,
    buckets: HashMap<GridKey, Vec<EntityRef>>,
    /// Bucket and last indexed position of every entity.
    locations: HashMap<EntityRef, (GridKey, Vec2)>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: sanitize_cell_size(cell_size),
            buckets: HashMap::new(),
            locations: HashMap::new(),
        }
    }

    /// Re-buckets every entity, props included, at its last indexed position.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        let cell_size = sanitize_cell_size(cell_size);
        if cell_size == self.cell_size {
            return;
        }

        let mut entries: Vec<(EntityRef, Vec2)> = self
            .locations
            .iter()
            .map(|(entity, &(_, position))| (*entity, position))
            .collect();
        // Bucket order feeds the capped neighbor walk; keep it independent of hashing.
        entries.sort_unstable_by_key(|&(entity, _)| entity);

        self.cell_size = cell_size;
        self.clear();
        for (entity, position) in entries {
            self.insert(entity, position);
        }
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.locations.clear();
    }

    pub fn position_of(&self, entity: EntityRef) -> Option<Vec2> {
        self.locations.get(&entity).map(|&(_, position)| position)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        self.locations.contains_key(&entity)
    }

    /// Places `entity` at `position`, moving it out of any previous bucket.
    pub fn insert(&mut self, entity: EntityRef, position: Vec2) {
        let (cx, cy) = self.cell_of(position);
        let key = encode_grid_key(cx, cy);
        match self.locations.insert(entity, (key, position)) {
            Some((previous, _)) if previous == key => return,
            Some((previous, _)) => self.detach(entity, previous),
            None => {}
        }
        self.buckets.entry(key).or_default().push(entity);
    }

    pub fn remove(&mut self, entity: EntityRef) -> bool {
        match self.locations.remove(&entity) {
            Some((key, _)) => {
                self.detach(entity, key);
                true
            }
            None => false,
        }
    }

    /// Moves an already indexed entity; returns whether its cell changed.
    pub fn relocate(&mut self, entity: EntityRef, position: Vec2) -> bool {
        let (cx, cy) = self.cell_of(position);
        let key = encode_grid_key(cx, cy);
        if let Some(entry) = self.locations.get_mut(&entity) {
            if entry.0 == key {
                entry.1 = position;
                return false;
            }
        }
        self.insert(entity, position);
        true
    }

    /// Re-buckets every live agent; dead agents are dropped from the index.
    /// Props are left where they are.
    pub fn rebuild_agents(&mut self, agents: &[Agent]) {
        for agent in agents {
            let entity = EntityRef::Agent(agent.id);
            if agent.is_dead {
                self.remove(entity);
            } else {
                self.relocate(entity, agent.position);
            }
        }
    }

    fn detach(&mut self, entity: EntityRef, key: GridKey) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            if let Some(slot) = bucket.iter().position(|e| *e == entity) {
                bucket.swap_remove(slot);
            }
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

impl SpatialIndex for SpatialGrid {
    fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn get(&self, key: GridKey) -> &[EntityRef] {
        self.buckets.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn sanitize_cell_size(cell_size: f32) -> f32 {
    if cell_size.is_finite() {
        cell_size.max(MIN_CELL_SIZE)
    } else {
        MIN_CELL_SIZE
    }
}
