use glam::Vec2;

/// Named buckets a frame's forces are collected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceCategory {
    /// Steering plus separation, alignment and cohesion.
    Local,
    /// Hard-overlap repulsion.
    Collision,
    /// Area fields, world boundaries and stuck escapes.
    External,
}

impl ForceCategory {
    pub const ALL: [ForceCategory; 3] = [Self::Local, Self::Collision, Self::External];

    fn slot(self) -> usize {
        match self {
            Self::Local => 0,
            Self::Collision => 1,
            Self::External => 2,
        }
    }
}

/// Per-agent, per-frame force collector. Reset once per frame, never reallocated.
#[derive(Clone, Debug, Default)]
pub struct ForceAccumulator {
    forces: [Vec2; 3],
}

impl ForceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.forces = [Vec2::ZERO; 3];
    }

    pub fn add_force(&mut self, category: ForceCategory, fx: f32, fy: f32) {
        self.forces[category.slot()] += Vec2::new(fx, fy);
    }

    pub fn add(&mut self, category: ForceCategory, force: Vec2) {
        self.forces[category.slot()] += force;
    }

    pub fn force(&self, category: ForceCategory) -> Vec2 {
        self.forces[category.slot()]
    }

    pub fn net_force(&self) -> Vec2 {
        self.forces.iter().copied().sum()
    }
}
