use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

/// Shared per-world state handed to every agent update instead of globals.
#[derive(Debug)]
pub struct SimContext {
    pub rng: ChaCha12Rng,
    pub frame: u64,
    pub elapsed: f32,
    /// Live agents at the start of the current tick.
    pub active_agents: usize,
    /// Suspends the neighbor pass while set.
    pub critical_performance: bool,
    seed: u64,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(seed),
            frame: 0,
            elapsed: 0.0,
            active_agents: 0,
            critical_performance: false,
            seed,
        }
    }

    /// Seeds from the platform entropy source, falling back to a fixed seed.
    pub fn from_entropy() -> Self {
        let seed = match getrandom::u64() {
            Ok(seed) => seed,
            Err(err) => {
                tracing::warn!(%err, "entropy unavailable, using fixed seed");
                0x5eed_cafe
            }
        };
        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn advance(&mut self, dt: f32) {
        self.frame = self.frame.wrapping_add(1);
        self.elapsed += dt;
    }
}
