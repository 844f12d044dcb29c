use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

/// Frozen copy of the shared random generator.
#[derive(Debug, Clone)]
pub struct RandomStateSnapshot {
    rng: StdRng,
}

impl RandomStateSnapshot {
    pub fn snapshot_random_state(rng: &StdRng) -> RandomStateSnapshot {
        RandomStateSnapshot { rng: rng.clone() }
    }

    /// Puts `rng` back into the captured state. The snapshot stays valid and
    /// can be restored again.
    pub fn restore_random_state(&self, rng: &mut StdRng) {
        *rng = self.rng.clone();
    }
}

pub fn set_random_seed(rng: &mut StdRng, seed: u64, purpose: &str) {
    *rng = StdRng::seed_from_u64(seed);
    info!("{purpose}: Random seed set to: {seed}");
}
