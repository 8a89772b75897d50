use rand::{rngs::StdRng, Rng, SeedableRng};

/// RandMode controls random generator behaviour. May be predictable for testing or truly random for gameplay
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandMode {
    Predictable,
    RandomUniform,
}

pub struct ScriptRand {
    rng: StdRng,
    rand_mode: RandMode,
}

impl ScriptRand {
    pub fn new_uniform() -> ScriptRand {
        ScriptRand {
            rng: StdRng::from_entropy(),
            rand_mode: RandMode::RandomUniform,
        }
    }

    pub fn new_predictable(seed: u64) -> ScriptRand {
        ScriptRand {
            rng: StdRng::seed_from_u64(seed),
            rand_mode: RandMode::Predictable,
        }
    }

    pub fn from_seed(seed: Option<u64>) -> ScriptRand {
        match seed {
            Some(seed) => ScriptRand::new_predictable(seed),
            None => ScriptRand::new_uniform(),
        }
    }

    pub fn mode(&self) -> RandMode {
        self.rand_mode
    }

    /// Inclusive range; callers guarantee `low <= high`
    pub fn range(&mut self, low: i64, high: i64) -> i64 {
        self.rng.gen_range(low..=high)
    }
}
