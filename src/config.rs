//! Engine configuration.
//!
//! A plain struct with a `Default` impl, constructed once and threaded by
//! reference through the search, rather than a generic/pluggable config
//! trait, since there is exactly one configuration shape here.

use serde::{Deserialize, Serialize};

pub const VIRTUAL_LOSS_COUNT: i32 = 3;
pub const TT_SIZE: usize = 500_000;
pub const MAX_TREE_SIZE: u64 = 40_000_000;
pub const T_HISTORY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_threads: usize,
    pub max_playouts: u64,
    pub max_nodes: u64,
    pub puct: f32,
    pub softmax_temp: f32,
    pub fpu_reduction: f32,
    pub fpu_dynamic_eval: bool,
    pub noise: bool,
    pub noise_epsilon: f32,
    pub noise_alpha: f32,
    pub randomize: bool,
    pub tempdecay: u32,
    pub slowmover: u32,
    pub timemanage: bool,
    pub resignpct: u32,
    pub min_resign_moves: u32,
    pub rand_eval_maxdiff: f32,
    pub rand_visit_floor: f32,
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_threads: 1,
            max_playouts: u64::MAX,
            max_nodes: MAX_TREE_SIZE,
            puct: 1.4,
            softmax_temp: 1.0,
            fpu_reduction: 0.25,
            fpu_dynamic_eval: false,
            noise: false,
            noise_epsilon: 0.25,
            noise_alpha: 0.3,
            randomize: false,
            tempdecay: 0,
            slowmover: 100,
            timemanage: true,
            resignpct: 0,
            min_resign_moves: 0,
            rand_eval_maxdiff: 0.1,
            rand_visit_floor: 0.1,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Sanity-checks the values a caller could plausibly set from a UCI
    /// front-end; the front-end itself is out of scope, but a library that
    /// accepts external configuration should reject nonsense rather than
    /// panic deep inside a worker thread.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_threads == 0 {
            return Err("num_threads must be >= 1".into());
        }
        if self.max_playouts == 0 {
            return Err("max_playouts must be >= 1".into());
        }
        if self.max_nodes == 0 {
            return Err("max_nodes must be >= 1".into());
        }
        if self.softmax_temp <= 0.0 {
            return Err("softmax_temp must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.fpu_reduction) {
            return Err("fpu_reduction must be in [0, 1]".into());
        }
        if self.rng_seed.is_some() && self.num_threads != 1 {
            // reproducibility requires single-threaded search
            return Err("rng_seed determinism requires num_threads = 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rng_seed_requires_single_thread() {
        let cfg = Config {
            num_threads: 4,
            rng_seed: Some(42),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config {
            puct: 2.0,
            ..Config::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
