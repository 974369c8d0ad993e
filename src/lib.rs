pub mod chunker;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod node;
pub mod planes;
pub mod policy_index;
pub mod position;
pub mod search;
pub mod telemetry;
pub mod training;
pub mod tt;
pub mod weights;
