pub mod circuit;

pub use circuit::{CircuitState, LossBreaker};
