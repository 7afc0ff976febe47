//! Ocean surface simulation.

mod system;

pub use system::OceanSimulation;
