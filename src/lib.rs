//! Spatially explicit bacteria/virus simulation on a lattice.
//!
//! Each timestep runs movement, infection, (nutrient transport,) growth and lysis
//! in that order, driven by [`Simulation`]. Configuration, parameters, snapshots
//! and errors live in `simulation_common`.

pub mod context;
pub mod grid;
pub mod growth;
pub mod infection;
pub mod lysis;
pub mod movement;
pub mod nutrients;
pub mod particle_store;
pub mod simulation;

pub use context::{Phase, StepContext};
pub use grid::{Destination, Grid};
pub use nutrients::NutrientPool;
pub use particle_store::{Aggregate, InfectedBacterium, Occupant, ParticleStore};
pub use simulation::{RunSummary, Simulation, TerminationReason};
