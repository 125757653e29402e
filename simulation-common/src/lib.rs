pub mod config;
pub mod error;
pub mod lattice;
pub mod sim_params;
pub mod snapshot;
pub mod tradeoff;

// Re-export key types for easier use by dependent crates
pub use config::{
    AttemptPolicy, ExtinctionRule, GroupLadderConfig, LatentPeriodConfig, NutrientConfig,
    OutputConfig, SimulationConfig,
};
pub use error::{SimError, SimResult};
pub use lattice::{Coord, Direction};
pub use sim_params::{
    BacteriumGroup, BoundaryPolicy, Kind, LabilityClass, LatentPeriod, NutrientParams, SimParams,
    VirusGroup,
};
pub use snapshot::{CellSnapshot, GroupTotals, InfectionEvent, LysisEvent, Snapshot, StepEvents};
pub use tradeoff::{ConstraintMode, TradeOff, TradeOffConfig, TradeOffRule};
