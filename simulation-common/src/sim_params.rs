use crate::config::{AttemptPolicy, ExtinctionRule};
use crate::lattice::Coord;
use serde::{Deserialize, Serialize};

/// How the lattice treats a move that leaves the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    Periodic,
    Reflective,
    Absorbing,
}

/// Particle kind, as used by seeding rules and store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "bacteria", alias = "bacterium")]
    Bacterium,
    #[serde(rename = "viruses", alias = "virus")]
    Virus,
}

/// Latent period of a virus group, in timesteps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LatentPeriod {
    Fixed(u32),
    /// Poisson-distributed around `mean`, never below one step.
    Poisson { mean: f64 },
    /// Uniform on `min..=max`.
    Uniform { min: u32, max: u32 },
}

/// Resolved, validated bacterium functional group. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacteriumGroup {
    pub id: usize,
    pub name: String,
    pub growth_rate: f64,
    pub resistance: f64,
    pub uptake_rate: f64,
    pub affinity: f64,
    /// Organic mass of one individual at birth.
    pub cell_mass: f64,
    /// Lability classes below this accessibility are not taken up.
    pub min_accessibility: f64,
    /// Virus groups whose target is this group, ascending.
    pub virus_groups: Vec<usize>,
}

/// Resolved, validated virus group. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirusGroup {
    pub id: usize,
    pub name: String,
    pub target: usize,
    pub burst_size: u32,
    pub latent_period: LatentPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabilityClass {
    pub name: String,
    pub accessibility: f64,
    pub initial_mass: f64,
}

/// Fixed fraction of a class moved to another class each timestep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Transfer {
    pub from: usize,
    pub to: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutrientParams {
    /// Ordered from most labile to most recalcitrant.
    pub classes: Vec<LabilityClass>,
    pub transfers: Vec<Transfer>,
    pub diffusion: f64,
    pub lysate_fractions: Vec<f64>,
    pub mortality_fractions: Vec<f64>,
}

/// A fixed number of particles placed at one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub kind: Kind,
    pub group: usize,
    pub position: Coord,
    pub count: u64,
}

/// A number of particles scattered uniformly over the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomSeeding {
    pub kind: Kind,
    pub group: usize,
    pub count: u64,
}

/// Simulation parameters derived from the configuration, used by every phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Lattice
    pub dims: Vec<u32>,
    pub boundary: BoundaryPolicy,
    pub num_cells: usize,

    // Run control
    pub seed: u64,
    pub max_steps: u64,
    pub record_interval_steps: u64,
    pub stop_on_extinction: ExtinctionRule,
    pub verify_invariants: bool,
    pub record_cells: bool,

    // Movement
    pub allow_rest: bool,

    // Infection
    pub infection_probability: f64,
    pub attempt_policy: AttemptPolicy,

    // Mortality and decay
    pub mortality_linear: f64,
    pub mortality_quadratic: f64,
    pub virus_decay: f64,

    // Groups
    pub bacteria: Vec<BacteriumGroup>,
    pub viruses: Vec<VirusGroup>,

    /// Present in extended mode only.
    pub nutrients: Option<NutrientParams>,

    // Initial population
    pub placements: Vec<Placement>,
    pub random_seeding: Vec<RandomSeeding>,
}

impl SimParams {
    pub fn extended(&self) -> bool {
        self.nutrients.is_some()
    }

    pub fn num_classes(&self) -> usize {
        self.nutrients.as_ref().map_or(0, |n| n.classes.len())
    }

    /// Per-attempt infection probability against bacteria of `group`.
    pub fn infection_probability_for(&self, group: usize) -> f64 {
        (self.infection_probability * (1.0 - self.bacteria[group].resistance)).clamp(0.0, 1.0)
    }
}
