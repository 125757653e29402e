use crate::error::{SimError, SimResult};
use crate::lattice::Coord;
use crate::sim_params::{
    BacteriumGroup, BoundaryPolicy, Kind, LabilityClass, LatentPeriod, NutrientParams, Placement,
    RandomSeeding, SimParams, Transfer, VirusGroup,
};
use crate::tradeoff::{TradeOffConfig, TradeOffRule};
use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// Lattice geometry
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GridConfig {
    pub dims: Vec<u32>,
    /// "periodic", "reflective" or "absorbing". Missing or unknown falls back to reflective.
    #[serde(default)]
    pub boundary: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtinctionRule {
    None,
    Bacteria,
    Viruses,
    Either,
    Both,
}

// Configuration for timing and termination
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub max_steps: u64,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u64,
    #[serde(default = "default_extinction_rule")]
    pub stop_on_extinction: ExtinctionRule,
}

fn default_record_interval() -> u64 {
    1
}

fn default_extinction_rule() -> ExtinctionRule {
    ExtinctionRule::Either
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    pub seed: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct MovementConfig {
    /// Adds "stay in place" as a fifth (2-D) random-walk option.
    #[serde(default)]
    pub allow_rest: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPolicy {
    /// One attempt per bacterium per virus group per timestep.
    #[default]
    Single,
    /// One attempt per co-located virion until the bacterium is infected.
    PerVirion,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InfectionConfig {
    #[serde(default = "default_infection_probability")]
    pub probability: f64,
    #[serde(default)]
    pub attempts: AttemptPolicy,
}

fn default_infection_probability() -> f64 {
    1.0
}

impl Default for InfectionConfig {
    fn default() -> Self {
        Self {
            probability: default_infection_probability(),
            attempts: AttemptPolicy::Single,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct MortalityConfig {
    /// Per-step death probability of an uninfected bacterium.
    #[serde(default)]
    pub linear: f64,
    /// Added per co-located conspecific.
    #[serde(default)]
    pub quadratic: f64,
    /// Per-step removal probability of a free virion.
    #[serde(default)]
    pub virus_decay: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LabilityClassConfig {
    pub name: String,
    pub accessibility: f64,
    #[serde(default)]
    pub initial_mass: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransferConfig {
    pub from: String,
    pub to: String,
    pub rate: f64,
}

// DOM pool; its presence switches the run to extended mode
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NutrientConfig {
    pub classes: Vec<LabilityClassConfig>,
    #[serde(default)]
    pub transfers: Vec<TransferConfig>,
    #[serde(default)]
    pub diffusion: f64,
    pub lysate_fractions: Vec<f64>,
    #[serde(default)]
    pub mortality_fractions: Option<Vec<f64>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TradeOffsConfig {
    #[serde(default)]
    pub growth_resistance: TradeOffConfig,
    #[serde(default)]
    pub uptake_affinity: TradeOffConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BacteriumGroupConfig {
    pub name: String,
    pub growth_rate: f64,
    #[serde(default)]
    pub resistance: f64,
    #[serde(default = "default_one")]
    pub uptake_rate: f64,
    #[serde(default = "default_one")]
    pub affinity: f64,
    #[serde(default = "default_one")]
    pub cell_mass: f64,
    #[serde(default)]
    pub min_accessibility: f64,
    /// Optional explicit pairing; must name a virus group that targets this group.
    #[serde(default)]
    pub virus_group: Option<String>,
}

fn default_one() -> f64 {
    1.0
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatentPeriodConfig {
    Fixed { steps: u32 },
    Poisson { mean: f64 },
    Uniform { min: u32, max: u32 },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VirusGroupConfig {
    pub name: String,
    pub target: String,
    pub burst_size: u32,
    pub latent_period: LatentPeriodConfig,
}

/// Generates `count` paired bacterium/virus groups along the growth/resistance
/// frontier, growth evenly spaced from `growth_max` down to `growth_min`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GroupLadderConfig {
    pub count: u32,
    pub growth_min: f64,
    pub growth_max: f64,
    pub burst_size: u32,
    pub latent_period: LatentPeriodConfig,
    #[serde(default = "default_one")]
    pub uptake_rate: f64,
    #[serde(default = "default_one")]
    pub affinity: f64,
    #[serde(default = "default_one")]
    pub cell_mass: f64,
    #[serde(default = "default_bacteria_prefix")]
    pub bacteria_prefix: String,
    #[serde(default = "default_virus_prefix")]
    pub virus_prefix: String,
}

fn default_bacteria_prefix() -> String {
    "B".to_string()
}

fn default_virus_prefix() -> String {
    "V".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlacementConfig {
    pub kind: Kind,
    pub group: String,
    pub position: Vec<i64>,
    #[serde(default = "default_count")]
    pub count: u64,
}

fn default_count() -> u64 {
    1
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RandomSeedConfig {
    pub kind: Kind,
    pub group: String,
    pub count: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SeedingConfig {
    #[serde(default)]
    pub placements: Vec<PlacementConfig>,
    #[serde(default)]
    pub random: Vec<RandomSeedConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChecksConfig {
    #[serde(default = "default_true")]
    pub verify_invariants: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self { verify_invariants: true }
    }
}

fn default_true() -> bool {
    true
}

// Configuration for output settings, consumed by the driver
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_stats: bool,
    #[serde(default)]
    pub save_final_csv: bool,
    /// Include the per-cell table in every snapshot.
    #[serde(default = "default_true")]
    pub record_cells: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

fn default_base_filename() -> String {
    "phage_lattice".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_filename: default_base_filename(),
            save_stats: true,
            save_final_csv: false,
            record_cells: true,
            format: None,
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub grid: GridConfig,
    pub timing: TimingConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub infection: InfectionConfig,
    #[serde(default)]
    pub mortality: MortalityConfig,
    #[serde(default)]
    pub nutrients: Option<NutrientConfig>,
    #[serde(default)]
    pub tradeoffs: TradeOffsConfig,
    #[serde(default)]
    pub bacteria: Vec<BacteriumGroupConfig>,
    #[serde(default)]
    pub viruses: Vec<VirusGroupConfig>,
    #[serde(default)]
    pub group_ladder: Option<GroupLadderConfig>,
    #[serde(default)]
    pub seeding: SeedingConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        // Resolve once so a bad file fails here rather than at run start.
        config.get_sim_params()?;

        Ok(config)
    }

    /// Parses a configuration from TOML text without validating it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Validates the configuration and converts it into runtime parameters, using
    /// the trade-off shapes named in the `[tradeoffs]` section.
    pub fn get_sim_params(&self) -> SimResult<SimParams> {
        let growth_rule = self.tradeoffs.growth_resistance.build();
        let uptake_rule = self.tradeoffs.uptake_affinity.build();
        self.get_sim_params_with(&growth_rule, &uptake_rule)
    }

    /// Like [`get_sim_params`](Self::get_sim_params) with caller-supplied trade-off rules.
    pub fn get_sim_params_with(
        &self,
        growth_rule: &TradeOffRule,
        uptake_rule: &TradeOffRule,
    ) -> SimResult<SimParams> {
        // --- Grid ---
        if self.grid.dims.is_empty() {
            return Err(SimError::config("grid.dims must have at least one axis"));
        }
        if self.grid.dims.iter().any(|&d| d == 0) {
            return Err(SimError::config("grid.dims entries must be positive"));
        }
        let num_cells = self
            .grid
            .dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
            .ok_or_else(|| SimError::config("grid is too large"))?;
        let boundary = parse_boundary(self.grid.boundary.as_deref());

        // --- Scalars ---
        check_probability("infection.probability", self.infection.probability)?;
        check_probability("mortality.linear", self.mortality.linear)?;
        check_non_negative("mortality.quadratic", self.mortality.quadratic)?;
        check_probability("mortality.virus_decay", self.mortality.virus_decay)?;
        if self.timing.record_interval_steps == 0 {
            return Err(SimError::config("timing.record_interval_steps must be at least 1"));
        }

        let extended = self.nutrients.is_some();

        // --- Groups ---
        let (bacteria_cfg, viruses_cfg) = self.expanded_groups(growth_rule)?;

        let mut bacteria_index: HashMap<&str, usize> = HashMap::new();
        for (i, b) in bacteria_cfg.iter().enumerate() {
            if bacteria_index.insert(b.name.as_str(), i).is_some() {
                return Err(SimError::config(format!("duplicate bacterium group '{}'", b.name)));
            }
        }
        let mut virus_index: HashMap<&str, usize> = HashMap::new();
        for (i, v) in viruses_cfg.iter().enumerate() {
            if virus_index.insert(v.name.as_str(), i).is_some() {
                return Err(SimError::config(format!("duplicate virus group '{}'", v.name)));
            }
        }

        let mut viruses = Vec::with_capacity(viruses_cfg.len());
        for (id, v) in viruses_cfg.iter().enumerate() {
            let target = *bacteria_index.get(v.target.as_str()).ok_or_else(|| {
                SimError::config(format!(
                    "virus group '{}' targets undefined bacterium group '{}'",
                    v.name, v.target
                ))
            })?;
            viruses.push(VirusGroup {
                id,
                name: v.name.clone(),
                target,
                burst_size: v.burst_size,
                latent_period: resolve_latent_period(&v.name, &v.latent_period)?,
            });
        }

        let mut bacteria = Vec::with_capacity(bacteria_cfg.len());
        for (id, b) in bacteria_cfg.iter().enumerate() {
            let ctx = |field: &str| format!("bacterium group '{}': {}", b.name, field);
            check_non_negative(&ctx("growth_rate"), b.growth_rate)?;
            check_probability(&ctx("resistance"), b.resistance)?;
            check_positive(&ctx("cell_mass"), b.cell_mass)?;
            check_probability(&ctx("min_accessibility"), b.min_accessibility)?;
            if extended {
                check_positive(&ctx("uptake_rate"), b.uptake_rate)?;
                check_positive(&ctx("affinity"), b.affinity)?;
            } else {
                check_non_negative(&ctx("uptake_rate"), b.uptake_rate)?;
                check_non_negative(&ctx("affinity"), b.affinity)?;
            }
            growth_rule
                .check(b.growth_rate, b.resistance)
                .map_err(|e| SimError::config(ctx(e.as_str())))?;
            uptake_rule
                .check(b.uptake_rate, b.affinity)
                .map_err(|e| SimError::config(ctx(e.as_str())))?;

            let virus_groups: Vec<usize> =
                viruses.iter().filter(|v| v.target == id).map(|v| v.id).collect();
            if let Some(paired) = &b.virus_group {
                match virus_index.get(paired.as_str()) {
                    Some(&vid) if viruses[vid].target == id => {}
                    Some(_) => {
                        let msg = format!("virus group '{}' does not target this group", paired);
                        return Err(SimError::config(ctx(msg.as_str())));
                    }
                    None => {
                        let msg = format!("undefined virus group '{}'", paired);
                        return Err(SimError::config(ctx(msg.as_str())));
                    }
                }
            }

            bacteria.push(BacteriumGroup {
                id,
                name: b.name.clone(),
                growth_rate: b.growth_rate,
                resistance: b.resistance,
                uptake_rate: b.uptake_rate,
                affinity: b.affinity,
                cell_mass: b.cell_mass,
                min_accessibility: b.min_accessibility,
                virus_groups,
            });
        }

        // --- Nutrients ---
        let nutrients = match &self.nutrients {
            Some(n) => Some(resolve_nutrients(n)?),
            None => None,
        };

        // --- Seeding ---
        let lookup = |kind: Kind, name: &str| -> SimResult<usize> {
            let found = match kind {
                Kind::Bacterium => bacteria_index.get(name),
                Kind::Virus => virus_index.get(name),
            };
            found
                .copied()
                .ok_or_else(|| SimError::config(format!("seeding references unknown {:?} group '{}'", kind, name)))
        };
        let mut placements = Vec::with_capacity(self.seeding.placements.len());
        for p in &self.seeding.placements {
            let position = Coord::new(p.position.clone());
            if !position.in_bounds(&self.grid.dims) {
                return Err(SimError::config(format!(
                    "seeding position {} is outside the grid {:?}",
                    position, self.grid.dims
                )));
            }
            placements.push(Placement {
                kind: p.kind,
                group: lookup(p.kind, &p.group)?,
                position,
                count: p.count,
            });
        }
        let mut random_seeding = Vec::with_capacity(self.seeding.random.len());
        for r in &self.seeding.random {
            random_seeding.push(RandomSeeding {
                kind: r.kind,
                group: lookup(r.kind, &r.group)?,
                count: r.count,
            });
        }

        Ok(SimParams {
            dims: self.grid.dims.clone(),
            boundary,
            num_cells,
            seed: self.run.seed,
            max_steps: self.timing.max_steps,
            record_interval_steps: self.timing.record_interval_steps,
            stop_on_extinction: self.timing.stop_on_extinction,
            verify_invariants: self.checks.verify_invariants,
            record_cells: self.output.record_cells,
            allow_rest: self.movement.allow_rest,
            infection_probability: self.infection.probability,
            attempt_policy: self.infection.attempts,
            mortality_linear: self.mortality.linear,
            mortality_quadratic: self.mortality.quadratic,
            virus_decay: self.mortality.virus_decay,
            bacteria,
            viruses,
            nutrients,
            placements,
            random_seeding,
        })
    }

    /// Explicit groups followed by the ones generated from `group_ladder`.
    fn expanded_groups(
        &self,
        growth_rule: &TradeOffRule,
    ) -> SimResult<(Vec<BacteriumGroupConfig>, Vec<VirusGroupConfig>)> {
        let mut bacteria = self.bacteria.clone();
        let mut viruses = self.viruses.clone();
        let Some(ladder) = &self.group_ladder else {
            return Ok((bacteria, viruses));
        };
        if ladder.count == 0 {
            return Err(SimError::config("group_ladder.count must be at least 1"));
        }
        if ladder.growth_min > ladder.growth_max {
            return Err(SimError::config("group_ladder.growth_min exceeds growth_max"));
        }
        for i in 0..ladder.count {
            let growth_rate = if ladder.count == 1 {
                ladder.growth_max
            } else {
                let t = i as f64 / (ladder.count - 1) as f64;
                ladder.growth_max - t * (ladder.growth_max - ladder.growth_min)
            };
            let resistance = growth_rule.frontier_value(growth_rate, 0.0, 1.0);
            let b_name = format!("{}{}", ladder.bacteria_prefix, i);
            let v_name = format!("{}{}", ladder.virus_prefix, i);
            bacteria.push(BacteriumGroupConfig {
                name: b_name.clone(),
                growth_rate,
                resistance,
                uptake_rate: ladder.uptake_rate,
                affinity: ladder.affinity,
                cell_mass: ladder.cell_mass,
                min_accessibility: 0.0,
                virus_group: Some(v_name.clone()),
            });
            viruses.push(VirusGroupConfig {
                name: v_name,
                target: b_name,
                burst_size: ladder.burst_size,
                latent_period: ladder.latent_period.clone(),
            });
        }
        Ok((bacteria, viruses))
    }
}

/// Maps the configured boundary name to a policy; absent or unknown names fall back to reflective.
pub fn parse_boundary(name: Option<&str>) -> BoundaryPolicy {
    match name.map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if s == "periodic" || s == "wrap" => BoundaryPolicy::Periodic,
        Some(s) if s == "reflective" || s == "reflect" => BoundaryPolicy::Reflective,
        Some(s) if s == "absorbing" || s == "absorb" => BoundaryPolicy::Absorbing,
        Some(other) => {
            warn!("Unknown boundary policy '{}'. Falling back to reflective.", other);
            BoundaryPolicy::Reflective
        }
        None => {
            warn!("No boundary policy configured. Falling back to reflective.");
            BoundaryPolicy::Reflective
        }
    }
}

fn resolve_latent_period(name: &str, cfg: &LatentPeriodConfig) -> SimResult<LatentPeriod> {
    match *cfg {
        LatentPeriodConfig::Fixed { steps } if steps >= 1 => Ok(LatentPeriod::Fixed(steps)),
        LatentPeriodConfig::Poisson { mean } if mean.is_finite() && mean > 0.0 => {
            Ok(LatentPeriod::Poisson { mean })
        }
        LatentPeriodConfig::Uniform { min, max } if min >= 1 && min <= max => {
            Ok(LatentPeriod::Uniform { min, max })
        }
        _ => Err(SimError::config(format!(
            "virus group '{}': latent period must be at least one step ({:?})",
            name, cfg
        ))),
    }
}

fn resolve_nutrients(n: &NutrientConfig) -> SimResult<NutrientParams> {
    if n.classes.is_empty() {
        return Err(SimError::config("nutrients.classes must not be empty"));
    }
    let mut class_index: HashMap<&str, usize> = HashMap::new();
    let mut classes = Vec::with_capacity(n.classes.len());
    for (i, c) in n.classes.iter().enumerate() {
        if class_index.insert(c.name.as_str(), i).is_some() {
            return Err(SimError::config(format!("duplicate lability class '{}'", c.name)));
        }
        check_probability(&format!("lability class '{}': accessibility", c.name), c.accessibility)?;
        check_non_negative(&format!("lability class '{}': initial_mass", c.name), c.initial_mass)?;
        classes.push(LabilityClass {
            name: c.name.clone(),
            accessibility: c.accessibility,
            initial_mass: c.initial_mass,
        });
    }

    let mut transfers = Vec::with_capacity(n.transfers.len());
    let mut outflow = vec![0.0; classes.len()];
    for t in &n.transfers {
        let from = *class_index
            .get(t.from.as_str())
            .ok_or_else(|| SimError::config(format!("transfer from unknown class '{}'", t.from)))?;
        let to = *class_index
            .get(t.to.as_str())
            .ok_or_else(|| SimError::config(format!("transfer to unknown class '{}'", t.to)))?;
        if from == to {
            return Err(SimError::config(format!("transfer from '{}' to itself", t.from)));
        }
        check_probability(&format!("transfer {} -> {}: rate", t.from, t.to), t.rate)?;
        outflow[from] += t.rate;
        transfers.push(Transfer { from, to, rate: t.rate });
    }
    if let Some(i) = outflow.iter().position(|&o| o > 1.0 + 1e-12) {
        return Err(SimError::config(format!(
            "total transfer rate out of class '{}' exceeds 1",
            classes[i].name
        )));
    }

    check_probability("nutrients.diffusion", n.diffusion)?;
    check_fractions("nutrients.lysate_fractions", &n.lysate_fractions, classes.len())?;
    let mortality_fractions = match &n.mortality_fractions {
        Some(f) => {
            check_fractions("nutrients.mortality_fractions", f, classes.len())?;
            f.clone()
        }
        None => n.lysate_fractions.clone(),
    };

    Ok(NutrientParams {
        classes,
        transfers,
        diffusion: n.diffusion,
        lysate_fractions: n.lysate_fractions.clone(),
        mortality_fractions,
    })
}

fn check_fractions(field: &str, fractions: &[f64], len: usize) -> SimResult<()> {
    if fractions.len() != len {
        return Err(SimError::config(format!(
            "{} has {} entries, expected one per lability class ({})",
            field,
            fractions.len(),
            len
        )));
    }
    for &f in fractions {
        check_probability(field, f)?;
    }
    let sum: f64 = fractions.iter().sum();
    if (sum - 1.0).abs() > 1e-9 {
        return Err(SimError::config(format!("{} must sum to 1 (got {})", field, sum)));
    }
    Ok(())
}

fn check_probability(field: &str, value: f64) -> SimResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::config(format!("{} must be within [0, 1] (got {})", field, value)))
    }
}

fn check_non_negative(field: &str, value: f64) -> SimResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::config(format!("{} must be non-negative (got {})", field, value)))
    }
}

fn check_positive(field: &str, value: f64) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::config(format!("{} must be positive (got {})", field, value)))
    }
}
