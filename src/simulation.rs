use crate::context::{Phase, StepContext};
use crate::grid::Grid;
use crate::nutrients::NutrientPool;
use crate::particle_store::ParticleStore;
use crate::{growth, infection, lysis, movement};
use log::{debug, info, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};
use simulation_common::{
    CellSnapshot, ExtinctionRule, Kind, SimError, SimParams, SimResult, SimulationConfig, Snapshot,
    StepEvents,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Relative tolerance of the per-step DOM mass balance.
const MASS_BALANCE_TOLERANCE: f64 = 1e-9;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    MaxSteps,
    BacteriaExtinct,
    VirusesExtinct,
    /// Both bacteria and viruses are gone.
    AllExtinct,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Timesteps completed.
    pub steps: u64,
    pub reason: TerminationReason,
}

/// Owns the simulation clock and drives the phases of every timestep.
pub struct Simulation {
    /// The configuration the run was built from.
    config: SimulationConfig,
    /// Validated parameters derived from `config`.
    params: SimParams,
    grid: Grid,
    store: ParticleStore,
    /// Present in extended mode only.
    pool: Option<NutrientPool>,
    /// Completed timesteps.
    current_time_step: u64,
    /// Events accumulated since the last recorded snapshot.
    pending_events: StepEvents,
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Validates `config`, seeds the initial population and records the t = 0 snapshot.
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        let params = config.get_sim_params()?;
        Self::from_params(config, params)
    }

    /// Like [`new`](Self::new) with parameters that were already resolved (for
    /// example with custom trade-off rules).
    pub fn from_params(config: SimulationConfig, params: SimParams) -> SimResult<Self> {
        let grid = Grid::from_params(&params)?;
        let store = ParticleStore::new(grid.num_cells(), params.bacteria.len(), params.viruses.len());
        let pool = params
            .nutrients
            .as_ref()
            .map(|n| NutrientPool::new(n, grid.num_cells()));

        let mut sim = Self {
            config,
            params,
            grid,
            store,
            pool,
            current_time_step: 0,
            pending_events: StepEvents::default(),
            recorded_snapshots: Vec::new(),
        };
        sim.seed_population()?;
        sim.verify()?;

        info!(
            "Simulation initialized: {:?} grid ({:?}), {} bacterium groups, {} virus groups, {} mode.",
            sim.params.dims,
            sim.params.boundary,
            sim.params.bacteria.len(),
            sim.params.viruses.len(),
            if sim.params.extended() { "extended" } else { "MVP" }
        );
        info!(
            "Initial population: {} bacteria, {} viruses.",
            sim.store.total_bacteria(),
            sim.store.total_viruses()
        );

        sim.record_snapshot();
        Ok(sim)
    }

    /// Places the configured initial population: explicit placements first, then
    /// uniformly random ones drawn from the seeding stream.
    fn seed_population(&mut self) -> SimResult<()> {
        for p in &self.params.placements {
            let cell = self.grid.cell_at(&p.position).ok_or_else(|| {
                SimError::config(format!("seeding position {} is outside the grid", p.position))
            })?;
            match p.kind {
                Kind::Bacterium => {
                    let mass = p.count as f64 * self.params.bacteria[p.group].cell_mass;
                    self.store.add_bacteria(cell, p.group, p.count, mass);
                }
                Kind::Virus => self.store.add_viruses(cell, p.group, p.count),
            }
        }

        let mut rng = StepContext::new(self.params.seed, 0).rng(Phase::Seeding, 0);
        let num_cells = self.grid.num_cells();
        for r in &self.params.random_seeding {
            for _ in 0..r.count {
                let cell = rng.random_range(0..num_cells);
                match r.kind {
                    Kind::Bacterium => {
                        let mass = self.params.bacteria[r.group].cell_mass;
                        self.store.add_bacteria(cell, r.group, 1, mass);
                    }
                    Kind::Virus => self.store.add_viruses(cell, r.group, 1),
                }
            }
        }
        Ok(())
    }

    /// Advances the simulation by one timestep: movement, infection, nutrient
    /// transport (extended mode), growth, lysis. Returns what happened.
    pub fn step(&mut self) -> SimResult<StepEvents> {
        let ctx = StepContext::new(self.params.seed, self.current_time_step + 1);
        let dom_before = self.pool.as_ref().map(|p| p.total_mass());
        let started = Instant::now();

        // --- 1. Movement ---
        let moved = movement::run(&self.grid, &mut self.store, ctx, self.params.allow_rest)?;

        // --- 2. Infection ---
        let infected = infection::run(&self.params, &mut self.store, ctx)?;

        // --- 3. Nutrient transport ---
        if let Some(pool) = self.pool.as_mut() {
            pool.transport(&self.grid);
        }

        // --- 4. Growth ---
        let grown = growth::run(&self.params, &mut self.store, self.pool.as_mut(), ctx)?;

        // --- 5. Lysis, mortality and decay ---
        let lysed = lysis::run(&self.params, &mut self.store, self.pool.as_mut(), ctx)?;

        self.current_time_step += 1;

        let events = StepEvents {
            contacts: infected.contacts,
            infections: infected.infections,
            infection_events: infected.events,
            births: grown.births,
            deaths: lysed.deaths,
            lysis: lysed.lysis,
            viruses_released: lysed.viruses_released,
            viruses_decayed: lysed.viruses_decayed,
            absorbed_bacteria: moved.absorbed_bacteria,
            absorbed_viruses: moved.absorbed_viruses,
            absorbed_biomass: moved.absorbed_biomass,
            uptake: grown.uptake,
            recycled: lysed.recycled,
        };

        if self.params.verify_invariants {
            self.verify()?;
            if let (Some(before), Some(pool)) = (dom_before, self.pool.as_ref()) {
                check_mass_balance(before, pool.total_mass(), &events)?;
            }
        }

        trace!(
            "Step {} completed in {:.3} ms.",
            self.current_time_step,
            started.elapsed().as_secs_f64() * 1000.0
        );
        debug!(
            "Step {}: {} infections, {} births, {} lysed, {} deaths, {} bacteria, {} viruses.",
            self.current_time_step,
            events.infections,
            events.births,
            events.lysis.len(),
            events.deaths,
            self.store.total_bacteria(),
            self.store.total_viruses()
        );

        self.pending_events.merge(&events);
        let interval = self.params.record_interval_steps.max(1);
        if self.current_time_step % interval == 0 || self.current_time_step >= self.params.max_steps {
            self.record_snapshot();
        }
        Ok(events)
    }

    /// Runs until a terminal condition holds.
    pub fn run(&mut self) -> SimResult<RunSummary> {
        self.run_until_cancelled(&AtomicBool::new(false))
    }

    /// Runs until a terminal condition holds or `cancel` is set. Cancellation is
    /// only observed between timesteps, so the state is always a completed step.
    pub fn run_until_cancelled(&mut self, cancel: &AtomicBool) -> SimResult<RunSummary> {
        info!("Starting simulation loop for up to {} steps...", self.params.max_steps);
        let reason = loop {
            if let Some(reason) = self.terminal_reason() {
                break reason;
            }
            if cancel.load(Ordering::Relaxed) {
                break TerminationReason::Cancelled;
            }
            self.step()?;
        };

        // Always end on a snapshot of the final state.
        if self.recorded_snapshots.last().map(|s| s.step) != Some(self.current_time_step) {
            self.record_snapshot();
        }

        info!("Simulation stopped after {} steps: {:?}.", self.current_time_step, reason);
        Ok(RunSummary {
            steps: self.current_time_step,
            reason,
        })
    }

    /// Terminal condition for the current state, if any.
    pub fn terminal_reason(&self) -> Option<TerminationReason> {
        let no_bacteria = self.store.total_bacteria() == 0;
        // Infected hosts still carry a viral lineage until they burst.
        let no_viruses = self.store.total_viruses() == 0
            && self
                .store
                .infected()
                .iter()
                .all(|rec| self.params.viruses[rec.virus_group].burst_size == 0);
        let extinct = match self.params.stop_on_extinction {
            ExtinctionRule::None => None,
            ExtinctionRule::Bacteria if no_bacteria => Some(TerminationReason::BacteriaExtinct),
            ExtinctionRule::Viruses if no_viruses => Some(TerminationReason::VirusesExtinct),
            ExtinctionRule::Either | ExtinctionRule::Both if no_bacteria && no_viruses => {
                Some(TerminationReason::AllExtinct)
            }
            ExtinctionRule::Either if no_bacteria => Some(TerminationReason::BacteriaExtinct),
            ExtinctionRule::Either if no_viruses => Some(TerminationReason::VirusesExtinct),
            _ => None,
        };
        if extinct.is_some() {
            return extinct;
        }
        if self.current_time_step >= self.params.max_steps {
            return Some(TerminationReason::MaxSteps);
        }
        None
    }

    /// Checks the store and pool invariants.
    pub fn verify(&self) -> SimResult<()> {
        self.store.verify()?;
        if let Some(pool) = &self.pool {
            pool.verify()?;
        }
        Ok(())
    }

    /// Records a snapshot of the current state, carrying the events accumulated since
    /// the previous one.
    pub fn record_snapshot(&mut self) {
        let dom_by_class = self.pool.as_ref().map(|p| p.class_totals()).unwrap_or_default();
        let cells = if self.params.record_cells {
            Some(self.get_results())
        } else {
            None
        };
        let snapshot = Snapshot {
            step: self.current_time_step,
            bacteria: self.store.group_totals(),
            viruses: self.store.virus_totals(),
            dom_by_class,
            cells,
            events: std::mem::take(&mut self.pending_events),
        };
        trace!(
            "Recorded snapshot at step {}: {} bacteria, {} viruses.",
            snapshot.step,
            snapshot.total_bacteria(),
            snapshot.total_viruses()
        );
        self.recorded_snapshots.push(snapshot);
    }

    /// Per-cell population table of the current state.
    pub fn get_results(&self) -> Vec<CellSnapshot> {
        let nb = self.params.bacteria.len();
        (0..self.grid.num_cells())
            .map(|cell| {
                let mut infected = vec![0u64; nb];
                let mut biomass: Vec<f64> = self.store.bacteria_row(cell).iter().map(|a| a.biomass).collect();
                for rec in self.store.infected_in_cell(cell) {
                    infected[rec.group] += 1;
                    biomass[rec.group] += rec.mass;
                }
                CellSnapshot {
                    cell,
                    coord: self.grid.coord_of(cell).0,
                    uninfected: self.store.bacteria_row(cell).iter().map(|a| a.count).collect(),
                    infected,
                    biomass,
                    viruses: self.store.virus_row(cell).to_vec(),
                    dom: self
                        .pool
                        .as_ref()
                        .map(|p| p.cell_masses(cell).to_vec())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    // --- Accessors ---

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn pool(&self) -> Option<&NutrientPool> {
        self.pool.as_ref()
    }

    pub fn current_step(&self) -> u64 {
        self.current_time_step
    }

    /// Bacteria (uninfected and infected) plus free virions.
    pub fn current_particle_count(&self) -> u64 {
        self.store.total_bacteria() + self.store.total_viruses()
    }

    pub fn get_recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }

    /// Hands the recorded snapshots to the caller, leaving the buffer empty.
    pub fn take_snapshots(&mut self) -> Vec<Snapshot> {
        std::mem::take(&mut self.recorded_snapshots)
    }
}

/// `after = before - uptake + recycled`, within a relative tolerance.
fn check_mass_balance(before: f64, after: f64, events: &StepEvents) -> SimResult<()> {
    let expected = before - events.uptake + events.recycled;
    let scale = before.abs().max(after.abs()).max(1.0);
    if (after - expected).abs() > MASS_BALANCE_TOLERANCE * scale {
        return Err(SimError::invariant(format!(
            "DOM mass balance violated: {} before, {} taken up, {} recycled, {} after (expected {})",
            before, events.uptake, events.recycled, after, expected
        )));
    }
    Ok(())
}
