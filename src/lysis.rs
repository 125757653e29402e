//! Lysis phase: infection timers, bursts, and the two background loss processes
//! (mortality of uninfected bacteria and decay of free virions).
//!
//! Each infected record runs `Infected(n) -> Infected(n - 1) -> ... -> Infected(0)
//! -> Lysed`. A record is not advanced in the timestep it was infected, so it
//! bursts exactly `latent_period` timesteps after infection. Decay only applies to
//! virions that were free before this phase; progeny released here are spared
//! until the next timestep.

use crate::context::{binomial, Phase, StepContext};
use crate::nutrients::NutrientPool;
use crate::particle_store::ParticleStore;
use log::debug;
use rayon::prelude::*;
use simulation_common::{LysisEvent, SimError, SimParams, SimResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LysisOutcome {
    pub lysis: Vec<LysisEvent>,
    pub viruses_released: u64,
    pub viruses_decayed: u64,
    pub deaths: u64,
    /// Mass deposited into the DOM pool by bursts and deaths.
    pub recycled: f64,
}

/// Background losses drawn for one cell.
struct CellLosses {
    cell: usize,
    deaths: Vec<u64>,
    decayed: Vec<u64>,
}

pub fn run(
    params: &SimParams,
    store: &mut ParticleStore,
    mut pool: Option<&mut NutrientPool>,
    ctx: StepContext,
) -> SimResult<LysisOutcome> {
    let mut outcome = LysisOutcome::default();

    // --- 1. Advance timers ---
    for rec in store.infected_mut().iter_mut() {
        if rec.infected_at == ctx.step {
            continue;
        }
        let id = rec.id;
        rec.countdown = rec.countdown.checked_sub(1).ok_or_else(|| {
            SimError::invariant(format!(
                "infected bacterium {} was advanced past lysis (countdown already 0)",
                id
            ))
        })?;
    }

    // --- 2. Collect expired records ---
    let bursting = store.drain_infected(|r| r.countdown == 0);

    // --- 3. Mortality and decay (parallel draws against pre-burst state) ---
    let store_ref = &*store;
    let losses: Vec<CellLosses> = (0..store.num_cells())
        .into_par_iter()
        .filter_map(|cell| draw_losses(params, store_ref, ctx, cell))
        .collect();

    let mortality_fractions = params.nutrients.as_ref().map(|n| n.mortality_fractions.as_slice());
    for loss in losses {
        for (group, &n) in loss.deaths.iter().enumerate() {
            if n == 0 {
                continue;
            }
            let mass = store.remove_bacteria(loss.cell, group, n)?;
            outcome.deaths += n;
            if let (Some(pool), Some(fractions)) = (pool.as_deref_mut(), mortality_fractions) {
                outcome.recycled += pool.deposit_split(loss.cell, fractions, mass);
            }
        }
        for (group, &n) in loss.decayed.iter().enumerate() {
            if n > 0 {
                store.remove_viruses(loss.cell, group, n)?;
                outcome.viruses_decayed += n;
            }
        }
    }

    // --- 4. Bursts ---
    let lysate_fractions = params.nutrients.as_ref().map(|n| n.lysate_fractions.as_slice());
    for rec in bursting {
        let virus = params.viruses.get(rec.virus_group).ok_or_else(|| {
            SimError::invariant(format!(
                "infected bacterium {} references unknown virus group {}",
                rec.id, rec.virus_group
            ))
        })?;
        store.add_viruses(rec.cell, rec.virus_group, virus.burst_size as u64);
        outcome.viruses_released += virus.burst_size as u64;

        let deposited = match (pool.as_deref_mut(), lysate_fractions) {
            (Some(pool), Some(fractions)) => pool.deposit_split(rec.cell, fractions, rec.mass),
            _ => 0.0,
        };
        outcome.recycled += deposited;
        outcome.lysis.push(LysisEvent {
            bacterium_id: rec.id,
            cell: rec.cell,
            bacterium_group: rec.group,
            virus_group: rec.virus_group,
            infected_at: rec.infected_at,
            burst_size: virus.burst_size,
            mass: deposited,
        });
    }
    store.rebuild_index();

    debug!(
        "Lysis: {} bursts releasing {} virions, {} deaths, {} virions decayed, {:.4} mass recycled.",
        outcome.lysis.len(),
        outcome.viruses_released,
        outcome.deaths,
        outcome.viruses_decayed,
        outcome.recycled
    );
    Ok(outcome)
}

fn draw_losses(params: &SimParams, store: &ParticleStore, ctx: StepContext, cell: usize) -> Option<CellLosses> {
    let mut deaths = vec![0u64; store.num_bacteria_groups()];
    let mut decayed = vec![0u64; store.num_virus_groups()];
    let mut any = false;

    if params.mortality_linear > 0.0 || params.mortality_quadratic > 0.0 {
        let mut rng = ctx.rng(Phase::Mortality, cell as u64);
        for (group, agg) in store.bacteria_row(cell).iter().enumerate() {
            if agg.count == 0 {
                continue;
            }
            let p = (params.mortality_linear + params.mortality_quadratic * agg.count as f64).clamp(0.0, 1.0);
            deaths[group] = binomial(agg.count, p, &mut rng);
            any |= deaths[group] > 0;
        }
    }

    if params.virus_decay > 0.0 {
        let mut rng = ctx.rng(Phase::Decay, cell as u64);
        for (group, &count) in store.virus_row(cell).iter().enumerate() {
            decayed[group] = binomial(count, params.virus_decay, &mut rng);
            any |= decayed[group] > 0;
        }
    }

    any.then_some(CellLosses { cell, deaths, decayed })
}
