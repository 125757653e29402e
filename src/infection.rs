//! Infection phase.
//!
//! For every cell and every (bacterium group, targeting virus group) pair with
//! both uninfected hosts and virions present, infections are resolved per host
//! with probability `infection.probability * (1 - resistance)`. Each success
//! turns one uninfected bacterium into an infected record and consumes exactly
//! one virion. Only matched pairs are ever considered, so cross-group contact
//! is a no-op by construction.

use crate::context::{binomial, draw_latent_period, Phase, StepContext};
use crate::particle_store::{Aggregate, ParticleStore};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use simulation_common::{AttemptPolicy, InfectionEvent, SimParams, SimResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfectionOutcome {
    pub contacts: u64,
    pub infections: u64,
    pub events: Vec<InfectionEvent>,
}

/// A bacterium leaving its aggregate to become an infected record.
struct NewInfection {
    group: usize,
    virus_group: usize,
    countdown: u32,
    mass: f64,
}

/// Post-infection contents of a cell that saw at least one infection.
struct CellInfections {
    cell: usize,
    bacteria: Vec<Aggregate>,
    viruses: Vec<u64>,
    infected: Vec<NewInfection>,
}

pub fn run(params: &SimParams, store: &mut ParticleStore, ctx: StepContext) -> SimResult<InfectionOutcome> {
    let num_cells = store.num_cells();
    let store_ref = &*store;

    let per_cell: Vec<(u64, Option<CellInfections>)> = (0..num_cells)
        .into_par_iter()
        .map(|cell| resolve_cell(params, store_ref, ctx, cell))
        .collect();

    // --- Commit in cell order ---
    let mut outcome = InfectionOutcome::default();
    for (contacts, resolved) in per_cell {
        outcome.contacts += contacts;
        let Some(resolved) = resolved else { continue };
        store.set_cell(resolved.cell, &resolved.bacteria, &resolved.viruses);
        for inf in &resolved.infected {
            store.insert_infected(inf.group, inf.virus_group, resolved.cell, inf.countdown, ctx.step, inf.mass);
            outcome.infections += 1;
            match outcome.events.last_mut() {
                Some(e)
                    if e.cell == resolved.cell
                        && e.bacterium_group == inf.group
                        && e.virus_group == inf.virus_group =>
                {
                    e.count += 1
                }
                _ => outcome.events.push(InfectionEvent {
                    cell: resolved.cell,
                    bacterium_group: inf.group,
                    virus_group: inf.virus_group,
                    count: 1,
                }),
            }
        }
    }
    store.rebuild_index();

    debug!(
        "Infection: {} contacts, {} new infections.",
        outcome.contacts, outcome.infections
    );
    Ok(outcome)
}

fn resolve_cell(
    params: &SimParams,
    store: &ParticleStore,
    ctx: StepContext,
    cell: usize,
) -> (u64, Option<CellInfections>) {
    let bacteria_row = store.bacteria_row(cell);
    let virus_row = store.virus_row(cell);
    if bacteria_row.iter().all(|a| a.count == 0) || virus_row.iter().all(|&v| v == 0) {
        return (0, None);
    }

    let mut rng = ctx.rng(Phase::Infection, cell as u64);
    let mut bacteria = bacteria_row.to_vec();
    let mut viruses = virus_row.to_vec();
    let mut infected = Vec::new();
    let mut contacts = 0;

    for group in &params.bacteria {
        for &vg in &group.virus_groups {
            let hosts = bacteria[group.id].count;
            let available = viruses[vg];
            if hosts == 0 || available == 0 {
                continue;
            }
            contacts += 1;

            let p = params.infection_probability_for(group.id);
            let k = match params.attempt_policy {
                AttemptPolicy::Single => binomial(hosts, p, &mut rng).min(available),
                AttemptPolicy::PerVirion => per_virion_infections(hosts, available, p, &mut rng),
            };
            if k == 0 {
                continue;
            }

            let mass = bacteria[group.id].take(k);
            viruses[vg] -= k;
            let latent = &params.viruses[vg].latent_period;
            for _ in 0..k {
                infected.push(NewInfection {
                    group: group.id,
                    virus_group: vg,
                    countdown: draw_latent_period(latent, &mut rng),
                    mass: mass / k as f64,
                });
            }
        }
    }

    if infected.is_empty() {
        return (contacts, None);
    }
    (contacts, Some(CellInfections { cell, bacteria, viruses, infected }))
}

/// Hosts are exposed one at a time to every virion still free in the cell; each
/// is infected with probability `1 - (1 - p)^v` and uses up one virion.
fn per_virion_infections<R: Rng + ?Sized>(hosts: u64, virions: u64, p: f64, rng: &mut R) -> u64 {
    if p >= 1.0 {
        return hosts.min(virions);
    }
    if p <= 0.0 {
        return 0;
    }
    let mut left = virions;
    let mut infected = 0;
    for _ in 0..hosts {
        if left == 0 {
            break;
        }
        let q = 1.0 - (1.0 - p).powf(left as f64);
        if rng.random::<f64>() < q {
            infected += 1;
            left -= 1;
        }
    }
    infected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use simulation_common::SimulationConfig;

    fn params(toml_extra: &str) -> SimParams {
        let text = format!(
            r#"
            [grid]
            dims = [3, 3]
            boundary = "periodic"
            [timing]
            max_steps = 10
            [run]
            seed = 1
            [[bacteria]]
            name = "fast"
            growth_rate = 0.3
            [[bacteria]]
            name = "slow"
            growth_rate = 0.1
            [[viruses]]
            name = "phi"
            target = "fast"
            burst_size = 10
            latent_period = {{ kind = "fixed", steps = 3 }}
            {}
            "#,
            toml_extra
        );
        SimulationConfig::from_toml_str(&text).unwrap().get_sim_params().unwrap()
    }

    #[test]
    fn certain_infection_consumes_one_virion_per_host() {
        let params = params("");
        let mut store = ParticleStore::new(9, 2, 1);
        store.add_bacteria(4, 0, 3, 3.0);
        store.add_viruses(4, 0, 5);

        let outcome = run(&params, &mut store, StepContext::new(1, 2)).unwrap();
        assert_eq!(outcome.contacts, 1);
        assert_eq!(outcome.infections, 3);
        assert_eq!(store.uninfected_at(4, 0).count, 0);
        assert_eq!(store.viruses_at(4, 0), 2);
        let recs = store.infected_at(4, 0);
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.countdown == 3 && r.infected_at == 2 && r.virus_group == 0));
        assert_eq!(
            outcome.events,
            vec![InfectionEvent { cell: 4, bacterium_group: 0, virus_group: 0, count: 3 }]
        );
        store.verify().unwrap();
    }

    #[test]
    fn infections_are_capped_by_virions() {
        let params = params("");
        let mut store = ParticleStore::new(9, 2, 1);
        store.add_bacteria(0, 0, 10, 10.0);
        store.add_viruses(0, 0, 1);
        let outcome = run(&params, &mut store, StepContext::new(1, 1)).unwrap();
        assert_eq!(outcome.infections, 1);
        assert_eq!(store.viruses_at(0, 0), 0);
        assert_eq!(store.uninfected_at(0, 0).count, 9);
        assert!((store.total_biomass() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn unmatched_groups_are_never_infected() {
        let params = params("");
        let mut store = ParticleStore::new(9, 2, 1);
        store.add_bacteria(2, 1, 50, 50.0);
        store.add_viruses(2, 0, 50);
        let outcome = run(&params, &mut store, StepContext::new(5, 1)).unwrap();
        assert_eq!(outcome.contacts, 0);
        assert_eq!(outcome.infections, 0);
        assert!(store.infected().is_empty());
        assert_eq!(store.viruses_at(2, 0), 50);
    }

    #[test]
    fn full_resistance_blocks_infection() {
        let params = params(
            r#"
            [[bacteria]]
            name = "armoured"
            growth_rate = 0.0
            resistance = 1.0
            [[viruses]]
            name = "psi"
            target = "armoured"
            burst_size = 5
            latent_period = { kind = "fixed", steps = 1 }
            "#,
        );
        let mut store = ParticleStore::new(9, 3, 2);
        store.add_bacteria(1, 2, 20, 20.0);
        store.add_viruses(1, 1, 20);
        let outcome = run(&params, &mut store, StepContext::new(5, 1)).unwrap();
        assert_eq!(outcome.contacts, 1);
        assert_eq!(outcome.infections, 0);
    }

    #[test]
    fn per_virion_policy_with_certain_infection() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(per_virion_infections(4, 10, 1.0, &mut rng), 4);
        assert_eq!(per_virion_infections(10, 4, 1.0, &mut rng), 4);
        assert_eq!(per_virion_infections(10, 4, 0.0, &mut rng), 0);
        assert!(per_virion_infections(100, 3, 0.5, &mut rng) <= 3);
    }

    #[test]
    fn per_virion_policy_is_selected_from_config() {
        let params = params("[infection]\nattempts = \"per_virion\"\nprobability = 0.5");
        assert_eq!(params.attempt_policy, AttemptPolicy::PerVirion);
        let mut store = ParticleStore::new(9, 2, 1);
        store.add_bacteria(0, 0, 200, 200.0);
        store.add_viruses(0, 0, 50);
        let outcome = run(&params, &mut store, StepContext::new(8, 1)).unwrap();
        assert!(outcome.infections > 0 && outcome.infections <= 50);
        assert_eq!(store.viruses_at(0, 0) + outcome.infections, 50);
    }
}
