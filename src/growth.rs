//! Growth phase. Only uninfected aggregates grow; infected records are never
//! touched here.
//!
//! Without a nutrient pool every group grows at its intrinsic rate:
//! `births = stochastic_round(count * r)`, each newborn adding one `cell_mass`.
//!
//! With a nutrient pool, growth is Monod-limited by the accessibility-weighted
//! substrate `S` the group can reach:
//!
//! ```text
//! f = affinity * S / (1 + affinity * S)
//! D = min(r * f * count * cell_mass, uptake_rate * count)
//! ```
//!
//! The demand `D` is drawn from the eligible classes in proportion to their
//! weighted mass, the mass actually taken up becomes biomass, and
//! `births = stochastic_round(uptake / cell_mass)`.

use crate::context::{stochastic_round, Phase, StepContext};
use crate::nutrients::{accessible_substrate, consume_from, NutrientPool};
use crate::particle_store::{Aggregate, ParticleStore};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use simulation_common::{BacteriumGroup, LabilityClass, SimParams, SimResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrowthOutcome {
    pub births: u64,
    /// DOM mass removed from the pool.
    pub uptake: f64,
}

pub fn run(
    params: &SimParams,
    store: &mut ParticleStore,
    pool: Option<&mut NutrientPool>,
    ctx: StepContext,
) -> SimResult<GrowthOutcome> {
    let nb = store.num_bacteria_groups();
    if nb == 0 {
        return Ok(GrowthOutcome::default());
    }
    let groups = &params.bacteria;
    let (bacteria, _) = store.tables_mut();

    // Cells are independent: each worker owns one cell's aggregates and DOM row.
    let per_cell: Vec<(u64, f64)> = match pool {
        Some(pool) => {
            let (classes, mass) = pool.split_mut();
            let nk = classes.len().max(1);
            bacteria
                .par_chunks_mut(nb)
                .zip(mass.par_chunks_mut(nk))
                .enumerate()
                .map(|(cell, (row, dom))| {
                    let mut rng = ctx.rng(Phase::Growth, cell as u64);
                    grow_limited(groups, classes, row, dom, &mut rng)
                })
                .collect()
        }
        None => bacteria
            .par_chunks_mut(nb)
            .enumerate()
            .map(|(cell, row)| {
                let mut rng = ctx.rng(Phase::Growth, cell as u64);
                (grow_unlimited(groups, row, &mut rng), 0.0)
            })
            .collect(),
    };

    let mut outcome = GrowthOutcome::default();
    for (births, uptake) in per_cell {
        outcome.births += births;
        outcome.uptake += uptake;
    }
    debug!("Growth: {} births, {:.4} DOM taken up.", outcome.births, outcome.uptake);
    Ok(outcome)
}

fn grow_unlimited<R: Rng + ?Sized>(groups: &[BacteriumGroup], row: &mut [Aggregate], rng: &mut R) -> u64 {
    let mut births = 0;
    for (group, agg) in groups.iter().zip(row.iter_mut()) {
        if agg.count == 0 {
            continue;
        }
        let n = stochastic_round(agg.count as f64 * group.growth_rate, rng);
        agg.add(n, n as f64 * group.cell_mass);
        births += n;
    }
    births
}

/// Grows one cell's groups in ascending group order against its DOM row.
/// Returns (births, uptake).
fn grow_limited<R: Rng + ?Sized>(
    groups: &[BacteriumGroup],
    classes: &[LabilityClass],
    row: &mut [Aggregate],
    dom: &mut [f64],
    rng: &mut R,
) -> (u64, f64) {
    let mut births = 0;
    let mut uptake = 0.0;
    for (group, agg) in groups.iter().zip(row.iter_mut()) {
        if agg.count == 0 {
            continue;
        }
        let substrate = accessible_substrate(classes, dom, group.min_accessibility);
        if !(substrate > 0.0) {
            continue;
        }
        let limitation = group.affinity * substrate / (1.0 + group.affinity * substrate);
        let mu = group.growth_rate * limitation;
        let count = agg.count as f64;
        let demand = (mu * count * group.cell_mass).min(group.uptake_rate * count);
        if !(demand > 0.0) {
            continue;
        }

        let mut taken = 0.0;
        for (k, class) in classes.iter().enumerate() {
            if class.accessibility < group.min_accessibility {
                continue;
            }
            let share = class.accessibility * dom[k] / substrate;
            taken += consume_from(dom, k, demand * share);
        }

        agg.biomass += taken;
        let n = stochastic_round(taken / group.cell_mass, rng);
        agg.count += n;
        births += n;
        uptake += taken;
    }
    (births, uptake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simulation_common::SimulationConfig;

    const BASE: &str = r#"
        [grid]
        dims = [2, 2]
        boundary = "periodic"
        [timing]
        max_steps = 10
        [run]
        seed = 3
        [[bacteria]]
        name = "b"
        growth_rate = 0.5
        uptake_rate = 0.2
        affinity = 1.0
        cell_mass = 1.0
        [[viruses]]
        name = "v"
        target = "b"
        burst_size = 10
        latent_period = { kind = "fixed", steps = 3 }
    "#;

    fn params(extra: &str) -> SimParams {
        let text = format!("{}\n{}", BASE, extra);
        SimulationConfig::from_toml_str(&text).unwrap().get_sim_params().unwrap()
    }

    #[test]
    fn unlimited_growth_follows_intrinsic_rate() {
        let params = params("");
        let mut store = ParticleStore::new(4, 1, 1);
        store.add_bacteria(0, 0, 10, 10.0);
        let outcome = run(&params, &mut store, None, StepContext::new(1, 1)).unwrap();
        assert_eq!(outcome.births, 5);
        assert_eq!(store.uninfected_at(0, 0), Aggregate { count: 15, biomass: 15.0 });
        assert_eq!(outcome.uptake, 0.0);
    }

    #[test]
    fn infected_bacteria_do_not_grow() {
        let params = params("");
        let mut store = ParticleStore::new(4, 1, 1);
        store.insert_infected(0, 0, 1, 3, 0, 1.0);
        store.rebuild_index();
        let outcome = run(&params, &mut store, None, StepContext::new(1, 1)).unwrap();
        assert_eq!(outcome.births, 0);
        assert_eq!(store.total_bacteria(), 1);
        assert_eq!(store.infected()[0].mass, 1.0);
    }

    #[test]
    fn limited_growth_removes_exactly_the_uptake_from_the_pool() {
        let params = params(
            r#"
            [nutrients]
            lysate_fractions = [1.0, 0.0]
            [[nutrients.classes]]
            name = "labile"
            accessibility = 1.0
            initial_mass = 4.0
            [[nutrients.classes]]
            name = "recalcitrant"
            accessibility = 0.2
            initial_mass = 10.0
            "#,
        );
        let mut pool = NutrientPool::new(params.nutrients.as_ref().unwrap(), 4);
        let mut store = ParticleStore::new(4, 1, 1);
        store.add_bacteria(0, 0, 10, 10.0);
        let before = pool.total_mass();

        let outcome = run(&params, &mut store, Some(&mut pool), StepContext::new(1, 1)).unwrap();

        // S = 4 + 0.2 * 10 = 6, f = 6 / 7, demand = min(0.5 * f * 10, 0.2 * 10) = 2.
        assert!((outcome.uptake - 2.0).abs() < 1e-9);
        assert!((pool.total_mass() - (before - outcome.uptake)).abs() < 1e-9);
        assert!((store.uninfected_at(0, 0).biomass - 12.0).abs() < 1e-9);
        assert_eq!(outcome.births, 2);
        // Split by weighted mass: 4/6 from labile, 2/6 from recalcitrant.
        assert!((pool.cell_masses(0)[0] - (4.0 - 2.0 * 4.0 / 6.0)).abs() < 1e-9);
        assert!((pool.cell_masses(0)[1] - (10.0 - 2.0 * 2.0 / 6.0)).abs() < 1e-9);
        // Cells without bacteria keep their DOM.
        assert_eq!(pool.cell_masses(1), &[4.0, 10.0]);
        pool.verify().unwrap();
    }

    #[test]
    fn inaccessible_classes_are_not_taken_up() {
        let params = params(
            r#"
            [nutrients]
            lysate_fractions = [1.0]
            [[nutrients.classes]]
            name = "recalcitrant"
            accessibility = 0.1
            initial_mass = 100.0
            "#,
        );
        let mut params = params;
        params.bacteria[0].min_accessibility = 0.5;
        let mut pool = NutrientPool::new(params.nutrients.as_ref().unwrap(), 4);
        let mut store = ParticleStore::new(4, 1, 1);
        store.add_bacteria(2, 0, 10, 10.0);
        let outcome = run(&params, &mut store, Some(&mut pool), StepContext::new(1, 1)).unwrap();
        assert_eq!(outcome.births, 0);
        assert_eq!(outcome.uptake, 0.0);
        assert_eq!(pool.total_mass(), 400.0);
    }

    #[test]
    fn empty_pool_stops_growth() {
        let params = params(
            r#"
            [nutrients]
            lysate_fractions = [1.0]
            [[nutrients.classes]]
            name = "labile"
            accessibility = 1.0
            initial_mass = 0.0
            "#,
        );
        let mut pool = NutrientPool::new(params.nutrients.as_ref().unwrap(), 4);
        let mut store = ParticleStore::new(4, 1, 1);
        store.add_bacteria(0, 0, 10, 10.0);
        let outcome = run(&params, &mut store, Some(&mut pool), StepContext::new(1, 1)).unwrap();
        assert_eq!(outcome.births, 0);
        assert_eq!(store.uninfected_at(0, 0).count, 10);
    }
}
