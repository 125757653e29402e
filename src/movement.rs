//! Random-walk phase.
//!
//! Every particle takes exactly one step per timestep in a direction drawn
//! uniformly from the lattice directions (plus "rest" when enabled). Aggregated
//! populations are split over the directions with a multinomial draw, which has
//! the same distribution as independent per-individual draws. All destinations are
//! computed against the pre-move state and committed in one pass.

use crate::context::{split_uniform, Phase, StepContext};
use crate::grid::{Destination, Grid};
use crate::particle_store::{Aggregate, ParticleStore};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use simulation_common::{Direction, SimResult};

/// Particles that left the grid during the phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementOutcome {
    pub absorbed_bacteria: u64,
    pub absorbed_viruses: u64,
    pub absorbed_biomass: f64,
}

/// Buffered moves out of one cell.
#[derive(Default)]
struct CellMoves {
    bacteria: Vec<(Destination, usize, u64, f64)>,
    viruses: Vec<(Destination, usize, u64)>,
}

pub fn run(grid: &Grid, store: &mut ParticleStore, ctx: StepContext, allow_rest: bool) -> SimResult<MovementOutcome> {
    let directions = Direction::all(grid.rank(), allow_rest);
    let num_cells = store.num_cells();
    let nb = store.num_bacteria_groups();
    let nv = store.num_virus_groups();

    // --- 1. Draw destinations for aggregated populations (parallel, per cell) ---
    let store_ref = &*store;
    let planned: Vec<CellMoves> = (0..num_cells)
        .into_par_iter()
        .map(|cell| {
            let mut rng = ctx.rng(Phase::Movement, cell as u64);
            let mut moves = CellMoves::default();
            for (group, agg) in store_ref.bacteria_row(cell).iter().enumerate() {
                if agg.count == 0 {
                    continue;
                }
                let mut remaining = *agg;
                let split = split_uniform(agg.count, directions.len(), &mut rng);
                for (&dir, &n) in directions.iter().zip(&split) {
                    if n > 0 {
                        let mass = remaining.take(n);
                        moves.bacteria.push((grid.step(cell, dir), group, n, mass));
                    }
                }
            }
            for (group, &count) in store_ref.virus_row(cell).iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let split = split_uniform(count, directions.len(), &mut rng);
                for (&dir, &n) in directions.iter().zip(&split) {
                    if n > 0 {
                        moves.viruses.push((grid.step(cell, dir), group, n));
                    }
                }
            }
            moves
        })
        .collect();

    // --- 2. Draw one direction per infected individual (parallel, per record) ---
    let infected_moves: Vec<Destination> = store
        .infected()
        .par_iter()
        .map(|rec| {
            let mut rng = ctx.rng(Phase::MovementInfected, rec.id);
            let dir = directions[rng.random_range(0..directions.len())];
            grid.step(rec.cell, dir)
        })
        .collect();

    // --- 3. Commit ---
    let mut outcome = MovementOutcome::default();
    let mut bacteria = vec![Aggregate::default(); num_cells * nb];
    let mut viruses = vec![0u64; num_cells * nv];
    for moves in planned {
        for (dest, group, n, mass) in moves.bacteria {
            match dest {
                Destination::Cell(to) => bacteria[to * nb + group].add(n, mass),
                Destination::Absorbed => {
                    outcome.absorbed_bacteria += n;
                    outcome.absorbed_biomass += mass;
                }
            }
        }
        for (dest, group, n) in moves.viruses {
            match dest {
                Destination::Cell(to) => viruses[to * nv + group] += n,
                Destination::Absorbed => outcome.absorbed_viruses += n,
            }
        }
    }
    store.replace_populations(bacteria, viruses);

    // Absorbed records are flagged with an out-of-range cell, then dropped.
    let mut absorbed_any = false;
    for (rec, dest) in store.infected_mut().iter_mut().zip(&infected_moves) {
        match *dest {
            Destination::Cell(to) => rec.cell = to,
            Destination::Absorbed => {
                rec.cell = num_cells;
                absorbed_any = true;
            }
        }
    }
    if absorbed_any {
        for rec in store.drain_infected(|r| r.cell >= num_cells) {
            outcome.absorbed_bacteria += 1;
            outcome.absorbed_biomass += rec.mass;
        }
    }
    store.rebuild_index();

    debug!(
        "Movement: {} bacteria and {} viruses absorbed at the boundary.",
        outcome.absorbed_bacteria, outcome.absorbed_viruses
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simulation_common::{BoundaryPolicy, Coord};

    #[test]
    fn every_particle_moves_exactly_one_step() {
        let grid = Grid::new(&[10, 10], BoundaryPolicy::Periodic).unwrap();
        let mut store = ParticleStore::new(grid.num_cells(), 1, 1);
        let origin = grid.cell_at(&Coord::xy(5, 5)).unwrap();
        store.add_bacteria(origin, 0, 1000, 1000.0);
        store.add_viruses(origin, 0, 500);

        run(&grid, &mut store, StepContext::new(7, 1), false).unwrap();

        assert_eq!(store.uninfected_at(origin, 0).count, 0);
        assert_eq!(store.viruses_at(origin, 0), 0);
        let neighbours: Vec<usize> = Direction::all(2, false)
            .into_iter()
            .map(|d| match grid.step(origin, d) {
                Destination::Cell(c) => c,
                Destination::Absorbed => unreachable!(),
            })
            .collect();
        let moved_b: u64 = neighbours.iter().map(|&c| store.uninfected_at(c, 0).count).sum();
        let moved_v: u64 = neighbours.iter().map(|&c| store.viruses_at(c, 0)).sum();
        assert_eq!(moved_b, 1000);
        assert_eq!(moved_v, 500);
        assert!((store.total_biomass() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn rest_keeps_some_particles_in_place() {
        let grid = Grid::new(&[5, 5], BoundaryPolicy::Periodic).unwrap();
        let mut store = ParticleStore::new(grid.num_cells(), 1, 1);
        store.add_viruses(12, 0, 5000);
        run(&grid, &mut store, StepContext::new(1, 1), true).unwrap();
        let stayed = store.viruses_at(12, 0);
        assert!(stayed > 800 && stayed < 1200, "stayed = {}", stayed);
        assert_eq!(store.total_viruses(), 5000);
    }

    #[test]
    fn absorbing_boundary_removes_particles() {
        let grid = Grid::new(&[1, 1], BoundaryPolicy::Absorbing).unwrap();
        let mut store = ParticleStore::new(1, 1, 1);
        store.add_bacteria(0, 0, 10, 20.0);
        store.add_viruses(0, 0, 4);
        store.insert_infected(0, 0, 0, 3, 0, 1.5);
        store.rebuild_index();

        let outcome = run(&grid, &mut store, StepContext::new(3, 1), false).unwrap();
        assert_eq!(outcome.absorbed_bacteria, 11);
        assert_eq!(outcome.absorbed_viruses, 4);
        assert!((outcome.absorbed_biomass - 21.5).abs() < 1e-12);
        assert_eq!(store.total_bacteria(), 0);
        assert!(store.infected().is_empty());
        store.verify().unwrap();
    }

    #[test]
    fn infected_records_keep_their_state_while_moving() {
        let grid = Grid::new(&[4, 4], BoundaryPolicy::Reflective).unwrap();
        let mut store = ParticleStore::new(grid.num_cells(), 1, 1);
        let id = store.insert_infected(0, 0, 5, 2, 0, 1.0);
        store.rebuild_index();
        run(&grid, &mut store, StepContext::new(11, 1), false).unwrap();
        let rec = store.infected_by_id(id).unwrap();
        assert_ne!(rec.cell, 5);
        assert_eq!(rec.countdown, 2);
        assert_eq!(store.infected_in_cell(rec.cell).len(), 1);
    }

    #[test]
    fn same_context_gives_same_moves() {
        let grid = Grid::new(&[6, 6], BoundaryPolicy::Periodic).unwrap();
        let seed_store = || {
            let mut s = ParticleStore::new(grid.num_cells(), 2, 1);
            s.add_bacteria(3, 0, 50, 50.0);
            s.add_bacteria(20, 1, 30, 30.0);
            s.add_viruses(7, 0, 40);
            s
        };
        let mut a = seed_store();
        let mut b = seed_store();
        run(&grid, &mut a, StepContext::new(99, 4), false).unwrap();
        run(&grid, &mut b, StepContext::new(99, 4), false).unwrap();
        for cell in 0..grid.num_cells() {
            assert_eq!(a.bacteria_row(cell), b.bacteria_row(cell));
            assert_eq!(a.virus_row(cell), b.virus_row(cell));
        }
    }
}
