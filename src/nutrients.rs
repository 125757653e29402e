use crate::grid::Grid;
use rayon::prelude::*;
use simulation_common::sim_params::Transfer;
use simulation_common::{Direction, LabilityClass, NutrientParams, SimError, SimResult};

/// Per-cell, per-lability-class DOM mass ledger.
///
/// Masses are stored cell-major (`cell * num_classes + class`). The only ways mass
/// enters or leaves the pool are [`consume`](Self::consume) and the `deposit`
/// methods; [`transport`](Self::transport) moves mass between cells and classes
/// without changing the total.
#[derive(Debug, Clone)]
pub struct NutrientPool {
    classes: Vec<LabilityClass>,
    transfers: Vec<Transfer>,
    diffusion: f64,
    num_cells: usize,
    mass: Vec<f64>,
}

impl NutrientPool {
    pub fn new(params: &NutrientParams, num_cells: usize) -> Self {
        let initial: Vec<f64> = params.classes.iter().map(|c| c.initial_mass).collect();
        let mut mass = Vec::with_capacity(num_cells * initial.len());
        for _ in 0..num_cells {
            mass.extend_from_slice(&initial);
        }
        Self {
            classes: params.classes.clone(),
            transfers: params.transfers.clone(),
            diffusion: params.diffusion,
            num_cells,
            mass,
        }
    }

    pub fn classes(&self) -> &[LabilityClass] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    #[inline(always)]
    fn idx(&self, cell: usize, class: usize) -> usize {
        cell * self.classes.len() + class
    }

    pub fn cell_masses(&self, cell: usize) -> &[f64] {
        let start = cell * self.classes.len();
        &self.mass[start..start + self.classes.len()]
    }

    /// Mass in classes at least as accessible as `threshold`.
    pub fn available_mass(&self, cell: usize, threshold: f64) -> f64 {
        self.cell_masses(cell)
            .iter()
            .zip(&self.classes)
            .filter(|(_, c)| c.accessibility >= threshold)
            .map(|(m, _)| *m)
            .sum()
    }

    /// Accessibility-weighted substrate seen by a group with the given threshold.
    pub fn accessible_substrate(&self, cell: usize, threshold: f64) -> f64 {
        accessible_substrate(&self.classes, self.cell_masses(cell), threshold)
    }

    /// Removes up to `quantity` from one class and returns what was actually removed.
    pub fn consume(&mut self, cell: usize, class: usize, quantity: f64) -> f64 {
        let start = self.idx(cell, 0);
        let n = self.classes.len();
        consume_from(&mut self.mass[start..start + n], class, quantity)
    }

    pub fn deposit(&mut self, cell: usize, class: usize, quantity: f64) {
        if quantity.is_finite() && quantity > 0.0 {
            let idx = self.idx(cell, class);
            self.mass[idx] += quantity;
        }
    }

    /// Deposits `quantity` split across classes by `fractions`. Returns the mass added.
    pub fn deposit_split(&mut self, cell: usize, fractions: &[f64], quantity: f64) -> f64 {
        if !(quantity.is_finite() && quantity > 0.0) {
            return 0.0;
        }
        let mut added = 0.0;
        for (class, &f) in fractions.iter().enumerate().take(self.classes.len()) {
            let part = quantity * f;
            self.deposit(cell, class, part);
            if part > 0.0 {
                added += part;
            }
        }
        added
    }

    /// Class table and the raw cell-major mass table, for phases that update cells in parallel.
    pub(crate) fn split_mut(&mut self) -> (&[LabilityClass], &mut [f64]) {
        (&self.classes, &mut self.mass)
    }

    pub fn class_totals(&self) -> Vec<f64> {
        let n = self.classes.len();
        let mut totals = vec![0.0; n];
        if n == 0 {
            return totals;
        }
        for row in self.mass.chunks(n) {
            for (t, m) in totals.iter_mut().zip(row) {
                *t += m;
            }
        }
        totals
    }

    pub fn total_mass(&self) -> f64 {
        self.mass.iter().sum()
    }

    /// Applies the configured class transfers, then diffusion. Both conserve mass.
    pub fn transport(&mut self, grid: &Grid) {
        let n = self.classes.len();
        if n == 0 {
            return;
        }
        if !self.transfers.is_empty() {
            let transfers = &self.transfers;
            self.mass.par_chunks_mut(n).for_each(|row| apply_transfers(row, transfers));
        }
        if self.diffusion > 0.0 {
            self.diffuse(grid);
        }
    }

    /// Each cell keeps `1 - d` of every class and sends `d / (2 * rank)` to each
    /// neighbour. Edges mirror back, so nothing leaves the grid.
    fn diffuse(&mut self, grid: &Grid) {
        let n = self.classes.len();
        let directions = Direction::all(grid.rank(), false);
        let share = self.diffusion / directions.len() as f64;
        let keep = 1.0 - self.diffusion;

        let mut next = vec![0.0; self.mass.len()];
        for cell in 0..self.num_cells {
            let row = &self.mass[cell * n..(cell + 1) * n];
            for (k, &m) in row.iter().enumerate() {
                next[cell * n + k] += m * keep;
            }
            for &dir in &directions {
                let target = grid.step_conserving(cell, dir);
                for (k, &m) in row.iter().enumerate() {
                    next[target * n + k] += m * share;
                }
            }
        }
        self.mass = next;
    }

    /// Fails on any negative or non-finite class mass.
    pub fn verify(&self) -> SimResult<()> {
        let n = self.classes.len();
        for (idx, &m) in self.mass.iter().enumerate() {
            if !m.is_finite() || m < -1e-12 {
                return Err(SimError::invariant(format!(
                    "DOM class '{}' at cell {} holds mass {}",
                    self.classes[idx % n].name,
                    idx / n,
                    m
                )));
            }
        }
        Ok(())
    }
}

/// `sum(accessibility_k * mass_k)` over classes at or above `threshold`.
pub(crate) fn accessible_substrate(classes: &[LabilityClass], row: &[f64], threshold: f64) -> f64 {
    classes
        .iter()
        .zip(row)
        .filter(|(c, _)| c.accessibility >= threshold)
        .map(|(c, m)| c.accessibility * m)
        .sum()
}

/// Removes up to `quantity` from `row[class]`, clamped so the class never goes negative.
pub(crate) fn consume_from(row: &mut [f64], class: usize, quantity: f64) -> f64 {
    if !(quantity > 0.0) || !quantity.is_finite() {
        return 0.0;
    }
    let held = row[class].max(0.0);
    let actual = quantity.min(held);
    row[class] = held - actual;
    actual
}

/// Moves a fixed fraction between classes, computed from the pre-transfer masses.
fn apply_transfers(row: &mut [f64], transfers: &[Transfer]) {
    let before = row.to_vec();
    for t in transfers {
        let moved = before[t.from] * t.rate;
        row[t.from] -= moved;
        row[t.to] += moved;
    }
    for m in row.iter_mut() {
        if *m < 0.0 {
            *m = 0.0;
        }
    }
}
