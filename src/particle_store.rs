use simulation_common::{GroupTotals, Kind, SimError, SimResult};

/// Uninfected bacteria of one group in one cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aggregate {
    pub count: u64,
    /// Total organic mass of the `count` individuals.
    pub biomass: f64,
}

impl Aggregate {
    /// Mass carried away by `n` individuals leaving the aggregate. The last
    /// individuals out take whatever mass is left.
    #[inline]
    pub fn share_of(&self, n: u64) -> f64 {
        if n == 0 || self.count == 0 {
            0.0
        } else if n >= self.count {
            self.biomass
        } else {
            self.biomass * n as f64 / self.count as f64
        }
    }

    /// Removes `n` individuals (capped at `count`) and returns their mass.
    pub fn take(&mut self, n: u64) -> f64 {
        let n = n.min(self.count);
        let mass = self.share_of(n);
        self.count -= n;
        if self.count == 0 {
            self.biomass = 0.0;
        } else {
            self.biomass -= mass;
        }
        mass
    }

    pub fn add(&mut self, n: u64, mass: f64) {
        self.count += n;
        self.biomass += mass;
    }
}

/// One infected bacterium, tracked individually because it carries its own timer.
#[derive(Debug, Clone, PartialEq)]
pub struct InfectedBacterium {
    pub id: u64,
    pub group: usize,
    /// Virus group that infected it; its progeny belong to this group.
    pub virus_group: usize,
    pub cell: usize,
    /// Timesteps left until lysis. Only ever decreases.
    pub countdown: u32,
    pub infected_at: u64,
    pub mass: f64,
}

/// A read-only view of what occupies a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Occupant<'a> {
    Uninfected { group: usize, count: u64, biomass: f64 },
    Infected(&'a InfectedBacterium),
    Virus { group: usize, count: u64 },
}

/// Authoritative store of every bacterium and virus on the grid.
///
/// Uninfected bacteria and free virions are kept as per-cell, per-group counts.
/// Infected bacteria are individual records, indexed by cell through a
/// counting-sort index (`cell_counts` / `cell_starts` / `cell_records`) that is
/// rebuilt whenever the record set changes.
#[derive(Debug)]
pub struct ParticleStore {
    num_cells: usize,
    num_bacteria_groups: usize,
    num_virus_groups: usize,

    // --- Aggregated populations, cell-major ---
    bacteria: Vec<Aggregate>,
    viruses: Vec<u64>,

    // --- Infected individuals, ascending id ---
    infected: Vec<InfectedBacterium>,
    next_id: u64,

    // --- Cell index over `infected` ---
    cell_counts: Vec<u32>,
    cell_starts: Vec<u32>,
    cell_records: Vec<u32>,
    index_stale: bool,
}

impl ParticleStore {
    pub fn new(num_cells: usize, num_bacteria_groups: usize, num_virus_groups: usize) -> Self {
        Self {
            num_cells,
            num_bacteria_groups,
            num_virus_groups,
            bacteria: vec![Aggregate::default(); num_cells * num_bacteria_groups],
            viruses: vec![0; num_cells * num_virus_groups],
            infected: Vec::new(),
            next_id: 0,
            cell_counts: vec![0; num_cells],
            cell_starts: vec![0; num_cells],
            cell_records: Vec::new(),
            index_stale: false,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn num_bacteria_groups(&self) -> usize {
        self.num_bacteria_groups
    }

    pub fn num_virus_groups(&self) -> usize {
        self.num_virus_groups
    }

    #[inline(always)]
    fn b_idx(&self, cell: usize, group: usize) -> usize {
        cell * self.num_bacteria_groups + group
    }

    #[inline(always)]
    fn v_idx(&self, cell: usize, group: usize) -> usize {
        cell * self.num_virus_groups + group
    }

    // --- Queries ---

    pub fn uninfected_at(&self, cell: usize, group: usize) -> Aggregate {
        self.bacteria[self.b_idx(cell, group)]
    }

    pub fn viruses_at(&self, cell: usize, group: usize) -> u64 {
        self.viruses[self.v_idx(cell, group)]
    }

    /// Uninfected aggregates of one cell, indexed by group.
    pub fn bacteria_row(&self, cell: usize) -> &[Aggregate] {
        let start = cell * self.num_bacteria_groups;
        &self.bacteria[start..start + self.num_bacteria_groups]
    }

    /// Virion counts of one cell, indexed by group.
    pub fn virus_row(&self, cell: usize) -> &[u64] {
        let start = cell * self.num_virus_groups;
        &self.viruses[start..start + self.num_virus_groups]
    }

    /// Infected bacteria of `group` at `cell`, ascending id.
    pub fn infected_at(&self, cell: usize, group: usize) -> Vec<&InfectedBacterium> {
        self.infected_in_cell(cell)
            .into_iter()
            .filter(|r| r.group == group)
            .collect()
    }

    /// All infected bacteria at `cell`, ascending id.
    pub fn infected_in_cell(&self, cell: usize) -> Vec<&InfectedBacterium> {
        if self.index_stale {
            return self.infected.iter().filter(|r| r.cell == cell).collect();
        }
        let start = self.cell_starts[cell] as usize;
        let end = start + self.cell_counts[cell] as usize;
        self.cell_records[start..end]
            .iter()
            .map(|&i| &self.infected[i as usize])
            .collect()
    }

    /// Everything of `kind` at `cell`, optionally restricted to one group.
    pub fn particles_at(&self, cell: usize, kind: Kind, group: Option<usize>) -> Vec<Occupant<'_>> {
        let wanted = |g: usize| group.map_or(true, |want| want == g);
        let mut out = Vec::new();
        match kind {
            Kind::Bacterium => {
                for (g, agg) in self.bacteria_row(cell).iter().enumerate() {
                    if wanted(g) && agg.count > 0 {
                        out.push(Occupant::Uninfected { group: g, count: agg.count, biomass: agg.biomass });
                    }
                }
                for rec in self.infected_in_cell(cell) {
                    if wanted(rec.group) {
                        out.push(Occupant::Infected(rec));
                    }
                }
            }
            Kind::Virus => {
                for (g, &count) in self.virus_row(cell).iter().enumerate() {
                    if wanted(g) && count > 0 {
                        out.push(Occupant::Virus { group: g, count });
                    }
                }
            }
        }
        out
    }

    pub fn infected(&self) -> &[InfectedBacterium] {
        &self.infected
    }

    pub fn infected_by_id(&self, id: u64) -> Option<&InfectedBacterium> {
        self.infected
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.infected[i])
    }

    // --- Aggregate mutation ---

    pub fn add_bacteria(&mut self, cell: usize, group: usize, count: u64, biomass: f64) {
        let idx = self.b_idx(cell, group);
        self.bacteria[idx].add(count, biomass);
    }

    /// Removes `count` uninfected bacteria and returns their mass.
    pub fn remove_bacteria(&mut self, cell: usize, group: usize, count: u64) -> SimResult<f64> {
        let idx = self.b_idx(cell, group);
        let agg = &mut self.bacteria[idx];
        if count > agg.count {
            return Err(SimError::invariant(format!(
                "removing {} bacteria of group {} from cell {} holding {}",
                count, group, cell, agg.count
            )));
        }
        Ok(agg.take(count))
    }

    pub fn move_bacteria(&mut self, from: usize, to: usize, group: usize, count: u64) -> SimResult<()> {
        let mass = self.remove_bacteria(from, group, count)?;
        self.add_bacteria(to, group, count, mass);
        Ok(())
    }

    pub fn add_viruses(&mut self, cell: usize, group: usize, count: u64) {
        let idx = self.v_idx(cell, group);
        self.viruses[idx] += count;
    }

    pub fn remove_viruses(&mut self, cell: usize, group: usize, count: u64) -> SimResult<()> {
        let idx = self.v_idx(cell, group);
        let held = self.viruses[idx];
        if count > held {
            return Err(SimError::invariant(format!(
                "removing {} virions of group {} from cell {} holding {}",
                count, group, cell, held
            )));
        }
        self.viruses[idx] = held - count;
        Ok(())
    }

    pub fn move_viruses(&mut self, from: usize, to: usize, group: usize, count: u64) -> SimResult<()> {
        self.remove_viruses(from, group, count)?;
        self.add_viruses(to, group, count);
        Ok(())
    }

    /// Overwrites one cell's aggregates. Used by phases that commit whole cells.
    pub(crate) fn set_cell(&mut self, cell: usize, bacteria: &[Aggregate], viruses: &[u64]) {
        let b = cell * self.num_bacteria_groups;
        self.bacteria[b..b + self.num_bacteria_groups].copy_from_slice(bacteria);
        let v = cell * self.num_virus_groups;
        self.viruses[v..v + self.num_virus_groups].copy_from_slice(viruses);
    }

    /// Swaps in freshly built aggregate tables (movement commit).
    pub(crate) fn replace_populations(&mut self, bacteria: Vec<Aggregate>, viruses: Vec<u64>) {
        debug_assert_eq!(bacteria.len(), self.bacteria.len());
        debug_assert_eq!(viruses.len(), self.viruses.len());
        self.bacteria = bacteria;
        self.viruses = viruses;
    }

    /// Mutable aggregate tables, cell-major, for phases that update cells in parallel.
    pub(crate) fn tables_mut(&mut self) -> (&mut [Aggregate], &mut [u64]) {
        (&mut self.bacteria, &mut self.viruses)
    }

    // --- Infected records ---

    /// Adds an infected bacterium and returns its id.
    pub fn insert_infected(
        &mut self,
        group: usize,
        virus_group: usize,
        cell: usize,
        countdown: u32,
        infected_at: u64,
        mass: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.infected.push(InfectedBacterium {
            id,
            group,
            virus_group,
            cell,
            countdown,
            infected_at,
            mass,
        });
        self.index_stale = true;
        id
    }

    pub fn remove_infected(&mut self, id: u64) -> Option<InfectedBacterium> {
        let pos = self.infected.binary_search_by_key(&id, |r| r.id).ok()?;
        self.index_stale = true;
        Some(self.infected.remove(pos))
    }

    pub fn move_infected(&mut self, id: u64, to: usize) -> SimResult<()> {
        let pos = self
            .infected
            .binary_search_by_key(&id, |r| r.id)
            .map_err(|_| SimError::invariant(format!("infected bacterium {} does not exist", id)))?;
        self.infected[pos].cell = to;
        self.index_stale = true;
        Ok(())
    }

    pub(crate) fn infected_mut(&mut self) -> &mut [InfectedBacterium] {
        self.index_stale = true;
        &mut self.infected
    }

    /// Removes and returns every record matching `pred`, ascending id.
    pub(crate) fn drain_infected<F>(&mut self, mut pred: F) -> Vec<InfectedBacterium>
    where
        F: FnMut(&InfectedBacterium) -> bool,
    {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.infected.len());
        for rec in self.infected.drain(..) {
            if pred(&rec) {
                drained.push(rec);
            } else {
                kept.push(rec);
            }
        }
        self.infected = kept;
        if !drained.is_empty() {
            self.index_stale = true;
        }
        drained
    }

    /// Rebuilds the per-cell index over infected records: count per cell, prefix
    /// sum for start offsets, then scatter record positions in id order.
    pub fn rebuild_index(&mut self) {
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        for rec in &self.infected {
            if rec.cell < self.num_cells {
                self.cell_counts[rec.cell] += 1;
            } else {
                log::error!("Infected bacterium {} has invalid cell {}.", rec.id, rec.cell);
            }
        }

        let mut total = 0u32;
        for cell in 0..self.num_cells {
            self.cell_starts[cell] = total;
            total += self.cell_counts[cell];
        }

        self.cell_records.clear();
        self.cell_records.resize(total as usize, 0);
        let mut offsets = vec![0u32; self.num_cells];
        for (i, rec) in self.infected.iter().enumerate() {
            if rec.cell >= self.num_cells {
                continue;
            }
            let slot = self.cell_starts[rec.cell] + offsets[rec.cell];
            offsets[rec.cell] += 1;
            self.cell_records[slot as usize] = i as u32;
        }
        self.index_stale = false;
    }

    // --- Totals ---

    pub fn group_totals(&self) -> Vec<GroupTotals> {
        let mut totals = vec![GroupTotals::default(); self.num_bacteria_groups];
        for row in self.bacteria.chunks(self.num_bacteria_groups.max(1)) {
            for (g, agg) in row.iter().enumerate() {
                totals[g].uninfected += agg.count;
                totals[g].biomass += agg.biomass;
            }
        }
        for rec in &self.infected {
            totals[rec.group].infected += 1;
            totals[rec.group].biomass += rec.mass;
        }
        totals
    }

    pub fn virus_totals(&self) -> Vec<u64> {
        let mut totals = vec![0u64; self.num_virus_groups];
        for row in self.viruses.chunks(self.num_virus_groups.max(1)) {
            for (g, &count) in row.iter().enumerate() {
                totals[g] += count;
            }
        }
        totals
    }

    /// Uninfected plus infected bacteria.
    pub fn total_bacteria(&self) -> u64 {
        self.bacteria.iter().map(|a| a.count).sum::<u64>() + self.infected.len() as u64
    }

    pub fn total_viruses(&self) -> u64 {
        self.viruses.iter().sum()
    }

    pub fn total_biomass(&self) -> f64 {
        self.bacteria.iter().map(|a| a.biomass).sum::<f64>()
            + self.infected.iter().map(|r| r.mass).sum::<f64>()
    }

    /// Checks the structural invariants of the store.
    pub fn verify(&self) -> SimResult<()> {
        for (idx, agg) in self.bacteria.iter().enumerate() {
            let (cell, group) = (idx / self.num_bacteria_groups, idx % self.num_bacteria_groups);
            if !agg.biomass.is_finite() || agg.biomass < -1e-9 {
                return Err(SimError::invariant(format!(
                    "bacteria of group {} at cell {} have biomass {}",
                    group, cell, agg.biomass
                )));
            }
            if agg.count == 0 && agg.biomass.abs() > 1e-9 {
                return Err(SimError::invariant(format!(
                    "empty aggregate of group {} at cell {} holds biomass {}",
                    group, cell, agg.biomass
                )));
            }
        }

        let mut last_id = None;
        for rec in &self.infected {
            if rec.cell >= self.num_cells {
                return Err(SimError::invariant(format!(
                    "infected bacterium {} is outside the grid (cell {})",
                    rec.id, rec.cell
                )));
            }
            if rec.group >= self.num_bacteria_groups || rec.virus_group >= self.num_virus_groups {
                return Err(SimError::invariant(format!(
                    "infected bacterium {} references unknown groups ({}, {})",
                    rec.id, rec.group, rec.virus_group
                )));
            }
            if rec.countdown == 0 {
                return Err(SimError::invariant(format!(
                    "infected bacterium {} has an expired timer but was not lysed",
                    rec.id
                )));
            }
            if !rec.mass.is_finite() || rec.mass < 0.0 {
                return Err(SimError::invariant(format!(
                    "infected bacterium {} has mass {}",
                    rec.id, rec.mass
                )));
            }
            if last_id.is_some_and(|prev| prev >= rec.id) {
                return Err(SimError::invariant(format!("infected bacterium {} is duplicated or out of order", rec.id)));
            }
            last_id = Some(rec.id);
        }

        if !self.index_stale {
            let indexed: u32 = self.cell_counts.iter().sum();
            if indexed as usize != self.infected.len() {
                return Err(SimError::invariant(format!(
                    "cell index holds {} infected bacteria, store holds {}",
                    indexed,
                    self.infected.len()
                )));
            }
            for cell in 0..self.num_cells {
                let start = self.cell_starts[cell] as usize;
                let end = start + self.cell_counts[cell] as usize;
                for &i in &self.cell_records[start..end] {
                    if self.infected[i as usize].cell != cell {
                        return Err(SimError::invariant(format!(
                            "infected bacterium {} indexed under cell {} but located at {}",
                            self.infected[i as usize].id, cell, self.infected[i as usize].cell
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_take_carries_mean_mass() {
        let mut agg = Aggregate { count: 4, biomass: 8.0 };
        assert_eq!(agg.take(1), 2.0);
        assert_eq!(agg.count, 3);
        assert_eq!(agg.biomass, 6.0);
        assert_eq!(agg.take(10), 6.0);
        assert_eq!(agg, Aggregate { count: 0, biomass: 0.0 });
    }

    #[test]
    fn bacteria_and_viruses_are_tracked_per_cell_and_group() {
        let mut store = ParticleStore::new(4, 2, 1);
        store.add_bacteria(1, 0, 3, 3.0);
        store.add_bacteria(1, 1, 2, 2.0);
        store.add_viruses(1, 0, 5);
        assert_eq!(store.uninfected_at(1, 0).count, 3);
        assert_eq!(store.uninfected_at(2, 0).count, 0);
        assert_eq!(store.viruses_at(1, 0), 5);
        assert_eq!(store.particles_at(1, Kind::Bacterium, None).len(), 2);
        assert_eq!(store.particles_at(1, Kind::Bacterium, Some(1)).len(), 1);
        assert_eq!(store.particles_at(1, Kind::Virus, None), vec![Occupant::Virus { group: 0, count: 5 }]);

        store.move_bacteria(1, 2, 0, 2).unwrap();
        assert_eq!(store.uninfected_at(1, 0), Aggregate { count: 1, biomass: 1.0 });
        assert_eq!(store.uninfected_at(2, 0), Aggregate { count: 2, biomass: 2.0 });
        store.move_viruses(1, 3, 0, 5).unwrap();
        assert_eq!(store.viruses_at(3, 0), 5);
        assert_eq!(store.total_viruses(), 5);
        assert_eq!(store.total_bacteria(), 5);
    }

    #[test]
    fn over_removal_is_an_invariant_violation() {
        let mut store = ParticleStore::new(2, 1, 1);
        store.add_bacteria(0, 0, 1, 1.0);
        assert!(matches!(store.remove_bacteria(0, 0, 2), Err(SimError::InvariantViolation(_))));
        assert!(store.remove_viruses(0, 0, 1).is_err());
    }

    #[test]
    fn infected_index_finds_records_by_cell_and_group() {
        let mut store = ParticleStore::new(3, 2, 2);
        let a = store.insert_infected(0, 0, 2, 3, 0, 1.0);
        let b = store.insert_infected(1, 1, 2, 3, 0, 1.0);
        let c = store.insert_infected(0, 0, 1, 3, 0, 1.0);
        store.rebuild_index();
        assert_eq!(store.infected_in_cell(2).iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(store.infected_at(2, 1).len(), 1);
        assert_eq!(store.infected_at(1, 0)[0].id, c);
        store.verify().unwrap();

        store.move_infected(a, 0).unwrap();
        // A stale index falls back to a scan.
        assert_eq!(store.infected_in_cell(0).len(), 1);
        store.rebuild_index();
        assert_eq!(store.infected_in_cell(0)[0].id, a);

        let removed = store.remove_infected(b).unwrap();
        assert_eq!(removed.group, 1);
        assert!(store.infected_by_id(b).is_none());
        store.rebuild_index();
        store.verify().unwrap();
    }

    #[test]
    fn expired_timer_fails_verification() {
        let mut store = ParticleStore::new(1, 1, 1);
        store.insert_infected(0, 0, 0, 0, 0, 1.0);
        store.rebuild_index();
        assert!(matches!(store.verify(), Err(SimError::InvariantViolation(_))));
    }

    #[test]
    fn totals_include_infected_individuals() {
        let mut store = ParticleStore::new(2, 1, 1);
        store.add_bacteria(0, 0, 4, 4.0);
        store.insert_infected(0, 0, 1, 2, 0, 1.5);
        let totals = store.group_totals();
        assert_eq!(totals[0].uninfected, 4);
        assert_eq!(totals[0].infected, 1);
        assert!((totals[0].biomass - 5.5).abs() < 1e-12);
        assert!((store.total_biomass() - 5.5).abs() < 1e-12);
    }
}
