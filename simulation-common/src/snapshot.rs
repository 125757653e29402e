use serde::{Deserialize, Serialize};

/// Population totals of one bacterium group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupTotals {
    pub uninfected: u64,
    pub infected: u64,
    /// Organic mass of all bacteria in the group, infected included.
    pub biomass: f64,
}

/// Per-cell contents at snapshot time. Vectors are indexed by group / class id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub cell: usize,
    pub coord: Vec<i64>,
    pub uninfected: Vec<u64>,
    pub infected: Vec<u64>,
    pub biomass: Vec<f64>,
    pub viruses: Vec<u64>,
    /// Empty outside extended mode.
    pub dom: Vec<f64>,
}

/// Successful infections of one bacterium group by one virus group at one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfectionEvent {
    pub cell: usize,
    pub bacterium_group: usize,
    pub virus_group: usize,
    pub count: u64,
}

/// One infected bacterium bursting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LysisEvent {
    pub bacterium_id: u64,
    pub cell: usize,
    pub bacterium_group: usize,
    pub virus_group: usize,
    pub infected_at: u64,
    pub burst_size: u32,
    /// Organic mass released to the DOM pool (zero outside extended mode).
    pub mass: f64,
}

/// What happened during one timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEvents {
    /// (cell, bacterium group, virus group) triples with uninfected hosts and
    /// matching virions after movement.
    pub contacts: u64,
    pub infections: u64,
    pub infection_events: Vec<InfectionEvent>,
    pub births: u64,
    /// Uninfected bacteria removed by mortality.
    pub deaths: u64,
    pub lysis: Vec<LysisEvent>,
    pub viruses_released: u64,
    pub viruses_decayed: u64,
    /// Particles that left the grid through an absorbing boundary.
    pub absorbed_bacteria: u64,
    pub absorbed_viruses: u64,
    pub absorbed_biomass: f64,
    /// DOM mass taken up by growth.
    pub uptake: f64,
    /// DOM mass returned by lysis and mortality.
    pub recycled: f64,
}

impl StepEvents {
    /// Folds the events of a later timestep into this one.
    pub fn merge(&mut self, other: &StepEvents) {
        self.contacts += other.contacts;
        self.infections += other.infections;
        self.infection_events.extend_from_slice(&other.infection_events);
        self.births += other.births;
        self.deaths += other.deaths;
        self.lysis.extend_from_slice(&other.lysis);
        self.viruses_released += other.viruses_released;
        self.viruses_decayed += other.viruses_decayed;
        self.absorbed_bacteria += other.absorbed_bacteria;
        self.absorbed_viruses += other.absorbed_viruses;
        self.absorbed_biomass += other.absorbed_biomass;
        self.uptake += other.uptake;
        self.recycled += other.recycled;
    }
}

/// A snapshot of the simulation state and metrics after a timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Timestep counter after the step completed (0 for the initial state).
    pub step: u64,
    pub bacteria: Vec<GroupTotals>,
    pub viruses: Vec<u64>,
    /// Grid-wide DOM mass per lability class; empty outside extended mode.
    pub dom_by_class: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "cells": null
    pub cells: Option<Vec<CellSnapshot>>,
    pub events: StepEvents,
}

impl Snapshot {
    pub fn total_bacteria(&self) -> u64 {
        self.bacteria.iter().map(|g| g.uninfected + g.infected).sum()
    }

    pub fn total_viruses(&self) -> u64 {
        self.viruses.iter().sum()
    }

    pub fn total_dom(&self) -> f64 {
        self.dom_by_class.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counts_and_events() {
        let mut acc = StepEvents { infections: 2, uptake: 1.5, ..Default::default() };
        let later = StepEvents {
            infections: 1,
            births: 4,
            uptake: 0.5,
            lysis: vec![LysisEvent {
                bacterium_id: 3,
                cell: 0,
                bacterium_group: 0,
                virus_group: 0,
                infected_at: 1,
                burst_size: 10,
                mass: 0.0,
            }],
            ..Default::default()
        };
        acc.merge(&later);
        assert_eq!(acc.infections, 3);
        assert_eq!(acc.births, 4);
        assert_eq!(acc.uptake, 2.0);
        assert_eq!(acc.lysis.len(), 1);
    }

    #[test]
    fn snapshot_totals() {
        let snap = Snapshot {
            step: 3,
            bacteria: vec![
                GroupTotals { uninfected: 4, infected: 1, biomass: 5.0 },
                GroupTotals { uninfected: 2, infected: 0, biomass: 2.0 },
            ],
            viruses: vec![10, 5],
            dom_by_class: vec![1.0, 2.5],
            cells: None,
            events: StepEvents::default(),
        };
        assert_eq!(snap.total_bacteria(), 7);
        assert_eq!(snap.total_viruses(), 15);
        assert_eq!(snap.total_dom(), 3.5);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("\"cells\""));
    }
}
