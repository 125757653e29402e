use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, trace};
use phage_lattice::Simulation;
use simulation_common::{SimulationConfig, Snapshot};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial bacteria/virus lattice simulation", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the random seed from the configuration
    #[arg(long)]
    seed: Option<u64>,

    /// Override the maximum number of timesteps
    #[arg(long)]
    max_steps: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting phage-lattice simulation...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(max_steps) = args.max_steps {
        config.timing.max_steps = max_steps;
    }

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    info!("Initialized with {} particles.", sim.current_particle_count());
    debug!("Simulation Parameters: {:#?}", sim.params());

    // --- Simulation Loop ---
    let max_steps = sim.params().max_steps;
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let print_interval_secs = 5.0;

    let reason = loop {
        if let Some(reason) = sim.terminal_reason() {
            break reason;
        }
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {}", sim.current_step() + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let now = Instant::now();
        if now.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs
            || sim.current_step() == max_steps
        {
            info!(
                "Step [{}/{}] | Bacteria: {} | Viruses: {} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                sim.current_step(),
                max_steps,
                sim.store().total_bacteria(),
                sim.store().total_viruses(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                sim.current_step(),
                max_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    };

    if sim.get_recorded_snapshots().last().map(|s| s.step) != Some(sim.current_step()) {
        sim.record_snapshot();
    }

    let total_duration = start_time.elapsed();
    info!(
        "Simulation stopped after {} steps ({:?}) in {:.3} seconds.",
        sim.current_step(),
        reason,
        total_duration.as_secs_f64()
    );

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        let snapshots = sim.get_recorded_snapshots();
        let result = match format {
            "json" => save_json(&output.base_filename, snapshots),
            "bincode" => save_bincode(&output.base_filename, snapshots),
            "messagepack" => save_messagepack(&output.base_filename, snapshots),
            other => {
                error!("Unknown output format: {}. Using JSON instead.", other);
                save_json(&output.base_filename, snapshots)
            }
        };
        if let Err(e) = result {
            error!("Error saving snapshots: {:#}", e);
        }
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if output.save_final_csv {
        let filename = format!("{}_final_cells.csv", output.base_filename);
        save_final_csv(&filename, &sim).with_context(|| format!("Failed to write '{}'", filename))?;
        info!("Final cell populations saved to {}", filename);
    } else {
        info!("Skipping saving final cell table as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_json(base: &str, snapshots: &[Snapshot]) -> Result<()> {
    let filename = format!("{}_snapshots.json", base);
    let mut file = BufWriter::new(File::create(&filename).with_context(|| format!("creating '{}'", filename))?);
    serde_json::to_writer(&mut file, snapshots).context("serializing snapshots to JSON")?;
    file.flush()?;
    info!("All snapshots saved to {}", filename);
    Ok(())
}

fn save_bincode(base: &str, snapshots: &[Snapshot]) -> Result<()> {
    let filename = format!("{}_snapshots.bin", base);
    let file = BufWriter::new(File::create(&filename).with_context(|| format!("creating '{}'", filename))?);
    bincode::serialize_into(file, snapshots).context("serializing snapshots to bincode")?;
    info!("All snapshots saved to {} (binary format)", filename);
    Ok(())
}

fn save_messagepack(base: &str, snapshots: &[Snapshot]) -> Result<()> {
    let filename = format!("{}_snapshots.msgpack", base);
    let mut file = BufWriter::new(File::create(&filename).with_context(|| format!("creating '{}'", filename))?);
    rmp_serde::encode::write(&mut file, snapshots).context("serializing snapshots to MessagePack")?;
    file.flush()?;
    info!("All snapshots saved to {} (MessagePack format)", filename);
    Ok(())
}

/// One row per (cell, bacterium group) plus one per (cell, virus group).
fn save_final_csv(filename: &str, sim: &Simulation) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)?;
    writer.write_record(["cell", "coord", "kind", "group", "uninfected", "infected", "biomass", "count"])?;
    for cell in sim.get_results() {
        let coord = cell.coord.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
        for (g, group) in sim.params().bacteria.iter().enumerate() {
            writer.write_record([
                cell.cell.to_string(),
                coord.clone(),
                "bacteria".to_string(),
                group.name.clone(),
                cell.uninfected[g].to_string(),
                cell.infected[g].to_string(),
                format!("{:.6}", cell.biomass[g]),
                (cell.uninfected[g] + cell.infected[g]).to_string(),
            ])?;
        }
        for (g, group) in sim.params().viruses.iter().enumerate() {
            writer.write_record([
                cell.cell.to_string(),
                coord.clone(),
                "viruses".to_string(),
                group.name.clone(),
                String::new(),
                String::new(),
                String::new(),
                cell.viruses[g].to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
