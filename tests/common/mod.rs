#![allow(dead_code)]

use simulation_common::SimulationConfig;

/// 10x10 periodic grid, one bacterium group (growth 0.3) and its virus (burst 10,
/// latent period 3), one B at (5, 5) and one V at (5, 6).
pub const SCENARIO: &str = r#"
[grid]
dims = [10, 10]
boundary = "periodic"

[timing]
max_steps = 120
stop_on_extinction = "none"

[run]
seed = 0

# Without rest, two walkers starting on opposite lattice parity never meet.
[movement]
allow_rest = true

[infection]
probability = 1.0

[[bacteria]]
name = "host"
growth_rate = 0.3

[[viruses]]
name = "phage"
target = "host"
burst_size = 10
latent_period = { kind = "fixed", steps = 3 }

[[seeding.placements]]
kind = "bacteria"
group = "host"
position = [5, 5]

[[seeding.placements]]
kind = "viruses"
group = "phage"
position = [5, 6]
"#;

/// Two host/phage pairs with a three-class DOM pool, mortality, decay, diffusion
/// and a recalcitrant-to-labile transfer.
pub const COMMUNITY: &str = r#"
[grid]
dims = [8, 8]
boundary = "reflective"

[timing]
max_steps = 40
stop_on_extinction = "none"

[run]
seed = 0

[infection]
probability = 0.6

[mortality]
linear = 0.01
quadratic = 0.0005
virus_decay = 0.05

[nutrients]
diffusion = 0.2
lysate_fractions = [0.6, 0.3, 0.1]
mortality_fractions = [0.2, 0.4, 0.4]

[[nutrients.classes]]
name = "labile"
accessibility = 1.0
initial_mass = 5.0

[[nutrients.classes]]
name = "semi_labile"
accessibility = 0.4
initial_mass = 10.0

[[nutrients.classes]]
name = "recalcitrant"
accessibility = 0.05
initial_mass = 20.0

[[nutrients.transfers]]
from = "recalcitrant"
to = "labile"
rate = 0.01

[tradeoffs.growth_resistance]
kind = "linear"
intercept = 1.0
slope = 1.0

[[bacteria]]
name = "fast"
growth_rate = 0.4
resistance = 0.3
uptake_rate = 0.5
affinity = 0.8

[[bacteria]]
name = "slow"
growth_rate = 0.15
resistance = 0.8
uptake_rate = 0.2
affinity = 2.0

[[viruses]]
name = "fast_phage"
target = "fast"
burst_size = 12
latent_period = { kind = "poisson", mean = 3.0 }

[[viruses]]
name = "slow_phage"
target = "slow"
burst_size = 6
latent_period = { kind = "uniform", min = 2, max = 5 }

[[seeding.random]]
kind = "bacteria"
group = "fast"
count = 300

[[seeding.random]]
kind = "bacteria"
group = "slow"
count = 300

[[seeding.random]]
kind = "viruses"
group = "fast_phage"
count = 200

[[seeding.random]]
kind = "viruses"
group = "slow_phage"
count = 200
"#;

pub fn config(text: &str, seed: u64) -> SimulationConfig {
    let mut config = SimulationConfig::from_toml_str(text).expect("test config parses");
    config.run.seed = seed;
    config
}
