//! Stochastic MPC scenario runner.
//!
//! Provides four modes of operation:
//! - `solve`: Solve one horizon and print the predicted mean, spread and bounds
//! - `simulate`: Run the receding-horizon loop against the sampled plant
//! - `validate`: Estimate chance-constraint satisfaction by Monte Carlo
//! - `info`: Print workspace crate versions

mod scenario;

use std::path::PathBuf;
use std::process::ExitCode;

use chance_mpc::{ClosedLoop, SolutionRecord};
use clap::{Parser, Subcommand};
use log::error;
use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use scenario::{Scenario, ScenarioError};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Stochastic MPC with chance constraints.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one horizon from the scenario's initial state.
    Solve {
        /// Scenario TOML file.
        scenario: PathBuf,
    },

    /// Run the closed loop against the stochastic plant.
    Simulate {
        /// Scenario TOML file.
        scenario: PathBuf,

        /// Number of closed-loop steps (overrides the scenario).
        #[arg(short = 'n', long)]
        steps: Option<usize>,

        /// Random seed (overrides the scenario).
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Estimate chance-constraint satisfaction of one solution.
    Validate {
        /// Scenario TOML file.
        scenario: PathBuf,

        /// Number of sampled realizations (overrides the scenario).
        #[arg(short = 'n', long)]
        samples: Option<usize>,

        /// Random seed (overrides the scenario).
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn print_record(record: &SolutionRecord) {
    println!(
        "status={}, iterations={}, objective={:.6}, violation={:.2e}, time={}us",
        record.status,
        record.iterations,
        record.objective,
        record.constraint_violation,
        record.solve_time_us
    );
    let n = record.means[0].len();
    for k in 0..=record.horizon() {
        let mut line = format!("k={k:>3}");
        for i in 0..n {
            let std = record.covariances[k][(i, i)].max(0.0).sqrt();
            line.push_str(&format!(
                "  x{i}={:>10.4} ±{:<8.4} [{:>9.3}, {:>9.3}]",
                record.means[k][i], std, record.lower_bounds[k][i], record.upper_bounds[k][i]
            ));
        }
        if let Some(u) = record.inputs.get(k) {
            line.push_str(&format!("  u={:?}", u.as_slice()));
        }
        println!("{line}");
    }
}

fn run_solve(scenario: &Scenario) -> Result<(), ScenarioError> {
    let mut smpc = scenario.build()?;
    let record = smpc.optimize(&scenario.request()?)?;
    print_record(record);
    Ok(())
}

fn run_simulate(scenario: &Scenario, steps: usize, seed: u64) -> Result<(), ScenarioError> {
    let mut smpc = scenario.build()?;
    let request = scenario.request()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x0 = DVector::from_column_slice(&scenario.run.x0);

    let mut closed_loop = ClosedLoop::new(&mut smpc);
    if let Some(cov) = request.cov_x0 {
        closed_loop = closed_loop.with_covariance(cov);
    }
    if let Some(gain) = request.k_gain {
        closed_loop = closed_loop.with_gain(gain);
    }
    let trajectory = closed_loop.run(&x0, steps, &mut rng)?;

    for (t, x) in trajectory.states.iter().enumerate() {
        match trajectory.inputs.get(t) {
            Some(u) => println!(
                "t={t:>3}  x={:?}  u={:?}  objective={:.4}",
                x.as_slice(),
                u.as_slice(),
                trajectory.objectives[t]
            ),
            None => println!("t={t:>3}  x={:?}", x.as_slice()),
        }
    }
    Ok(())
}

fn run_validate(scenario: &Scenario, samples: usize, seed: u64) -> Result<(), ScenarioError> {
    let mut smpc = scenario.build()?;
    smpc.optimize(&scenario.request()?)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let Some(report) = smpc.empirical_satisfaction(samples, &mut rng) else {
        return Ok(());
    };

    println!("samples={}", report.samples);
    for (c, spec) in smpc.chance_constraints().iter().enumerate() {
        let rate = report.min_rate(c);
        let verdict = if rate >= spec.probability { "ok" } else { "VIOLATED" };
        println!(
            "state {} {:?} {:.3}: required {:.3}, worst empirical {:.4} {verdict}",
            spec.state, spec.direction, spec.bound, spec.probability, rate
        );
    }
    Ok(())
}

fn run_info() {
    println!("chance v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  chance-core {}", env!("CARGO_PKG_VERSION"));
    println!("  chance-gp   {}", env!("CARGO_PKG_VERSION"));
    println!("  chance-nlp  {}", env!("CARGO_PKG_VERSION"));
    println!("  chance-mpc  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn run(command: Commands) -> Result<(), ScenarioError> {
    match command {
        Commands::Solve { scenario } => run_solve(&Scenario::from_file(scenario)?),
        Commands::Simulate {
            scenario,
            steps,
            seed,
        } => {
            let scenario = Scenario::from_file(scenario)?;
            let steps = steps.unwrap_or(scenario.run.steps);
            let seed = seed.unwrap_or(scenario.run.seed);
            run_simulate(&scenario, steps, seed)
        }
        Commands::Validate {
            scenario,
            samples,
            seed,
        } => {
            let scenario = Scenario::from_file(scenario)?;
            let samples = samples.unwrap_or(scenario.run.samples);
            let seed = seed.unwrap_or(scenario.run.seed);
            run_validate(&scenario, samples, seed)
        }
        Commands::Info => {
            run_info();
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
