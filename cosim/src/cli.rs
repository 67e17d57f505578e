//! Parses the command line arguments and runs what they ask for.
//!
//! ```text
//! cosim generate --model gain:2 --host 127.0.0.1 --port 5010 --out gain.json
//! cosim run orchestrator --session session.json
//! cosim run node --descriptor gain.json --model gain:2
//! cosim demo ramp-gain
//! ```
//!
//! The process exits with 0 when everything completed, 1 when a session or
//! node failed and 2 for bad arguments, descriptors or session files.

use crate::{
    models::{Model, ModelError},
    session_file::{SessionFile, SessionFileError},
    simulations::{self, Outcome, SimulationError},
};
use clap::{Parser, Subcommand, ValueEnum};
use cosim_core::{
    descriptor::DescriptorError, node::NodeError, transports::UdpNetwork, Descriptor, NodeConfig,
    NodeRuntime, SessionError, Shutdown,
};
use std::{
    fs::{create_dir_all, OpenOptions},
    net::Ipv4Addr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Stores the different command line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "Runs co-simulation sessions")]
struct Args {
    /// Write JSON logs to ./logs instead of plain logs to stderr.
    #[arg(short, long, global = true)]
    log: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generates the descriptor of a node running a built-in model.
    Generate {
        /// A model reference such as `ramp`, `gain:2` or `sine:1:0.5`.
        #[arg(short, long)]
        model: String,
        #[arg(long)]
        host: Ipv4Addr,
        /// The control port. Coupling data goes to the port after it.
        #[arg(short, long)]
        port: u16,
        #[arg(short, long)]
        out: PathBuf,
        /// The node name used in connections. Defaults to the model name.
        #[arg(long)]
        name: Option<String>,
        /// The communication step in seconds.
        #[arg(long, default_value_t = 0.1)]
        step: f64,
    },
    /// Runs an orchestrator or a node over UDP.
    Run {
        #[command(subcommand)]
        role: Role,
    },
    /// Runs a prebuilt session with every node in this process.
    Demo {
        #[arg(value_enum)]
        name: Demo,
    },
}

#[derive(Debug, Subcommand)]
enum Role {
    Orchestrator {
        #[arg(short, long)]
        session: PathBuf,
    },
    Node {
        #[arg(short, long)]
        descriptor: PathBuf,
        #[arg(short, long)]
        model: String,
        /// Give up after this many milliseconds without hearing from the
        /// orchestrator.
        #[arg(long, default_value_t = 30_000)]
        idle_timeout: u64,
        /// How many milliseconds a step waits for late coupling data.
        #[arg(long, default_value_t = 200)]
        input_wait: u64,
        #[arg(long)]
        log_to_orchestrator: bool,
        /// Simulated seconds after which a real-time node stops on its own.
        #[arg(long)]
        stop_time: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Demo {
    RampGain,
    SineIntegrator,
    Lossy,
}

#[derive(Debug, ThisError)]
enum CliError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    SessionFile(#[from] SessionFileError),
    #[error("The descriptor declares {declared:?} but model {model} has {expected:?}")]
    ModelMismatch {
        model: &'static str,
        declared: Vec<String>,
        expected: Vec<String>,
    },
    #[error("Could not set up logging: {0}")]
    Logging(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Session(SessionError::Config(_) | SessionError::Wiring(_) | SessionError::NoNodes) => 2,
            CliError::Session(_) | CliError::Node(_) | CliError::Simulation(_) => 1,
            _ => 2,
        }
    }
}

/// Parses the command line, runs the command and returns the process exit
/// code.
pub async fn initialize_from_arguments() -> i32 {
    let args = Args::parse();
    let logging = if args.log {
        initialize_logging()
    } else {
        initialize_stderr_logging()
    };
    if let Err(e) = logging {
        eprintln!("{}", e);
    }

    match run(args.command).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Generate {
            model,
            host,
            port,
            out,
            name,
            step,
        } => {
            let model: Model = model.parse()?;
            let name = name.unwrap_or_else(|| model.name().into());
            let descriptor = model.descriptor(&name, host, port, step)?;
            descriptor.save(&out)?;
            println!("Wrote the descriptor of {} to {}", name, out.display());
            Ok(())
        }
        Command::Run {
            role: Role::Orchestrator { session },
        } => {
            let (local, orchestrator) = SessionFile::load(session)?.into_orchestrator()?;
            let report =
                cosim_core::run_session(&UdpNetwork::new(), local, orchestrator, interruptible())
                    .await?;
            println!(
                "Session completed: {} steps, t = {} s",
                report.steps, report.final_time
            );
            Ok(())
        }
        Command::Run {
            role:
                Role::Node {
                    descriptor,
                    model,
                    idle_timeout,
                    input_wait,
                    log_to_orchestrator,
                    stop_time,
                },
        } => {
            let descriptor = Descriptor::load(descriptor)?;
            let model: Model = model.parse()?;
            check_model(&descriptor, &model)?;
            let mut config = NodeConfig::new()
                .with_idle_timeout(Duration::from_millis(idle_timeout))
                .with_input_wait(Duration::from_millis(input_wait))
                .with_log_to_orchestrator(log_to_orchestrator);
            config.stop_time = stop_time;
            let report = NodeRuntime::new(descriptor, model.engine(), config)
                .run(&UdpNetwork::new(), interruptible())
                .await?;
            println!(
                "Node finished: {} steps, {} stale inputs, {} overruns",
                report.steps, report.stale_inputs, report.overruns
            );
            Ok(())
        }
        Command::Demo { name } => {
            let outcome = match name {
                Demo::RampGain => simulations::ramp_gain().await,
                Demo::SineIntegrator => simulations::sine_integrator_real_time().await,
                Demo::Lossy => simulations::lossy_chain(0.02).await,
            }?;
            print_outcome(&outcome);
            Ok(())
        }
    }
}

/// A shutdown that Ctrl-C triggers.
fn interruptible() -> Shutdown {
    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.shut_down();
        }
    });
    shutdown
}

/// The variables of the descriptor must be the ones the model declares, in
/// the same order.
fn check_model(descriptor: &Descriptor, model: &Model) -> Result<(), CliError> {
    let declared: Vec<String> = descriptor
        .variables
        .iter()
        .map(|variable| variable.name.clone())
        .collect();
    let expected: Vec<String> = model
        .outputs()
        .iter()
        .chain(model.inputs())
        .map(|name| (*name).to_string())
        .collect();
    if declared == expected {
        Ok(())
    } else {
        Err(CliError::ModelMismatch {
            model: model.name(),
            declared,
            expected,
        })
    }
}

fn print_outcome(outcome: &Outcome) {
    println!(
        "Session completed: {} steps, t = {} s",
        outcome.session.steps, outcome.session.final_time
    );
    if let Some(duration) = outcome.session.run_duration() {
        println!("Run took {:?}", duration);
    }
    for (summary, report) in outcome.session.nodes.iter().zip(&outcome.nodes) {
        println!(
            "  {} ({}): {} steps, {} stale inputs, {} overruns, {} nacks",
            summary.name,
            summary.node,
            report.steps,
            report.stale_inputs,
            report.overruns,
            summary.nacks
        );
    }
}

/// Writes JSON logs into a timestamped file under `./logs`. Only call once.
fn initialize_logging() -> Result<(), CliError> {
    let main_path = "./logs";
    create_dir_all(main_path).map_err(|e| CliError::Logging(e.to_string()))?;
    let file_path = format!(
        "{}/cosim-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(file_path)
        .map_err(|e| CliError::Logging(e.to_string()))?;
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .with_env_filter(env_filter())
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| CliError::Logging(e.to_string()))
}

fn initialize_stderr_logging() -> Result<(), CliError> {
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter())
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| CliError::Logging(e.to_string()))
}

/// `RUST_LOG`, or warnings and up when it is unset.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_requires_every_argument() {
        let parsed = Args::try_parse_from(["cosim", "generate", "--model", "ramp", "--host", "127.0.0.1"]);
        let error = parsed.unwrap_err();
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn parses_a_node_run() {
        let args = Args::try_parse_from([
            "cosim",
            "--log",
            "run",
            "node",
            "--descriptor",
            "gain.json",
            "--model",
            "gain:2",
            "--stop-time",
            "5",
        ])
        .unwrap();
        assert!(args.log);
        match args.command {
            Command::Run {
                role: Role::Node {
                    stop_time,
                    input_wait,
                    ..
                },
            } => {
                assert_eq!(stop_time, Some(5.0));
                assert_eq!(input_wait, 200);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn model_must_match_the_descriptor() {
        let descriptor = Model::Gain { gain: 1.0 }
            .descriptor("gain", Ipv4Addr::LOCALHOST, 5000, 0.1)
            .unwrap();
        assert!(check_model(&descriptor, &Model::Integrator).is_ok());
        assert!(matches!(
            check_model(&descriptor, &Model::Ramp { slope: 1.0 }),
            Err(CliError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn failures_map_to_exit_codes() {
        assert_eq!(CliError::from(ModelError::Unknown("pid".into())).exit_code(), 2);
        assert_eq!(CliError::from(SessionError::NoNodes).exit_code(), 2);
        assert_eq!(CliError::from(SessionError::Aborted).exit_code(), 1);
        assert_eq!(CliError::from(NodeError::Interrupted).exit_code(), 1);
    }
}
