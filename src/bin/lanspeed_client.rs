use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;
use lanspeed::client::{Client, ClientConfig};
use lanspeed::emitter::{Emitter, HumanReadableEmitter, JsonEmitter};
use lanspeed::params;
use lanspeed::plan::{FixedPlan, PlanSource, TestPlan};
use lanspeed::udp::ReceiveConfig;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, clap::ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Parser, Debug)]
struct Cli {
    /// Bytes per transfer. With --tcp and --udp, skips the interactive prompt
    #[arg(long)]
    size: Option<u64>,
    /// Number of concurrent TCP transfers
    #[arg(long)]
    tcp: Option<usize>,
    /// Number of concurrent UDP transfers
    #[arg(long)]
    udp: Option<usize>,
    /// Stop after this many rounds (default: run until interrupted)
    #[arg(long)]
    rounds: Option<usize>,
    /// Port to listen on for server offers
    #[arg(long, default_value_t = params::DISCOVERY_PORT)]
    discovery_port: u16,
    /// Give up looking for a server after this many seconds
    #[arg(long)]
    discovery_timeout: Option<u64>,
    /// Seconds of silence that end a UDP transfer
    #[arg(long, default_value_t = params::INACTIVITY_WINDOW.as_secs_f64())]
    inactivity: f64,
    /// Output format to use: 'human' or 'json' for batch processing
    #[arg(long, default_value = "human")]
    format: Format,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Asks for a plan on the terminal before every round.
struct Prompt;

impl PlanSource for Prompt {
    async fn next_plan(&mut self) -> lanspeed::error::Result<Option<TestPlan>> {
        let answers = tokio::task::spawn_blocking(read_answers)
            .await
            .map_err(io::Error::other)??;
        match answers {
            Some([size, tcp, udp]) => Ok(Some(TestPlan::parse(&size, &tcp, &udp)?)),
            None => Ok(None),
        }
    }
}

// Prompts go to stderr so JSON output on stdout stays clean.
fn read_answers() -> io::Result<Option<[String; 3]>> {
    let questions = [
        "Enter size (bytes): ",
        "Enter TCP connections: ",
        "Enter UDP connections: ",
    ];
    let mut answers: [String; 3] = Default::default();
    let mut stdin = io::stdin().lock();
    for (question, answer) in questions.iter().zip(answers.iter_mut()) {
        eprint!("{question}");
        io::stderr().flush()?;
        if stdin.read_line(answer)? == 0 {
            return Ok(None);
        }
    }
    Ok(Some(answers))
}

fn inactivity_window(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|window| !window.is_zero())
}

fn log_filter(level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    Ok(EnvFilter::from_default_env().add_directive(format!("lanspeed={level}").parse()?))
}

fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let inactivity_window = match inactivity_window(cli.inactivity) {
        Some(window) => window,
        None => {
            eprintln!("error: --inactivity must be a positive number of seconds");
            std::process::exit(1);
        }
    };

    let mut emitter: Box<dyn Emitter> = match cli.format {
        Format::Human => Box::new(HumanReadableEmitter::new(io::stdout())),
        Format::Json => Box::new(JsonEmitter::new(io::stdout())),
    };

    let client = Client::new(ClientConfig {
        discovery_port: cli.discovery_port,
        discovery_timeout: cli.discovery_timeout.map(Duration::from_secs),
        udp: ReceiveConfig {
            inactivity_window,
            ..Default::default()
        },
        ..Default::default()
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    eprintln!("Client started, waiting for server...");
    match (cli.size, cli.tcp, cli.udp) {
        (Some(size), Some(tcp), Some(udp)) => {
            let plan = TestPlan::new(size, tcp, udp)?;
            let mut plans = FixedPlan::new(plan, cli.rounds);
            client.run(&mut plans, &mut *emitter, shutdown_rx).await?;
        }
        (None, None, None) => {
            client.run(&mut Prompt, &mut *emitter, shutdown_rx).await?;
        }
        _ => {
            eprintln!("error: --size, --tcp and --udp must be given together");
            std::process::exit(1);
        }
    }

    // A prompt may still be blocked on stdin; don't wait for it.
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactivity_window_bounds() {
        assert_eq!(inactivity_window(2.0), Some(Duration::from_secs(2)));
        assert_eq!(inactivity_window(0.25), Some(Duration::from_millis(250)));
        assert_eq!(inactivity_window(0.0), None);
        assert_eq!(inactivity_window(-1.0), None);
        assert_eq!(inactivity_window(f64::NAN), None);
        assert_eq!(inactivity_window(f64::INFINITY), None);
        assert_eq!(inactivity_window(1e30), None);
    }

    #[test]
    fn log_level_flag() {
        assert!(log_filter("warn").is_ok());
        assert!(log_filter("loud").is_err());
    }
}
