//! # Operator Client Entry Point
//!
//! Command-line front end for the coordinator's operator endpoints. One
//! subcommand per operator action.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- status
//! cargo run --bin client -- --url http://scanner.local:8888 start
//! cargo run --bin client -- monitor
//! cargo run --bin client -- lcd "Hello" "World"
//! cargo run --bin client -- capture --output test.jpg
//! cargo run --bin client -- motor 90
//! cargo run --bin client -- motor -- -45 --relative
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{warn, LevelFilter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use scan_coordinator::common::messages::{
    AbortResponse, ErrorResponse, LcdRequest, MessageResponse, MotorRequest, MotorResponse,
    StatusResponse,
};
use scan_coordinator::devices::display::DISPLAY_WIDTH;
use scan_coordinator::server::reconstruction::ReconstructionState;
use scan_coordinator::server::status::ScanStatus;

/// Command-line arguments for the operator client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator base URL
    #[arg(long, default_value = "http://localhost:8888")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device connectivity, scan and reconstruction status
    Status,
    /// Start a scan
    Start,
    /// Abort the running scan
    Abort,
    /// Poll status every second until the scan stops (Ctrl-C to quit)
    Monitor,
    /// Write one or two lines on the actuator display
    Lcd {
        line1: String,
        line2: Option<String>,
    },
    /// Take a single test photo and save it locally
    Capture {
        #[arg(short, long, default_value = "capture.jpg")]
        output: PathBuf,
    },
    /// Move the turntable outside a scan
    Motor {
        /// Degrees: 0-359 absolute, -360..360 relative
        #[arg(allow_hyphen_values = true)]
        angle: i32,
        #[arg(long)]
        relative: bool,
    },
}

fn init_logger() {
    Builder::new()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();
}

struct Operator {
    http: reqwest::Client,
    base: String,
}

impl Operator {
    fn new(base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> anyhow::Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Could not reach coordinator at {}. Is it running?", self.base))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => bail!("{} ({}): {}", endpoint, status, body.error),
            Err(_) => bail!("{} returned {}", endpoint, status),
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> anyhow::Result<T> {
        let request = self.http.get(format!("{}/api/{}", self.base, endpoint));
        Ok(self.send(request, endpoint).await?.json().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> anyhow::Result<T> {
        let mut request = self.http.post(format!("{}/api/{}", self.base, endpoint));
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(self.send(request, endpoint).await?.json().await?)
    }

    async fn post_raw(&self, endpoint: &str) -> anyhow::Result<bytes::Bytes> {
        let request = self.http.post(format!("{}/api/{}", self.base, endpoint));
        Ok(self.send(request, endpoint).await?.bytes().await?)
    }
}

fn print_status(status: &StatusResponse) {
    println!("System Status:");
    println!("  Actuator:       {:?}", status.actuator);
    println!("  Capture:        {:?}", status.capture);
    println!("  Scan:           {}", status.scan_status);
    match &status.reconstruction {
        ReconstructionState::NeverRun => println!("  Reconstruction: never run"),
        ReconstructionState::Running { started_at } => {
            println!("  Reconstruction: running since {}", started_at)
        }
        ReconstructionState::Finished {
            finished_at,
            outcome,
        } => println!("  Reconstruction: {:?} at {}", outcome, finished_at),
    }
}

fn display_line(label: &str, line: String) -> String {
    if line.chars().count() > DISPLAY_WIDTH {
        warn!("{} will be truncated (max {} characters)", label, DISPLAY_WIDTH);
        line.chars().take(DISPLAY_WIDTH).collect()
    } else {
        line
    }
}

async fn monitor(operator: &Operator) -> anyhow::Result<()> {
    println!("Monitoring scan progress (Ctrl-C to stop monitoring)");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped monitoring");
                return Ok(());
            }
            _ = ticker.tick() => {
                let status: StatusResponse = operator.get("status").await?;
                print!("\rStatus: {:<10}", status.scan_status.to_string());
                std::io::stdout().flush()?;
                if status.scan_status != ScanStatus::Scanning {
                    println!("\nScan completed or stopped");
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let operator = Operator::new(&args.url)?;

    match args.command {
        Command::Status => {
            let status: StatusResponse = operator.get("status").await?;
            print_status(&status);
        }
        Command::Start => {
            let response: MessageResponse = operator.post::<(), _>("start", None).await?;
            println!("{}", response.message);
        }
        Command::Abort => {
            let response: AbortResponse = operator.post::<(), _>("abort", None).await?;
            println!("{}", response.message);
            if !response.errors.is_empty() {
                println!("Warnings:");
                for error in &response.errors {
                    println!("- {}", error);
                }
            }
        }
        Command::Monitor => monitor(&operator).await?,
        Command::Lcd { line1, line2 } => {
            let mut lines = vec![display_line("Line 1", line1)];
            if let Some(line2) = line2.filter(|l| !l.trim().is_empty()) {
                lines.push(display_line("Line 2", line2));
            }
            let request = LcdRequest { lines };
            request.validate()?;

            let response: MessageResponse = operator.post("lcd", Some(&request)).await?;
            println!("{}", response.message);
        }
        Command::Capture { output } => {
            let image = operator.post_raw("capture_single").await?;
            tokio::fs::write(&output, &image)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Saved {} bytes to {}", image.len(), output.display());
        }
        Command::Motor { angle, relative } => {
            let request = MotorRequest { angle, relative };
            request.validate()?;

            let response: MotorResponse = operator.post("motor", Some(&request)).await?;
            println!(
                "{}: {}° ({})",
                response.message,
                response.angle,
                if response.relative { "relative" } else { "absolute" }
            );
        }
    }

    Ok(())
}
