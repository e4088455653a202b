use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::{Client, Response};
use serde_json::json;
use tlamp_risk::models::{
    FaultType, TowerCondition, TowerLocation, TransmissionLine, TrippingIncident, VoltageClass,
};

#[derive(Parser)]
#[command(name = "tlamp-cli")]
#[command(about = "T-LAMP predictive-maintenance CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "TLAMP_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Show risk predictions for active lines
    Predict {
        /// Lowest risk class to show (0 = low, 1 = medium, 2 = high)
        #[arg(short, long)]
        min_risk: Option<u8>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Retrain the risk model
    Train,

    /// Show evaluation metrics of the current model
    Metrics,

    /// Ask the assistant a question
    Chat {
        #[arg(value_name = "MESSAGE")]
        message: String,
    },

    /// Populate the server with a synthetic fleet
    Seed {
        /// Number of lines to create
        #[arg(short, long, default_value = "40")]
        lines: u32,

        /// Seed for the generator
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Health => {
            let response = client.get(format!("{}/health", cli.endpoint)).send().await?;
            print_body(response).await?;
        }

        Commands::Predict { min_risk, limit } => {
            let mut query = Vec::new();
            if let Some(min_risk) = min_risk {
                query.push(("min_risk", min_risk.to_string()));
            }
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }

            let response = client
                .get(format!("{}/api/ai/predictive-maintenance", cli.endpoint))
                .query(&query)
                .send()
                .await?;
            print_body(response).await?;
        }

        Commands::Train => {
            let response = client
                .post(format!("{}/api/ai/train-model", cli.endpoint))
                .send()
                .await?;
            print_body(response).await?;
        }

        Commands::Metrics => {
            let response = client
                .get(format!("{}/api/ai/model-metrics", cli.endpoint))
                .send()
                .await?;
            print_body(response).await?;
        }

        Commands::Chat { message } => {
            let response = client
                .post(format!("{}/api/ai/chatbot", cli.endpoint))
                .json(&json!({ "message": message }))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            match body.get("response").and_then(|r| r.as_str()) {
                Some(text) => println!("{}", text),
                None => println!("{}", serde_json::to_string_pretty(&body)?),
            }
        }

        Commands::Seed { lines, seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let today = Utc::now().date_naive();
            let (mut n_incidents, mut n_towers) = (0usize, 0usize);

            for i in 1..=lines {
                let line = synthetic_line(&mut rng, i, today);
                let created: TransmissionLine = client
                    .post(format!("{}/transmission-lines", cli.endpoint))
                    .json(&line)
                    .send()
                    .await
                    .with_context(|| format!("failed to reach {}", cli.endpoint))?
                    .error_for_status()
                    .with_context(|| format!("server rejected line {}", line.line_name))?
                    .json()
                    .await?;

                for incident in synthetic_incidents(&mut rng, created.id, today) {
                    client
                        .post(format!("{}/tripping-incidents", cli.endpoint))
                        .json(&incident)
                        .send()
                        .await?
                        .error_for_status()
                        .context("server rejected incident")?;
                    n_incidents += 1;
                }

                for tower in synthetic_towers(&mut rng, created.id) {
                    client
                        .post(format!("{}/tower-locations", cli.endpoint))
                        .json(&tower)
                        .send()
                        .await?
                        .error_for_status()
                        .context("server rejected tower")?;
                    n_towers += 1;
                }
            }

            println!(
                "Seeded {} lines, {} incidents and {} towers",
                lines, n_incidents, n_towers
            );
        }
    }

    Ok(())
}

async fn print_body(response: Response) -> Result<()> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        eprintln!("Request failed with status {}", status);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn synthetic_line(rng: &mut StdRng, index: u32, today: NaiveDate) -> TransmissionLine {
    let voltages = VoltageClass::all();
    let voltage = voltages[rng.gen_range(0..voltages.len())];
    let age_days = rng.gen_range(365..=40 * 365);

    TransmissionLine::new(
        format!("{} KV SEED-LINE-{:03}", voltage.kilovolts(), index),
        voltage,
        rng.gen_range(10.0..400.0),
        Some(today - Duration::days(age_days)),
    )
}

/// Roughly a third of lines stay quiet, a few trip often
fn synthetic_incidents(rng: &mut StdRng, line_id: u64, today: NaiveDate) -> Vec<TrippingIncident> {
    let faults = FaultType::all();
    let count = match rng.gen_range(0..10) {
        0..=3 => rng.gen_range(0..3),
        4..=7 => rng.gen_range(3..10),
        _ => rng.gen_range(10..20),
    };

    (0..count)
        .map(|_| {
            let fault = faults[rng.gen_range(0..faults.len())];
            TrippingIncident::new(line_id, today - Duration::days(rng.gen_range(0..1000)), fault)
                .with_downtime(rng.gen_range(5..600))
        })
        .collect()
}

fn synthetic_towers(rng: &mut StdRng, line_id: u64) -> Vec<TowerLocation> {
    (1..=rng.gen_range(3..12))
        .map(|n| {
            let condition = match rng.gen_range(0..10) {
                0 => TowerCondition::UnderRepair,
                1 | 2 => TowerCondition::NeedsInspection,
                _ => TowerCondition::Good,
            };
            TowerLocation::new(line_id, format!("T{:03}", n), condition)
                .with_position(rng.gen_range(8.0..35.0), rng.gen_range(68.0..97.0))
        })
        .collect()
}
