use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use pricepath::core::{self, Analysis};
use pricepath::market::{Interval, MarketClient};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliInterval {
    Daily,
    Weekly,
    Monthly,
}

impl From<CliInterval> for Interval {
    fn from(value: CliInterval) -> Self {
        match value {
            CliInterval::Daily => Interval::Daily,
            CliInterval::Weekly => Interval::Weekly,
            CliInterval::Monthly => Interval::Monthly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pricepath",
    about = "Decompose stock price changes into planned and unexpected components, \
             replay the deterministic path, and simulate a seeded stochastic alternative"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chart UI, local static files, and the market-data proxy
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Fetch a price history once and print the decomposition summary
    Analyze {
        #[arg(long)]
        ticker: String,
        #[arg(long, default_value = "2024-01-01")]
        start_date: NaiveDate,
        #[arg(long, default_value = "2025-12-31")]
        end_date: NaiveDate,
        #[arg(long, value_enum, default_value_t = CliInterval::Monthly)]
        interval: CliInterval,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = pricepath::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Analyze {
            ticker,
            start_date,
            end_date,
            interval,
            seed,
        } => {
            if let Err(e) = run_analyze(&ticker, start_date, end_date, interval.into(), seed).await
            {
                eprintln!("Analysis error: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_analyze(
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
    seed: u64,
) -> Result<(), String> {
    let ticker = ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err("--ticker must not be empty".to_string());
    }
    if end <= start {
        return Err("--end-date must be after --start-date".to_string());
    }

    let client = MarketClient::new();
    let points = client
        .fetch_history(&ticker, start, end, interval)
        .await
        .map_err(|e| e.to_string())?;
    let analysis = core::analyze(&points, seed).map_err(|e| e.to_string())?;

    print_summary(&ticker, &analysis);
    Ok(())
}

fn print_summary(ticker: &str, analysis: &Analysis) {
    let last = analysis.actual.len() - 1;

    println!(
        "{ticker}: {} periods from {} to {}",
        analysis.actual.len(),
        analysis.dates[0],
        analysis.dates[last]
    );
    println!();
    println!(
        "{:<12} {:>10} {:>14} {:>12}",
        "date", "actual", "deterministic", "stochastic"
    );
    for i in 0..analysis.actual.len() {
        let marker = if analysis.spikes.iter().any(|s| s.index == i) {
            "  <- spike"
        } else {
            ""
        };
        println!(
            "{:<12} {:>10.2} {:>14.2} {:>12.2}{marker}",
            analysis.dates[i].to_string(),
            analysis.actual[i],
            analysis.deterministic[i],
            analysis.stochastic[i]
        );
    }
    println!();
    println!("starting price:             {:>10.2}", analysis.actual[0]);
    println!("avg planned change:         {:>10.2}", analysis.planned_change);
    println!("unexpected std dev:         {:>10.2}", analysis.unexpected_std_dev);
    println!("spike threshold:            {:>10.2}", analysis.spike_threshold);
    println!("final actual price:         {:>10.2}", analysis.actual[last]);
    println!(
        "final deterministic price:  {:>10.2}",
        analysis.deterministic[last]
    );
    println!(
        "final stochastic price:     {:>10.2}",
        analysis.stochastic[last]
    );
}
