use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use knihscrap::config::Settings;
use knihscrap::logging::{init_tracing, LogContext};
use knihscrap::process::{Pipeline, Stage};
use knihscrap::{info_time, Result};

#[derive(Debug, Parser)]
#[command(name = "knihscrap", about = "Scrape book offers from Trh knih through rotating proxies")]
struct Cli {
    /// Settings file.
    #[arg(short, long, env = "KNIHSCRAP_CONFIG", default_value = "config.toml")]
    config: PathBuf,
    /// First listing page, overrides the settings file.
    #[arg(long)]
    start_page: Option<usize>,
    /// Last listing page, overrides the settings file.
    #[arg(long)]
    end_page: Option<usize>,
    /// Write the table here, CSV for `.csv` and JSON otherwise.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Also append logs to this file.
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let start_time = Local::now();
    let mut settings = Settings::load(&cli.config)?;
    if let Some(start_page) = cli.start_page {
        settings.scraping.start_page = start_page;
    }
    if let Some(end_page) = cli.end_page {
        settings.scraping.end_page = end_page;
    }
    settings.validate()?;

    let run_id = start_time.format("%Y%m%d%H%M%S").to_string();
    let run = Pipeline::new(settings, LogContext::run(&run_id)).run().await?;

    match run.stage {
        Stage::Assembled => {
            println!("{}", run.table);
            if let Some(path) = cli.output {
                run.table.save(&path).await?;
                info_time!("Wrote the results to file: {}", path.display());
            }
        }
        stage => println!("Nothing to assemble, the run stopped at {stage}."),
    }
    info_time!(start_time, "Full program time:");

    Ok(())
}
