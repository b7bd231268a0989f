//! sfharvest: export Salesforce query results through the Bulk API v2.
//!
//! Connection settings come from `SALESFORCE_INSTANCE_URL`,
//! `SALESFORCE_ACCESS_TOKEN` and, optionally, `SALESFORCE_API_VERSION`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sfharvest::config::{
    ClientConfig, HarvestOptions, PageCountPolicy, PollConfig, RequestOptions, DEFAULT_PAGE_SIZE,
};
use sfharvest::error::AppError;
use sfharvest::salesforce::{BulkQueryClient, ResultHarvester, SalesforceClient};

/// Salesforce bulk query export tool.
#[derive(Parser, Debug)]
#[command(name = "sfharvest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SFHARVEST_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a SOQL query as a bulk job and print its id.
    Submit {
        /// SOQL query text.
        #[arg(long)]
        query: String,
    },
    /// Print the current status of a job.
    Status {
        job_id: String,
    },
    /// Abort a job that has not finished.
    Abort {
        job_id: String,
    },
    /// Download every result page of a completed job into one CSV file.
    Harvest {
        job_id: String,
        /// Destination CSV path.
        #[arg(long = "out")]
        output: PathBuf,
        #[command(flatten)]
        paging: PagingArgs,
    },
    /// Submit, wait for completion, then harvest.
    Export {
        /// SOQL query text.
        #[arg(long)]
        query: String,
        /// Destination CSV path.
        #[arg(long = "out")]
        output: PathBuf,
        #[command(flatten)]
        paging: PagingArgs,
        /// Give up waiting for the job after this many seconds.
        #[arg(long)]
        max_wait_secs: Option<u64>,
    },
}

#[derive(clap::Args, Debug)]
struct PagingArgs {
    /// Records requested per page after the first.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u64,

    /// Fail if a page reports a record count other than the one requested.
    #[arg(long)]
    reconcile: bool,
}

impl PagingArgs {
    fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            page_size: self.page_size,
            page_count_policy: if self.reconcile {
                PageCountPolicy::Reconcile
            } else {
                PageCountPolicy::TrustRequested
            },
            request: RequestOptions::default(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(cli.command).await {
        let presentation = error.to_presentation();
        eprintln!("error: {}: {}", presentation.title, presentation.message);
        if let Some(action) = presentation.action {
            eprintln!("hint: {}", action);
        }
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), AppError> {
    let config = ClientConfig::from_env()?;
    let transport = SalesforceClient::new(&config)?;
    let jobs = BulkQueryClient::from_config(Arc::new(transport), &config);
    let request = RequestOptions::default();

    match command {
        Command::Submit { query } => match jobs.submit(&query, &request).await? {
            Some(job_id) => println!("{}", job_id),
            None => return Err(AppError::Submission("no job id available".to_string())),
        },
        Command::Status { job_id } => {
            let status = jobs.get_status(&job_id, &request).await?;
            print_json(&status)?;
        }
        Command::Abort { job_id } => {
            jobs.abort(&job_id, &request).await?;
            println!("{}", job_id);
        }
        Command::Harvest {
            job_id,
            output,
            paging,
        } => {
            let harvester = ResultHarvester::new(jobs, paging.harvest_options())?;
            let result = harvester.harvest(&job_id, &output).await?;
            print_json(&result)?;
        }
        Command::Export {
            query,
            output,
            paging,
            max_wait_secs,
        } => {
            let poll = PollConfig {
                max_wait: max_wait_secs.map(Duration::from_secs),
                ..PollConfig::default()
            };
            let harvester = ResultHarvester::new(jobs, paging.harvest_options())?;
            let result = harvester.export(&query, &output, &poll).await?;
            print_json(&result)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}
