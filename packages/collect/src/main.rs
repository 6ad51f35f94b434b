#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for product collection sessions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shopscout_cli_utils::IndicatifProgress;
use shopscout_collect::config::{SessionConfig, platform_filter, split_list};
use shopscout_collect::sink::{
    CallbackProgressSink, JsonLinesSink, NullRecordSink, RecordSink, write_result,
};
use shopscout_source::registry::all_sources;

#[derive(Parser)]
#[command(name = "shopscout_collect", about = "Multi-source product collection tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all configured storefront sources
    Sources,
    /// Run one collection session
    Collect {
        /// Session config file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Comma-separated list of source IDs (overrides `SHOPSCOUT_SOURCES` env var)
        #[arg(long)]
        sources: Option<String>,
        /// Comma-separated list of search terms
        #[arg(long)]
        terms: Option<String>,
        /// Comma-separated list of Shopify shop domains
        #[arg(long)]
        shopify_domains: Option<String>,
        /// Total number of unique records to collect
        #[arg(long)]
        target: Option<u64>,
        /// Minimum number of records from every source
        #[arg(long)]
        min_per_source: Option<u64>,
        /// Maximum number of attempts
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Write the session result as JSON to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Stream admitted records to this file as JSON lines
        #[arg(long)]
        stream: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = shopscout_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sources => {
            println!("{:<12} {:<12} DELAY BAND", "ID", "NAME");
            println!("{}", "-".repeat(50));
            for source in &all_sources() {
                let band = source.delay_band();
                println!(
                    "{:<12} {:<12} {}-{}ms",
                    source.id(),
                    source.name(),
                    band.min_ms,
                    band.max_ms
                );
            }
        }
        Commands::Collect {
            config,
            sources,
            terms,
            shopify_domains,
            target,
            min_per_source,
            max_attempts,
            output,
            stream,
        } => {
            let mut session = match &config {
                Some(path) => SessionConfig::load(path)?,
                None => SessionConfig::default(),
            };
            session.apply_platform_filter(platform_filter(sources).as_deref());
            if let Some(terms) = terms {
                session.search_terms = split_list(&terms);
            }
            if let Some(domains) = shopify_domains {
                session.shopify_domains = split_list(&domains);
            }
            if let Some(target) = target {
                session.global_target = target;
            }
            if let Some(min) = min_per_source {
                session.min_per_source = min;
            }
            if let Some(max) = max_attempts {
                session.max_attempts = max;
            }

            let handles = session.build_handles()?;
            let progress =
                CallbackProgressSink::new(IndicatifProgress::records_bar(&multi, "Collecting"));
            let mut record_sink: Box<dyn RecordSink> = match &stream {
                Some(path) => Box::new(JsonLinesSink::create(path)?),
                None => Box::new(NullRecordSink),
            };

            let result = shopscout_collect::run(
                session.goal(),
                handles,
                session.orchestrator_config(),
                &progress,
                record_sink.as_mut(),
            )
            .await?;

            write_result(output.as_deref(), &result)?;
        }
    }

    Ok(())
}
