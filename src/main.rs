//! db-fanout - Run one SQL command against many databases concurrently.

use std::sync::Arc;

use db_fanout::cli::Cli;
use db_fanout::config::Config;
use db_fanout::db::{self, Connector, MockConnector};
use db_fanout::error::{FanoutError, Result};
use db_fanout::export::{self, Report};
use db_fanout::logging::{self, LogTable};
use db_fanout::query::{Dispatcher, NoProgress, ProgressReporter, ProgressSink};
use db_fanout::target::{Target, TargetList};
use tracing::{error, info};

/// Exit code when the run completed but some targets failed.
const EXIT_PARTIAL_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    let log_table = LogTable::new();

    if let Err(e) = logging::init_logging(cli.log_file.as_deref(), Some(&log_table)) {
        eprintln!("Warning: {e}");
    }

    match run(cli, &log_table).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_PARTIAL_FAILURE),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            std::process::exit(1);
        }
    }
}

/// Runs the command on every target. Returns whether all targets succeeded.
async fn run(cli: Cli, log_table: &LogTable) -> Result<bool> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    cli.apply_to(&mut config)?;
    config.connection.apply_env_defaults();

    let params = config.run.to_parameters()?;
    let targets = resolve_targets(&cli, &config)?;
    if targets.is_empty() {
        return Err(FanoutError::config(
            "No targets given. Use --target, --targets-file or [[targets]] in the config file",
        ));
    }

    let destination = config.output.destination();
    export::check_destination(&destination, config.output.overwrite)?;
    let parameters = config.output.show_parameters.then(|| {
        export::parameters_table(&params, &config.connection, &config.output, &targets)
    });

    let connector: Arc<dyn Connector> = if cli.mock_db {
        info!("Using mock database");
        Arc::new(MockConnector::new())
    } else {
        info!("Connection: {}", config.connection.display_string());
        db::connector(&config.connection)
    };

    let progress: Arc<dyn ProgressSink> = if cli.quiet {
        Arc::new(NoProgress)
    } else {
        Arc::new(ProgressReporter::stderr("Query", targets.len()))
    };

    info!(
        "Running on {} target(s), {}",
        targets.len(),
        if params.sequential {
            "sequentially".to_string()
        } else {
            format!("up to {} at once", params.parallelism)
        }
    );

    let outcome = Dispatcher::new(connector, params)
        .with_progress(progress)
        .run(targets)
        .await;

    if destination.as_os_str() != "-" {
        info!("Writing results to {}", destination.display());
    }
    let report = Report {
        outcome: &outcome,
        labels: &config.output.labels,
        parameters,
        logs: config.output.show_logs.then(|| log_table.to_table()),
    };
    export::write_json_to(&destination, &report, config.output.overwrite)?;

    Ok(outcome.all_succeeded())
}

/// Resolves targets with precedence: --target flags, then --targets-file,
/// then the config file's [[targets]].
fn resolve_targets(cli: &Cli, config: &Config) -> Result<Vec<Target>> {
    let from_flags = cli.parse_targets()?;
    if !from_flags.is_empty() {
        return Ok(from_flags);
    }

    if let Some(path) = &cli.targets_file {
        return Ok(TargetList::load_from_file(path)?.targets);
    }

    Ok(config.targets.clone())
}
