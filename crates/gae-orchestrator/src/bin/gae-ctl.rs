// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Graph Analytics Engine control CLI
//!
//! Runs analysis batches and manages engines from the command line.
//!
//! Usage:
//!   gae-ctl <command> [options]
//!
//! Commands:
//!   run <analyses.json> [--parallel <n>] [--output <file>]
//!   estimate --size <eN> --minutes <m>
//!   engines                       List running engines
//!   teardown <engine_id>          Delete an engine
//!   check                         Check connection settings and credentials
//!
//! Exit codes: 0 all analyses completed, 1 some failed (or a command
//! failed), 2 all analyses failed, 3 usage or configuration error.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use gae_orchestrator::{
    AnalysisConfig, BatchRunner, BatchSummary, ConfigError, ConnectionFactory,
    ConnectionSettings, CostModel, EngineConnection, EngineHandle, EngineSize,
    OrchestratorConfig, WorkflowOrchestrator,
};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 3;

fn print_usage() {
    eprintln!(
        r#"Usage: gae-ctl <command> [options]

Run graph analytics jobs on ephemeral engines.

COMMANDS:
    run <analyses.json>             Run one analysis or an array of analyses
    estimate                        Estimate the cost of an engine run
    engines                         List engines currently running
    teardown <engine_id>            Delete an engine left behind by a failed run
    check                           Check connection settings and credentials

RUN OPTIONS:
    --parallel <n>                  Analyses to run at once (default: 1)
    --output <file>                 Write results as JSON to a file

ESTIMATE OPTIONS:
    --size <eN>                     Engine size: e4, e8, e16, e32, e64, e128 (required)
    --minutes <m>                   Engine runtime in minutes (required)

ENVIRONMENT:
    GAE_DEPLOYMENT_MODE             amp (managed) or self_managed (default: amp)
    ARANGO_ENDPOINT                 Database endpoint, e.g. https://host:8529
    ARANGO_DATABASE                 Database holding the graph
    ARANGO_USER / ARANGO_PASSWORD   Database credentials (self-managed)
    ARANGO_GRAPH_API_KEY_ID         API key id (managed)
    ARANGO_GRAPH_API_KEY_SECRET     API key secret (managed)
    ARANGO_GRAPH_TOKEN              Pre-issued bearer token (managed)
    GAE_EXISTING_ENGINES            warn or abort when engines are already running
    RUST_LOG                        Log filter (default: gae_orchestrator=info)

EXIT CODES:
    0  all analyses completed
    1  some analyses failed, or the command failed
    2  all analyses failed
    3  usage or configuration error

EXAMPLES:
    # Run a batch two at a time and keep the results
    gae-ctl run analyses.json --parallel 2 --output results.json

    # Cost of an e16 engine for 90 minutes
    gae-ctl estimate --size e16 --minutes 90

    # Remove an engine a crashed run left behind
    gae-ctl teardown zk3m9x1q
"#
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Run {
        file: String,
        parallel: usize,
        output: Option<String>,
    },
    Estimate {
        size: EngineSize,
        minutes: f64,
    },
    Engines,
    Teardown {
        engine_id: String,
    },
    Check,
}

/// Bad input from the command line or the analyses file.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

/// Analyses file: a single analysis or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalysisFile {
    Many(Vec<AnalysisConfig>),
    One(Box<AnalysisConfig>),
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "run" => {
            let mut file: Option<String> = None;
            let mut parallel = 1usize;
            let mut output: Option<String> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--parallel" => {
                        i += 1;
                        parallel = args
                            .get(i)
                            .ok_or("--parallel requires a number")?
                            .parse()
                            .map_err(|_| "--parallel must be a positive integer")?;
                        if parallel == 0 {
                            return Err("--parallel must be a positive integer".to_string());
                        }
                    }
                    "--output" => {
                        i += 1;
                        output = Some(args.get(i).ok_or("--output requires a path")?.clone());
                    }
                    arg if arg.starts_with("--") => {
                        return Err(format!("Unknown argument: {}", arg));
                    }
                    arg => {
                        if file.is_some() {
                            return Err(format!("Unexpected argument: {}", arg));
                        }
                        file = Some(arg.to_string());
                    }
                }
                i += 1;
            }

            Ok(Command::Run {
                file: file.ok_or("Analyses file required")?,
                parallel,
                output,
            })
        }
        "estimate" => {
            let mut size: Option<EngineSize> = None;
            let mut minutes: Option<f64> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--size" => {
                        i += 1;
                        let value = args.get(i).ok_or("--size requires a value")?;
                        size = Some(value.parse().map_err(|e| format!("{}", e))?);
                    }
                    "--minutes" => {
                        i += 1;
                        let value: f64 = args
                            .get(i)
                            .ok_or("--minutes requires a value")?
                            .parse()
                            .map_err(|_| "--minutes must be a number")?;
                        if !value.is_finite() || value < 0.0 {
                            return Err("--minutes must be zero or more".to_string());
                        }
                        minutes = Some(value);
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Estimate {
                size: size.ok_or("--size is required")?,
                minutes: minutes.ok_or("--minutes is required")?,
            })
        }
        "engines" => Ok(Command::Engines),
        "teardown" => {
            let engine_id = args.get(2).ok_or("Engine ID required")?.clone();
            Ok(Command::Teardown { engine_id })
        }
        "check" => Ok(Command::Check),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gae_orchestrator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    match execute_command(cmd).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Usage and configuration problems exit 3; anything else exits 1.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    let configuration = error.downcast_ref::<UsageError>().is_some()
        || error.downcast_ref::<ConfigError>().is_some()
        || error.downcast_ref::<gae_orchestrator::Error>().is_some();
    if configuration { EXIT_USAGE } else { EXIT_FAILURE }
}

async fn execute_command(cmd: Command) -> anyhow::Result<u8> {
    match cmd {
        Command::Run {
            file,
            parallel,
            output,
        } => {
            let configs = load_analyses(&file)?;
            let orchestrator = Arc::new(WorkflowOrchestrator::new(
                connect()?,
                OrchestratorConfig::from_env()?,
            )?);

            let results = BatchRunner::new(orchestrator)
                .with_parallelism(parallel)
                .run_batch(&configs)
                .await;
            for result in &results {
                println!("{}", result.summary());
                println!();
            }
            let summary = BatchSummary::from_results(&results);
            println!("{}", summary);

            if let Some(path) = output {
                let report = json!({ "summary": summary, "results": results });
                fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("failed to write results to {}", path))?;
                println!("Results written to {}", path);
            }
            Ok(summary.outcome().exit_code())
        }

        Command::Estimate { size, minutes } => {
            let cost = CostModel::estimate(size, minutes * 60.0);
            println!(
                "{} for {} min: ${:.4} (${:.2}/hour)",
                size,
                minutes,
                cost,
                CostModel::hourly_rate(size)
            );
            Ok(0)
        }

        Command::Engines => {
            let connection = connect()?;
            connection.authenticate().await?;
            let engines = connection.existing_engines().await?;
            if engines.is_empty() {
                println!("No engines running");
            }
            for engine in engines {
                println!("{}", engine);
            }
            Ok(0)
        }

        Command::Teardown { engine_id } => {
            let connection = connect()?;
            connection.authenticate().await?;
            connection
                .teardown(&EngineHandle::new(engine_id.as_str(), ""))
                .await
                .with_context(|| format!("failed to delete engine {}", engine_id))?;
            println!("Engine {} deleted", engine_id);
            Ok(0)
        }

        Command::Check => {
            let settings = ConnectionSettings::from_env()?;
            let warnings = settings.lint_credentials();
            for warning in &warnings {
                println!("warning: {}", warning);
            }
            let connection = ConnectionFactory::create(&settings)?;
            connection
                .authenticate()
                .await
                .context("authentication failed")?;
            println!(
                "Authenticated ({} mode, database {})",
                connection.deployment_mode(),
                connection.database()
            );
            Ok(if warnings.is_empty() { 0 } else { EXIT_FAILURE })
        }
    }
}

fn connect() -> anyhow::Result<Arc<dyn EngineConnection>> {
    let settings = ConnectionSettings::from_env()?;
    Ok(ConnectionFactory::create(&settings)?)
}

fn load_analyses(path: &str) -> Result<Vec<AnalysisConfig>, UsageError> {
    let content = fs::read_to_string(path)
        .map_err(|e| UsageError(format!("failed to read {}: {}", path, e)))?;
    parse_analyses(&content).map_err(|e| UsageError(format!("invalid analyses in {}: {}", path, e)))
}

fn parse_analyses(content: &str) -> Result<Vec<AnalysisConfig>, serde_json::Error> {
    Ok(match serde_json::from_str(content)? {
        AnalysisFile::Many(configs) => configs,
        AnalysisFile::One(config) => vec![*config],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gae_orchestrator::Algorithm;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_command() {
        let result = parse_args_from_vec(&args(&["gae-ctl"]));
        assert_eq!(result.unwrap_err(), "No command specified");
    }

    #[test]
    fn test_parse_unknown_command() {
        let result = parse_args_from_vec(&args(&["gae-ctl", "deploy"]));
        assert!(result.unwrap_err().contains("Unknown command"));
    }

    #[test]
    fn test_parse_run_minimal() {
        let cmd = parse_args_from_vec(&args(&["gae-ctl", "run", "jobs.json"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                file: "jobs.json".to_string(),
                parallel: 1,
                output: None,
            }
        );
    }

    #[test]
    fn test_parse_run_full() {
        let cmd = parse_args_from_vec(&args(&[
            "gae-ctl",
            "run",
            "--parallel",
            "4",
            "jobs.json",
            "--output",
            "out.json",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                file: "jobs.json".to_string(),
                parallel: 4,
                output: Some("out.json".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_run_errors() {
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "run"])).unwrap_err(),
            "Analyses file required"
        );
        assert!(
            parse_args_from_vec(&args(&["gae-ctl", "run", "a.json", "--parallel", "0"]))
                .unwrap_err()
                .contains("positive integer")
        );
        assert!(
            parse_args_from_vec(&args(&["gae-ctl", "run", "a.json", "b.json"]))
                .unwrap_err()
                .contains("Unexpected argument")
        );
        assert!(
            parse_args_from_vec(&args(&["gae-ctl", "run", "a.json", "--verbose"]))
                .unwrap_err()
                .contains("Unknown argument")
        );
    }

    #[test]
    fn test_parse_estimate() {
        let cmd = parse_args_from_vec(&args(&[
            "gae-ctl", "estimate", "--size", "E32", "--minutes", "90",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Estimate {
                size: EngineSize::E32,
                minutes: 90.0,
            }
        );
    }

    #[test]
    fn test_parse_estimate_errors() {
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "estimate", "--minutes", "5"])).unwrap_err(),
            "--size is required"
        );
        assert!(
            parse_args_from_vec(&args(&["gae-ctl", "estimate", "--size", "e3", "--minutes", "5"]))
                .unwrap_err()
                .contains("unknown engine size")
        );
        assert!(
            parse_args_from_vec(&args(&[
                "gae-ctl", "estimate", "--size", "e8", "--minutes", "-1"
            ]))
            .unwrap_err()
            .contains("zero or more")
        );
    }

    #[test]
    fn test_parse_teardown() {
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "teardown", "zk3m9x1q"])).unwrap(),
            Command::Teardown {
                engine_id: "zk3m9x1q".to_string()
            }
        );
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "teardown"])).unwrap_err(),
            "Engine ID required"
        );
    }

    #[test]
    fn test_parse_engines_and_check() {
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "engines"])).unwrap(),
            Command::Engines
        );
        assert_eq!(
            parse_args_from_vec(&args(&["gae-ctl", "check"])).unwrap(),
            Command::Check
        );
    }

    #[test]
    fn test_parse_analyses_single_and_array() {
        let single = parse_analyses(
            r#"{"name": "demand", "algorithm": "pagerank",
                "vertex_collections": ["users"], "edge_collections": ["follows"]}"#,
        )
        .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].algorithm, Algorithm::PageRank);

        let many = parse_analyses(
            r#"[{"name": "a", "algorithm": "wcc",
                 "vertex_collections": ["v"], "edge_collections": ["e"]},
                {"name": "b", "algorithm": "scc",
                 "vertex_collections": ["v"], "edge_collections": ["e"]}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].name, "b");

        assert!(parse_analyses("[1, 2]").is_err());
    }

    #[test]
    fn test_exit_code_for_errors() {
        let usage = anyhow::Error::new(UsageError("bad file".to_string()));
        assert_eq!(exit_code_for(&usage), EXIT_USAGE);

        let config = anyhow::Error::new(ConfigError::MissingEnvVar("ARANGO_ENDPOINT"));
        assert_eq!(exit_code_for(&config), EXIT_USAGE);

        let runtime = anyhow::anyhow!("connection refused");
        assert_eq!(exit_code_for(&runtime), EXIT_FAILURE);
    }
}
