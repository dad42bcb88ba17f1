use std::path::{Path, PathBuf};
use std::process::ExitCode;

use learning_path_engine::config::AppConfig;
use learning_path_engine::engine::{Attempt, CatalogDocument, LearningPathEngine};
use learning_path_engine::error::EngineResult;
use learning_path_engine::logging;

const USAGE: &str =
    "usage: learning-path-engine <catalog.json|-|--sample> <target[,target...]> [max_minutes] [attempts.json]";
const DEFAULT_BUDGET_MINUTES: f64 = 120.0;
const CLI_USER: &str = "cli";

struct Args {
    catalog: Option<PathBuf>,
    targets: Vec<String>,
    max_minutes: f64,
    attempts: Option<PathBuf>,
}

fn parse_args(config: &AppConfig, raw: &[String]) -> Result<Args, String> {
    let [source, targets, rest @ ..] = raw else {
        return Err(USAGE.to_string());
    };
    // "-" defers to LEARNPATH_CATALOG
    let catalog = match source.as_str() {
        "--sample" => None,
        "-" => Some(
            config
                .catalog_path
                .clone()
                .ok_or_else(|| "LEARNPATH_CATALOG is not set".to_string())?,
        ),
        path => Some(PathBuf::from(path)),
    };

    let targets: Vec<String> = targets
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if targets.is_empty() {
        return Err("at least one target concept is required".to_string());
    }

    let max_minutes = match rest.first() {
        Some(value) => value
            .parse::<f64>()
            .map_err(|_| format!("invalid max_minutes: {value}"))?,
        None => DEFAULT_BUDGET_MINUTES,
    };

    Ok(Args {
        catalog,
        targets,
        max_minutes,
        attempts: rest.get(1).map(PathBuf::from),
    })
}

fn load_attempts(path: &Path) -> EngineResult<Vec<Attempt>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn run(config: AppConfig, args: Args) -> EngineResult<String> {
    let document = match &args.catalog {
        Some(path) => CatalogDocument::load(path)?,
        None => CatalogDocument::sample(),
    };
    let attempts = match &args.attempts {
        Some(path) => load_attempts(path)?,
        None => Vec::new(),
    };

    let engine = LearningPathEngine::from_catalog(config.engine, &document)?;
    let path = engine.generate_recommendation(
        CLI_USER,
        &attempts,
        args.targets.as_slice(),
        args.max_minutes,
    )?;
    tracing::info!(
        steps = path.steps.len(),
        total_minutes = path.total_minutes,
        degraded = path.degraded,
        "path generated"
    );
    Ok(serde_json::to_string_pretty(&path)?)
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env();
    let _log_guard = logging::init_tracing(&config);

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&config, &raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    match run(config, args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, hard_failure = err.is_hard_failure(), "recommendation failed");
            ExitCode::FAILURE
        }
    }
}
