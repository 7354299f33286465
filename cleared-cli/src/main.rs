//! Command-line front-end for the cleared de-identification engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cleared::config::load_config;
use cleared::engine::{CancellationToken, RunOptions};
use cleared::lint::{lint, Severity};
use cleared::{DeidError, Engine};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cleared", about = "A data de-identification framework", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the de-identification engine against a configuration file.
    Run {
        config_path: PathBuf,
        #[arg(short = 'c', long)]
        continue_on_error: bool,
        #[arg(short = 'd', long)]
        create_dirs: bool,
        /// Truncate every table's input to its first N rows.
        #[arg(long)]
        rows_limit: Option<usize>,
        /// Run the full pipeline but skip writing output.
        #[arg(long)]
        test_mode: bool,
    },
    /// Reverse a previous run's output back to its original values.
    Reverse {
        config_path: PathBuf,
        reverse_output_path: PathBuf,
    },
    /// Reverse a previous run and compare against the original input.
    Verify {
        config_path: PathBuf,
        reverse_output_path: PathBuf,
    },
    /// Validate a configuration file without running the engine.
    Validate {
        config_path: PathBuf,
        #[arg(long, default_value_t = true)]
        check_paths: bool,
    },
    /// Run the static linter against a configuration file.
    Lint { config_path: PathBuf },
    /// Create a starter configuration file.
    Init {
        #[arg(default_value = "sample_config.yaml")]
        output_path: PathBuf,
        #[arg(short, long)]
        force: bool,
    },
    /// Parse a configuration file and resolve its `defaults:` chain.
    CheckSyntax { config_path: PathBuf },
    /// Canonicalize a YAML file's formatting.
    FormatYaml {
        path: PathBuf,
        #[arg(long)]
        check: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), DeidError> {
    match command {
        Command::Run { config_path, continue_on_error, create_dirs, rows_limit, test_mode } => {
            let config = load_config(&config_path)?;
            if create_dirs {
                let created = cleared::init::create_missing_directories(&config)?;
                for path in created {
                    tracing::info!(path, "created directory");
                }
            }
            let engine = Engine::new(config)?;
            tracing::info!("starting de-identification run");
            let options = RunOptions { continue_on_error, rows_limit, test_mode };
            let report = engine.run(options, &CancellationToken::new())?;
            let runtime_io_path = engine.config().io.runtime_io_path.clone();
            engine.save_report(&report, std::path::Path::new(&runtime_io_path))?;
            if report.success {
                tracing::info!("de-identification completed successfully");
                Ok(())
            } else {
                Err(DeidError::ValidationError("de-identification completed with errors".to_string()))
            }
        }
        Command::Reverse { config_path, reverse_output_path } => {
            let config = load_config(&config_path)?;
            let engine = Engine::new(config)?;
            let report = engine.run_reverse(&reverse_output_path, &CancellationToken::new())?;
            if report.success {
                tracing::info!("reverse completed successfully");
                Ok(())
            } else {
                Err(DeidError::ValidationError("reverse completed with errors".to_string()))
            }
        }
        Command::Verify { config_path, reverse_output_path } => {
            let config = load_config(&config_path)?;
            let engine = Engine::new(config)?;
            let result = engine.verify(&reverse_output_path)?;
            println!("{}", serde_json::to_string_pretty(&result).expect("verification result is always serializable"));
            if result.summary.error > 0 {
                Err(DeidError::ValidationError(format!("{} table(s) failed verification", result.summary.error)))
            } else {
                Ok(())
            }
        }
        Command::Validate { config_path, check_paths } => {
            let config = load_config(&config_path)?;
            let status = cleared::init::validate_paths(&config);
            Engine::new(config)?;
            tracing::info!("configuration is valid");
            if check_paths {
                let missing: Vec<_> = status.into_iter().filter(|(_, exists)| !exists).map(|(name, _)| name).collect();
                if missing.is_empty() {
                    tracing::info!("all required directories exist");
                } else {
                    tracing::warn!(missing = missing.join(", "), "missing directories");
                }
            }
            Ok(())
        }
        Command::Lint { config_path } => {
            let source = std::fs::read_to_string(&config_path)
                .map_err(|e| DeidError::ConfigLoad(format!("cannot read '{}': {e}", config_path.display())))?;
            let config = load_config(&config_path)?;
            let issues = lint(&config, &source);
            let mut errors = 0;
            for issue in &issues {
                match issue.severity {
                    Severity::Error => {
                        errors += 1;
                        tracing::error!(rule = issue.rule_id, location = issue.location, "{}", issue.message);
                    }
                    Severity::Warning => {
                        tracing::warn!(rule = issue.rule_id, location = issue.location, "{}", issue.message);
                    }
                }
            }
            if errors > 0 {
                Err(DeidError::LintError(format!("{errors} rule violation(s)")))
            } else {
                Ok(())
            }
        }
        Command::Init { output_path, force } => {
            cleared::init::init(&output_path, force)?;
            tracing::info!(path = %output_path.display(), "sample configuration created");
            Ok(())
        }
        Command::CheckSyntax { config_path } => {
            cleared::init::check_syntax(&config_path)?;
            tracing::info!("syntax OK");
            Ok(())
        }
        Command::FormatYaml { path, check } => {
            let changed = cleared::init::format_yaml(&path, check)?;
            if check && changed {
                Err(DeidError::ValidationError(format!("'{}' is not formatted", path.display())))
            } else {
                if changed {
                    tracing::info!(path = %path.display(), "reformatted");
                }
                Ok(())
            }
        }
    }
}
