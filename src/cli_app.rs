//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use dicom_intake::anonymizer::AnonymizerSettings;
use dicom_intake::anonymizer::command::CommandAnonymizer;
use dicom_intake::core::config::Config;
use dicom_intake::core::errors::IntakeError;
use dicom_intake::service::coordinator::{IntakeService, RunResult, StatusSnapshot};

/// Incremental intake for a DICOM anonymization pipeline.
#[derive(Debug, Parser)]
#[command(
    name = "dicom-intake",
    author,
    version,
    about = "DICOM Intake - incremental anonymization runner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Anonymize new or changed files under the input directory.
    Run(RunArgs),
    /// Show queue depths, totals and file counts.
    Status,
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RunArgs {
    /// Forget the processed-set and anonymize every candidate again.
    #[arg(long)]
    force_rescan: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The run finished but some files failed.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<IntakeError> for CliError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidConfig { .. }
            | IntakeError::MissingConfig { .. }
            | IntakeError::ConfigParse { .. } => Self::User(err.to_string()),
            err if err.is_retryable() => {
                Self::Runtime(format!("{err} (retry after fixing the cause)"))
            }
            err => Self::Internal(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_intake(cli, args),
        Command::Status => run_status(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn open_service(cli: &Cli) -> Result<IntakeService<CommandAnonymizer>, CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let anonymizer = CommandAnonymizer::new(AnonymizerSettings::from_config(&config))?;
    Ok(IntakeService::new(config, anonymizer)?)
}

fn run_intake(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let service = open_service(cli)?;
    let outcome = service.run(args.force_rescan);
    // Shut down even when the run failed so the anonymizer is stopped.
    let shutdown = service.shutdown();
    let result = outcome?;
    shutdown?;

    match output_mode(cli) {
        OutputMode::Human => print_run_human(&result, args.force_rescan),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "force_rescan": args.force_rescan,
                "result": serde_json::to_value(result)?,
            });
            write_json_line(&payload)?;
        }
    }

    if result.is_clean() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} of {} files failed to anonymize",
            result.errors, result.enqueued
        )))
    }
}

fn print_run_human(result: &RunResult, force_rescan: bool) {
    let header = if force_rescan {
        "Intake run (forced rescan)"
    } else {
        "Intake run"
    };
    println!("{}", header.bold());
    println!("  Files seen:  {}", result.files_seen);
    println!("  Enqueued:    {}", result.enqueued);
    println!("  Completed:   {}", result.completed.to_string().green());
    if result.errors > 0 {
        println!("  Errors:      {}", result.errors.to_string().red());
    } else {
        println!("  Errors:      0");
    }
    if result.quarantined > 0 {
        println!("  Quarantined: {}", result.quarantined.to_string().yellow());
    } else {
        println!("  Quarantined: 0");
    }
    println!("  Duration:    {:.2} ms", result.duration_ms);
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let service = open_service(cli)?;
    let snapshot = service.status();
    let shutdown = service.shutdown();
    let snapshot = snapshot?;
    shutdown?;

    match output_mode(cli) {
        OutputMode::Human => print_status_human(&snapshot),
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "status": serde_json::to_value(snapshot)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_status_human(status: &StatusSnapshot) {
    println!("{}", "DICOM Intake status".bold());
    println!("\nQueues:");
    println!("  {:<12} {:>8}", "datasets", status.queue.datasets);
    println!("  {:<12} {:>8}", "pixel_phi", status.queue.pixel_phi);
    println!("\nTotals:");
    println!("  {:<12} {:>8}", "patients", status.totals.patients);
    println!("  {:<12} {:>8}", "studies", status.totals.studies);
    println!("  {:<12} {:>8}", "series", status.totals.series);
    println!("  {:<12} {:>8}", "instances", status.totals.instances);
    println!("  {:<12} {:>8}", "quarantined", status.totals.quarantined);
    println!("\nFiles:");
    println!("  {:<12} {:>8}", "input", status.input_files);
    println!("  {:<12} {:>8}", "output", status.output_files);
    let quarantine = format!("{:>8}", status.quarantine_files);
    if status.quarantine_files > 0 {
        println!("  {:<12} {}", "quarantine", quarantine.yellow());
    } else {
        println!("  {:<12} {quarantine}", "quarantine");
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults and environment will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.config_file.display());
                        println!("  State:  {}", config.state_file().display());
                        println!("  Hash:   {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.config_file.to_string_lossy(),
                            "state_file": config.state_file().to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DICOM_INTAKE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_every_subcommand() {
        let cases = vec![
            vec!["dicom-intake", "run"],
            vec!["dicom-intake", "run", "--force-rescan"],
            vec!["dicom-intake", "--json", "status"],
            vec!["dicom-intake", "status", "--no-color"],
            vec!["dicom-intake", "config"],
            vec!["dicom-intake", "config", "path"],
            vec!["dicom-intake", "--config", "/etc/intake.toml", "config", "show"],
            vec!["dicom-intake", "config", "validate"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "dicom-intake",
            "run",
            "--force-rescan",
            "--config",
            "/srv/intake.toml",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/srv/intake.toml")));
        match cli.command {
            Command::Run(args) => assert!(args.force_rescan),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_subcommands_and_flags() {
        assert!(Cli::try_parse_from(["dicom-intake", "scan"]).is_err());
        assert!(Cli::try_parse_from(["dicom-intake", "status", "--force-rescan"]).is_err());
        assert!(Cli::try_parse_from(["dicom-intake", "config", "reset"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["dicom-intake", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn intake_errors_map_to_exit_classes() {
        let user: CliError = IntakeError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);

        let runtime: CliError =
            IntakeError::io("/srv/state.json", io::Error::other("disk full")).into();
        assert_eq!(runtime.exit_code(), 2);
        assert!(runtime.to_string().contains("DIN-3002"));
        assert!(runtime.to_string().contains("retry"));

        let internal: CliError = IntakeError::Serialization {
            context: "serde_json",
            details: "x".to_string(),
        }
        .into();
        assert_eq!(internal.exit_code(), 3);
    }
}
