mod commands;

use std::path::PathBuf;

use anyhow::{Result, bail};
use console::style;

use crate::core::pipeline::RunMode;
use crate::core::terminal::{self, print_error};

fn print_help() {
    terminal::print_banner();

    println!("{}", style("Commands").bold().underlined());
    let commands: &[(&str, &str)] = &[
        ("serve", "Start the HTTP/WebSocket API"),
        ("run", "Create or edit an app headless and print its progress"),
        ("versions", "List a project's committed versions"),
        ("show", "Print a project's descriptor and mock data"),
        ("rollback", "Append a new version equal to an earlier one"),
        ("help", "Show this message"),
    ];
    for (name, description) in commands {
        println!("  {:<10} {}", style(name).green(), description);
    }

    println!("\n{}", style("Flags").bold().underlined());
    let flags: &[(&str, &str)] = &[
        ("--config <file>", "Config file (default: <data_dir>/appforge.toml)"),
        ("--host <addr>", "serve: bind address"),
        ("--port <port>", "serve: bind port"),
        ("--mode <mode>", "run: create | edit (default: create)"),
        ("--prompt <text>", "run: the instruction"),
        ("--project <id>", "run/versions/show/rollback: project id"),
        ("--version <n>", "show/rollback: version number"),
    ];
    for (flag, description) in flags {
        println!("  {:<18} {}", style(flag).cyan(), description);
    }

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("appforge").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub mode: RunMode,
    pub prompt: String,
    pub project: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProjectArgs {
    pub project: Option<String>,
    pub version: Option<u64>,
    pub config: Option<PathBuf>,
}

/// The value following the flag at `i`, if there is one.
fn flag_value(args: &[String], i: usize) -> Option<&str> {
    args.get(i + 1).map(|s| s.as_str())
}

pub(crate) fn parse_serve_args(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if let Some(v) = flag_value(args, i) {
                    parsed.host = Some(v.to_string());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(v) = flag_value(args, i) {
                    match v.parse() {
                        Ok(port) => parsed.port = Some(port),
                        Err(_) => bail!("--port expects a number, got '{}'", v),
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(v) = flag_value(args, i) {
                    parsed.config = Some(PathBuf::from(v));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> Result<RunCommandArgs> {
    let mut mode = RunMode::Create;
    let mut prompt = String::new();
    let mut project = None;
    let mut config = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" | "-m" => {
                if let Some(v) = flag_value(args, i) {
                    mode = match RunMode::parse(v) {
                        Some(m) => m,
                        None => bail!("--mode must be 'create' or 'edit', got '{}'", v),
                    };
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--prompt" => {
                if let Some(v) = flag_value(args, i) {
                    prompt = v.to_string();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--project" => {
                if let Some(v) = flag_value(args, i) {
                    project = Some(v.to_string());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(v) = flag_value(args, i) {
                    config = Some(PathBuf::from(v));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok(RunCommandArgs {
        mode,
        prompt,
        project,
        config,
    })
}

pub(crate) fn parse_project_args(args: &[String], start: usize) -> Result<ProjectArgs> {
    let mut parsed = ProjectArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--project" => {
                if let Some(v) = flag_value(args, i) {
                    parsed.project = Some(v.to_string());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--version" | "-v" => {
                if let Some(v) = flag_value(args, i) {
                    match v.parse() {
                        Ok(n) => parsed.version = Some(n),
                        Err(_) => bail!("--version expects a number, got '{}'", v),
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(v) = flag_value(args, i) {
                    parsed.config = Some(PathBuf::from(v));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "serve" => {
            let parsed = parse_serve_args(&args, 2)?;
            commands::serve(parsed).await
        }
        "run" => {
            let parsed = parse_run_command_args(&args, 2)?;
            if parsed.prompt.trim().is_empty() {
                print_error("Error: --prompt is required for run.");
                print_help();
                return Ok(());
            }
            if parsed.mode == RunMode::Edit && parsed.project.is_none() {
                print_error("Error: --project is required when --mode is edit.");
                return Ok(());
            }
            commands::run(parsed).await
        }
        "versions" | "show" | "rollback" => {
            let parsed = parse_project_args(&args, 2)?;
            let Some(project) = parsed.project.clone() else {
                print_error(&format!("Error: --project is required for {}.", cmd));
                return Ok(());
            };
            match cmd {
                "versions" => commands::versions(&project, parsed.config.as_deref()).await,
                "show" => commands::show(&project, parsed.version, parsed.config.as_deref()).await,
                _ => {
                    let Some(version) = parsed.version else {
                        print_error("Error: --version is required for rollback.");
                        return Ok(());
                    };
                    commands::rollback(&project, version, parsed.config.as_deref()).await
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}
