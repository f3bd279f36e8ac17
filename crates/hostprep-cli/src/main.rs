mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{PlanOptions, EXIT_FAILURE, EXIT_PLAN_ERROR, EXIT_PRECONDITION};
use hostprep_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hostprep",
    version,
    about = "Idempotent single-host provisioning: tools, service config, and an ops repository"
)]
struct Cli {
    /// Host plan TOML (default: /etc/hostprep/plan.toml, else the built-in plan).
    #[arg(long, global = true)]
    plan: Option<PathBuf>,

    /// Repository URL to clone (overrides the plan's [repository] url).
    #[arg(long, global = true)]
    repo_url: Option<String>,

    /// Working copy location (overrides the plan's [repository] path).
    #[arg(long, global = true)]
    repo_path: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the host from the plan (the default).
    Apply,
    /// Probe every step and show which would apply, without changing anything.
    Plan,
    /// Show where a service directive is declared and which value wins.
    Locate {
        /// Service name from the plan (e.g. "ssh").
        service: String,
        /// Directive keyword (e.g. "PasswordAuthentication").
        directive: String,
    },
    /// List backup files taken beside configured sources.
    Backups,
    /// Run diagnostic checks on the host.
    Doctor,
    /// Print the effective plan after defaults and overrides.
    ShowPlan,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HOSTPREP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let command = cli.command.unwrap_or(Commands::Apply);
    let json_output = cli.json;

    match &command {
        Commands::Completions { shell } => {
            return finish(commands::completions::run::<Cli>(*shell));
        }
        Commands::ManPages { dir } => return finish(commands::man_pages::run::<Cli>(dir)),
        _ => {}
    }

    if matches!(command, Commands::Apply)
        && std::env::var("HOSTPREP_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = hostprep_runtime::check_host_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", hostprep_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_PRECONDITION);
        }
    }

    let loaded = match commands::load_plan(&PlanOptions {
        path: cli.plan,
        repo_url: cli.repo_url,
        repo_path: cli.repo_path,
    }) {
        Ok(loaded) => loaded,
        Err(msg) => return finish(Err(msg)),
    };
    tracing::debug!(
        "plan from {}: {} tools, {} directives",
        loaded.source,
        loaded.plan.tools.len(),
        loaded.plan.directives.len()
    );

    let result = match command {
        Commands::Apply => {
            install_signal_handler();
            commands::apply::run(&loaded, json_output)
        }
        Commands::Plan => commands::plan::run(&loaded, json_output),
        Commands::Locate { service, directive } => {
            commands::locate::run(&loaded, &service, &directive, json_output)
        }
        Commands::Backups => commands::backups::run(&loaded, json_output),
        Commands::Doctor => commands::doctor::run(&loaded, json_output),
        Commands::ShowPlan => commands::show_plan::run(&loaded, json_output),
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    };
    finish(result)
}

fn finish(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("plan error:") {
                EXIT_PLAN_ERROR
            } else if msg.starts_with("precondition failed:") {
                EXIT_PRECONDITION
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
