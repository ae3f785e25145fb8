use anyhow::{Context, Result, bail};
use clap::Parser;
use seriallink::{
    Config, DEFAULT_CONFIG_FILE, Event, EventSink, Executor, ParseError, PtyTransport,
    TimeoutPolicy, TracingSink, Transport, parse_file,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "seriallink",
    about = "Run a device playbook over a serial console",
    version
)]
struct Args {
    /// Path to the TOML configuration file (default: ./seriallink.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the playbook file (overrides the configuration)
    #[arg(short, long)]
    playbook: Option<PathBuf>,

    /// Console program to run in the PTY, e.g. picocom (overrides the configuration)
    #[arg(short, long)]
    command: Option<String>,

    /// Log protocol detail to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Do not answer pagination prompts
    #[arg(long)]
    no_pagination: bool,

    /// Fallback prompt used until one is detected
    #[arg(long)]
    prompt_symbol: Option<String>,

    /// Default WAIT timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Username for the built-in login exchange
    #[arg(short, long)]
    username: Option<String>,

    /// Password for the built-in login exchange
    #[arg(long)]
    password: Option<String>,

    /// Skip the already-logged-in probe
    #[arg(long)]
    no_probe: bool,

    /// Keep going after a WAIT times out (the run still fails)
    #[arg(long)]
    continue_on_timeout: bool,

    /// Only validate the playbook
    #[arg(long)]
    check: bool,

    /// Arguments to pass to the command
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let (mut config, config_dir) = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let playbook_path = args
        .playbook
        .clone()
        .unwrap_or_else(|| config.playbook_path(config_dir.as_deref()));
    let playbook = match parse_file(&playbook_path) {
        Ok(playbook) => playbook,
        Err(err @ ParseError::Syntax { .. }) => {
            eprintln!(
                "[ERROR] Playbook syntax error in {}: {err}",
                playbook_path.display()
            );
            return Ok(ExitCode::from(2));
        }
        Err(err) => return Err(err).context("Failed to load playbook"),
    };

    if args.check {
        println!(
            "{}: {} steps, OK",
            playbook_path.display(),
            playbook.step_count()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = config
        .run_options()
        .context("Invalid configuration")?;
    if args.continue_on_timeout {
        options.on_timeout = TimeoutPolicy::Continue;
    }
    let credentials = config.credentials();

    let Some(command) = config.transport.command.clone() else {
        bail!("No console command given; use --command or [transport] command in the config");
    };
    let mut transport = PtyTransport::spawn(&command, &config.transport.args)
        .with_context(|| format!("Failed to start console program: {command}"))?;

    let verbose = args.verbose;
    let mut tracing_sink = TracingSink;
    let report = move |event: &Event| {
        tracing_sink.handle(event);
        if verbose {
            return;
        }
        match event {
            Event::StepStarted {
                step,
                total,
                description,
                ..
            } => eprintln!("[{step}/{total}] {description}"),
            Event::LoginSkipped { steps } => {
                eprintln!("[INFO] Already logged in, skipping {steps} login steps")
            }
            Event::StepFailed { kind, message, .. } => eprintln!("[ERROR] {kind}: {message}"),
            _ => {}
        }
    };

    let result = Executor::with_handler(options, report)
        .run(&playbook, &mut transport, credentials.as_ref())
        .await;

    if let Err(err) = transport.close().await {
        tracing::warn!(%err, "failed to close console program");
    }

    if result.success {
        println!("[OK] {}", result.success_message());
        return Ok(ExitCode::SUCCESS);
    }

    match &result.failure {
        Some(failure) => {
            let location = failure
                .source_line
                .map(|line| format!(" at line {line}"))
                .unwrap_or_default();
            eprintln!(
                "[FAILED] {}{location}: {} ({}/{} steps)",
                failure.kind, failure.message, result.completed_steps, result.total_steps
            );
            if let Some(partial) = failure.partial_output.as_deref().filter(|p| !p.is_empty()) {
                eprintln!("--- received before failure ---\n{partial}");
            }
        }
        None => eprintln!("[FAILED] playbook did not complete"),
    }
    Ok(ExitCode::FAILURE)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "seriallink=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// An explicit config path must exist; the default one is optional.
fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let (config, path) = match path {
        Some(path) => (
            Config::load(path).context("Failed to load configuration")?,
            path.to_path_buf(),
        ),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            (
                Config::load_or_default(&path).context("Failed to load configuration")?,
                path,
            )
        }
    };
    let dir = path
        .parent()
        .map(|dir| if dir.as_os_str().is_empty() { Path::new(".") } else { dir })
        .map(Path::to_path_buf);
    Ok((config, dir))
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if args.no_pagination {
        config.pagination.enabled = false;
    }
    if let Some(symbol) = &args.prompt_symbol {
        config.session.prompt_symbol = symbol.clone();
    }
    if let Some(timeout) = args.timeout {
        config.session.wait_timeout = timeout;
    }
    if let Some(username) = &args.username {
        config.login.username = username.clone();
    }
    if let Some(password) = &args.password {
        config.login.password = password.clone();
    }
    if args.no_probe {
        config.login.probe = false;
    }
    if let Some(command) = &args.command {
        config.transport.command = Some(command.clone());
        config.transport.args = args.args.clone();
    } else if !args.args.is_empty() {
        config.transport.args = args.args.clone();
    }
}
