use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rehearse_engine::cli::{self, OutputHandlers};
use rehearse_engine::config::{ConfigLoader, RehearseConfig, RunMode};
use rehearse_engine::orchestrator::OrchestratorError;
use rehearse_engine::workflow::CancelToken;
use rehearse_h::{HeadlessBackend, LaunchOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rehearse", version, about = "Unattended lesson runner with a durable time ledger")]
struct Args {
    /// Config file (defaults to ./rehearse.yaml, then ~/.rehearse/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Log in, then loop a lesson or rotate through stories while recording time
    Run {
        /// Built-in workflow to run; ignored when --pack is given
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Workflow pack (YAML). The embedded pack for the mode is used when omitted.
        #[arg(long)]
        pack: Option<PathBuf>,
        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,
        /// Stop after this many cycle passes
        #[arg(long)]
        cycles: Option<u64>,
        /// Account email; overrides config and REHEARSE_EMAIL
        #[arg(long)]
        user: Option<String>,
        /// Directory holding the ledger and reports
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show recorded progress for every user
    Status {
        /// Directory holding the ledger
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Lesson,
    Stories,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Lesson => RunMode::Lesson,
            ModeArg::Stories => RunMode::Stories,
        }
    }
}

fn print_out(msg: &str) {
    println!("{}", msg);
}

fn print_err(msg: &str) {
    eprintln!("{}", msg);
}

const OUTPUT: OutputHandlers = OutputHandlers {
    out: print_out,
    err: print_err,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so `status` output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let loaded = load_config(args.config.as_deref()).await;

    match args.mode {
        Mode::Status { data_dir } => {
            // status never fails; a broken config only loses its data_dir
            let mut config = loaded.unwrap_or_else(|e| {
                warn!("{:#}", e);
                let mut config = RehearseConfig::default();
                ConfigLoader::apply_env(&mut config);
                config
            });
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            cli::print_status(&config.data_dir, OUTPUT);
            Ok(ExitCode::SUCCESS)
        }
        Mode::Run {
            mode,
            pack,
            visible,
            cycles,
            user,
            data_dir,
        } => {
            let mut config = loaded?;
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            if pack.is_some() {
                config.pack = pack;
            }
            if visible {
                config.browser.headless = false;
            }
            if user.is_some() {
                config.user = user;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            run(&config, cycles).await
        }
    }
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RehearseConfig> {
    match path {
        Some(path) => {
            let mut config = ConfigLoader::load_from(path)
                .await
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            ConfigLoader::apply_env(&mut config);
            Ok(config)
        }
        None => ConfigLoader::load_default()
            .await
            .context("Failed to load config"),
    }
}

async fn run(config: &RehearseConfig, cycles: Option<u64>) -> anyhow::Result<ExitCode> {
    let mut orchestrator = match cli::prepare_run(config, cycles).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            (OUTPUT.err)(&format!("Cannot start: {}", e));
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut backend = HeadlessBackend::new(LaunchOptions {
        visible: !config.browser.headless,
        chrome_bin: config.browser.chrome_bin.clone(),
        user_data_dir: config.browser.user_data_dir.clone(),
    });

    info!(
        "Running {} as {} (data dir {})",
        config
            .pack
            .as_ref()
            .map_or_else(|| config.mode.to_string(), |p| p.display().to_string()),
        config.user.as_deref().unwrap_or_default(),
        config.data_dir.display()
    );
    let cancel = CancelToken::new();
    let listener = cli::spawn_interrupt_listener(cancel.clone());
    let outcome = orchestrator.run(&mut backend, &cancel).await;
    listener.abort();

    match outcome {
        Ok(report) => {
            (OUTPUT.out)(&format!(
                "Stopped ({:?}) after {} passes, {} recoveries, {} items; session {:.0}s{}",
                report.summary.stop_reason,
                report.summary.iterations,
                report.summary.recoveries,
                report.summary.items_entered,
                report.session.duration_seconds,
                if report.completed { "; target reached" } else { "" }
            ));
            Ok(ExitCode::SUCCESS)
        }
        Err(OrchestratorError::Backend(e)) => {
            (OUTPUT.err)(&format!("Failed to launch backend: {}", e));
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            (OUTPUT.err)(&format!("Run failed: {}", e));
            Ok(ExitCode::FAILURE)
        }
    }
}
