use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use lumen_config::LumenConfig;
use lumen_dap::demo::DemoRuntime;
use lumen_dap::{DebugEngine, EngineOptions, SuspendCoordinator};

/// Lumen Debug Adapter Protocol server.
///
/// Speaks DAP over stdio unless a listen address is given (on the command
/// line or as `dap.port` in the config file).
#[derive(Debug, Parser)]
#[command(name = "lumen-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `LUMEN_CONFIG` is used as a fallback. When neither are
    /// provided the adapter uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept one client at a time on this TCP address instead of stdio.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Demo script to run as the debuggee. May be repeated.
    #[arg(long = "demo", value_name = "FILE")]
    demo: Vec<PathBuf>,

    /// Number of threads started per demo script.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Hold demo threads until a client attaches.
    #[arg(long)]
    wait_for_attach: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    lumen_dap::hardening::init(&config, Arc::new(|message| eprintln!("{message}")));

    let coordinator = Arc::new(SuspendCoordinator::new(config.paths.case_sensitive));
    let runtime = DemoRuntime::new(coordinator.clone(), config.paths.case_sensitive);
    runtime.set_wait_for_attach(cli.wait_for_attach);

    let mut next_worker = 1;
    for path in &cli.demo {
        let script = runtime.load_file(path)?;
        for _ in 0..cli.workers.max(1) {
            runtime.spawn(&script, &format!("Worker-{next_worker}"))?;
            next_worker += 1;
        }
    }

    let engine = Arc::new(DebugEngine::new(
        runtime,
        coordinator,
        EngineOptions::from_config(&config),
    ));

    let listen = match cli.listen {
        Some(addr) => Some(addr),
        None => match config.dap.port {
            Some(port) => Some(
                format!("{}:{port}", config.dap.host)
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid dap.host {:?}", config.dap.host))?,
            ),
            None => None,
        },
    };

    match listen {
        Some(addr) => lumen_dap::wire_server::serve(addr, engine).await,
        None => lumen_dap::wire_server::run_stdio(engine).await,
    }
}

fn load_config(cli_path: Option<PathBuf>) -> LumenConfig {
    let path = cli_path.or_else(|| std::env::var_os("LUMEN_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return LumenConfig::default();
    };

    match LumenConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "lumen-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            LumenConfig::default()
        }
    }
}
