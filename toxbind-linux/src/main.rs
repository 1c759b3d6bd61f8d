// toxbind Linux daemon: drives one engine instance and persists its state.

mod config;
#[cfg_attr(not(feature = "native"), allow(dead_code))]
mod daemon;

use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("toxbind-linux {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let p = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(p));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let config::Loaded {
        config: cfg,
        ignored,
    } = config::load(config_path.as_deref())?;
    init_tracing(cfg.debug);
    if let Some(e) = ignored {
        tracing::warn!(error = %format!("{e:#}"), "ignoring config file");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "native")]
async fn run(cfg: config::Config) -> anyhow::Result<()> {
    daemon::serve(toxbind_core::NativeEngine, &cfg).await
}

#[cfg(not(feature = "native"))]
async fn run(_cfg: config::Config) -> anyhow::Result<()> {
    anyhow::bail!("toxbind-linux was built without an engine; rebuild with `--features native`")
}
