//! Daemon lifecycle: restore, create, bootstrap, iterate, persist, destroy.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use toxbind_core::{build, Engine, EngineHandle, IterationDriver};
use tracing::{debug, info, warn};

use crate::config::Config;

pub async fn serve<E: Engine>(engine: E, cfg: &Config) -> anyhow::Result<()> {
    let saved = load_save_data(&cfg.save_path).await?;
    let handle = EngineHandle::create_with_save_data(engine, &build(&cfg.build_options()), &saved)
        .context("creating engine")?;

    for node in &cfg.bootstrap {
        let target = node.target();
        match handle.bootstrap_async(target.clone()).await {
            Ok(()) => info!(address = %node.address, port = node.port, "bootstrapped"),
            Err(e) => warn!(address = %node.address, port = node.port, error = %e, "bootstrap failed"),
        }
        if node.tcp_relay {
            if let Err(e) = handle.add_tcp_relay_async(target).await {
                warn!(address = %node.address, error = %e, "adding tcp relay failed");
            }
        }
    }

    let driver = IterationDriver::with_mode(&handle, cfg.iteration);
    driver.start(Some(Duration::from_millis(cfg.interval_ms)))?;

    let mut save_timer = tokio::time::interval(Duration::from_secs(cfg.save_interval_secs.max(1)));
    save_timer.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            _ = save_timer.tick() => {
                if let Err(e) = persist(&handle, &cfg.save_path).await {
                    warn!(error = %format!("{e:#}"), "periodic save failed");
                }
            }
        }
    }

    info!("shutting down");
    driver.stop();
    persist(&handle, &cfg.save_path)
        .await
        .context("saving state on shutdown")?;
    handle.destroy();
    Ok(())
}

async fn load_save_data(path: &Path) -> anyhow::Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => {
            info!(path = %path.display(), bytes = data.len(), "restoring save data");
            Ok(data)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no save data; starting fresh");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

async fn persist<E: Engine>(handle: &EngineHandle<E>, path: &Path) -> anyhow::Result<()> {
    let data = handle.save_data()?;
    write_atomic(path, &data).await?;
    debug!(path = %path.display(), bytes = data.len(), "save data written");
    Ok(())
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl+C")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("toxbind-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn missing_save_file_is_fresh_start() {
        let dir = scratch_dir("missing");
        let data = load_save_data(&dir.join("save.tox")).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_replaces() {
        let dir = scratch_dir("write");
        let path = dir.join("nested/save.tox");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(load_save_data(&path).await.unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
