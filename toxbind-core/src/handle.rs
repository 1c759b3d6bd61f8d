//! Engine handle: sole owner of one engine instance.
//!
//! Every operation locks the owner cell, so at most one call into the engine
//! is in flight per handle, whether it comes from a blocking call, an async
//! variant running on a blocking worker, or the iteration driver. After
//! [`EngineHandle::destroy`] the instance is gone and every operation fails
//! with [`Error::UseAfterClose`] without reaching the engine.

use std::ffi::CString;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{
    check_bootstrap, check_create, check_options_new, CreationFailure, Error, OptionsFailure,
    Result, STATUS_OK,
};
use crate::key::PublicKey;
use crate::options::EngineConfiguration;

/// Known node to bootstrap from or use as a TCP relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTarget {
    pub address: String,
    pub port: u16,
    pub public_key: PublicKey,
}

impl BootstrapTarget {
    pub fn new(address: impl Into<String>, port: u16, public_key: PublicKey) -> Self {
        Self {
            address: address.into(),
            port,
            public_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRole {
    Bootstrap,
    TcpRelay,
}

struct Owner<E: Engine> {
    engine: E,
    /// `None` once destroyed.
    instance: Option<E::Instance>,
}

impl<E: Engine> Drop for Owner<E> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.engine.destroy(instance);
            debug!("engine destroyed on drop");
        }
    }
}

pub(crate) struct Shared<E: Engine> {
    owner: Mutex<Owner<E>>,
    pub(crate) running: AtomicBool,
}

impl<E: Engine> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, Owner<E>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_instance<T>(&self, f: impl FnOnce(&E, &mut E::Instance) -> T) -> Result<T> {
        let mut owner = self.lock();
        let Owner { engine, instance } = &mut *owner;
        let instance = instance.as_mut().ok_or(Error::UseAfterClose)?;
        Ok(f(engine, instance))
    }

    fn add_node(&self, role: NodeRole, target: &BootstrapTarget) -> Result<()> {
        let key = target.public_key.as_bytes();
        let (returned, status) = self.with_instance(|engine, instance| {
            let address = CString::new(target.address.as_str())
                .map_err(|_| Error::InvalidAddress(target.address.clone()))?;
            let mut status = STATUS_OK;
            let returned = match role {
                NodeRole::Bootstrap => {
                    engine.bootstrap(instance, &address, target.port, key, &mut status)
                }
                NodeRole::TcpRelay => {
                    engine.add_tcp_relay(instance, &address, target.port, key, &mut status)
                }
            };
            Ok((returned, status))
        })??;
        debug!(
            ?role,
            address = %target.address,
            port = target.port,
            returned,
            status,
            "node added"
        );
        check_bootstrap(returned, status)
    }
}

/// Owner of one running engine instance.
pub struct EngineHandle<E: Engine> {
    shared: Arc<Shared<E>>,
}

impl<E: Engine> EngineHandle<E> {
    /// Create a fresh engine instance.
    pub fn create(engine: E, config: &EngineConfiguration) -> Result<Self> {
        Self::create_with_save_data(engine, config, &[])
    }

    /// Create an engine instance restored from `saved` (empty for fresh state).
    ///
    /// The engine's options object is freed before returning on every path.
    pub fn create_with_save_data(
        engine: E,
        config: &EngineConfiguration,
        saved: &[u8],
    ) -> Result<Self> {
        let mut status = STATUS_OK;
        let options = engine.options_new(&mut status);
        if let Err(e) = check_options_new(status) {
            if let Some(options) = options {
                engine.options_free(options);
            }
            return Err(e);
        }
        let mut options = options.ok_or(Error::OptionsCreation {
            kind: OptionsFailure::Malloc,
            code: status,
        })?;
        engine.write_options(&mut options, &config.to_raw());

        let mut status = STATUS_OK;
        let instance = engine.create(&options, saved, &mut status);
        engine.options_free(options);
        if let Err(e) = check_create(status) {
            if let Some(instance) = instance {
                engine.destroy(instance);
            }
            return Err(e);
        }
        let instance = instance.ok_or(Error::EngineCreation {
            kind: CreationFailure::Malloc,
            code: status,
        })?;
        info!(
            ipv6 = config.ipv6_enabled,
            udp = config.udp_enabled,
            proxy = config.proxy.is_some(),
            restored = !saved.is_empty(),
            "engine created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                owner: Mutex::new(Owner {
                    engine,
                    instance: Some(instance),
                }),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Second reference to the same owner cell, for the iteration driver.
    pub(crate) fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn running_flag(&self) -> &AtomicBool {
        &self.shared.running
    }

    /// Blocking bootstrap.
    pub fn bootstrap(&self, target: &BootstrapTarget) -> Result<()> {
        self.shared.add_node(NodeRole::Bootstrap, target)
    }

    /// Non-blocking bootstrap: runs on a blocking worker, same lock and
    /// mapping as [`bootstrap`](Self::bootstrap). Must be polled inside a
    /// tokio runtime.
    pub fn bootstrap_async(
        &self,
        target: BootstrapTarget,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        self.spawn_add_node(NodeRole::Bootstrap, target)
    }

    pub fn add_tcp_relay(&self, target: &BootstrapTarget) -> Result<()> {
        self.shared.add_node(NodeRole::TcpRelay, target)
    }

    pub fn add_tcp_relay_async(
        &self,
        target: BootstrapTarget,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        self.spawn_add_node(NodeRole::TcpRelay, target)
    }

    fn spawn_add_node(
        &self,
        role: NodeRole,
        target: BootstrapTarget,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        async move {
            tokio::task::spawn_blocking(move || shared.add_node(role, &target))
                .await
                .map_err(|e| Error::Join(e.to_string()))?
        }
    }

    /// Milliseconds the engine wants between iterations.
    pub fn iteration_interval(&self) -> Result<u32> {
        self.shared
            .with_instance(|engine, instance| engine.iteration_interval(instance))
    }

    pub fn iterate(&self) -> Result<()> {
        self.shared
            .with_instance(|engine, instance| engine.iterate(instance))
    }

    /// Serialized engine state. Size query and fill happen under one lock.
    pub fn save_data(&self) -> Result<Vec<u8>> {
        self.shared.with_instance(|engine, instance| {
            let size = engine.save_data_size(instance);
            let mut buf = vec![0u8; size];
            engine.save_data(instance, &mut buf);
            buf
        })
    }

    /// Tear down the instance. Later calls are no-ops; other operations fail
    /// with [`Error::UseAfterClose`].
    pub fn destroy(&self) {
        let mut owner = self.shared.lock();
        let Some(instance) = owner.instance.take() else {
            debug!("destroy on closed handle ignored");
            return;
        };
        owner.engine.destroy(instance);
        info!("engine destroyed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().instance.is_none()
    }

    /// Whether an iteration driver is active on this handle.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl<E: Engine> std::fmt::Debug for EngineHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.is_closed())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BootstrapFailure, CreationFailure};
    use crate::ffi::PROXY_TYPE_SOCKS5;
    use crate::options::{build, BuildOptions};
    use crate::test_engine::{Calls, Script, TestEngine};

    fn target() -> BootstrapTarget {
        BootstrapTarget::new("node.example.org", 33445, PublicKey::from_bytes([9; 32]))
    }

    fn handle(script: Script) -> (EngineHandle<TestEngine>, Arc<Calls>) {
        let (engine, calls) = TestEngine::new(script);
        let h = EngineHandle::create(engine, &EngineConfiguration::default()).unwrap();
        (h, calls)
    }

    #[test]
    fn create_passes_record_and_frees_options() {
        let (engine, calls) = TestEngine::new(Script::default());
        let config = build(
            &BuildOptions::new()
                .with_ipv6(true)
                .with_proxy("socks5://10.0.0.1:9050"),
        );
        let _h = EngineHandle::create(engine, &config).unwrap();
        let record = calls.last_record.lock().unwrap().unwrap();
        assert_eq!(record.ipv6_enabled, 1);
        assert_eq!(record.proxy_type, PROXY_TYPE_SOCKS5);
        assert_eq!(record.proxy_address_bytes(), b"10.0.0.1");
        assert_eq!(record.proxy_port, 9050);
        assert_eq!(Calls::count(&calls.options_new), 1);
        assert_eq!(Calls::count(&calls.options_free), 1);
    }

    #[test]
    fn create_failure_is_structured_and_frees_options() {
        let (engine, calls) = TestEngine::new(Script {
            create_status: 3,
            ..Script::default()
        });
        let err = EngineHandle::create(engine, &EngineConfiguration::default()).unwrap_err();
        assert_eq!(
            err,
            Error::EngineCreation {
                kind: CreationFailure::PortAlloc,
                code: 3
            }
        );
        assert_eq!(Calls::count(&calls.options_free), 1);
    }

    #[test]
    fn options_failure_stops_before_create() {
        let (engine, calls) = TestEngine::new(Script {
            options_status: 1,
            ..Script::default()
        });
        let err = EngineHandle::create(engine, &EngineConfiguration::default()).unwrap_err();
        assert!(matches!(err, Error::OptionsCreation { code: 1, .. }));
        assert_eq!(Calls::count(&calls.create), 0);
    }

    #[test]
    fn repeated_creates_free_every_options_object() {
        let (engine, calls) = TestEngine::new(Script::default());
        let h = EngineHandle::create(engine, &EngineConfiguration::default()).unwrap();
        drop(h);
        for code in [0, 2, 7] {
            let (engine, c) = TestEngine::new(Script {
                create_status: code,
                ..Script::default()
            });
            let _ = EngineHandle::create(engine, &EngineConfiguration::default());
            assert_eq!(Calls::count(&c.options_new), Calls::count(&c.options_free));
        }
        assert_eq!(Calls::count(&calls.options_free), 1);
    }

    #[test]
    fn save_data_is_passed_to_create() {
        let (engine, calls) = TestEngine::new(Script::default());
        let _h =
            EngineHandle::create_with_save_data(engine, &EngineConfiguration::default(), b"state")
                .unwrap();
        assert_eq!(calls.last_saved.lock().unwrap().as_slice(), b"state");
    }

    #[test]
    fn bootstrap_contract() {
        let (h, calls) = handle(Script::default());
        h.bootstrap(&target()).unwrap();
        let (addr, port, key) = calls.last_target.lock().unwrap().clone().unwrap();
        assert_eq!(addr, "node.example.org");
        assert_eq!(port, 33445);
        assert_eq!(key, [9; 32]);

        let (h, _) = handle(Script {
            bootstrap: (false, STATUS_OK),
            ..Script::default()
        });
        assert_eq!(h.bootstrap(&target()), Err(Error::InconsistentBootstrap));

        let (h, _) = handle(Script {
            bootstrap: (true, 3),
            ..Script::default()
        });
        assert_eq!(
            h.bootstrap(&target()),
            Err(Error::Bootstrap {
                kind: BootstrapFailure::BadPort,
                code: 3
            })
        );
    }

    #[tokio::test]
    async fn async_bootstrap_shares_mapping() {
        let (h, _) = handle(Script {
            bootstrap: (false, STATUS_OK),
            ..Script::default()
        });
        assert_eq!(
            h.bootstrap_async(target()).await,
            Err(Error::InconsistentBootstrap)
        );
        let (h, calls) = handle(Script::default());
        h.add_tcp_relay_async(target()).await.unwrap();
        assert_eq!(Calls::count(&calls.relay), 1);
    }

    #[test]
    fn nul_in_address_never_reaches_engine() {
        let (h, calls) = handle(Script::default());
        let mut t = target();
        t.address = "bad\0host".into();
        assert!(matches!(h.bootstrap(&t), Err(Error::InvalidAddress(_))));
        assert_eq!(Calls::count(&calls.bootstrap), 0);
    }

    #[test]
    fn save_data_length_matches_size() {
        let (h, _) = handle(Script::default());
        assert_eq!(h.save_data().unwrap(), b"saved-state");
        h.iterate().unwrap();
        assert_eq!(h.save_data().unwrap().len(), b"saved-state".len() + 1);
    }

    #[test]
    fn interval_comes_from_engine() {
        let (h, _) = handle(Script {
            interval: 17,
            ..Script::default()
        });
        assert_eq!(h.iteration_interval().unwrap(), 17);
    }

    #[test]
    fn closed_handle_fails_fast() {
        let (h, calls) = handle(Script::default());
        h.destroy();
        assert!(h.is_closed());
        let before = calls.instance_calls();
        assert_eq!(h.iterate(), Err(Error::UseAfterClose));
        assert_eq!(h.iteration_interval(), Err(Error::UseAfterClose));
        assert_eq!(h.save_data(), Err(Error::UseAfterClose));
        assert_eq!(h.bootstrap(&target()), Err(Error::UseAfterClose));
        assert_eq!(h.add_tcp_relay(&target()), Err(Error::UseAfterClose));
        let mut bad = target();
        bad.address = "bad\0host".into();
        assert_eq!(h.bootstrap(&bad), Err(Error::UseAfterClose));
        assert_eq!(h.add_tcp_relay(&bad), Err(Error::UseAfterClose));
        h.destroy();
        assert_eq!(calls.instance_calls(), before);
        assert_eq!(Calls::count(&calls.destroy), 1);
    }

    #[test]
    fn drop_destroys_once() {
        let (h, calls) = handle(Script::default());
        drop(h);
        assert_eq!(Calls::count(&calls.destroy), 1);

        let (h, calls) = handle(Script::default());
        h.destroy();
        drop(h);
        assert_eq!(Calls::count(&calls.destroy), 1);
    }
}
