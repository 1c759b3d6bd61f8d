//! Scripted in-memory engine for unit tests.

use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::Engine;
use crate::error::STATUS_OK;
use crate::ffi::RawOptions;
use crate::key::PUBLIC_KEY_SIZE;

#[derive(Clone)]
pub(crate) struct Script {
    pub options_status: u32,
    pub create_status: u32,
    pub bootstrap: (bool, u32),
    pub save: Vec<u8>,
    pub interval: u32,
    pub iterate_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            options_status: STATUS_OK,
            create_status: STATUS_OK,
            bootstrap: (true, STATUS_OK),
            save: b"saved-state".to_vec(),
            interval: 50,
            iterate_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub(crate) struct Calls {
    pub options_new: AtomicUsize,
    pub options_free: AtomicUsize,
    pub create: AtomicUsize,
    pub bootstrap: AtomicUsize,
    pub relay: AtomicUsize,
    pub iterate: AtomicUsize,
    pub destroy: AtomicUsize,
    pub save_data: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub last_record: Mutex<Option<RawOptions>>,
    pub last_saved: Mutex<Vec<u8>>,
    pub last_target: Mutex<Option<(String, u16, [u8; PUBLIC_KEY_SIZE])>>,
}

impl Calls {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Total calls that needed a live instance.
    pub fn instance_calls(&self) -> usize {
        [
            &self.bootstrap,
            &self.relay,
            &self.iterate,
            &self.save_data,
            &self.destroy,
        ]
        .iter()
        .map(|c| Self::count(c))
        .sum()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct TestEngine {
    script: Script,
    pub calls: Arc<Calls>,
}

impl TestEngine {
    pub fn new(script: Script) -> (Self, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        (
            Self {
                script,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn add_node(
        &self,
        counter: &AtomicUsize,
        address: &CStr,
        port: u16,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        status: &mut u32,
    ) -> bool {
        self.calls.enter();
        counter.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_target.lock().unwrap() =
            Some((address.to_string_lossy().into_owned(), port, *public_key));
        let (ok, code) = self.script.bootstrap;
        *status = code;
        self.calls.leave();
        ok
    }
}

pub(crate) struct TestInstance {
    state: Vec<u8>,
}

impl Engine for TestEngine {
    type Options = RawOptions;
    type Instance = TestInstance;

    fn options_new(&self, status: &mut u32) -> Option<RawOptions> {
        self.calls.options_new.fetch_add(1, Ordering::SeqCst);
        *status = self.script.options_status;
        (self.script.options_status == STATUS_OK).then(RawOptions::zeroed)
    }

    fn write_options(&self, options: &mut RawOptions, record: &RawOptions) {
        *options = *record;
    }

    fn options_free(&self, _options: RawOptions) {
        self.calls.options_free.fetch_add(1, Ordering::SeqCst);
    }

    fn create(&self, options: &RawOptions, saved: &[u8], status: &mut u32) -> Option<TestInstance> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_record.lock().unwrap() = Some(*options);
        *self.calls.last_saved.lock().unwrap() = saved.to_vec();
        *status = self.script.create_status;
        (self.script.create_status == STATUS_OK).then(|| TestInstance {
            state: self.script.save.clone(),
        })
    }

    fn bootstrap(
        &self,
        _instance: &mut TestInstance,
        address: &CStr,
        port: u16,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        status: &mut u32,
    ) -> bool {
        self.add_node(&self.calls.bootstrap, address, port, public_key, status)
    }

    fn add_tcp_relay(
        &self,
        _instance: &mut TestInstance,
        address: &CStr,
        port: u16,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        status: &mut u32,
    ) -> bool {
        self.add_node(&self.calls.relay, address, port, public_key, status)
    }

    fn iteration_interval(&self, _instance: &TestInstance) -> u32 {
        self.script.interval
    }

    fn iterate(&self, instance: &mut TestInstance) {
        self.calls.enter();
        self.calls.iterate.fetch_add(1, Ordering::SeqCst);
        if !self.script.iterate_delay.is_zero() {
            std::thread::sleep(self.script.iterate_delay);
        }
        instance.state.push(b'.');
        self.calls.leave();
    }

    fn destroy(&self, _instance: TestInstance) {
        self.calls.destroy.fetch_add(1, Ordering::SeqCst);
    }

    fn save_data_size(&self, instance: &TestInstance) -> usize {
        instance.state.len()
    }

    fn save_data(&self, instance: &TestInstance, out: &mut [u8]) {
        self.calls.save_data.fetch_add(1, Ordering::SeqCst);
        out.copy_from_slice(&instance.state);
    }
}
