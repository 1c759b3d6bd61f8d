//! Boundary with the external peer-to-peer engine.
//!
//! [`Engine`] names the narrow operation set the facade needs. Methods mirror
//! the C calls one to one: status codes come back through `&mut u32`
//! out-parameters and are mapped by the caller (see [`crate::error`]), never
//! here. Implementations hold no facade state; [`crate::EngineHandle`]
//! serializes every call.

use std::ffi::CStr;

use crate::ffi::RawOptions;
use crate::key::PUBLIC_KEY_SIZE;

pub trait Engine: Send + 'static {
    /// Engine-allocated options object.
    type Options: Send + 'static;
    /// One running engine instance. Never cloned; owned by exactly one handle.
    type Instance: Send + 'static;

    fn options_new(&self, status: &mut u32) -> Option<Self::Options>;

    /// Copy the fixed-layout record into the engine's options object.
    fn write_options(&self, options: &mut Self::Options, record: &RawOptions);

    fn options_free(&self, options: Self::Options);

    /// `saved` is empty for a fresh instance.
    fn create(
        &self,
        options: &Self::Options,
        saved: &[u8],
        status: &mut u32,
    ) -> Option<Self::Instance>;

    fn bootstrap(
        &self,
        instance: &mut Self::Instance,
        address: &CStr,
        port: u16,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        status: &mut u32,
    ) -> bool;

    fn add_tcp_relay(
        &self,
        instance: &mut Self::Instance,
        address: &CStr,
        port: u16,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        status: &mut u32,
    ) -> bool;

    /// Milliseconds until `iterate` should run again.
    fn iteration_interval(&self, instance: &Self::Instance) -> u32;

    fn iterate(&self, instance: &mut Self::Instance);

    fn destroy(&self, instance: Self::Instance);

    fn save_data_size(&self, instance: &Self::Instance) -> usize;

    /// Fill `out`, which is exactly `save_data_size` bytes long.
    fn save_data(&self, instance: &Self::Instance, out: &mut [u8]);
}
