//! C ABI with libtoxcore: the fixed-layout options record and, behind the
//! `native` feature, the extern declarations plus [`NativeEngine`].

/// Size of the proxy address buffer, terminator included.
pub const PROXY_ADDRESS_SIZE: usize = 256;

/// Largest proxy address that fits with its NUL terminator.
pub const MAX_PROXY_ADDRESS_LEN: usize = PROXY_ADDRESS_SIZE - 1;

pub const PROXY_TYPE_NONE: u8 = 0;
pub const PROXY_TYPE_HTTP: u8 = 1;
pub const PROXY_TYPE_SOCKS5: u8 = 2;

/// Options record consumed by `tox_new`. Field order and widths are ABI.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawOptions {
    pub ipv6_enabled: u8,
    pub udp_disabled: u8,
    pub proxy_type: u8,
    /// NUL-terminated.
    pub proxy_address: [u8; PROXY_ADDRESS_SIZE],
    pub proxy_port: u16,
    pub start_port: u16,
    pub end_port: u16,
}

impl RawOptions {
    /// Engine defaults: IPv4, UDP on, no proxy, default ports.
    pub const fn zeroed() -> Self {
        Self {
            ipv6_enabled: 0,
            udp_disabled: 0,
            proxy_type: PROXY_TYPE_NONE,
            proxy_address: [0; PROXY_ADDRESS_SIZE],
            proxy_port: 0,
            start_port: 0,
            end_port: 0,
        }
    }

    /// Proxy address bytes up to the first NUL.
    pub fn proxy_address_bytes(&self) -> &[u8] {
        let end = self
            .proxy_address
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_PROXY_ADDRESS_LEN);
        &self.proxy_address[..end]
    }
}

impl Default for RawOptions {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for RawOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawOptions")
            .field("ipv6_enabled", &self.ipv6_enabled)
            .field("udp_disabled", &self.udp_disabled)
            .field("proxy_type", &self.proxy_type)
            .field(
                "proxy_address",
                &String::from_utf8_lossy(self.proxy_address_bytes()),
            )
            .field("proxy_port", &self.proxy_port)
            .field("start_port", &self.start_port)
            .field("end_port", &self.end_port)
            .finish()
    }
}

#[cfg(feature = "native")]
pub use native::NativeEngine;

#[cfg(feature = "native")]
mod native {
    use std::ffi::{c_char, c_void, CStr};
    use std::ptr::{self, NonNull};

    use super::RawOptions;
    use crate::engine::Engine;
    use crate::key::PUBLIC_KEY_SIZE;

    #[link(name = "toxcore")]
    extern "C" {
        fn tox_options_new(error: *mut u32) -> *mut RawOptions;
        fn tox_options_free(options: *mut RawOptions);
        fn tox_new(
            options: *const RawOptions,
            data: *const u8,
            length: usize,
            error: *mut u32,
        ) -> *mut c_void;
        fn tox_bootstrap(
            tox: *mut c_void,
            address: *const c_char,
            port: u16,
            public_key: *const u8,
            error: *mut u32,
        ) -> bool;
        fn tox_add_tcp_relay(
            tox: *mut c_void,
            address: *const c_char,
            port: u16,
            public_key: *const u8,
            error: *mut u32,
        ) -> bool;
        fn tox_iteration_interval(tox: *const c_void) -> u32;
        fn tox_iterate(tox: *mut c_void);
        fn tox_kill(tox: *mut c_void);
        fn tox_get_savedata_size(tox: *const c_void) -> usize;
        fn tox_get_savedata(tox: *const c_void, data: *mut u8);
    }

    /// Options object allocated by `tox_options_new`.
    pub struct NativeOptions(NonNull<RawOptions>);

    /// Running `Tox` instance.
    pub struct NativeInstance(NonNull<c_void>);

    // Both pointers are exclusively owned and only touched under the
    // handle's lock.
    unsafe impl Send for NativeOptions {}
    unsafe impl Send for NativeInstance {}

    /// [`Engine`] backed by the system libtoxcore.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeEngine;

    impl Engine for NativeEngine {
        type Options = NativeOptions;
        type Instance = NativeInstance;

        fn options_new(&self, status: &mut u32) -> Option<NativeOptions> {
            let p = unsafe { tox_options_new(status) };
            NonNull::new(p).map(NativeOptions)
        }

        fn write_options(&self, options: &mut NativeOptions, record: &RawOptions) {
            unsafe {
                *options.0.as_ptr() = *record;
            }
        }

        fn options_free(&self, options: NativeOptions) {
            unsafe { tox_options_free(options.0.as_ptr()) }
        }

        fn create(
            &self,
            options: &NativeOptions,
            saved: &[u8],
            status: &mut u32,
        ) -> Option<NativeInstance> {
            let data = if saved.is_empty() {
                ptr::null()
            } else {
                saved.as_ptr()
            };
            let p = unsafe { tox_new(options.0.as_ptr(), data, saved.len(), status) };
            NonNull::new(p).map(NativeInstance)
        }

        fn bootstrap(
            &self,
            instance: &mut NativeInstance,
            address: &CStr,
            port: u16,
            public_key: &[u8; PUBLIC_KEY_SIZE],
            status: &mut u32,
        ) -> bool {
            unsafe {
                tox_bootstrap(
                    instance.0.as_ptr(),
                    address.as_ptr(),
                    port,
                    public_key.as_ptr(),
                    status,
                )
            }
        }

        fn add_tcp_relay(
            &self,
            instance: &mut NativeInstance,
            address: &CStr,
            port: u16,
            public_key: &[u8; PUBLIC_KEY_SIZE],
            status: &mut u32,
        ) -> bool {
            unsafe {
                tox_add_tcp_relay(
                    instance.0.as_ptr(),
                    address.as_ptr(),
                    port,
                    public_key.as_ptr(),
                    status,
                )
            }
        }

        fn iteration_interval(&self, instance: &NativeInstance) -> u32 {
            unsafe { tox_iteration_interval(instance.0.as_ptr()) }
        }

        fn iterate(&self, instance: &mut NativeInstance) {
            unsafe { tox_iterate(instance.0.as_ptr()) }
        }

        fn destroy(&self, instance: NativeInstance) {
            unsafe { tox_kill(instance.0.as_ptr()) }
        }

        fn save_data_size(&self, instance: &NativeInstance) -> usize {
            unsafe { tox_get_savedata_size(instance.0.as_ptr()) }
        }

        fn save_data(&self, instance: &NativeInstance, out: &mut [u8]) {
            unsafe { tox_get_savedata(instance.0.as_ptr(), out.as_mut_ptr()) }
        }
    }
}
