//! Client facade over the toxcore peer-to-peer engine.
//! No protocol logic lives here: the crate builds the engine's options record,
//! owns instance lifecycle, drives iteration and maps status codes to errors.

pub mod driver;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod key;
pub mod options;

#[cfg(test)]
mod test_engine;

pub use driver::{IterationDriver, IterationMode, DEFAULT_ITERATION_INTERVAL};
pub use engine::Engine;
pub use error::{Error, Result};
#[cfg(feature = "native")]
pub use ffi::NativeEngine;
pub use ffi::RawOptions;
pub use handle::{BootstrapTarget, EngineHandle};
pub use key::PublicKey;
pub use options::{build, BuildOptions, EngineConfiguration, ProxyKind, ProxyOption, ProxySpec};
