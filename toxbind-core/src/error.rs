//! Error taxonomy and the mapping from engine status codes.
//!
//! Every boundary call reports a `u32` status through an out-parameter. The
//! `check_*` functions turn that code into `Ok(())` or a structured [`Error`];
//! codes outside the known set become [`Error::UnknownEngine`].

use std::fmt;

use thiserror::Error;

/// Status code every engine operation family uses for success.
pub const STATUS_OK: u32 = 0;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("engine creation failed: {kind} (code {code})")]
    EngineCreation { kind: CreationFailure, code: u32 },

    #[error("engine options allocation failed: {kind} (code {code})")]
    OptionsCreation { kind: OptionsFailure, code: u32 },

    #[error("bootstrap failed: {kind} (code {code})")]
    Bootstrap { kind: BootstrapFailure, code: u32 },

    /// The engine returned false while reporting an OK status.
    #[error("bootstrap returned failure with an OK status")]
    InconsistentBootstrap,

    #[error("engine handle used after destroy")]
    UseAfterClose,

    #[error("unknown engine status code {code}")]
    UnknownEngine { code: u32 },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("blocking worker failed: {0}")]
    Join(String),
}

/// Reasons `create` can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationFailure {
    Null,
    Malloc,
    PortAlloc,
    ProxyBadType,
    ProxyBadHost,
    ProxyBadPort,
    ProxyNotFound,
    LoadEncrypted,
    LoadBadFormat,
}

impl CreationFailure {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::Null,
            2 => Self::Malloc,
            3 => Self::PortAlloc,
            4 => Self::ProxyBadType,
            5 => Self::ProxyBadHost,
            6 => Self::ProxyBadPort,
            7 => Self::ProxyNotFound,
            8 => Self::LoadEncrypted,
            9 => Self::LoadBadFormat,
            _ => return None,
        })
    }
}

impl fmt::Display for CreationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "required argument was null",
            Self::Malloc => "out of memory",
            Self::PortAlloc => "could not bind to a port",
            Self::ProxyBadType => "proxy type is invalid",
            Self::ProxyBadHost => "proxy host is invalid",
            Self::ProxyBadPort => "proxy port is invalid",
            Self::ProxyNotFound => "proxy host could not be resolved",
            Self::LoadEncrypted => "save data is encrypted",
            Self::LoadBadFormat => "save data has a bad format",
        };
        f.write_str(s)
    }
}

/// Reasons the options object could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsFailure {
    Malloc,
}

impl OptionsFailure {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Malloc),
            _ => None,
        }
    }
}

impl fmt::Display for OptionsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malloc => f.write_str("out of memory"),
        }
    }
}

/// Reasons bootstrap or add-relay can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapFailure {
    Null,
    BadHost,
    BadPort,
}

impl BootstrapFailure {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::Null,
            2 => Self::BadHost,
            3 => Self::BadPort,
            _ => return None,
        })
    }
}

impl fmt::Display for BootstrapFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "required argument was null",
            Self::BadHost => "host could not be resolved",
            Self::BadPort => "port is invalid",
        };
        f.write_str(s)
    }
}

pub fn check_options_new(code: u32) -> Result<()> {
    if code == STATUS_OK {
        return Ok(());
    }
    match OptionsFailure::from_code(code) {
        Some(kind) => Err(Error::OptionsCreation { kind, code }),
        None => Err(Error::UnknownEngine { code }),
    }
}

pub fn check_create(code: u32) -> Result<()> {
    if code == STATUS_OK {
        return Ok(());
    }
    match CreationFailure::from_code(code) {
        Some(kind) => Err(Error::EngineCreation { kind, code }),
        None => Err(Error::UnknownEngine { code }),
    }
}

/// Bootstrap contract: success needs both `returned == true` and an OK status.
/// A non-OK status wins over the boolean.
pub fn check_bootstrap(returned: bool, code: u32) -> Result<()> {
    if code != STATUS_OK {
        return match BootstrapFailure::from_code(code) {
            Some(kind) => Err(Error::Bootstrap { kind, code }),
            None => Err(Error::UnknownEngine { code }),
        };
    }
    if returned {
        Ok(())
    } else {
        Err(Error::InconsistentBootstrap)
    }
}
