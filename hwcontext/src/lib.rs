// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use snafu::Snafu;

mod context;
pub use context::{
    Backend, ChassisKind, Context, ContextFlags, DisplayState, Firmware, LidState, PowerState, QuirkLookup,
    BATTERY_LEVEL_INVALID,
};

mod bootfiles;
pub use bootfiles::EspFileFlags;

pub mod efipath;
pub mod efivars;

mod esp;

mod events;
pub use events::{ChangeEvent, ListenerHandle};

mod fdt;
pub use fdt::Fdt;

mod hwid;
pub use hwid::{DmiBackend, HwidBackend, HwidSetupFlags, Hwids};

mod pe;
pub use pe::PeImage;

#[cfg(test)]
pub(crate) mod testutil;

/// Core error type for the hardware context
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cannot mount volume by policy"))]
    MountInhibited,

    #[snafu(display("no EFI system partition found"))]
    NoEspElected,

    #[snafu(display("user specified ESP {location} not found"))]
    UserEspNotFound { location: String },

    #[snafu(display("No ESP or BDP found"))]
    NoEspOrBdp,

    #[snafu(display("could not find EFI DP"))]
    NoVolumeForDevicePath,

    #[snafu(display("no mountpoint for ESP"))]
    NotMounted,

    #[snafu(display("no bootloader with prefix {prefixes} in {path:?}"))]
    NoLinuxBootloader { prefixes: String, path: PathBuf },

    #[snafu(display(
        "Not enough efivarfs space, requested {} and got {}",
        format_size(*requested),
        format_size(*got)
    ))]
    EfivarsSpace { requested: u64, got: u64 },

    #[snafu(display("no boot entry Boot{idx:04X}"))]
    NoBootEntry { idx: u16 },

    #[snafu(display("no plugins registered for {subsystem}"))]
    NoPluginsForSubsystem { subsystem: String },

    #[snafu(display("no backend named {name}"))]
    NoBackend { name: String },

    #[snafu(display("cannot find {sys:?} or override {local:?}"))]
    FdtNotFound { sys: PathBuf, local: PathBuf },

    #[snafu(display("invalid FDT: {reason}"))]
    InvalidFdt { reason: String },

    #[snafu(display("{path:?} is not a PE file: {reason}"))]
    PeNotSupported { path: PathBuf, reason: String },

    #[snafu(display("invalid PE file {path:?}: {reason}"))]
    PeInvalid { path: PathBuf, reason: String },

    #[snafu(display("no such file {path:?}"))]
    FileNotFound { path: PathBuf },

    #[snafu(display("invalid device path: {reason}"))]
    InvalidDevicePath { reason: String },

    #[snafu(display("invalid load option: {reason}"))]
    InvalidLoadOption { reason: String },

    #[snafu(display("hardware info not loaded"))]
    HwinfoNotLoaded,

    #[snafu(context(false), display("generic i/o error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(context(false), display("volume inventory: {source}"))]
    Volumes { source: volumes::Error },
}

/// Spec-level classification of an [`Error`], used to decide which failures
/// the tolerant enumeration paths may swallow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotSupported,
    NotFound,
    InvalidFile,
    BrokenSystem,
    Internal,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MountInhibited
            | Error::NoEspElected
            | Error::UserEspNotFound { .. }
            | Error::NotMounted
            | Error::FdtNotFound { .. }
            | Error::PeNotSupported { .. } => ErrorKind::NotSupported,
            Error::NoEspOrBdp
            | Error::NoVolumeForDevicePath
            | Error::NoLinuxBootloader { .. }
            | Error::NoBootEntry { .. }
            | Error::NoPluginsForSubsystem { .. }
            | Error::NoBackend { .. }
            | Error::FileNotFound { .. } => ErrorKind::NotFound,
            Error::PeInvalid { .. }
            | Error::InvalidDevicePath { .. }
            | Error::InvalidLoadOption { .. }
            | Error::InvalidFdt { .. } => ErrorKind::InvalidFile,
            Error::EfivarsSpace { .. } => ErrorKind::BrokenSystem,
            Error::HwinfoNotLoaded => ErrorKind::Internal,
            Error::Io { .. } | Error::Volumes { .. } => ErrorKind::Io,
        }
    }
}

/// Render a byte count the way users expect to read it, SI units with one
/// decimal above the unit boundary
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}
