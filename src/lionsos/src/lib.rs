/* SPDX-License-Identifier: GPL-2.0-only */

//! File-system subsystems of the higher-level OS
//!
//! Every file system shares one wiring core: a command queue, a
//! completion queue and a data-share region between the server PD and its
//! single client PD, plus one channel. FAT backs the server with a block
//! partition, NFS reaches its remote mount through serial, timer and
//! network subsystems, and VMFS serves from a guest composed separately
//! through the `vmm` crate.

pub mod fs;

pub use fs::{Fat, FileSystem, Nfs, VmFs};

use core::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// A dependent sDDF subsystem rejected the wiring
    Sddf(sddf::Error),
    /// Identifier allocation failed in the underlying description
    Sdf(sdf::Error),
    InvalidClient { pd: String, reason: String },
    /// `serialise_config` called before `connect`
    NotConnected,
    /// `connect` called a second time
    AlreadyConnected,
    /// An option string does not fit its fixed record field
    InvalidOptions { reason: String },
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sddf(e) => write!(f, "{e}"),
            Self::Sdf(e) => write!(f, "{e}"),
            Self::InvalidClient { pd, reason } => {
                write!(f, "'{pd}' cannot use this file system: {reason}")
            }
            Self::NotConnected => write!(f, "file system has not been connected"),
            Self::AlreadyConnected => write!(f, "file system is already connected"),
            Self::InvalidOptions { reason } => write!(f, "invalid file-system options: {reason}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<sddf::Error> for Error {
    fn from(e: sddf::Error) -> Self {
        Self::Sddf(e)
    }
}

impl From<sdf::Error> for Error {
    fn from(e: sdf::Error) -> Self {
        Self::Sdf(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
