use core::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Sdf(sdf::Error),
    Dt(devicetree::Error),
    /// Enrolling the VMM as a client of an sDDF subsystem failed
    Sddf(sddf::Error),
    /// The device tree has no `device_type = "memory"` node
    MissingMemoryNode,
    InvalidMemoryNode { reason: String },
    /// An ARM guest needs an interrupt controller node
    MissingGicNode,
    /// `/chosen` carries no initrd range
    MissingInitrd,
    InvalidInitrd { reason: String },
    /// No page-aligned DTB window fits beside the initrd
    CouldNotAllocateDtb,
    InvalidPassthroughRegions { node: String, reason: String },
    InvalidPassthroughIrqs { node: String, reason: String },
    InvalidVirtioDevice { reason: String },
    InvalidUio { node: String, reason: String },
    /// `serialise_config` called before `connect`
    NotConnected,
    /// `connect` called a second time
    AlreadyConnected,
    UnsupportedArch,
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdf(e) => write!(f, "{e}"),
            Self::Dt(e) => write!(f, "{e}"),
            Self::Sddf(e) => write!(f, "{e}"),
            Self::MissingMemoryNode => write!(f, "device tree has no memory node"),
            Self::InvalidMemoryNode { reason } => write!(f, "invalid memory node: {reason}"),
            Self::MissingGicNode => write!(f, "device tree has no GIC node"),
            Self::MissingInitrd => write!(f, "no initrd range in /chosen"),
            Self::InvalidInitrd { reason } => write!(f, "invalid initrd range: {reason}"),
            Self::CouldNotAllocateDtb => {
                write!(f, "no room for the guest DTB beside the initrd")
            }
            Self::InvalidPassthroughRegions { node, reason } => {
                write!(f, "bad passthrough regions for node '{node}': {reason}")
            }
            Self::InvalidPassthroughIrqs { node, reason } => {
                write!(f, "bad passthrough interrupts for node '{node}': {reason}")
            }
            Self::InvalidVirtioDevice { reason } => {
                write!(f, "invalid virtio-mmio device: {reason}")
            }
            Self::InvalidUio { node, reason } => {
                write!(f, "invalid UIO node '{node}': {reason}")
            }
            Self::NotConnected => write!(f, "virtual machine has not been connected"),
            Self::AlreadyConnected => write!(f, "virtual machine is already connected"),
            Self::UnsupportedArch => write!(f, "virtual machines are not supported here"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<sdf::Error> for Error {
    fn from(e: sdf::Error) -> Self {
        Self::Sdf(e)
    }
}

impl From<devicetree::Error> for Error {
    fn from(e: devicetree::Error) -> Self {
        Self::Dt(e)
    }
}

impl From<sddf::Error> for Error {
    fn from(e: sddf::Error) -> Self {
        Self::Sddf(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
