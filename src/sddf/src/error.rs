use core::fmt;
use std::io;

/// Errors surfaced by subsystem composition and the driver catalogue
#[derive(Debug)]
pub enum Error {
    /// Identifier allocation failed in the underlying description
    Sdf(sdf::Error),
    /// A device-tree query failed
    Dt(devicetree::Error),
    /// The PD is already a client of this subsystem
    DuplicateClient { subsystem: &'static str, pd: String },
    /// The PD cannot be a client here (it plays another role, or the
    /// subsystem is full)
    InvalidClient {
        subsystem: &'static str,
        pd: String,
        reason: &'static str,
    },
    /// The copier PD is already paired with another network client
    DuplicateCopier { pd: String },
    DuplicateMacAddr { mac: String },
    InvalidMacAddr { mac: String },
    InvalidBeginString { reason: &'static str },
    /// The virtualiser topology is malformed (shared PDs between roles)
    InvalidVirt { reason: String },
    /// `serialise_config` called before `connect`
    NotConnected,
    /// `connect` called a second time
    AlreadyConnected,
    /// The catalogue has no driver of the right class for the node
    UnknownDevice {
        node: String,
        compatibles: Vec<String>,
    },
    /// The node's `status` property is present and not "okay"
    DeviceStatusInvalid { node: String },
    /// The driver descriptor does not fit the device-tree node
    InvalidConfig { node: String, reason: String },
    /// A descriptor file exists but cannot be parsed
    Catalogue { path: String, reason: String },
    /// The subsystem cannot serve this target architecture
    UnsupportedArch,
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdf(e) => write!(f, "{e}"),
            Self::Dt(e) => write!(f, "{e}"),
            Self::DuplicateClient { subsystem, pd } => {
                write!(f, "'{pd}' is already a client of the {subsystem} subsystem")
            }
            Self::InvalidClient { subsystem, pd, reason } => {
                write!(f, "'{pd}' cannot be a {subsystem} client: {reason}")
            }
            Self::DuplicateCopier { pd } => {
                write!(f, "copier '{pd}' is already paired with another client")
            }
            Self::DuplicateMacAddr { mac } => write!(f, "MAC address {mac} is already in use"),
            Self::InvalidMacAddr { mac } => write!(f, "malformed MAC address '{mac}'"),
            Self::InvalidBeginString { reason } => write!(f, "invalid begin string: {reason}"),
            Self::InvalidVirt { reason } => write!(f, "invalid virtualiser topology: {reason}"),
            Self::NotConnected => write!(f, "subsystem has not been connected"),
            Self::AlreadyConnected => write!(f, "subsystem is already connected"),
            Self::UnknownDevice { node, compatibles } => write!(
                f,
                "no driver in the catalogue for node '{node}' (compatible {compatibles:?})"
            ),
            Self::DeviceStatusInvalid { node } => {
                write!(f, "device node '{node}' is not enabled")
            }
            Self::InvalidConfig { node, reason } => {
                write!(f, "driver descriptor does not fit node '{node}': {reason}")
            }
            Self::Catalogue { path, reason } => {
                write!(f, "could not parse driver descriptor '{path}': {reason}")
            }
            Self::UnsupportedArch => write!(f, "subsystem does not support this architecture"),
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
        match e {
            devicetree::Error::UnsupportedArch => Self::UnsupportedArch,
            other => Self::Dt(other),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
