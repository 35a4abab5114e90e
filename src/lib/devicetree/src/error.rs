use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The flattened blob could not be parsed
    Blob(String),
    /// A property's value is not a whole number of 32-bit cells, or is
    /// shorter than its cell layout requires
    BadCells { node: String, prop: String },
    /// The `interrupts` property does not follow the architecture's cell
    /// layout
    InvalidInterruptCells { node: String },
    /// A `generic-uio` node breaks the single-region page-aligned shape
    InvalidUio { node: String, reason: String },
    /// No interrupt controller node with a known compatible
    GicNotFound,
    /// The architecture has no interrupt-cell interpretation here
    UnsupportedArch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob(reason) => write!(f, "could not parse device tree blob: {reason}"),
            Self::BadCells { node, prop } => {
                write!(f, "malformed cells in property '{prop}' of node '{node}'")
            }
            Self::InvalidInterruptCells { node } => {
                write!(f, "unexpected interrupt cell layout in node '{node}'")
            }
            Self::InvalidUio { node, reason } => {
                write!(f, "invalid UIO node '{node}': {reason}")
            }
            Self::GicNotFound => write!(f, "no GIC node found in device tree"),
            Self::UnsupportedArch => write!(f, "architecture not supported for this query"),
        }
    }
}
