use core::fmt;

/// Errors surfaced while assembling a system description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested PD-local id is already taken
    AlreadyAllocatedId { pd: String, id: u8 },
    /// The PD's id space (62 slots) is exhausted
    NoMoreIds { pd: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAllocatedId { pd, id } => {
                write!(f, "id {id} is already allocated in protection domain '{pd}'")
            }
            Self::NoMoreIds { pd } => {
                write!(f, "no free ids left in protection domain '{pd}'")
            }
        }
    }
}
