/* SPDX-License-Identifier: GPL-2.0-only */

//! Subsystem composer for the standard device classes
//!
//! Every subsystem follows the same three-phase protocol: capture the
//! participating PDs at construction, collect clients through
//! `add_client`, then mutate the system description exactly once in
//! `connect` (shared memory, mappings, channels, interrupts) while
//! recording each participant's binary configuration. `serialise_config`
//! writes the recorded configurations and requires a prior `connect`.

pub mod blk;
pub mod catalogue;
mod device;
pub mod error;
pub mod gpu;
pub mod i2c;
pub mod net;
pub mod serial;
pub mod timer;

pub use catalogue::{DeviceClass, DriverDescriptor, DriverIrq, DriverRegion, DriverRepo};
pub use error::Error;

use std::path::Path;

use sdf::{PdId, SystemDescription};

/// Clients per subsystem; one virtualiser id slot belongs to the driver
pub const MAX_CLIENTS: usize = data::MAX_CLIENTS;

/// Control-ring regions are a single small page
pub(crate) const QUEUE_REGION_SIZE: u64 = 0x1000;

/// The shared shape of every subsystem
///
/// `connect` is single-use; a second call is a terminal error, as is
/// serialising before connecting.
pub trait Subsystem {
    type Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Self::Error>;

    /// Write one packed configuration file per participant into `output`
    fn serialise_config(&self, output: &Path) -> Result<(), Self::Error>;
}

/// Shared `add_client` validation: a client must not play another role in
/// the subsystem, must not be added twice, and must fit the client bound
pub(crate) fn check_client(
    subsystem: &'static str,
    sdf: &SystemDescription,
    clients: &[PdId],
    reserved: &[PdId],
    client: PdId,
) -> Result<(), Error> {
    if reserved.contains(&client) {
        return Err(Error::InvalidClient {
            subsystem,
            pd: sdf.pd(client).name().to_string(),
            reason: "the PD already plays a driver or virtualiser role",
        });
    }
    if clients.contains(&client) {
        return Err(Error::DuplicateClient {
            subsystem,
            pd: sdf.pd(client).name().to_string(),
        });
    }
    if clients.len() >= MAX_CLIENTS {
        return Err(Error::InvalidClient {
            subsystem,
            pd: sdf.pd(client).name().to_string(),
            reason: "the subsystem already has 61 clients",
        });
    }
    Ok(())
}
