/* SPDX-License-Identifier: GPL-2.0-only */

//! Device resources handed to a probed driver

use serde::Serialize;

use crate::{DeviceRegion, Packer, Record, DEVICE_MAGIC};

pub const DEVICE_MAX_REGIONS: usize = 64;
pub const DEVICE_MAX_IRQS: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIrqResource {
    /// PD-local channel id of the interrupt
    pub id: u8,
    /// Kernel-visible interrupt number
    pub irq: u32,
}

const IRQ_RESOURCE_SIZE: usize = 5;

/// Everything a driver learns about its hardware at boot
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceResources {
    pub regions: Vec<DeviceRegion>,
    pub irqs: Vec<DeviceIrqResource>,
}

impl Record for DeviceResources {
    const SIZE: usize = DEVICE_MAGIC.len()
        + 2
        + DEVICE_MAX_REGIONS * DeviceRegion::SIZE
        + DEVICE_MAX_IRQS * IRQ_RESOURCE_SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&DEVICE_MAGIC);
        p.u8(self.regions.len() as u8);
        p.u8(self.irqs.len() as u8);
        p.array(&self.regions, DEVICE_MAX_REGIONS, DeviceRegion::SIZE, |p, r| {
            r.pack_into(p)
        });
        p.array(&self.irqs, DEVICE_MAX_IRQS, IRQ_RESOURCE_SIZE, |p, i| {
            p.u8(i.id);
            p.u32(i.irq);
        });
        p.finish()
    }
}
