/* SPDX-License-Identifier: GPL-2.0-only */

//! GPU subsystem records

use serde::Serialize;

use crate::{Packer, Record, Region, GPU_MAGIC, MAX_CLIENTS};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GpuConnection {
    pub events: Region,
    pub req_queue: Region,
    pub resp_queue: Region,
    pub data: Region,
    /// Channel id towards the peer
    pub id: u8,
}

impl GpuConnection {
    pub const SIZE: usize = 4 * Region::SIZE + 1;

    fn pack(&self, p: &mut Packer) {
        self.events.pack_into(p);
        self.req_queue.pack_into(p);
        self.resp_queue.pack_into(p);
        self.data.pack_into(p);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct GpuDriverConfig {
    pub virt: GpuConnection,
}

impl Record for GpuDriverConfig {
    const SIZE: usize = GPU_MAGIC.len() + GpuConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&GPU_MAGIC);
        self.virt.pack(&mut p);
        p.finish()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GpuVirtConfig {
    pub driver: GpuConnection,
    pub clients: Vec<GpuConnection>,
}

impl Record for GpuVirtConfig {
    const SIZE: usize =
        GPU_MAGIC.len() + GpuConnection::SIZE + 8 + MAX_CLIENTS * GpuConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&GPU_MAGIC);
        self.driver.pack(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, GpuConnection::SIZE, |p, c| c.pack(p));
        p.finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct GpuClientConfig {
    pub virt: GpuConnection,
}

impl Record for GpuClientConfig {
    const SIZE: usize = GPU_MAGIC.len() + GpuConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&GPU_MAGIC);
        self.virt.pack(&mut p);
        p.finish()
    }
}
