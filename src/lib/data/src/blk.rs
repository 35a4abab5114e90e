/* SPDX-License-Identifier: GPL-2.0-only */

//! Block subsystem records

use serde::Serialize;

use crate::{DeviceRegion, Packer, Record, Region, BLK_MAGIC, MAX_CLIENTS};

/// One side of a block queue pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlkConnection {
    pub storage_info: Region,
    pub req_queue: Region,
    pub resp_queue: Region,
    /// Queue depth in entries
    pub num_buffers: u16,
    /// Channel id towards the peer
    pub id: u8,
}

impl BlkConnection {
    pub const SIZE: usize = 3 * Region::SIZE + 2 + 1;

    fn pack(&self, p: &mut Packer) {
        self.storage_info.pack_into(p);
        self.req_queue.pack_into(p);
        self.resp_queue.pack_into(p);
        p.u16(self.num_buffers);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BlkDriverConfig {
    pub virt: BlkConnection,
}

impl Record for BlkDriverConfig {
    const SIZE: usize = BLK_MAGIC.len() + BlkConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&BLK_MAGIC);
        self.virt.pack(&mut p);
        p.finish()
    }
}

/// The virtualiser's view of its driver
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BlkVirtDriver {
    pub conn: BlkConnection,
    /// Bulk DMA window, device-visible
    pub data: DeviceRegion,
}

const VIRT_DRIVER_SIZE: usize = BlkConnection::SIZE + DeviceRegion::SIZE;

/// The virtualiser's view of one client
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BlkVirtClient {
    pub conn: BlkConnection,
    pub data: DeviceRegion,
    pub partition: u32,
}

const VIRT_CLIENT_SIZE: usize = BlkConnection::SIZE + DeviceRegion::SIZE + 4;

#[derive(Clone, Debug, Default, Serialize)]
pub struct BlkVirtConfig {
    pub driver: BlkVirtDriver,
    pub clients: Vec<BlkVirtClient>,
}

impl Record for BlkVirtConfig {
    const SIZE: usize =
        BLK_MAGIC.len() + 8 + VIRT_DRIVER_SIZE + MAX_CLIENTS * VIRT_CLIENT_SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&BLK_MAGIC);
        p.u64(self.clients.len() as u64);
        self.driver.conn.pack(&mut p);
        self.driver.data.pack_into(&mut p);
        p.array(&self.clients, MAX_CLIENTS, VIRT_CLIENT_SIZE, |p, c| {
            c.conn.pack(p);
            c.data.pack_into(p);
            p.u32(c.partition);
        });
        p.finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BlkClientConfig {
    pub virt: BlkConnection,
    pub data: Region,
}

impl Record for BlkClientConfig {
    const SIZE: usize = BLK_MAGIC.len() + BlkConnection::SIZE + Region::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&BLK_MAGIC);
        self.virt.pack(&mut p);
        self.data.pack_into(&mut p);
        p.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pinned() {
        assert_eq!(BlkConnection::SIZE, 51);
        assert_eq!(BlkDriverConfig::SIZE, 56);
        assert_eq!(BlkVirtConfig::SIZE, 5 + 8 + 75 + 61 * 79);
        assert_eq!(BlkClientConfig::SIZE, 72);
    }

    #[test]
    fn virt_pack_layout() {
        let config = BlkVirtConfig {
            driver: BlkVirtDriver::default(),
            clients: vec![BlkVirtClient {
                partition: 2,
                ..Default::default()
            }],
        };
        let bytes = config.pack();
        assert_eq!(bytes.len(), BlkVirtConfig::SIZE);
        assert_eq!(&bytes[..5], &BLK_MAGIC);
        // num_clients immediately follows the magic
        assert_eq!(bytes[5], 1);
        // first client's partition sits after its connection and data
        let partition_off = 5 + 8 + 75 + 51 + 24;
        assert_eq!(&bytes[partition_off..partition_off + 4], &[2, 0, 0, 0]);
    }
}
