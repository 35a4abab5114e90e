/* SPDX-License-Identifier: GPL-2.0-only */

//! Network subsystem records, including the lwIP helper record

use serde::Serialize;

use crate::{DeviceRegion, Packer, Record, Region, LWIP_MAGIC, MAX_CLIENTS, NET_MAGIC};

pub const MAC_ADDR_LEN: usize = 6;

/// A free/active queue pair between two components
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetConnection {
    pub free_queue: Region,
    pub active_queue: Region,
    /// Buffer count both queues are sized for
    pub num_buffers: u16,
    /// Channel id towards the peer
    pub id: u8,
}

impl NetConnection {
    pub const SIZE: usize = 2 * Region::SIZE + 2 + 1;

    fn pack(&self, p: &mut Packer) {
        self.free_queue.pack_into(p);
        self.active_queue.pack_into(p);
        p.u16(self.num_buffers);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct NetDriverConfig {
    pub virt_rx: NetConnection,
    pub virt_tx: NetConnection,
}

impl Record for NetDriverConfig {
    const SIZE: usize = NET_MAGIC.len() + 2 * NetConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NET_MAGIC);
        self.virt_rx.pack(&mut p);
        self.virt_tx.pack(&mut p);
        p.finish()
    }
}

/// The receive virtualiser's view of one client
#[derive(Clone, Debug, Default, Serialize)]
pub struct NetVirtRxClient {
    pub conn: NetConnection,
    pub mac_addr: [u8; MAC_ADDR_LEN],
}

const VIRT_RX_CLIENT_SIZE: usize = NetConnection::SIZE + MAC_ADDR_LEN;

#[derive(Clone, Debug, Default, Serialize)]
pub struct NetVirtRxConfig {
    pub driver: NetConnection,
    /// The DMA data window, device-visible
    pub data: DeviceRegion,
    pub clients: Vec<NetVirtRxClient>,
}

impl Record for NetVirtRxConfig {
    const SIZE: usize = NET_MAGIC.len()
        + NetConnection::SIZE
        + DeviceRegion::SIZE
        + 8
        + MAX_CLIENTS * VIRT_RX_CLIENT_SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NET_MAGIC);
        self.driver.pack(&mut p);
        self.data.pack_into(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, VIRT_RX_CLIENT_SIZE, |p, c| {
            c.conn.pack(p);
            p.bytes(&c.mac_addr);
        });
        p.finish()
    }
}

/// The transmit virtualiser's view of one client
#[derive(Clone, Debug, Default, Serialize)]
pub struct NetVirtTxClient {
    pub conn: NetConnection,
    /// The client's transmit buffers, device-visible
    pub data: DeviceRegion,
}

const VIRT_TX_CLIENT_SIZE: usize = NetConnection::SIZE + DeviceRegion::SIZE;

#[derive(Clone, Debug, Default, Serialize)]
pub struct NetVirtTxConfig {
    pub driver: NetConnection,
    pub clients: Vec<NetVirtTxClient>,
}

impl Record for NetVirtTxConfig {
    const SIZE: usize =
        NET_MAGIC.len() + NetConnection::SIZE + 8 + MAX_CLIENTS * VIRT_TX_CLIENT_SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NET_MAGIC);
        self.driver.pack(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, VIRT_TX_CLIENT_SIZE, |p, c| {
            c.conn.pack(p);
            c.data.pack_into(p);
        });
        p.finish()
    }
}

/// The per-client copier between the receive virtualiser and a client
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct NetCopyConfig {
    pub device: NetConnection,
    pub device_data: Region,
    pub client: NetConnection,
    pub client_data: Region,
}

impl Record for NetCopyConfig {
    const SIZE: usize = NET_MAGIC.len() + 2 * NetConnection::SIZE + 2 * Region::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NET_MAGIC);
        self.device.pack(&mut p);
        self.device_data.pack_into(&mut p);
        self.client.pack(&mut p);
        self.client_data.pack_into(&mut p);
        p.finish()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct NetClientConfig {
    pub rx: NetConnection,
    pub rx_data: Region,
    pub tx: NetConnection,
    pub tx_data: Region,
    pub mac_addr: [u8; MAC_ADDR_LEN],
}

impl Record for NetClientConfig {
    const SIZE: usize =
        NET_MAGIC.len() + 2 * NetConnection::SIZE + 2 * Region::SIZE + MAC_ADDR_LEN;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NET_MAGIC);
        self.rx.pack(&mut p);
        self.rx_data.pack_into(&mut p);
        self.tx.pack(&mut p);
        self.tx_data.pack_into(&mut p);
        p.bytes(&self.mac_addr);
        p.finish()
    }
}

/// The lwIP helper's packet-buffer pool for one net client
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct LibSddfLwipConfig {
    pub pbuf_pool: Region,
    pub num_pbufs: u64,
}

impl Record for LibSddfLwipConfig {
    const SIZE: usize = LWIP_MAGIC.len() + Region::SIZE + 8;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&LWIP_MAGIC);
        self.pbuf_pool.pack_into(&mut p);
        p.u64(self.num_pbufs);
        p.finish()
    }
}
