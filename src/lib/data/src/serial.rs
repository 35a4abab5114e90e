/* SPDX-License-Identifier: GPL-2.0-only */

//! Serial subsystem records

use serde::Serialize;

use crate::{Packer, Record, Region, MAX_CLIENTS, SERIAL_MAGIC};

pub const SERIAL_MAX_NAME_LEN: usize = 64;
pub const SERIAL_MAX_BEGIN_STR_LEN: usize = 128;

/// One serial stream between two components
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SerialConnection {
    pub queue: Region,
    pub data: Region,
    /// Channel id towards the peer
    pub id: u8,
}

impl SerialConnection {
    pub const SIZE: usize = 2 * Region::SIZE + 1;

    fn pack(&self, p: &mut Packer) {
        self.queue.pack_into(p);
        self.data.pack_into(p);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SerialDriverConfig {
    /// Zeroed when the subsystem is transmit-only
    pub rx: SerialConnection,
    pub tx: SerialConnection,
    pub default_baud: u64,
    pub rx_enabled: bool,
}

impl Record for SerialDriverConfig {
    const SIZE: usize = SERIAL_MAGIC.len() + 2 * SerialConnection::SIZE + 8 + 1;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&SERIAL_MAGIC);
        self.rx.pack(&mut p);
        self.tx.pack(&mut p);
        p.u64(self.default_baud);
        p.u8(self.rx_enabled as u8);
        p.finish()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SerialVirtRxConfig {
    pub driver: SerialConnection,
    pub clients: Vec<SerialConnection>,
}

impl Record for SerialVirtRxConfig {
    const SIZE: usize =
        SERIAL_MAGIC.len() + SerialConnection::SIZE + 8 + MAX_CLIENTS * SerialConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&SERIAL_MAGIC);
        self.driver.pack(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, SerialConnection::SIZE, |p, c| {
            c.pack(p)
        });
        p.finish()
    }
}

/// A transmit client slot, named for console multiplexing
#[derive(Clone, Debug, Default, Serialize)]
pub struct SerialVirtTxClient {
    pub conn: SerialConnection,
    pub name: String,
}

const VIRT_TX_CLIENT_SIZE: usize = SerialConnection::SIZE + SERIAL_MAX_NAME_LEN;

#[derive(Clone, Debug, Default, Serialize)]
pub struct SerialVirtTxConfig {
    pub driver: SerialConnection,
    pub clients: Vec<SerialVirtTxClient>,
    pub begin_str: String,
    pub enable_colour: bool,
    pub enable_rx: bool,
}

impl Record for SerialVirtTxConfig {
    const SIZE: usize = SERIAL_MAGIC.len()
        + SerialConnection::SIZE
        + 8
        + MAX_CLIENTS * VIRT_TX_CLIENT_SIZE
        + SERIAL_MAX_BEGIN_STR_LEN
        + 3;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&SERIAL_MAGIC);
        self.driver.pack(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, VIRT_TX_CLIENT_SIZE, |p, c| {
            c.conn.pack(p);
            p.str_fixed(&c.name, SERIAL_MAX_NAME_LEN);
        });
        p.str_fixed(&self.begin_str, SERIAL_MAX_BEGIN_STR_LEN);
        p.u8(self.begin_str.len() as u8);
        p.u8(self.enable_colour as u8);
        p.u8(self.enable_rx as u8);
        p.finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SerialClientConfig {
    /// Zeroed when the subsystem is transmit-only
    pub rx: SerialConnection,
    pub tx: SerialConnection,
}

impl Record for SerialClientConfig {
    const SIZE: usize = SERIAL_MAGIC.len() + 2 * SerialConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&SERIAL_MAGIC);
        self.rx.pack(&mut p);
        self.tx.pack(&mut p);
        p.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pinned() {
        assert_eq!(SerialConnection::SIZE, 33);
        assert_eq!(SerialDriverConfig::SIZE, 80);
        assert_eq!(SerialVirtRxConfig::SIZE, 5 + 33 + 8 + 61 * 33);
        assert_eq!(SerialVirtTxConfig::SIZE, 5 + 33 + 8 + 61 * 97 + 128 + 3);
        assert_eq!(SerialClientConfig::SIZE, 71);
    }

    #[test]
    fn begin_str_and_flags_trail_the_record() {
        let config = SerialVirtTxConfig {
            begin_str: "hi".to_string(),
            enable_colour: true,
            enable_rx: false,
            ..Default::default()
        };
        let bytes = config.pack();
        assert_eq!(bytes.len(), SerialVirtTxConfig::SIZE);
        let begin_off = 5 + 33 + 8 + 61 * 97;
        assert_eq!(&bytes[begin_off..begin_off + 2], b"hi");
        assert_eq!(bytes[begin_off + 128], 2); // begin_str_len
        assert_eq!(bytes[begin_off + 129], 1); // enable_colour
        assert_eq!(bytes[begin_off + 130], 0); // enable_rx
    }

    #[test]
    fn client_names_are_fixed_slots() {
        let config = SerialVirtTxConfig {
            clients: vec![SerialVirtTxClient {
                conn: SerialConnection::default(),
                name: "client0".to_string(),
            }],
            ..Default::default()
        };
        let bytes = config.pack();
        let name_off = 5 + 33 + 8 + 33;
        assert_eq!(&bytes[name_off..name_off + 7], b"client0");
        assert_eq!(bytes[name_off + 7], 0);
    }
}
