/* SPDX-License-Identifier: GPL-2.0-only */

//! I2C subsystem records

use serde::Serialize;

use crate::{Packer, Record, Region, I2C_MAGIC, MAX_CLIENTS};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct I2cConnection {
    pub req_queue: Region,
    pub resp_queue: Region,
    pub data: Region,
    /// Channel id towards the peer
    pub id: u8,
}

impl I2cConnection {
    pub const SIZE: usize = 3 * Region::SIZE + 1;

    fn pack(&self, p: &mut Packer) {
        self.req_queue.pack_into(p);
        self.resp_queue.pack_into(p);
        self.data.pack_into(p);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct I2cDriverConfig {
    pub virt: I2cConnection,
}

impl Record for I2cDriverConfig {
    const SIZE: usize = I2C_MAGIC.len() + I2cConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&I2C_MAGIC);
        self.virt.pack(&mut p);
        p.finish()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct I2cVirtConfig {
    pub driver: I2cConnection,
    pub clients: Vec<I2cConnection>,
}

impl Record for I2cVirtConfig {
    const SIZE: usize =
        I2C_MAGIC.len() + I2cConnection::SIZE + 8 + MAX_CLIENTS * I2cConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&I2C_MAGIC);
        self.driver.pack(&mut p);
        p.u64(self.clients.len() as u64);
        p.array(&self.clients, MAX_CLIENTS, I2cConnection::SIZE, |p, c| c.pack(p));
        p.finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct I2cClientConfig {
    pub virt: I2cConnection,
}

impl Record for I2cClientConfig {
    const SIZE: usize = I2C_MAGIC.len() + I2cConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&I2C_MAGIC);
        self.virt.pack(&mut p);
        p.finish()
    }
}
