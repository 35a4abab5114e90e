/* SPDX-License-Identifier: GPL-2.0-only */

//! Timer subsystem records
//!
//! The timer carries no shared memory; a client only needs the channel id
//! of its protected call into the driver.

use serde::Serialize;

use crate::{Packer, Record, TIMER_MAGIC};

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TimerClientConfig {
    pub driver_id: u8,
}

impl Record for TimerClientConfig {
    const SIZE: usize = TIMER_MAGIC.len() + 1;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&TIMER_MAGIC);
        p.u8(self.driver_id);
        p.finish()
    }
}
