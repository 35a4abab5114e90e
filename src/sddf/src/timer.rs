/* SPDX-License-Identifier: GPL-2.0-only */

//! Timer subsystem: a passive driver and channel-only clients
//!
//! There is no shared memory here; a client's whole configuration is the
//! channel id of its protected call into the driver.

use std::path::Path;

use data::device::DeviceResources;
use data::timer::TimerClientConfig;
use devicetree::Node;
use log::debug;
use sdf::{ChannelEnd, ChannelOptions, PdId, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem};

pub struct TimerSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    clients: Vec<PdId>,
    connected: bool,
    device_resources: DeviceResources,
    client_configs: Vec<(String, TimerClientConfig)>,
}

impl<'a> TimerSystem<'a> {
    pub fn new(repo: &'a DriverRepo, device: Node<'a>, driver: PdId) -> Self {
        Self {
            repo,
            device,
            driver,
            clients: Vec::new(),
            connected: false,
            device_resources: DeviceResources::default(),
            client_configs: Vec::new(),
        }
    }

    pub fn add_client(&mut self, sdf: &SystemDescription, client: PdId) -> Result<(), Error> {
        check_client("timer", sdf, &self.clients, &[self.driver], client)?;
        self.clients.push(client);
        Ok(())
    }
}

impl Subsystem for TimerSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources =
            attach_driver(sdf, self.repo, DeviceClass::Timer, self.driver, self.device)?;
        // the driver only ever runs on behalf of a caller
        sdf.pd_mut(self.driver).set_passive(true);

        for &client in &self.clients {
            let name = sdf.pd(client).name().to_string();
            let mut options = ChannelOptions::new(self.driver, client);
            options.pp = Some(ChannelEnd::A);
            let ch = sdf.add_channel(options)?;
            self.client_configs
                .push((name, TimerClientConfig { driver_id: ch.pd_b_id }));
        }

        debug!("timer subsystem connected: {} client(s)", self.clients.len());
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "timer_driver_device_resources", &self.device_resources)?;
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("timer_client_{name}"), config)?;
        }
        Ok(())
    }
}
