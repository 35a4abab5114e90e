/* SPDX-License-Identifier: GPL-2.0-only */

//! Serial subsystem: driver, transmit virtualiser, optional receive
//! virtualiser, and up to 61 clients
//!
//! Without a receive virtualiser the subsystem is transmit-only; the
//! driver's and clients' rx connections stay zeroed and `rx_enabled` is
//! cleared in the driver's configuration.

use std::path::Path;

use data::serial::{
    SerialClientConfig, SerialConnection, SerialDriverConfig, SerialVirtRxConfig,
    SerialVirtTxClient, SerialVirtTxConfig, SERIAL_MAX_BEGIN_STR_LEN,
};
use data::device::DeviceResources;
use data::Region;
use devicetree::Node;
use log::debug;
use sdf::{ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem, QUEUE_REGION_SIZE};

const DATA_REGION_SIZE: u64 = 0x2000;
const DEFAULT_BAUD: u64 = 115_200;

#[derive(Clone, Debug)]
pub struct SerialOptions {
    /// Banner the transmit virtualiser prints once at boot
    pub begin_str: Option<String>,
    pub enable_colour: bool,
    pub default_baud: Option<u64>,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            begin_str: None,
            enable_colour: true,
            default_baud: None,
        }
    }
}

pub struct SerialSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    virt_tx: PdId,
    virt_rx: Option<PdId>,
    clients: Vec<PdId>,
    options: SerialOptions,
    connected: bool,
    device_resources: DeviceResources,
    driver_config: SerialDriverConfig,
    virt_rx_config: SerialVirtRxConfig,
    virt_tx_config: SerialVirtTxConfig,
    client_configs: Vec<(String, SerialClientConfig)>,
}

impl<'a> SerialSystem<'a> {
    pub fn new(
        sdf: &SystemDescription,
        repo: &'a DriverRepo,
        device: Node<'a>,
        driver: PdId,
        virt_tx: PdId,
        virt_rx: Option<PdId>,
        options: SerialOptions,
    ) -> Result<Self, Error> {
        if virt_tx == driver {
            return Err(Error::InvalidVirt {
                reason: format!(
                    "'{}' cannot be both driver and transmit virtualiser",
                    sdf.pd(driver).name()
                ),
            });
        }
        if virt_rx == Some(driver) || virt_rx == Some(virt_tx) {
            return Err(Error::InvalidVirt {
                reason: format!(
                    "'{}' cannot play a second role as receive virtualiser",
                    sdf.pd(virt_rx.unwrap_or(driver)).name()
                ),
            });
        }
        if let Some(begin_str) = &options.begin_str {
            if begin_str.len() >= SERIAL_MAX_BEGIN_STR_LEN {
                return Err(Error::InvalidBeginString {
                    reason: "longer than 127 bytes",
                });
            }
            if begin_str.contains('\0') {
                return Err(Error::InvalidBeginString {
                    reason: "contains an interior NUL",
                });
            }
        }
        Ok(Self {
            repo,
            device,
            driver,
            virt_tx,
            virt_rx,
            clients: Vec::new(),
            options,
            connected: false,
            device_resources: DeviceResources::default(),
            driver_config: SerialDriverConfig::default(),
            virt_rx_config: SerialVirtRxConfig::default(),
            virt_tx_config: SerialVirtTxConfig::default(),
            client_configs: Vec::new(),
        })
    }

    pub fn add_client(&mut self, sdf: &SystemDescription, client: PdId) -> Result<(), Error> {
        let mut reserved = vec![self.driver, self.virt_tx];
        reserved.extend(self.virt_rx);
        check_client("serial", sdf, &self.clients, &reserved, client)?;
        self.clients.push(client);
        Ok(())
    }

    /// Wire one direction between two participants: a queue and a data
    /// region, both mapped read-write
    fn stream(
        sdf: &mut SystemDescription,
        prefix: &str,
        a: PdId,
        b: PdId,
    ) -> (Region, Region, Region, Region) {
        let queue = MemoryRegion::new(format!("{prefix}_queue"), QUEUE_REGION_SIZE);
        let data = MemoryRegion::new(format!("{prefix}_data"), DATA_REGION_SIZE);
        let a_queue = sdf.map(a, &queue, Perms::RW, true, None);
        let a_data = sdf.map(a, &data, Perms::RW, true, None);
        let b_queue = sdf.map(b, &queue, Perms::RW, true, None);
        let b_data = sdf.map(b, &data, Perms::RW, true, None);
        sdf.add_mr(queue);
        sdf.add_mr(data);
        (
            Region::new(a_queue, QUEUE_REGION_SIZE),
            Region::new(a_data, DATA_REGION_SIZE),
            Region::new(b_queue, QUEUE_REGION_SIZE),
            Region::new(b_data, DATA_REGION_SIZE),
        )
    }
}

impl Subsystem for SerialSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources = attach_driver(
            sdf,
            self.repo,
            DeviceClass::Serial,
            self.driver,
            self.device,
        )?;

        // driver <-> transmit virtualiser
        let (drv_queue, drv_data, virt_queue, virt_data) =
            Self::stream(sdf, "serial_tx_driver", self.driver, self.virt_tx);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt_tx))?;
        self.driver_config.tx = SerialConnection {
            queue: drv_queue,
            data: drv_data,
            id: ch.pd_a_id,
        };
        self.virt_tx_config.driver = SerialConnection {
            queue: virt_queue,
            data: virt_data,
            id: ch.pd_b_id,
        };

        // driver <-> receive virtualiser, when the subsystem has one
        if let Some(virt_rx) = self.virt_rx {
            let (drv_queue, drv_data, virt_queue, virt_data) =
                Self::stream(sdf, "serial_rx_driver", self.driver, virt_rx);
            let ch = sdf.add_channel(ChannelOptions::new(self.driver, virt_rx))?;
            self.driver_config.rx = SerialConnection {
                queue: drv_queue,
                data: drv_data,
                id: ch.pd_a_id,
            };
            self.virt_rx_config.driver = SerialConnection {
                queue: virt_queue,
                data: virt_data,
                id: ch.pd_b_id,
            };
        }
        self.driver_config.default_baud = self.options.default_baud.unwrap_or(DEFAULT_BAUD);
        self.driver_config.rx_enabled = self.virt_rx.is_some();

        for &client in &self.clients {
            let name = sdf.pd(client).name().to_string();
            let mut client_config = SerialClientConfig::default();

            let (virt_queue, virt_data, cli_queue, cli_data) =
                Self::stream(sdf, &format!("serial_tx_{name}"), self.virt_tx, client);
            let ch = sdf.add_channel(ChannelOptions::new(self.virt_tx, client))?;
            self.virt_tx_config.clients.push(SerialVirtTxClient {
                conn: SerialConnection {
                    queue: virt_queue,
                    data: virt_data,
                    id: ch.pd_a_id,
                },
                name: name.clone(),
            });
            client_config.tx = SerialConnection {
                queue: cli_queue,
                data: cli_data,
                id: ch.pd_b_id,
            };

            if let Some(virt_rx) = self.virt_rx {
                let (virt_queue, virt_data, cli_queue, cli_data) =
                    Self::stream(sdf, &format!("serial_rx_{name}"), virt_rx, client);
                let ch = sdf.add_channel(ChannelOptions::new(virt_rx, client))?;
                self.virt_rx_config.clients.push(SerialConnection {
                    queue: virt_queue,
                    data: virt_data,
                    id: ch.pd_a_id,
                });
                client_config.rx = SerialConnection {
                    queue: cli_queue,
                    data: cli_data,
                    id: ch.pd_b_id,
                };
            }
            self.client_configs.push((name, client_config));
        }

        self.virt_tx_config.begin_str = self.options.begin_str.clone().unwrap_or_default();
        self.virt_tx_config.enable_colour = self.options.enable_colour;
        self.virt_tx_config.enable_rx = self.virt_rx.is_some();

        debug!(
            "serial subsystem connected: {} client(s), rx {}",
            self.clients.len(),
            if self.virt_rx.is_some() { "on" } else { "off" }
        );
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "serial_driver_device_resources", &self.device_resources)?;
        data::emit(output, "serial_driver", &self.driver_config)?;
        data::emit(output, "serial_virt_tx", &self.virt_tx_config)?;
        if self.virt_rx.is_some() {
            data::emit(output, "serial_virt_rx", &self.virt_rx_config)?;
        }
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("serial_client_{name}"), config)?;
        }
        Ok(())
    }
}
