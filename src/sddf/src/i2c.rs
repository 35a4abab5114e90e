/* SPDX-License-Identifier: GPL-2.0-only */

//! I2C subsystem: driver, a PPC-capable virtualiser, and clients
//!
//! Clients issue protected calls into the virtualiser to claim bus
//! addresses, so the virtualiser end of every client channel is the PPC
//! entry.

use std::path::Path;

use data::device::DeviceResources;
use data::i2c::{I2cClientConfig, I2cConnection, I2cDriverConfig, I2cVirtConfig};
use data::Region;
use devicetree::Node;
use log::debug;
use sdf::{ChannelEnd, ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem, QUEUE_REGION_SIZE};

const DATA_REGION_SIZE: u64 = 0x1000;

pub struct I2cSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    virt: PdId,
    clients: Vec<PdId>,
    connected: bool,
    device_resources: DeviceResources,
    driver_config: I2cDriverConfig,
    virt_config: I2cVirtConfig,
    client_configs: Vec<(String, I2cClientConfig)>,
}

impl<'a> I2cSystem<'a> {
    pub fn new(
        sdf: &SystemDescription,
        repo: &'a DriverRepo,
        device: Node<'a>,
        driver: PdId,
        virt: PdId,
    ) -> Result<Self, Error> {
        if driver == virt {
            return Err(Error::InvalidVirt {
                reason: format!(
                    "'{}' cannot be both driver and virtualiser",
                    sdf.pd(driver).name()
                ),
            });
        }
        Ok(Self {
            repo,
            device,
            driver,
            virt,
            clients: Vec::new(),
            connected: false,
            device_resources: DeviceResources::default(),
            driver_config: I2cDriverConfig::default(),
            virt_config: I2cVirtConfig::default(),
            client_configs: Vec::new(),
        })
    }

    pub fn add_client(&mut self, sdf: &SystemDescription, client: PdId) -> Result<(), Error> {
        check_client("i2c", sdf, &self.clients, &[self.driver, self.virt], client)?;
        self.clients.push(client);
        Ok(())
    }

    /// Request/response rings plus the transfer buffer between two
    /// participants
    fn trio(
        sdf: &mut SystemDescription,
        prefix: &str,
        a: PdId,
        b: PdId,
    ) -> ((Region, Region, Region), (Region, Region, Region)) {
        let mut a_side = [Region::default(); 3];
        let mut b_side = [Region::default(); 3];
        let shapes = [
            ("req_queue", QUEUE_REGION_SIZE),
            ("resp_queue", QUEUE_REGION_SIZE),
            ("data", DATA_REGION_SIZE),
        ];
        for (i, (what, size)) in shapes.iter().enumerate() {
            let mr = MemoryRegion::new(format!("{prefix}_{what}"), *size);
            a_side[i] = Region::new(sdf.map(a, &mr, Perms::RW, true, None), *size);
            b_side[i] = Region::new(sdf.map(b, &mr, Perms::RW, true, None), *size);
            sdf.add_mr(mr);
        }
        (
            (a_side[0], a_side[1], a_side[2]),
            (b_side[0], b_side[1], b_side[2]),
        )
    }
}

impl Subsystem for I2cSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources =
            attach_driver(sdf, self.repo, DeviceClass::I2c, self.driver, self.device)?;

        let ((drv_req, drv_resp, drv_data), (virt_req, virt_resp, virt_data)) =
            Self::trio(sdf, "i2c_driver", self.driver, self.virt);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt))?;
        self.driver_config.virt = I2cConnection {
            req_queue: drv_req,
            resp_queue: drv_resp,
            data: drv_data,
            id: ch.pd_a_id,
        };
        self.virt_config.driver = I2cConnection {
            req_queue: virt_req,
            resp_queue: virt_resp,
            data: virt_data,
            id: ch.pd_b_id,
        };

        for &client in &self.clients {
            let name = sdf.pd(client).name().to_string();
            let ((virt_req, virt_resp, virt_data), (cli_req, cli_resp, cli_data)) =
                Self::trio(sdf, &format!("i2c_{name}"), self.virt, client);
            // clients claim bus addresses with protected calls into the virt
            let mut options = ChannelOptions::new(self.virt, client);
            options.pp = Some(ChannelEnd::A);
            let ch = sdf.add_channel(options)?;
            self.virt_config.clients.push(I2cConnection {
                req_queue: virt_req,
                resp_queue: virt_resp,
                data: virt_data,
                id: ch.pd_a_id,
            });
            self.client_configs.push((
                name,
                I2cClientConfig {
                    virt: I2cConnection {
                        req_queue: cli_req,
                        resp_queue: cli_resp,
                        data: cli_data,
                        id: ch.pd_b_id,
                    },
                },
            ));
        }

        debug!("i2c subsystem connected: {} client(s)", self.clients.len());
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "i2c_driver_device_resources", &self.device_resources)?;
        data::emit(output, "i2c_driver", &self.driver_config)?;
        data::emit(output, "i2c_virt", &self.virt_config)?;
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("i2c_client_{name}"), config)?;
        }
        Ok(())
    }
}
