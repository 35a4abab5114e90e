/* SPDX-License-Identifier: GPL-2.0-only */

//! GPU subsystem: driver, virtualiser, and clients with an events page,
//! request/response rings and a bulk data region per connection

use std::path::Path;

use data::device::DeviceResources;
use data::gpu::{GpuClientConfig, GpuConnection, GpuDriverConfig, GpuVirtConfig};
use data::Region;
use devicetree::Node;
use log::debug;
use sdf::{ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem, QUEUE_REGION_SIZE};

const EVENTS_REGION_SIZE: u64 = 0x1000;

pub struct GpuSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    virt: PdId,
    clients: Vec<PdId>,
    connected: bool,
    device_resources: DeviceResources,
    driver_config: GpuDriverConfig,
    virt_config: GpuVirtConfig,
    client_configs: Vec<(String, GpuClientConfig)>,
}

impl<'a> GpuSystem<'a> {
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
            driver_config: GpuDriverConfig::default(),
            virt_config: GpuVirtConfig::default(),
            client_configs: Vec::new(),
        })
    }

    pub fn add_client(&mut self, sdf: &SystemDescription, client: PdId) -> Result<(), Error> {
        check_client("gpu", sdf, &self.clients, &[self.driver, self.virt], client)?;
        self.clients.push(client);
        Ok(())
    }

    /// Events page, request/response rings and the data region between
    /// two participants
    fn lanes(
        sdf: &mut SystemDescription,
        prefix: &str,
        a: PdId,
        b: PdId,
    ) -> ([Region; 4], [Region; 4]) {
        let data_size = sdf.arch().large_page_size();
        let shapes = [
            ("events", EVENTS_REGION_SIZE),
            ("req_queue", QUEUE_REGION_SIZE),
            ("resp_queue", QUEUE_REGION_SIZE),
            ("data", data_size),
        ];
        let mut a_side = [Region::default(); 4];
        let mut b_side = [Region::default(); 4];
        for (i, (what, size)) in shapes.iter().enumerate() {
            let mut mr = MemoryRegion::new(format!("{prefix}_{what}"), *size);
            if *what == "data" {
                mr = mr.with_page_size(data_size);
            }
            a_side[i] = Region::new(sdf.map(a, &mr, Perms::RW, true, None), *size);
            b_side[i] = Region::new(sdf.map(b, &mr, Perms::RW, true, None), *size);
            sdf.add_mr(mr);
        }
        (a_side, b_side)
    }

    fn conn(regions: [Region; 4], id: u8) -> GpuConnection {
        GpuConnection {
            events: regions[0],
            req_queue: regions[1],
            resp_queue: regions[2],
            data: regions[3],
            id,
        }
    }
}

impl Subsystem for GpuSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources =
            attach_driver(sdf, self.repo, DeviceClass::Gpu, self.driver, self.device)?;

        let (drv_side, virt_side) = Self::lanes(sdf, "gpu_driver", self.driver, self.virt);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt))?;
        self.driver_config.virt = Self::conn(drv_side, ch.pd_a_id);
        self.virt_config.driver = Self::conn(virt_side, ch.pd_b_id);

        for &client in &self.clients {
            let name = sdf.pd(client).name().to_string();
            let (virt_side, cli_side) = Self::lanes(sdf, &format!("gpu_{name}"), self.virt, client);
            let ch = sdf.add_channel(ChannelOptions::new(self.virt, client))?;
            self.virt_config.clients.push(Self::conn(virt_side, ch.pd_a_id));
            self.client_configs.push((
                name,
                GpuClientConfig {
                    virt: Self::conn(cli_side, ch.pd_b_id),
                },
            ));
        }

        debug!("gpu subsystem connected: {} client(s)", self.clients.len());
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "gpu_driver_device_resources", &self.device_resources)?;
        data::emit(output, "gpu_driver", &self.driver_config)?;
        data::emit(output, "gpu_virt", &self.virt_config)?;
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("gpu_client_{name}"), config)?;
        }
        Ok(())
    }
}
