/* SPDX-License-Identifier: GPL-2.0-only */

//! Block subsystem: driver, virtualiser, and partition-bound clients
//!
//! The driver's bulk data window lives at a fixed physical address taken
//! off the watermark; the hardware does DMA straight into it. Client data
//! regions are likewise physically backed so the virtualiser can hand the
//! device their io addresses.

use std::path::Path;

use data::blk::{
    BlkClientConfig, BlkConnection, BlkDriverConfig, BlkVirtClient, BlkVirtConfig, BlkVirtDriver,
};
use data::device::DeviceResources;
use data::{DeviceRegion, Region};
use devicetree::Node;
use log::debug;
use sdf::{ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem, QUEUE_REGION_SIZE};

const DEFAULT_QUEUE_CAPACITY: u16 = 128;
const DRIVER_QUEUE_CAPACITY: u16 = 128;
/// Extra fixed-physical regions a virtio-mmio block driver needs
const VIRTIO_HEADERS_SIZE: u64 = 0x4000;
const VIRTIO_METADATA_SIZE: u64 = 0x20_0000;

#[derive(Clone, Copy, Debug)]
pub struct BlkClientOptions {
    /// Partition of the backing store this client owns
    pub partition: u32,
    /// Queue depth in entries; the queue region itself is a fixed page
    pub queue_capacity: Option<u16>,
    pub data_size: Option<u64>,
}

impl BlkClientOptions {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            queue_capacity: None,
            data_size: None,
        }
    }
}

pub struct BlkSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    virt: PdId,
    clients: Vec<(PdId, BlkClientOptions)>,
    connected: bool,
    device_resources: DeviceResources,
    driver_config: BlkDriverConfig,
    virt_config: BlkVirtConfig,
    client_configs: Vec<(String, BlkClientConfig)>,
}

impl<'a> BlkSystem<'a> {
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
            driver_config: BlkDriverConfig::default(),
            virt_config: BlkVirtConfig::default(),
            client_configs: Vec::new(),
        })
    }

    pub fn add_client(
        &mut self,
        sdf: &SystemDescription,
        client: PdId,
        options: BlkClientOptions,
    ) -> Result<(), Error> {
        let clients: Vec<PdId> = self.clients.iter().map(|(pd, _)| *pd).collect();
        check_client("blk", sdf, &clients, &[self.driver, self.virt], client)?;
        self.clients.push((client, options));
        Ok(())
    }

    /// The storage-info page and request/response rings between two
    /// participants, returned as (a-side, b-side) connection halves
    fn queue_pair(
        sdf: &mut SystemDescription,
        prefix: &str,
        a: PdId,
        b: PdId,
    ) -> ((Region, Region, Region), (Region, Region, Region)) {
        let mut a_side = [Region::default(); 3];
        let mut b_side = [Region::default(); 3];
        for (i, what) in ["storage_info", "req_queue", "resp_queue"].iter().enumerate() {
            let mr = MemoryRegion::new(format!("{prefix}_{what}"), QUEUE_REGION_SIZE);
            // storage info is written by the server side only
            let b_perms = if i == 0 { Perms::READ } else { Perms::RW };
            a_side[i] = Region::new(sdf.map(a, &mr, Perms::RW, true, None), QUEUE_REGION_SIZE);
            b_side[i] = Region::new(sdf.map(b, &mr, b_perms, true, None), QUEUE_REGION_SIZE);
            sdf.add_mr(mr);
        }
        (
            (a_side[0], a_side[1], a_side[2]),
            (b_side[0], b_side[1], b_side[2]),
        )
    }
}

impl Subsystem for BlkSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources =
            attach_driver(sdf, self.repo, DeviceClass::Blk, self.driver, self.device)?;

        let arch = sdf.arch();
        let large_page = arch.large_page_size();

        // a virtio-mmio transport needs header and metadata windows the
        // driver can hand to the device by physical address
        if self.device.compatible().contains(&"virtio,mmio") {
            let headers =
                MemoryRegion::physical(sdf, "blk_driver_virtio_headers", VIRTIO_HEADERS_SIZE, None);
            sdf.map(self.driver, &headers, Perms::RW, false, Some("virtio_headers_vaddr"));
            sdf.pd_mut(self.driver)
                .add_setvar("virtio_headers_paddr", &headers.name);
            sdf.add_mr(headers);

            let metadata =
                MemoryRegion::physical(sdf, "blk_driver_metadata", VIRTIO_METADATA_SIZE, None);
            sdf.map(self.driver, &metadata, Perms::RW, false, Some("blk_metadata_vaddr"));
            sdf.pd_mut(self.driver)
                .add_setvar("blk_metadata_paddr", &metadata.name);
            sdf.add_mr(metadata);
        }

        // driver <-> virtualiser rings and the fixed DMA window
        let ((drv_info, drv_req, drv_resp), (virt_info, virt_req, virt_resp)) =
            Self::queue_pair(sdf, "blk_driver", self.driver, self.virt);
        let data = MemoryRegion::physical(sdf, "blk_driver_data", large_page, None)
            .with_page_size(large_page);
        let data_paddr = data.paddr.unwrap_or(0);
        sdf.map(self.driver, &data, Perms::RW, false, None);
        let virt_data = sdf.map(self.virt, &data, Perms::RW, false, None);
        sdf.add_mr(data);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt))?;
        self.driver_config.virt = BlkConnection {
            storage_info: drv_info,
            req_queue: drv_req,
            resp_queue: drv_resp,
            num_buffers: DRIVER_QUEUE_CAPACITY,
            id: ch.pd_a_id,
        };
        self.virt_config.driver = BlkVirtDriver {
            conn: BlkConnection {
                storage_info: virt_info,
                req_queue: virt_req,
                resp_queue: virt_resp,
                num_buffers: DRIVER_QUEUE_CAPACITY,
                id: ch.pd_b_id,
            },
            data: DeviceRegion::new(virt_data, large_page, data_paddr),
        };

        for &(client, options) in &self.clients {
            let name = sdf.pd(client).name().to_string();
            let capacity = options.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
            let data_size = arch.round_up_to_page(options.data_size.unwrap_or(large_page));

            let ((virt_info, virt_req, virt_resp), (cli_info, cli_req, cli_resp)) =
                Self::queue_pair(sdf, &format!("blk_{name}"), self.virt, client);
            let data = MemoryRegion::physical(sdf, format!("blk_data_{name}"), data_size, None);
            let data_paddr = data.paddr.unwrap_or(0);
            let virt_data = sdf.map(self.virt, &data, Perms::RW, true, None);
            let cli_data = sdf.map(client, &data, Perms::RW, true, None);
            sdf.add_mr(data);
            let ch = sdf.add_channel(ChannelOptions::new(self.virt, client))?;

            self.virt_config.clients.push(BlkVirtClient {
                conn: BlkConnection {
                    storage_info: virt_info,
                    req_queue: virt_req,
                    resp_queue: virt_resp,
                    num_buffers: capacity,
                    id: ch.pd_a_id,
                },
                data: DeviceRegion::new(virt_data, data_size, data_paddr),
                partition: options.partition,
            });
            self.client_configs.push((
                name,
                BlkClientConfig {
                    virt: BlkConnection {
                        storage_info: cli_info,
                        req_queue: cli_req,
                        resp_queue: cli_resp,
                        num_buffers: capacity,
                        id: ch.pd_b_id,
                    },
                    data: Region::new(cli_data, data_size),
                },
            ));
        }

        debug!("blk subsystem connected: {} client(s)", self.clients.len());
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "blk_driver_device_resources", &self.device_resources)?;
        data::emit(output, "blk_driver", &self.driver_config)?;
        data::emit(output, "blk_virt", &self.virt_config)?;
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("blk_client_{name}"), config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{DriverDescriptor, DriverIrq, DriverRegion};
    use devicetree::{Builder, DeviceTree};
    use sdf::{Arch, ProtectionDomain};

    fn virtio_tree() -> DeviceTree {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let blk = b.add_node(root, "virtio_mmio@a003e00");
        b.add_prop_str_list(blk, "compatible", &["virtio,mmio"]);
        b.add_prop_cells(blk, "reg", &[0x0, 0xa00_3e00, 0x0, 0x200]);
        b.add_prop_cells(blk, "interrupts", &[0, 46, 1]);
        b.finish()
    }

    fn virtio_repo() -> DriverRepo {
        let mut repo = DriverRepo::default();
        repo.add(
            DeviceClass::Blk,
            DriverDescriptor {
                name: "virtio_blk".to_string(),
                compatible: vec!["virtio,mmio".to_string()],
                regions: vec![DriverRegion {
                    name: "regs".to_string(),
                    perms: "rw".to_string(),
                    setvar: None,
                    size: None,
                    dt_index: 0,
                }],
                irqs: vec![DriverIrq { dt_index: 0, id: None }],
            },
        );
        repo
    }

    #[test]
    fn virtio_driver_gets_header_and_metadata_windows() {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let driver = sdf.add_pd(ProtectionDomain::new("blk_driver", Some("blk.elf")));
        let virt = sdf.add_pd(ProtectionDomain::new("blk_virt", Some("virt.elf")));
        let client = sdf.add_pd(ProtectionDomain::new("fs", None));
        let repo = virtio_repo();
        let tree = virtio_tree();
        let node = tree.find_node("/virtio_mmio").unwrap();

        let mut blk = BlkSystem::new(&sdf, &repo, node, driver, virt).unwrap();
        blk.add_client(&sdf, client, BlkClientOptions::new(2)).unwrap();
        blk.connect(&mut sdf).unwrap();

        let headers = sdf.mr("blk_driver_virtio_headers").unwrap();
        assert_eq!(headers.size, VIRTIO_HEADERS_SIZE);
        assert!(headers.paddr.is_some());
        assert!(sdf.mr("blk_driver_metadata").is_some());
        let setvars = sdf.pd(driver).setvars();
        assert!(setvars.iter().any(|s| s.symbol == "virtio_headers_paddr"));
        assert!(setvars.iter().any(|s| s.symbol == "blk_metadata_paddr"));

        // the driver DMA window came off the watermark
        assert!(sdf.paddr_top() < 0x8000_0000);
        assert_eq!(blk.virt_config.clients[0].partition, 2);
        assert_eq!(
            blk.virt_config.driver.data.io_addr,
            sdf.mr("blk_driver_data").unwrap().paddr.unwrap()
        );
        // client data vaddr in the blob matches the installed map
        let cli = &blk.client_configs[0].1;
        assert!(sdf
            .pd(client)
            .maps()
            .iter()
            .any(|m| m.vaddr == cli.data.vaddr));
    }

    #[test]
    fn driver_cannot_be_virt() {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let driver = sdf.add_pd(ProtectionDomain::new("blk_driver", None));
        let repo = virtio_repo();
        let tree = virtio_tree();
        let node = tree.find_node("/virtio_mmio").unwrap();
        assert!(matches!(
            BlkSystem::new(&sdf, &repo, node, driver, driver),
            Err(Error::InvalidVirt { .. })
        ));
    }

    #[test]
    fn double_connect_rejected() {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let driver = sdf.add_pd(ProtectionDomain::new("blk_driver", None));
        let virt = sdf.add_pd(ProtectionDomain::new("blk_virt", None));
        let repo = virtio_repo();
        let tree = virtio_tree();
        let node = tree.find_node("/virtio_mmio").unwrap();
        let mut blk = BlkSystem::new(&sdf, &repo, node, driver, virt).unwrap();
        blk.connect(&mut sdf).unwrap();
        assert!(matches!(blk.connect(&mut sdf), Err(Error::AlreadyConnected)));
    }
}
