/* SPDX-License-Identifier: GPL-2.0-only */

//! Network subsystem: driver, receive/transmit virtualisers, and clients
//! each paired with a copier PD
//!
//! Receive traffic lands in one physically-backed DMA window shared by
//! the driver's device and the receive virtualiser; a per-client copier
//! moves frames from that window into the client's own buffers. Transmit
//! buffers are per-client and physically backed so the transmit
//! virtualiser can hand the device io addresses directly. Data regions
//! are never mapped into the driver.

use std::path::Path;

use data::device::DeviceResources;
use data::net::{
    LibSddfLwipConfig, NetClientConfig, NetConnection, NetCopyConfig, NetDriverConfig,
    NetVirtRxClient, NetVirtRxConfig, NetVirtTxClient, NetVirtTxConfig, MAC_ADDR_LEN,
};
use data::{DeviceRegion, Region};
use devicetree::Node;
use log::debug;
use sdf::{arch::round_up, ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};

use crate::device::attach_driver;
use crate::{check_client, DeviceClass, DriverRepo, Error, Subsystem};

/// Buffers per queue pair; entries are 16 bytes on the wire
const NUM_BUFFERS: u16 = 512;
const QUEUE_ENTRY_SIZE: u64 = 16;
const DATA_REGION_SIZE: u64 = 0x20_0000;
const HW_RING_BUFFER_SIZE: u64 = 0x1_0000;
/// Locally-administered prefix for auto-assigned client MACs
const MAC_BASE: [u8; MAC_ADDR_LEN] = [0x52, 0x54, 0x01, 0x00, 0x00, 0x00];

#[derive(Clone, Debug, Default)]
pub struct NetClientOptions {
    /// `aa:bb:cc:dd:ee:ff`; auto-assigned from a locally-administered
    /// range when absent
    pub mac_addr: Option<String>,
}

struct NetClient {
    pd: PdId,
    copier: PdId,
    mac: [u8; MAC_ADDR_LEN],
}

pub struct NetSystem<'a> {
    repo: &'a DriverRepo,
    device: Node<'a>,
    driver: PdId,
    virt_rx: PdId,
    virt_tx: PdId,
    clients: Vec<NetClient>,
    connected: bool,
    device_resources: DeviceResources,
    driver_config: NetDriverConfig,
    virt_rx_config: NetVirtRxConfig,
    virt_tx_config: NetVirtTxConfig,
    copy_configs: Vec<(String, NetCopyConfig)>,
    client_configs: Vec<(String, NetClientConfig)>,
}

fn parse_mac(s: &str) -> Result<[u8; MAC_ADDR_LEN], Error> {
    let invalid = || Error::InvalidMacAddr { mac: s.to_string() };
    let mut mac = [0u8; MAC_ADDR_LEN];
    let mut parts = 0;
    for (i, part) in s.split(':').enumerate() {
        if i >= MAC_ADDR_LEN || part.len() != 2 {
            return Err(invalid());
        }
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        parts += 1;
    }
    if parts != MAC_ADDR_LEN {
        return Err(invalid());
    }
    Ok(mac)
}

fn format_mac(mac: &[u8; MAC_ADDR_LEN]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

impl<'a> NetSystem<'a> {
    pub fn new(
        sdf: &SystemDescription,
        repo: &'a DriverRepo,
        device: Node<'a>,
        driver: PdId,
        virt_rx: PdId,
        virt_tx: PdId,
    ) -> Result<Self, Error> {
        if driver == virt_rx || driver == virt_tx || virt_rx == virt_tx {
            return Err(Error::InvalidVirt {
                reason: format!(
                    "driver '{}' and virtualisers must be distinct PDs",
                    sdf.pd(driver).name()
                ),
            });
        }
        Ok(Self {
            repo,
            device,
            driver,
            virt_rx,
            virt_tx,
            clients: Vec::new(),
            connected: false,
            device_resources: DeviceResources::default(),
            driver_config: NetDriverConfig::default(),
            virt_rx_config: NetVirtRxConfig::default(),
            virt_tx_config: NetVirtTxConfig::default(),
            copy_configs: Vec::new(),
            client_configs: Vec::new(),
        })
    }

    /// Register `client` with its dedicated `copier`
    pub fn add_client_with_copier(
        &mut self,
        sdf: &SystemDescription,
        client: PdId,
        copier: PdId,
        options: NetClientOptions,
    ) -> Result<(), Error> {
        let clients: Vec<PdId> = self.clients.iter().map(|c| c.pd).collect();
        let mut reserved = vec![self.driver, self.virt_rx, self.virt_tx];
        reserved.extend(self.clients.iter().map(|c| c.copier));
        check_client("net", sdf, &clients, &reserved, client)?;
        if copier == client
            || copier == self.driver
            || copier == self.virt_rx
            || copier == self.virt_tx
            || clients.contains(&copier)
        {
            return Err(Error::InvalidClient {
                subsystem: "net",
                pd: sdf.pd(copier).name().to_string(),
                reason: "the copier already plays another role",
            });
        }
        if self.clients.iter().any(|c| c.copier == copier) {
            return Err(Error::DuplicateCopier {
                pd: sdf.pd(copier).name().to_string(),
            });
        }
        let mac = match &options.mac_addr {
            Some(s) => parse_mac(s)?,
            None => {
                let mut mac = MAC_BASE;
                mac[5] = self.clients.len() as u8;
                mac
            }
        };
        if self.clients.iter().any(|c| c.mac == mac) {
            return Err(Error::DuplicateMacAddr {
                mac: format_mac(&mac),
            });
        }
        self.clients.push(NetClient { pd: client, copier, mac });
        Ok(())
    }

    fn queue_region_size(arch: sdf::Arch) -> u64 {
        round_up(QUEUE_ENTRY_SIZE * NUM_BUFFERS as u64, arch.page_size())
    }

    /// A free/active queue pair between two participants, returned as
    /// (a-side, b-side) halves without channel ids
    fn queue_pair(
        sdf: &mut SystemDescription,
        prefix: &str,
        a: PdId,
        b: PdId,
    ) -> ((Region, Region), (Region, Region)) {
        let size = Self::queue_region_size(sdf.arch());
        let mut a_side = [Region::default(); 2];
        let mut b_side = [Region::default(); 2];
        for (i, what) in ["free", "active"].iter().enumerate() {
            let mr = MemoryRegion::new(format!("{prefix}_{what}"), size);
            a_side[i] = Region::new(sdf.map(a, &mr, Perms::RW, true, None), size);
            b_side[i] = Region::new(sdf.map(b, &mr, Perms::RW, true, None), size);
            sdf.add_mr(mr);
        }
        ((a_side[0], a_side[1]), (b_side[0], b_side[1]))
    }
}

impl Subsystem for NetSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.device_resources = attach_driver(
            sdf,
            self.repo,
            DeviceClass::Network,
            self.driver,
            self.device,
        )?;

        let large_page = sdf.arch().large_page_size();

        // descriptor ring the NIC walks by physical address
        let hw_ring =
            MemoryRegion::physical(sdf, "net_driver_hw_ring_buffer", HW_RING_BUFFER_SIZE, None);
        sdf.map(self.driver, &hw_ring, Perms::RW, false, Some("hw_ring_buffer_vaddr"));
        sdf.pd_mut(self.driver)
            .add_setvar("hw_ring_buffer_paddr", &hw_ring.name);
        sdf.add_mr(hw_ring);

        // receive path: driver <-> virt_rx queues plus the DMA window,
        // which the driver reaches through the device, not a mapping
        let ((drv_free, drv_active), (virt_free, virt_active)) =
            Self::queue_pair(sdf, "net_rx_driver", self.driver, self.virt_rx);
        let rx_data = MemoryRegion::physical(sdf, "net_rx_data", DATA_REGION_SIZE, None)
            .with_page_size(large_page);
        let rx_data_paddr = rx_data.paddr.unwrap_or(0);
        let virt_rx_data = sdf.map(self.virt_rx, &rx_data, Perms::RW, true, None);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt_rx))?;
        self.driver_config.virt_rx = NetConnection {
            free_queue: drv_free,
            active_queue: drv_active,
            num_buffers: NUM_BUFFERS,
            id: ch.pd_a_id,
        };
        self.virt_rx_config.driver = NetConnection {
            free_queue: virt_free,
            active_queue: virt_active,
            num_buffers: NUM_BUFFERS,
            id: ch.pd_b_id,
        };
        self.virt_rx_config.data = DeviceRegion::new(virt_rx_data, DATA_REGION_SIZE, rx_data_paddr);

        // transmit path: driver <-> virt_tx queues
        let ((drv_free, drv_active), (virt_free, virt_active)) =
            Self::queue_pair(sdf, "net_tx_driver", self.driver, self.virt_tx);
        let ch = sdf.add_channel(ChannelOptions::new(self.driver, self.virt_tx))?;
        self.driver_config.virt_tx = NetConnection {
            free_queue: drv_free,
            active_queue: drv_active,
            num_buffers: NUM_BUFFERS,
            id: ch.pd_a_id,
        };
        self.virt_tx_config.driver = NetConnection {
            free_queue: virt_free,
            active_queue: virt_active,
            num_buffers: NUM_BUFFERS,
            id: ch.pd_b_id,
        };

        for client in &self.clients {
            let name = sdf.pd(client.pd).name().to_string();
            let copier_name = sdf.pd(client.copier).name().to_string();

            // transmit: per-client physically-backed buffers
            let tx_data =
                MemoryRegion::physical(sdf, format!("net_tx_data_{name}"), DATA_REGION_SIZE, None)
                    .with_page_size(large_page);
            let tx_data_paddr = tx_data.paddr.unwrap_or(0);
            let virt_tx_data = sdf.map(self.virt_tx, &tx_data, Perms::RW, true, None);
            let cli_tx_data = sdf.map(client.pd, &tx_data, Perms::RW, true, None);
            sdf.add_mr(tx_data);
            let ((virt_free, virt_active), (cli_free, cli_active)) =
                Self::queue_pair(sdf, &format!("net_tx_{name}"), self.virt_tx, client.pd);
            let ch = sdf.add_channel(ChannelOptions::new(self.virt_tx, client.pd))?;
            self.virt_tx_config.clients.push(NetVirtTxClient {
                conn: NetConnection {
                    free_queue: virt_free,
                    active_queue: virt_active,
                    num_buffers: NUM_BUFFERS,
                    id: ch.pd_a_id,
                },
                data: DeviceRegion::new(virt_tx_data, DATA_REGION_SIZE, tx_data_paddr),
            });
            let tx_conn = NetConnection {
                free_queue: cli_free,
                active_queue: cli_active,
                num_buffers: NUM_BUFFERS,
                id: ch.pd_b_id,
            };

            // receive: virt_rx <-> copier, then copier <-> client
            let ((virt_free, virt_active), (cop_free, cop_active)) =
                Self::queue_pair(sdf, &format!("net_rx_copy_{name}"), self.virt_rx, client.copier);
            let cop_device_data = sdf.map(client.copier, &rx_data, Perms::READ, true, None);
            let ch_copy = sdf.add_channel(ChannelOptions::new(self.virt_rx, client.copier))?;
            self.virt_rx_config.clients.push(NetVirtRxClient {
                conn: NetConnection {
                    free_queue: virt_free,
                    active_queue: virt_active,
                    num_buffers: NUM_BUFFERS,
                    id: ch_copy.pd_a_id,
                },
                mac_addr: client.mac,
            });

            let cli_rx_data_mr =
                MemoryRegion::new(format!("net_rx_data_{name}"), DATA_REGION_SIZE);
            let cop_client_data = sdf.map(client.copier, &cli_rx_data_mr, Perms::RW, true, None);
            let cli_rx_data = sdf.map(client.pd, &cli_rx_data_mr, Perms::RW, true, None);
            sdf.add_mr(cli_rx_data_mr);
            let ((cop_cli_free, cop_cli_active), (cli_free, cli_active)) =
                Self::queue_pair(sdf, &format!("net_rx_{name}"), client.copier, client.pd);
            let ch_cli = sdf.add_channel(ChannelOptions::new(client.copier, client.pd))?;

            self.copy_configs.push((
                copier_name,
                NetCopyConfig {
                    device: NetConnection {
                        free_queue: cop_free,
                        active_queue: cop_active,
                        num_buffers: NUM_BUFFERS,
                        id: ch_copy.pd_b_id,
                    },
                    device_data: Region::new(cop_device_data, DATA_REGION_SIZE),
                    client: NetConnection {
                        free_queue: cop_cli_free,
                        active_queue: cop_cli_active,
                        num_buffers: NUM_BUFFERS,
                        id: ch_cli.pd_a_id,
                    },
                    client_data: Region::new(cop_client_data, DATA_REGION_SIZE),
                },
            ));
            self.client_configs.push((
                name,
                NetClientConfig {
                    rx: NetConnection {
                        free_queue: cli_free,
                        active_queue: cli_active,
                        num_buffers: NUM_BUFFERS,
                        id: ch_cli.pd_b_id,
                    },
                    rx_data: Region::new(cli_rx_data, DATA_REGION_SIZE),
                    tx: tx_conn,
                    tx_data: Region::new(cli_tx_data, DATA_REGION_SIZE),
                    mac_addr: client.mac,
                },
            ));
        }
        sdf.add_mr(rx_data);

        debug!("net subsystem connected: {} client(s)", self.clients.len());
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "net_driver_device_resources", &self.device_resources)?;
        data::emit(output, "net_driver", &self.driver_config)?;
        data::emit(output, "net_virt_rx", &self.virt_rx_config)?;
        data::emit(output, "net_virt_tx", &self.virt_tx_config)?;
        for (name, config) in &self.copy_configs {
            data::emit(output, &format!("net_copy_{name}"), config)?;
        }
        for (name, config) in &self.client_configs {
            data::emit(output, &format!("net_client_{name}"), config)?;
        }
        Ok(())
    }
}

/// lwIP helper: a packet-buffer pool attached to one connected net client
pub struct Lwip {
    client_name: String,
    config: LibSddfLwipConfig,
}

/// Two pbuf slots per buffer of the shared pool
const PBUF_STRUCT_SIZE: u64 = 56;

impl Lwip {
    pub fn new(sdf: &mut SystemDescription, net: &NetSystem<'_>, client: PdId) -> Result<Self, Error> {
        if !net.connected {
            return Err(Error::NotConnected);
        }
        if !net.clients.iter().any(|c| c.pd == client) {
            return Err(Error::InvalidClient {
                subsystem: "lwip",
                pd: sdf.pd(client).name().to_string(),
                reason: "the PD is not a client of the net subsystem",
            });
        }
        let name = sdf.pd(client).name().to_string();
        let num_pbufs = NUM_BUFFERS as u64 * 2;
        let size = round_up(num_pbufs * PBUF_STRUCT_SIZE, sdf.arch().page_size());
        let mr = MemoryRegion::new(format!("net_lwip_pbuf_pool_{name}"), size);
        let vaddr = sdf.map(client, &mr, Perms::RW, true, None);
        sdf.add_mr(mr);
        Ok(Self {
            client_name: name,
            config: LibSddfLwipConfig {
                pbuf_pool: Region::new(vaddr, size),
                num_pbufs,
            },
        })
    }

    pub fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        data::emit(
            output,
            &format!("net_lwip_{}", self.client_name),
            &self.config,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{DriverDescriptor, DriverIrq, DriverRegion};
    use devicetree::{Builder, DeviceTree};
    use sdf::{Arch, ProtectionDomain};

    fn eth_tree() -> DeviceTree {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let eth = b.add_node(root, "ethernet@a003000");
        b.add_prop_str_list(eth, "compatible", &["virtio,mmio"]);
        b.add_prop_cells(eth, "reg", &[0x0, 0xa00_3000, 0x0, 0x200]);
        b.add_prop_cells(eth, "interrupts", &[0, 47, 1]);
        b.finish()
    }

    fn eth_repo() -> DriverRepo {
        let mut repo = DriverRepo::default();
        repo.add(
            DeviceClass::Network,
            DriverDescriptor {
                name: "virtio_net".to_string(),
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

    struct Fixture {
        sdf: SystemDescription,
        driver: PdId,
        virt_rx: PdId,
        virt_tx: PdId,
    }

    fn fixture() -> Fixture {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let driver = sdf.add_pd(ProtectionDomain::new("eth_driver", Some("eth.elf")));
        let virt_rx = sdf.add_pd(ProtectionDomain::new("net_virt_rx", Some("virt_rx.elf")));
        let virt_tx = sdf.add_pd(ProtectionDomain::new("net_virt_tx", Some("virt_tx.elf")));
        Fixture { sdf, driver, virt_rx, virt_tx }
    }

    #[test]
    fn mac_parsing() {
        assert_eq!(
            parse_mac("52:54:01:00:00:07").unwrap(),
            [0x52, 0x54, 0x01, 0x00, 0x00, 0x07]
        );
        assert!(parse_mac("52:54:01:00:00").is_err());
        assert!(parse_mac("52:54:01:00:00:07:09").is_err());
        assert!(parse_mac("52:54:01:00:00:zz").is_err());
        assert!(parse_mac("525401000007").is_err());
    }

    #[test]
    fn copier_and_mac_validation() {
        let mut fx = fixture();
        let repo = eth_repo();
        let tree = eth_tree();
        let node = tree.find_node("/ethernet").unwrap();
        let c0 = fx.sdf.add_pd(ProtectionDomain::new("c0", None));
        let cp0 = fx.sdf.add_pd(ProtectionDomain::new("cp0", None));
        let c1 = fx.sdf.add_pd(ProtectionDomain::new("c1", None));

        let mut net =
            NetSystem::new(&fx.sdf, &repo, node, fx.driver, fx.virt_rx, fx.virt_tx).unwrap();
        net.add_client_with_copier(&fx.sdf, c0, cp0, NetClientOptions::default())
            .unwrap();
        // same copier for a second client
        assert!(matches!(
            net.add_client_with_copier(&fx.sdf, c1, cp0, NetClientOptions::default()),
            Err(Error::DuplicateCopier { .. })
        ));
        // duplicated explicit MAC (clashes with the first auto-assignment)
        let cp1 = fx.sdf.add_pd(ProtectionDomain::new("cp1", None));
        assert!(matches!(
            net.add_client_with_copier(
                &fx.sdf,
                c1,
                cp1,
                NetClientOptions { mac_addr: Some("52:54:01:00:00:00".to_string()) }
            ),
            Err(Error::DuplicateMacAddr { .. })
        ));
        assert!(matches!(
            net.add_client_with_copier(
                &fx.sdf,
                c1,
                cp1,
                NetClientOptions { mac_addr: Some("not-a-mac".to_string()) }
            ),
            Err(Error::InvalidMacAddr { .. })
        ));
    }

    #[test]
    fn connect_keeps_data_out_of_the_driver() {
        let mut fx = fixture();
        let repo = eth_repo();
        let tree = eth_tree();
        let node = tree.find_node("/ethernet").unwrap();
        let client = fx.sdf.add_pd(ProtectionDomain::new("lwip_client", None));
        let copier = fx.sdf.add_pd(ProtectionDomain::new("copier", None));

        let mut net =
            NetSystem::new(&fx.sdf, &repo, node, fx.driver, fx.virt_rx, fx.virt_tx).unwrap();
        net.add_client_with_copier(&fx.sdf, client, copier, NetClientOptions::default())
            .unwrap();
        net.connect(&mut fx.sdf).unwrap();

        // the driver maps registers, the hw ring and four queues - no data
        let driver_maps = fx.sdf.pd(fx.driver).maps();
        assert!(driver_maps.iter().all(|m| !m.mr.contains("data")));
        assert!(driver_maps.iter().any(|m| m.mr == "net_driver_hw_ring_buffer"));
        assert!(fx
            .sdf
            .pd(fx.driver)
            .setvars()
            .iter()
            .any(|s| s.symbol == "hw_ring_buffer_paddr"));

        // the DMA window is visible to virt_rx and the copier
        assert!(fx.sdf.pd(fx.virt_rx).maps().iter().any(|m| m.mr == "net_rx_data"));
        let cop_map = fx
            .sdf
            .pd(copier)
            .maps()
            .iter()
            .find(|m| m.mr == "net_rx_data")
            .cloned()
            .unwrap();
        assert_eq!(cop_map.perms, Perms::READ);

        // blob vaddrs line up with the copier's maps
        let copy = &net.copy_configs[0].1;
        assert_eq!(copy.device_data.vaddr, cop_map.vaddr);
        assert_eq!(net.client_configs[0].1.mac_addr, [0x52, 0x54, 0x01, 0, 0, 0]);
        assert_eq!(net.virt_rx_config.clients[0].mac_addr, [0x52, 0x54, 0x01, 0, 0, 0]);

        // one channel per pairing: drv-rx, drv-tx, tx-client, rx-copier,
        // copier-client
        assert_eq!(fx.sdf.channels().len(), 5);
    }

    #[test]
    fn lwip_requires_connected_client() {
        let mut fx = fixture();
        let repo = eth_repo();
        let tree = eth_tree();
        let node = tree.find_node("/ethernet").unwrap();
        let client = fx.sdf.add_pd(ProtectionDomain::new("lwip_client", None));
        let copier = fx.sdf.add_pd(ProtectionDomain::new("copier", None));

        let mut net =
            NetSystem::new(&fx.sdf, &repo, node, fx.driver, fx.virt_rx, fx.virt_tx).unwrap();
        net.add_client_with_copier(&fx.sdf, client, copier, NetClientOptions::default())
            .unwrap();
        assert!(matches!(
            Lwip::new(&mut fx.sdf, &net, client),
            Err(Error::NotConnected)
        ));
        net.connect(&mut fx.sdf).unwrap();
        let lwip = Lwip::new(&mut fx.sdf, &net, client).unwrap();
        assert_eq!(lwip.config.num_pbufs, 1024);
        assert!(fx
            .sdf
            .pd(client)
            .maps()
            .iter()
            .any(|m| m.mr == "net_lwip_pbuf_pool_lwip_client"));
    }
}
