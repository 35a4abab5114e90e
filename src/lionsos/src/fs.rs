/* SPDX-License-Identifier: GPL-2.0-only */

//! The shared server/client wiring core and the concrete file systems

use std::path::Path;

use data::fs::{
    FsClientConfig, FsConnection, FsServerConfig, NfsServerConfig, NFS_MAX_EXPORT_LEN,
    NFS_MAX_URL_LEN,
};
use data::Region;
use log::debug;
use sdf::{ChannelOptions, MemoryRegion, PdId, Perms, SystemDescription};
use sddf::blk::{BlkClientOptions, BlkSystem};
use sddf::net::{NetClientOptions, NetSystem};
use sddf::serial::SerialSystem;
use sddf::timer::TimerSystem;
use sddf::Subsystem;

use crate::Error;

const QUEUE_REGION_SIZE: u64 = 0x1000;
const QUEUE_CAPACITY: u16 = 128;

/// The wiring core every file system shares
///
/// Not a subsystem by itself; the concrete file systems drive it from
/// their own `connect`.
pub struct FileSystem {
    server: PdId,
    client: PdId,
    prefix: String,
    connected: bool,
    server_config: FsServerConfig,
    client_config: FsClientConfig,
    client_name: String,
}

impl FileSystem {
    pub fn new(
        sdf: &SystemDescription,
        server: PdId,
        client: PdId,
        prefix: &str,
    ) -> Result<Self, Error> {
        if server == client {
            return Err(Error::InvalidClient {
                pd: sdf.pd(server).name().to_string(),
                reason: "a file-system server cannot be its own client".to_string(),
            });
        }
        Ok(Self {
            server,
            client,
            prefix: prefix.to_string(),
            connected: false,
            server_config: FsServerConfig::default(),
            client_config: FsClientConfig::default(),
            client_name: String::new(),
        })
    }

    pub fn server(&self) -> PdId {
        self.server
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        let share_size = sdf.arch().large_page_size();
        let shapes = [
            ("command_queue", QUEUE_REGION_SIZE),
            ("completion_queue", QUEUE_REGION_SIZE),
            ("share", share_size),
        ];
        let mut server_side = [Region::default(); 3];
        let mut client_side = [Region::default(); 3];
        for (i, (what, size)) in shapes.iter().enumerate() {
            let mut mr = MemoryRegion::new(format!("{}_{what}", self.prefix), *size);
            if *what == "share" {
                mr = mr.with_page_size(share_size);
            }
            server_side[i] =
                Region::new(sdf.map(self.server, &mr, Perms::RW, true, None), *size);
            client_side[i] =
                Region::new(sdf.map(self.client, &mr, Perms::RW, true, None), *size);
            sdf.add_mr(mr);
        }
        let ch = sdf.add_channel(ChannelOptions::new(self.server, self.client))
            .map_err(Error::Sdf)?;
        self.server_config.client = FsConnection {
            command_queue: server_side[0],
            completion_queue: server_side[1],
            share: server_side[2],
            queue_len: QUEUE_CAPACITY,
            id: ch.pd_a_id,
        };
        self.client_config.server = FsConnection {
            command_queue: client_side[0],
            completion_queue: client_side[1],
            share: client_side[2],
            queue_len: QUEUE_CAPACITY,
            id: ch.pd_b_id,
        };
        self.client_name = sdf.pd(self.client).name().to_string();
        debug!("file system '{}' connected", self.prefix);
        self.connected = true;
        Ok(())
    }
}

/// FAT file system served out of a block partition
pub struct Fat {
    fs: FileSystem,
}

impl Fat {
    /// The server becomes a client of `blk`, owning `partition`
    pub fn new(
        sdf: &SystemDescription,
        blk: &mut BlkSystem<'_>,
        server: PdId,
        client: PdId,
        partition: u32,
    ) -> Result<Self, Error> {
        let fs = FileSystem::new(sdf, server, client, "fat")?;
        blk.add_client(sdf, server, BlkClientOptions::new(partition))?;
        Ok(Self { fs })
    }
}

impl Subsystem for Fat {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        self.fs.connect(sdf)
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.fs.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "fat_server", &self.fs.server_config)?;
        data::emit(
            output,
            &format!("fat_client_{}", self.fs.client_name),
            &self.fs.client_config,
        )?;
        Ok(())
    }
}

/// NFS client serving a remote export to one local client
///
/// The server PD needs console output, timeouts and the network, so it is
/// enrolled in all three subsystems up front.
pub struct Nfs {
    fs: FileSystem,
    server_url: String,
    export_path: String,
}

impl Nfs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sdf: &SystemDescription,
        server: PdId,
        client: PdId,
        net: &mut NetSystem<'_>,
        net_copier: PdId,
        serial: &mut SerialSystem<'_>,
        timer: &mut TimerSystem<'_>,
        server_url: &str,
        export_path: &str,
    ) -> Result<Self, Error> {
        if server_url.len() >= NFS_MAX_URL_LEN {
            return Err(Error::InvalidOptions {
                reason: format!("server URL is longer than {} bytes", NFS_MAX_URL_LEN - 1),
            });
        }
        if export_path.len() >= NFS_MAX_EXPORT_LEN {
            return Err(Error::InvalidOptions {
                reason: format!("export path is longer than {} bytes", NFS_MAX_EXPORT_LEN - 1),
            });
        }
        let fs = FileSystem::new(sdf, server, client, "nfs")?;
        net.add_client_with_copier(sdf, server, net_copier, NetClientOptions::default())?;
        serial.add_client(sdf, server)?;
        timer.add_client(sdf, server)?;
        Ok(Self {
            fs,
            server_url: server_url.to_string(),
            export_path: export_path.to_string(),
        })
    }
}

impl Subsystem for Nfs {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        self.fs.connect(sdf)
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.fs.connected {
            return Err(Error::NotConnected);
        }
        let config = NfsServerConfig {
            client: self.fs.server_config.client,
            server_url: self.server_url.clone(),
            export_path: self.export_path.clone(),
        };
        data::emit(output, "nfs_server", &config)?;
        data::emit(
            output,
            &format!("nfs_client_{}", self.fs.client_name),
            &self.fs.client_config,
        )?;
        Ok(())
    }
}

/// File system served by a virtualised guest
///
/// The guest side of the server PD is composed separately through the
/// `vmm` crate; only the client-facing wiring lives here.
pub struct VmFs {
    fs: FileSystem,
}

impl VmFs {
    pub fn new(sdf: &SystemDescription, server: PdId, client: PdId) -> Result<Self, Error> {
        Ok(Self {
            fs: FileSystem::new(sdf, server, client, "vmfs")?,
        })
    }
}

impl Subsystem for VmFs {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        self.fs.connect(sdf)
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.fs.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, "vmfs_server", &self.fs.server_config)?;
        data::emit(
            output,
            &format!("vmfs_client_{}", self.fs.client_name),
            &self.fs.client_config,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicetree::{Builder, DeviceTree};
    use sddf::{DeviceClass, DriverDescriptor, DriverIrq, DriverRegion, DriverRepo};
    use sdf::{Arch, ProtectionDomain};

    fn virtio_node(b: &mut Builder, name: &str, addr: u32, irq: u32) {
        let root = b.root();
        let node = b.add_node(root, name);
        b.add_prop_str_list(node, "compatible", &["virtio,mmio"]);
        b.add_prop_cells(node, "reg", &[0x0, addr, 0x0, 0x200]);
        b.add_prop_cells(node, "interrupts", &[0, irq, 1]);
    }

    fn tree() -> DeviceTree {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        virtio_node(&mut b, "blk@a003e00", 0xa00_3e00, 46);
        b.finish()
    }

    fn blk_repo() -> DriverRepo {
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
    fn fat_enrols_its_server_with_the_block_layer() {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let blk_driver = sdf.add_pd(ProtectionDomain::new("blk_driver", None));
        let blk_virt = sdf.add_pd(ProtectionDomain::new("blk_virt", None));
        let fat_server = sdf.add_pd(ProtectionDomain::new("fat", Some("fat.elf")));
        let app = sdf.add_pd(ProtectionDomain::new("app", Some("app.elf")));

        let repo = blk_repo();
        let dt = tree();
        let node = dt.find_node("/blk").unwrap();
        let mut blk = BlkSystem::new(&sdf, &repo, node, blk_driver, blk_virt).unwrap();
        let mut fat = Fat::new(&sdf, &mut blk, fat_server, app, 0).unwrap();

        blk.connect(&mut sdf).unwrap();
        fat.connect(&mut sdf).unwrap();

        // fat server talks to the block virtualiser and to its client
        let fat_channels = sdf
            .channels()
            .iter()
            .filter(|c| c.pd_a == fat_server || c.pd_b == fat_server)
            .count();
        assert_eq!(fat_channels, 2);
        // queues + share towards the client, plus the block-client maps
        assert!(sdf.pd(fat_server).maps().iter().any(|m| m.mr == "fat_share"));
        assert!(sdf.pd(app).maps().iter().any(|m| m.mr == "fat_command_queue"));

        let dir = tempfile::tempdir().unwrap();
        fat.serialise_config(dir.path()).unwrap();
        let server = std::fs::read(dir.path().join("fat_server.data")).unwrap();
        assert_eq!(&server[..8], b"LionsOS\x01");
        assert!(dir.path().join("fat_client_app.data").exists());
    }

    #[test]
    fn fs_server_cannot_serve_itself() {
        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let pd = sdf.add_pd(ProtectionDomain::new("fs", None));
        assert!(matches!(
            FileSystem::new(&sdf, pd, pd, "fs"),
            Err(Error::InvalidClient { .. })
        ));
    }

    #[test]
    fn nfs_enrols_in_serial_timer_and_net() {
        let mut b = Builder::new();
        let root = b.root();
        b.add_prop_cells(root, "#address-cells", &[2]);
        b.add_prop_cells(root, "#size-cells", &[2]);
        let uart = b.add_node(root, "pl011@9000000");
        b.add_prop_str_list(uart, "compatible", &["arm,pl011"]);
        b.add_prop_cells(uart, "reg", &[0x0, 0x900_0000, 0x0, 0x1000]);
        b.add_prop_cells(uart, "interrupts", &[0, 1, 4]);
        let timer_node = b.add_node(root, "timer@13050000");
        b.add_prop_str_list(timer_node, "compatible", &["arm,sp804"]);
        b.add_prop_cells(timer_node, "reg", &[0x0, 0x1305_0000, 0x0, 0x1000]);
        b.add_prop_cells(timer_node, "interrupts", &[0, 37, 4]);
        virtio_node(&mut b, "ethernet@a003000", 0xa00_3000, 47);
        let dt = b.finish();

        let mut repo = DriverRepo::default();
        for (class, name, compatible) in [
            (DeviceClass::Serial, "pl011", "arm,pl011"),
            (DeviceClass::Timer, "sp804", "arm,sp804"),
            (DeviceClass::Network, "virtio_net", "virtio,mmio"),
        ] {
            repo.add(
                class,
                DriverDescriptor {
                    name: name.to_string(),
                    compatible: vec![compatible.to_string()],
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
        }

        let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);
        let uart_driver = sdf.add_pd(ProtectionDomain::new("uart_driver", None));
        let virt_tx = sdf.add_pd(ProtectionDomain::new("serial_virt_tx", None));
        let timer_driver = sdf.add_pd(ProtectionDomain::new("timer_driver", None));
        let eth_driver = sdf.add_pd(ProtectionDomain::new("eth_driver", None));
        let net_rx = sdf.add_pd(ProtectionDomain::new("net_virt_rx", None));
        let net_tx = sdf.add_pd(ProtectionDomain::new("net_virt_tx", None));
        let copier = sdf.add_pd(ProtectionDomain::new("nfs_copier", None));
        let server = sdf.add_pd(ProtectionDomain::new("nfs", Some("nfs.elf")));
        let client = sdf.add_pd(ProtectionDomain::new("app", Some("app.elf")));

        let mut serial = SerialSystem::new(
            &sdf,
            &repo,
            dt.find_node("/pl011").unwrap(),
            uart_driver,
            virt_tx,
            None,
            Default::default(),
        )
        .unwrap();
        let mut timer =
            TimerSystem::new(&repo, dt.find_node("/timer").unwrap(), timer_driver);
        let mut net = NetSystem::new(
            &sdf,
            &repo,
            dt.find_node("/ethernet").unwrap(),
            eth_driver,
            net_rx,
            net_tx,
        )
        .unwrap();

        // a URL that cannot fit its record field is rejected up front
        assert!(matches!(
            Nfs::new(
                &sdf,
                server,
                client,
                &mut net,
                copier,
                &mut serial,
                &mut timer,
                &"x".repeat(NFS_MAX_URL_LEN),
                "/export",
            ),
            Err(Error::InvalidOptions { .. })
        ));

        let mut nfs = Nfs::new(
            &sdf,
            server,
            client,
            &mut net,
            copier,
            &mut serial,
            &mut timer,
            "nfs.example.com",
            "/export",
        )
        .unwrap();
        serial.connect(&mut sdf).unwrap();
        timer.connect(&mut sdf).unwrap();
        net.connect(&mut sdf).unwrap();
        nfs.connect(&mut sdf).unwrap();

        // the server reaches the serial virt, the timer driver, the net
        // virtualisers (via tx and its copier) and its fs client
        for peer in [virt_tx, timer_driver, net_tx, copier, client] {
            let linked = sdf.channels().iter().any(|c| {
                (c.pd_a == server && c.pd_b == peer) || (c.pd_b == server && c.pd_a == peer)
            });
            assert!(linked, "nfs server has no channel to {:?}", peer);
        }

        let dir = tempfile::tempdir().unwrap();
        nfs.serialise_config(dir.path()).unwrap();
        let bytes = std::fs::read(dir.path().join("nfs_server.data")).unwrap();
        assert_eq!(&bytes[..8], b"LionsOS\x02");
        let url_off = 8 + FsConnection::SIZE;
        assert_eq!(&bytes[url_off..url_off + 15], b"nfs.example.com");
        assert!(dir.path().join("nfs_client_app.data").exists());
    }
}
