/* SPDX-License-Identifier: GPL-2.0-only */

//! Virtual-machine-monitor subsystem
//!
//! The "driver" position of the usual subsystem shape is a VMM protection
//! domain and the single client is its guest VM. `connect` derives the
//! guest memory layout from the device tree: RAM from the memory node,
//! the ARM GIC vCPU frame at the CPU-interface address when the
//! controller is MMIO, the initrd range from `/chosen`, and a page-aligned
//! DTB window after the initrd (or before it when RAM runs out). Devices
//! reach the guest either passed through by dt-index or emulated over
//! virtio-mmio, in which case the VMM becomes a client of the matching
//! sDDF subsystem.

mod error;

pub use error::Error;

use std::path::Path;

use data::vmm::{
    LinuxUioRegion, VirtioDeviceType, VirtioMmioDevice, VmmConfig, VmmIrq, VmmVcpu,
    UIO_NAME_LEN, VMM_MAX_IRQS, VMM_MAX_LINUX_UIO_REGIONS, VMM_MAX_VCPUS,
    VMM_MAX_VIRTIO_MMIO_DEVICES,
};
use devicetree::{DeviceTree, Node};
use log::debug;
use sdf::arch::{round_down, round_up};
use sdf::{IrqTrigger, MemoryRegion, PdId, Perms, SystemDescription, VmId};
use sddf::blk::{BlkClientOptions, BlkSystem};
use sddf::net::{NetClientOptions, NetSystem};
use sddf::serial::SerialSystem;
use sddf::Subsystem;

/// Fixed reservation for the guest's device tree
const GUEST_DTB_SIZE: u64 = 0x2_0000;
/// virtio-mmio transport windows are 0x200-byte aligned
const VIRTIO_MMIO_ALIGN: u64 = 0x200;

#[derive(Clone, Copy, Debug, Default)]
pub struct VmmOptions {
    /// Back guest RAM 1:1 with the physical range the memory node names
    pub one_to_one_ram: bool,
}

/// An emulated virtio-mmio transport window in guest physical space
#[derive(Clone, Copy, Debug)]
pub struct VirtioMmioSpec {
    pub addr: u64,
    pub size: u32,
    pub irq: u32,
}

pub struct VirtualMachineSystem<'a> {
    dt: &'a DeviceTree,
    vmm: PdId,
    vm: VmId,
    vmm_name: String,
    options: VmmOptions,
    connected: bool,
    config: VmmConfig,
}

impl<'a> VirtualMachineSystem<'a> {
    pub fn new(
        sdf: &SystemDescription,
        dt: &'a DeviceTree,
        vmm: PdId,
        vm: VmId,
        options: VmmOptions,
    ) -> Result<Self, Error> {
        if !sdf.arch().is_arm() && !sdf.arch().is_riscv() {
            return Err(Error::UnsupportedArch);
        }
        assert!(
            sdf.pd(vmm).vm() == Some(vm),
            "'{}' does not own the given virtual machine",
            sdf.pd(vmm).name()
        );
        assert!(sdf.vm(vm).vcpus().len() <= VMM_MAX_VCPUS);
        Ok(Self {
            dt,
            vmm,
            vm,
            vmm_name: sdf.pd(vmm).name().to_string(),
            options,
            connected: false,
            config: VmmConfig::default(),
        })
    }

    /// Map selected device regions straight into the guest and forward
    /// selected interrupts to the VMM
    ///
    /// `regions` and `irqs` index the node's `reg` and `interrupts`
    /// entries; `None` takes everything the node offers.
    pub fn add_passthrough_device(
        &mut self,
        sdf: &mut SystemDescription,
        name: &str,
        node: Node<'_>,
        regions: Option<&[usize]>,
        irqs: Option<&[usize]>,
    ) -> Result<(), Error> {
        let arch = sdf.arch();
        let reg = node.reg()?;
        let region_indices: Vec<usize> = match regions {
            Some(indices) => indices.to_vec(),
            None => (0..reg.len()).collect(),
        };
        for &index in &region_indices {
            let entry = *reg.get(index).ok_or_else(|| Error::InvalidPassthroughRegions {
                node: node.name().to_string(),
                reason: format!("no reg entry at index {index}"),
            })?;
            let paddr = node.reg_paddr(arch, entry.addr)?;
            let size = arch.round_up_to_page(entry.size as u64);
            let mr = MemoryRegion::physical(
                sdf,
                format!("{name}_passthrough_{index}"),
                size,
                Some(paddr),
            );
            sdf.vm_map_at(self.vm, &mr, paddr, Perms::RW, false);
            sdf.add_mr(mr);
        }

        let node_irqs = node.interrupts(sdf.arch())?;
        let irq_indices: Vec<usize> = match irqs {
            Some(indices) => indices.to_vec(),
            None => (0..node_irqs.len()).collect(),
        };
        for &index in &irq_indices {
            let spec = *node_irqs.get(index).ok_or_else(|| Error::InvalidPassthroughIrqs {
                node: node.name().to_string(),
                reason: format!("no interrupt at index {index}"),
            })?;
            if self.config.irqs.len() >= VMM_MAX_IRQS {
                return Err(Error::InvalidPassthroughIrqs {
                    node: node.name().to_string(),
                    reason: format!("more than {VMM_MAX_IRQS} forwarded interrupts"),
                });
            }
            let trigger = spec.trigger.unwrap_or(IrqTrigger::Level);
            let id = sdf.pd_mut(self.vmm).add_irq(spec.irq, trigger, None)?;
            self.config.irqs.push(VmmIrq { id, irq: spec.irq });
        }
        debug!(
            "passthrough '{}' for vmm '{}': {} region(s), {} irq(s)",
            name,
            self.vmm_name,
            region_indices.len(),
            irq_indices.len()
        );
        Ok(())
    }

    fn add_virtio_mmio(
        &mut self,
        kind: VirtioDeviceType,
        spec: VirtioMmioSpec,
    ) -> Result<(), Error> {
        if spec.size == 0 || spec.addr % VIRTIO_MMIO_ALIGN != 0 {
            return Err(Error::InvalidVirtioDevice {
                reason: format!(
                    "window {:#x}+{:#x} is not a 0x200-aligned non-empty range",
                    spec.addr, spec.size
                ),
            });
        }
        if spec.irq == 0 {
            return Err(Error::InvalidVirtioDevice {
                reason: "interrupt 0 cannot be injected".to_string(),
            });
        }
        if self.config.virtio_mmio_devices.len() >= VMM_MAX_VIRTIO_MMIO_DEVICES {
            return Err(Error::InvalidVirtioDevice {
                reason: format!("more than {VMM_MAX_VIRTIO_MMIO_DEVICES} devices"),
            });
        }
        self.config.virtio_mmio_devices.push(VirtioMmioDevice {
            kind,
            addr: spec.addr,
            size: spec.size,
            irq: spec.irq,
        });
        Ok(())
    }

    /// Emulate a virtio console; the VMM becomes a serial client
    pub fn add_virtio_mmio_console(
        &mut self,
        sdf: &SystemDescription,
        serial: &mut SerialSystem<'_>,
        spec: VirtioMmioSpec,
    ) -> Result<(), Error> {
        self.add_virtio_mmio(VirtioDeviceType::Console, spec)?;
        serial.add_client(sdf, self.vmm)?;
        Ok(())
    }

    /// Emulate a virtio block device over `partition`; the VMM becomes a
    /// block client
    pub fn add_virtio_mmio_blk(
        &mut self,
        sdf: &SystemDescription,
        blk: &mut BlkSystem<'_>,
        spec: VirtioMmioSpec,
        partition: u32,
    ) -> Result<(), Error> {
        self.add_virtio_mmio(VirtioDeviceType::Blk, spec)?;
        blk.add_client(sdf, self.vmm, BlkClientOptions::new(partition))?;
        Ok(())
    }

    /// Emulate a virtio network device; the VMM becomes a net client with
    /// `copier`
    pub fn add_virtio_mmio_net(
        &mut self,
        sdf: &SystemDescription,
        net: &mut NetSystem<'_>,
        copier: PdId,
        spec: VirtioMmioSpec,
        options: NetClientOptions,
    ) -> Result<(), Error> {
        self.add_virtio_mmio(VirtioDeviceType::Net, spec)?;
        net.add_client_with_copier(sdf, self.vmm, copier, options)?;
        Ok(())
    }

    fn install_guest_ram(&mut self, sdf: &mut SystemDescription) -> Result<(u64, u64), Error> {
        let memory = self.dt.memory().ok_or(Error::MissingMemoryNode)?;
        let reg = memory.reg()?;
        let entry = reg.first().ok_or_else(|| Error::InvalidMemoryNode {
            reason: "memory node has no reg entries".to_string(),
        })?;
        let (base, size) = (entry.addr as u64, entry.size as u64);
        if size == 0 {
            return Err(Error::InvalidMemoryNode {
                reason: "memory node names an empty range".to_string(),
            });
        }
        let name = format!("guest_ram_{}", sdf.vm(self.vm).name());
        let mr = if self.options.one_to_one_ram {
            MemoryRegion::physical(sdf, name, size, Some(base))
        } else {
            MemoryRegion::new(name, size)
        };
        sdf.vm_map_at(self.vm, &mr, base, Perms::RWX, true);
        // the monitor reads and writes guest memory but never runs it;
        // identity vaddr keeps one address in the config for both sides
        sdf.map_at(self.vmm, &mr, base, Perms::RW, true, None);
        sdf.add_mr(mr);
        self.config.ram = base;
        self.config.ram_size = size;
        Ok((base, size))
    }

    fn install_gic_vcpu(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        let gic = match self.dt.arm_gic(sdf.arch()) {
            Ok(gic) => gic,
            Err(devicetree::Error::GicNotFound) => return Err(Error::MissingGicNode),
            Err(e) => return Err(e.into()),
        };
        if let Some(mmio) = gic.mmio {
            let size = sdf.arch().round_up_to_page(mmio.vcpu_size);
            let mr = MemoryRegion::physical(
                sdf,
                format!("gic_vcpu_{}", sdf.vm(self.vm).name()),
                size,
                Some(mmio.vcpu_paddr),
            );
            // the guest drives the virtual CPU interface through the
            // frame the hardware exposes at the CPU-interface address
            sdf.vm_map_at(self.vm, &mr, mmio.cpu_paddr, Perms::RW, false);
            sdf.add_mr(mr);
        }
        Ok(())
    }

    fn derive_initrd_and_dtb(&mut self, ram: (u64, u64)) -> Result<(), Error> {
        let (ram_base, ram_size) = ram;
        let ram_end = ram_base + ram_size;
        let chosen = self.dt.chosen().ok_or(Error::MissingInitrd)?;
        let start = chosen
            .prop_address("linux,initrd-start")?
            .ok_or(Error::MissingInitrd)?;
        let end = chosen
            .prop_address("linux,initrd-end")?
            .ok_or(Error::MissingInitrd)?;
        if start >= end {
            return Err(Error::InvalidInitrd {
                reason: format!("range {start:#x}..{end:#x} is inverted or empty"),
            });
        }
        if start < ram_base || end > ram_end {
            return Err(Error::InvalidInitrd {
                reason: format!("range {start:#x}..{end:#x} lies outside guest RAM"),
            });
        }
        self.config.initrd = start;

        // DTB prefers the space after the initrd; falls back to before it
        let page = 0x1000;
        let after = round_up(end, page);
        if after + GUEST_DTB_SIZE <= ram_end {
            self.config.dtb = after;
        } else if start >= GUEST_DTB_SIZE {
            let before = round_down(start - GUEST_DTB_SIZE, page);
            if before < ram_base {
                return Err(Error::CouldNotAllocateDtb);
            }
            self.config.dtb = before;
        } else {
            return Err(Error::CouldNotAllocateDtb);
        }
        Ok(())
    }

    /// Record every `generic-uio` node into the VMM's configuration
    ///
    /// The region name is the second, NUL-delimited compatible string;
    /// names must be unique and short enough for their fixed field.
    fn walk_uio_nodes(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        let arch = sdf.arch();
        let nodes: Vec<_> = self
            .dt
            .find_all_compatible(&["generic-uio"])
            .iter()
            .map(|n| n.id())
            .collect();
        for id in nodes {
            let node = self.dt.node(id);
            let invalid = |reason: String| Error::InvalidUio {
                node: node.name().to_string(),
                reason,
            };
            let compatible = node.compatible();
            let name = *compatible
                .get(1)
                .ok_or_else(|| invalid("no name in the compatible list".to_string()))?;
            if name.len() >= UIO_NAME_LEN {
                return Err(invalid(format!(
                    "name '{name}' is longer than {} bytes",
                    UIO_NAME_LEN - 1
                )));
            }
            if self.config.linux_uios.iter().any(|u| u.name == name) {
                return Err(invalid(format!("duplicate name '{name}'")));
            }
            if self.config.linux_uios.len() >= VMM_MAX_LINUX_UIO_REGIONS {
                return Err(invalid(format!(
                    "more than {VMM_MAX_LINUX_UIO_REGIONS} UIO regions"
                )));
            }
            let uio = match node.linux_uio(arch) {
                Ok(uio) => uio,
                Err(devicetree::Error::InvalidUio { node, reason }) => {
                    return Err(Error::InvalidUio { node, reason })
                }
                Err(e) => return Err(e.into()),
            };
            let mr = MemoryRegion::physical(
                sdf,
                format!("uio_{}_{}", name, self.vmm_name),
                uio.size,
                Some(uio.paddr),
            );
            let vmm_vaddr = sdf.map(self.vmm, &mr, Perms::RW, false, None);
            sdf.add_mr(mr);
            self.config.linux_uios.push(LinuxUioRegion {
                name: name.to_string(),
                guest_paddr: uio.paddr,
                vmm_vaddr,
                size: uio.size,
                irq: uio.irq.map(|i| i.irq).unwrap_or(0),
            });
        }
        Ok(())
    }
}

impl Subsystem for VirtualMachineSystem<'_> {
    type Error = Error;

    fn connect(&mut self, sdf: &mut SystemDescription) -> Result<(), Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        let ram = self.install_guest_ram(sdf)?;
        if sdf.arch().is_arm() {
            self.install_gic_vcpu(sdf)?;
        }
        self.config.vcpus = sdf
            .vm(self.vm)
            .vcpus()
            .iter()
            .map(|v| VmmVcpu { id: v.id })
            .collect();
        self.derive_initrd_and_dtb(ram)?;
        self.walk_uio_nodes(sdf)?;
        debug!(
            "vm '{}' connected: ram {:#x}+{:#x}, dtb {:#x}, initrd {:#x}",
            sdf.vm(self.vm).name(),
            self.config.ram,
            self.config.ram_size,
            self.config.dtb,
            self.config.initrd
        );
        self.connected = true;
        Ok(())
    }

    fn serialise_config(&self, output: &Path) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        data::emit(output, &format!("vmm_{}", self.vmm_name), &self.config)?;
        Ok(())
    }
}
