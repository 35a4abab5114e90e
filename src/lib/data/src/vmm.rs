/* SPDX-License-Identifier: GPL-2.0-only */

//! Virtual-machine-monitor record

use serde::Serialize;

use crate::{Packer, Record, VMM_MAGIC};

pub const VMM_MAX_IRQS: usize = 32;
pub const VMM_MAX_VCPUS: usize = 32;
pub const VMM_MAX_VIRTIO_MMIO_DEVICES: usize = 32;
pub const VMM_MAX_LINUX_UIO_REGIONS: usize = 16;
pub const UIO_NAME_LEN: usize = 32;

/// Virtio-over-MMIO device identifiers, from the virtio specification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum VirtioDeviceType {
    Net = 1,
    Blk = 2,
    Console = 3,
}

/// An interrupt forwarded from the guest's devices to the VMM
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VmmIrq {
    /// VMM-local channel id
    pub id: u8,
    pub irq: u32,
}

const IRQ_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VmmVcpu {
    pub id: u8,
}

/// An emulated virtio-mmio transport window in guest physical space
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VirtioMmioDevice {
    pub kind: VirtioDeviceType,
    pub addr: u64,
    pub size: u32,
    pub irq: u32,
}

const VIRTIO_MMIO_DEVICE_SIZE: usize = 1 + 8 + 4 + 4;

/// A `generic-uio` region the VMM services for the guest
#[derive(Clone, Debug, Default, Serialize)]
pub struct LinuxUioRegion {
    /// At most [`UIO_NAME_LEN`]` - 1` bytes
    pub name: String,
    pub guest_paddr: u64,
    pub vmm_vaddr: u64,
    pub size: u64,
    /// Zero when the UIO node carries no interrupt
    pub irq: u32,
}

const LINUX_UIO_REGION_SIZE: usize = UIO_NAME_LEN + 8 + 8 + 8 + 4;

#[derive(Clone, Debug, Default, Serialize)]
pub struct VmmConfig {
    /// Guest-physical RAM base; the VMM maps RAM at the same vaddr
    pub ram: u64,
    pub ram_size: u64,
    /// Guest-physical DTB load address
    pub dtb: u64,
    /// Guest-physical initrd base
    pub initrd: u64,
    pub irqs: Vec<VmmIrq>,
    pub vcpus: Vec<VmmVcpu>,
    pub virtio_mmio_devices: Vec<VirtioMmioDevice>,
    pub linux_uios: Vec<LinuxUioRegion>,
}

impl Record for VmmConfig {
    const SIZE: usize = VMM_MAGIC.len()
        + 4 * 8
        + 1
        + VMM_MAX_IRQS * IRQ_SIZE
        + 1
        + VMM_MAX_VCPUS
        + 1
        + VMM_MAX_VIRTIO_MMIO_DEVICES * VIRTIO_MMIO_DEVICE_SIZE
        + 1
        + VMM_MAX_LINUX_UIO_REGIONS * LINUX_UIO_REGION_SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&VMM_MAGIC);
        p.u64(self.ram);
        p.u64(self.ram_size);
        p.u64(self.dtb);
        p.u64(self.initrd);
        p.u8(self.irqs.len() as u8);
        p.array(&self.irqs, VMM_MAX_IRQS, IRQ_SIZE, |p, i| {
            p.u8(i.id);
            p.u32(i.irq);
        });
        p.u8(self.vcpus.len() as u8);
        p.array(&self.vcpus, VMM_MAX_VCPUS, 1, |p, v| p.u8(v.id));
        p.u8(self.virtio_mmio_devices.len() as u8);
        p.array(
            &self.virtio_mmio_devices,
            VMM_MAX_VIRTIO_MMIO_DEVICES,
            VIRTIO_MMIO_DEVICE_SIZE,
            |p, d| {
                p.u8(d.kind as u8);
                p.u64(d.addr);
                p.u32(d.size);
                p.u32(d.irq);
            },
        );
        p.u8(self.linux_uios.len() as u8);
        p.array(
            &self.linux_uios,
            VMM_MAX_LINUX_UIO_REGIONS,
            LINUX_UIO_REGION_SIZE,
            |p, u| {
                p.str_fixed(&u.name, UIO_NAME_LEN);
                p.u64(u.guest_paddr);
                p.u64(u.vmm_vaddr);
                p.u64(u.size);
                p.u32(u.irq);
            },
        );
        p.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_pinned() {
        assert_eq!(
            VmmConfig::SIZE,
            3 + 32 + 1 + 32 * 5 + 1 + 32 + 1 + 32 * 17 + 1 + 16 * 60
        );
    }

    #[test]
    fn layout() {
        let config = VmmConfig {
            ram: 0x4000_0000,
            ram_size: 0x1000_0000,
            dtb: 0x4f00_0000,
            initrd: 0x4d00_0000,
            irqs: vec![VmmIrq { id: 1, irq: 74 }],
            vcpus: vec![VmmVcpu { id: 0 }, VmmVcpu { id: 1 }],
            virtio_mmio_devices: vec![VirtioMmioDevice {
                kind: VirtioDeviceType::Console,
                addr: 0x1_3000_0000,
                size: 0x200,
                irq: 42,
            }],
            linux_uios: vec![],
        };
        let bytes = config.pack();
        assert_eq!(bytes.len(), VmmConfig::SIZE);
        assert_eq!(&bytes[..3], b"vmm");
        assert_eq!(bytes[3 + 32], 1); // num_irqs
        let vcpu_count_off = 3 + 32 + 1 + 32 * 5;
        assert_eq!(bytes[vcpu_count_off], 2);
        let virtio_count_off = vcpu_count_off + 1 + 32;
        assert_eq!(bytes[virtio_count_off], 1);
        assert_eq!(bytes[virtio_count_off + 1], 3); // console type
    }
}
