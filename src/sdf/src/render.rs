/* SPDX-License-Identifier: GPL-2.0-only */

//! Canonical XML rendering of a system description
//!
//! The output is consumed by the microkernel's loader tooling and is part
//! of a bit-exact contract: element names, attribute names and the
//! attribute order below must not change within a composer version.

use std::io;
use std::path::Path;

use crate::mr::{Map, MemoryRegion};
use crate::pd::{Irq, SetVar};
use crate::{Channel, ChannelEnd, PdId, SystemDescription, VmId};

const INDENT: &str = "    ";

impl SystemDescription {
    /// Render the description; pure, insertion order at every level
    ///
    /// The returned string does not carry the trailing NUL; see
    /// [`SystemDescription::render_nul_terminated`].
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<system>\n");
        for mr in self.mrs() {
            render_mr(&mut out, mr, 1);
        }
        for i in 0..self.pds().len() {
            let id = PdId(i);
            if self.pd(id).parent().is_none() {
                self.render_pd(&mut out, id, None, 1);
            }
        }
        for channel in self.channels() {
            self.render_channel(&mut out, channel, 1);
        }
        out.push_str("</system>");
        out
    }

    /// The rendered description followed by a single NUL, for C consumers
    pub fn render_nul_terminated(&self) -> Vec<u8> {
        let mut bytes = self.render().into_bytes();
        bytes.push(0);
        bytes
    }

    pub fn render_to_file(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render_nul_terminated())
    }

    fn render_pd(&self, out: &mut String, id: PdId, child_id: Option<u8>, depth: usize) {
        let pd = self.pd(id);
        let ind = INDENT.repeat(depth);
        out.push_str(&format!("{ind}<protection_domain name=\"{}\"", pd.name()));
        if let Some(child_id) = child_id {
            out.push_str(&format!(" id=\"{child_id}\""));
        }
        out.push_str(&format!(
            " priority=\"{}\" budget=\"{}\" period=\"{}\" passive=\"{}\" stack_size=\"{:#x}\" smc=\"{}\"",
            pd.priority(),
            pd.budget(),
            pd.period(),
            pd.passive(),
            pd.stack_size(),
            pd.smc(),
        ));
        if let Some(cpu) = pd.cpu() {
            out.push_str(&format!(" cpu=\"{cpu}\""));
        }
        out.push_str(">\n");
        if let Some(image) = pd.program_image() {
            out.push_str(&format!(
                "{ind}{INDENT}<program_image path=\"{}\" />\n",
                image.display()
            ));
        }
        for map in pd.maps() {
            render_map(out, map, depth + 1);
        }
        for (child_id, child) in pd.children() {
            self.render_pd(out, *child, Some(*child_id), depth + 1);
        }
        if let Some(vm) = pd.vm() {
            self.render_vm(out, vm, depth + 1);
        }
        for irq in pd.irqs() {
            render_irq(out, irq, depth + 1);
        }
        for setvar in pd.setvars() {
            render_setvar(out, setvar, depth + 1);
        }
        out.push_str(&format!("{ind}</protection_domain>\n"));
    }

    fn render_vm(&self, out: &mut String, id: VmId, depth: usize) {
        let vm = self.vm(id);
        let ind = INDENT.repeat(depth);
        out.push_str(&format!(
            "{ind}<virtual_machine name=\"{}\" priority=\"{}\" budget=\"{}\" period=\"{}\">\n",
            vm.name(),
            vm.priority(),
            vm.budget(),
            vm.period(),
        ));
        for vcpu in vm.vcpus() {
            out.push_str(&format!("{ind}{INDENT}<vcpu id=\"{}\"", vcpu.id));
            if let Some(cpu) = vcpu.cpu {
                out.push_str(&format!(" cpu=\"{cpu}\""));
            }
            out.push_str(" />\n");
        }
        for map in vm.maps() {
            render_map(out, map, depth + 1);
        }
        out.push_str(&format!("{ind}</virtual_machine>\n"));
    }

    fn render_channel(&self, out: &mut String, channel: &Channel, depth: usize) {
        let ind = INDENT.repeat(depth);
        out.push_str(&format!("{ind}<channel>\n"));
        let ends = [
            (channel.pd_a, channel.pd_a_id, channel.pd_a_notify, ChannelEnd::A),
            (channel.pd_b, channel.pd_b_id, channel.pd_b_notify, ChannelEnd::B),
        ];
        for (pd, id, notify, end) in ends {
            out.push_str(&format!(
                "{ind}{INDENT}<end pd=\"{}\" id=\"{}\" notify=\"{}\" pp=\"{}\" />\n",
                self.pd(pd).name(),
                id,
                notify,
                channel.pp == Some(end),
            ));
        }
        out.push_str(&format!("{ind}</channel>\n"));
    }
}

fn render_mr(out: &mut String, mr: &MemoryRegion, depth: usize) {
    let ind = INDENT.repeat(depth);
    out.push_str(&format!(
        "{ind}<memory_region name=\"{}\" size=\"{:#x}\"",
        mr.name, mr.size
    ));
    if let Some(page_size) = mr.page_size {
        out.push_str(&format!(" page_size=\"{page_size:#x}\""));
    }
    if let Some(paddr) = mr.paddr {
        out.push_str(&format!(" phys_addr=\"{paddr:#x}\""));
    }
    out.push_str(" />\n");
}

fn render_map(out: &mut String, map: &Map, depth: usize) {
    let ind = INDENT.repeat(depth);
    out.push_str(&format!(
        "{ind}<map mr=\"{}\" vaddr=\"{:#x}\" perms=\"{}\" cached=\"{}\"",
        map.mr, map.vaddr, map.perms, map.cached
    ));
    if let Some(symbol) = &map.setvar_vaddr {
        out.push_str(&format!(" setvar_vaddr=\"{symbol}\""));
    }
    out.push_str(" />\n");
}

fn render_irq(out: &mut String, irq: &Irq, depth: usize) {
    let ind = INDENT.repeat(depth);
    out.push_str(&format!(
        "{ind}<irq irq=\"{}\" trigger=\"{}\" id=\"{}\" />\n",
        irq.irq,
        irq.trigger.as_str(),
        irq.id
    ));
}

fn render_setvar(out: &mut String, setvar: &SetVar, depth: usize) {
    let ind = INDENT.repeat(depth);
    out.push_str(&format!(
        "{ind}<setvar symbol=\"{}\" region_paddr=\"{}\" />\n",
        setvar.symbol, setvar.region_paddr
    ));
}
