//! Composes a small board end to end: serial console, timer and block
//! storage shared by two application PDs, then renders the description
//! and serialises every configuration blob.

use devicetree::{Builder, DeviceTree};
use sdf::{Arch, ProtectionDomain, SystemDescription};
use sddf::blk::{BlkClientOptions, BlkSystem};
use sddf::serial::{SerialOptions, SerialSystem};
use sddf::timer::TimerSystem;
use sddf::{DeviceClass, DriverDescriptor, DriverIrq, DriverRegion, DriverRepo, Subsystem};

fn board() -> DeviceTree {
    let mut b = Builder::new();
    let root = b.root();
    b.add_prop_cells(root, "#address-cells", &[2]);
    b.add_prop_cells(root, "#size-cells", &[2]);

    let uart = b.add_node(root, "pl011@9000000");
    b.add_prop_str_list(uart, "compatible", &["arm,pl011"]);
    b.add_prop_cells(uart, "reg", &[0x0, 0x900_0000, 0x0, 0x1000]);
    b.add_prop_cells(uart, "interrupts", &[0, 1, 4]);

    let timer = b.add_node(root, "timer@13050000");
    b.add_prop_str_list(timer, "compatible", &["arm,sp804"]);
    b.add_prop_cells(timer, "reg", &[0x0, 0x1305_0000, 0x0, 0x1000]);
    b.add_prop_cells(timer, "interrupts", &[0, 37, 4]);

    let blk = b.add_node(root, "virtio_mmio@a003e00");
    b.add_prop_str_list(blk, "compatible", &["virtio,mmio"]);
    b.add_prop_cells(blk, "reg", &[0x0, 0xa00_3e00, 0x0, 0x200]);
    b.add_prop_cells(blk, "interrupts", &[0, 46, 1]);

    b.finish()
}

fn repo() -> DriverRepo {
    let mut repo = DriverRepo::default();
    let entries = [
        (DeviceClass::Serial, "pl011", "arm,pl011"),
        (DeviceClass::Timer, "sp804", "arm,sp804"),
        (DeviceClass::Blk, "virtio_blk", "virtio,mmio"),
    ];
    for (class, name, compatible) in entries {
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
    repo
}

#[test]
fn compose_console_timer_and_storage() {
    let tree = board();
    let repo = repo();
    let mut sdf = SystemDescription::new(Arch::Aarch64, 0x8000_0000);

    let uart_driver = sdf.add_pd(ProtectionDomain::new("uart_driver", Some("uart_driver.elf")));
    let serial_virt_tx =
        sdf.add_pd(ProtectionDomain::new("serial_virt_tx", Some("serial_virt_tx.elf")));
    let timer_driver =
        sdf.add_pd(ProtectionDomain::new("timer_driver", Some("timer_driver.elf")));
    let blk_driver = sdf.add_pd(ProtectionDomain::new("blk_driver", Some("blk_driver.elf")));
    let blk_virt = sdf.add_pd(ProtectionDomain::new("blk_virt", Some("blk_virt.elf")));
    let app_a = sdf.add_pd(ProtectionDomain::new("app_a", Some("app_a.elf")));
    let app_b = sdf.add_pd(ProtectionDomain::new("app_b", Some("app_b.elf")));

    let mut serial = SerialSystem::new(
        &sdf,
        &repo,
        tree.find_node("/pl011").unwrap(),
        uart_driver,
        serial_virt_tx,
        None,
        SerialOptions {
            begin_str: Some("booted".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let mut timer = TimerSystem::new(&repo, tree.find_node("/timer").unwrap(), timer_driver);
    let mut blk = BlkSystem::new(
        &sdf,
        &repo,
        tree.find_node("/virtio_mmio").unwrap(),
        blk_driver,
        blk_virt,
    )
    .unwrap();

    for app in [app_a, app_b] {
        serial.add_client(&sdf, app).unwrap();
        timer.add_client(&sdf, app).unwrap();
    }
    blk.add_client(&sdf, app_a, BlkClientOptions::new(0)).unwrap();
    blk.add_client(&sdf, app_b, BlkClientOptions::new(1)).unwrap();

    serial.connect(&mut sdf).unwrap();
    timer.connect(&mut sdf).unwrap();
    blk.connect(&mut sdf).unwrap();

    // every subsystem client reaches exactly one serving end per class
    for app in [app_a, app_b] {
        for server in [serial_virt_tx, timer_driver, blk_virt] {
            let channels = sdf
                .channels()
                .iter()
                .filter(|c| {
                    (c.pd_a == server && c.pd_b == app) || (c.pd_b == server && c.pd_a == app)
                })
                .count();
            assert_eq!(channels, 1);
        }
    }

    // the rendered description carries every participant and device MR
    let xml = sdf.render();
    for needle in [
        "name=\"uart_driver_regs\"",
        "name=\"timer_driver_regs\"",
        "name=\"blk_driver_regs\"",
        "name=\"blk_driver_virtio_headers\"",
        "<protection_domain name=\"app_a\"",
        "<protection_domain name=\"app_b\"",
    ] {
        assert!(xml.contains(needle), "missing {needle}");
    }
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<system>\n"));
    assert!(xml.ends_with("</system>"));

    let dir = tempfile::tempdir().unwrap();
    serial.serialise_config(dir.path()).unwrap();
    timer.serialise_config(dir.path()).unwrap();
    blk.serialise_config(dir.path()).unwrap();
    sdf.render_to_file(&dir.path().join("system.xml")).unwrap();

    let blobs = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().map(|x| x == "data").unwrap_or(false))
        .count();
    // serial: resources + driver + virt_tx + 2 clients; timer: resources
    // + 2 clients; blk: resources + driver + virt + 2 clients
    assert_eq!(blobs, 13);

    let rendered = std::fs::read(dir.path().join("system.xml")).unwrap();
    assert_eq!(rendered.last(), Some(&0u8));
}
