/* SPDX-License-Identifier: GPL-2.0-only */

//! File-system subsystem records

use serde::Serialize;

use crate::{Packer, Record, Region, FS_MAGIC, NFS_MAGIC};

pub const NFS_MAX_URL_LEN: usize = 128;
pub const NFS_MAX_EXPORT_LEN: usize = 128;

/// The command/completion queue pair and data share between a file-system
/// server and its client
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FsConnection {
    pub command_queue: Region,
    pub completion_queue: Region,
    pub share: Region,
    /// Queue depth in entries
    pub queue_len: u16,
    /// Channel id towards the peer
    pub id: u8,
}

impl FsConnection {
    pub const SIZE: usize = 3 * Region::SIZE + 2 + 1;

    fn pack(&self, p: &mut Packer) {
        self.command_queue.pack_into(p);
        self.completion_queue.pack_into(p);
        self.share.pack_into(p);
        p.u16(self.queue_len);
        p.u8(self.id);
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FsServerConfig {
    pub client: FsConnection,
}

impl Record for FsServerConfig {
    const SIZE: usize = FS_MAGIC.len() + FsConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&FS_MAGIC);
        self.client.pack(&mut p);
        p.finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FsClientConfig {
    pub server: FsConnection,
}

impl Record for FsClientConfig {
    const SIZE: usize = FS_MAGIC.len() + FsConnection::SIZE;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&FS_MAGIC);
        self.server.pack(&mut p);
        p.finish()
    }
}

/// The NFS server's client wiring plus its remote-mount identity
#[derive(Clone, Debug, Default, Serialize)]
pub struct NfsServerConfig {
    pub client: FsConnection,
    pub server_url: String,
    pub export_path: String,
}

impl Record for NfsServerConfig {
    const SIZE: usize =
        NFS_MAGIC.len() + FsConnection::SIZE + NFS_MAX_URL_LEN + NFS_MAX_EXPORT_LEN;

    fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.bytes(&NFS_MAGIC);
        self.client.pack(&mut p);
        p.str_fixed(&self.server_url, NFS_MAX_URL_LEN);
        p.str_fixed(&self.export_path, NFS_MAX_EXPORT_LEN);
        p.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pinned() {
        assert_eq!(FsConnection::SIZE, 51);
        assert_eq!(FsServerConfig::SIZE, 59);
        assert_eq!(FsClientConfig::SIZE, 59);
        assert_eq!(NfsServerConfig::SIZE, 8 + 51 + 256);
    }

    #[test]
    fn nfs_strings_are_fixed_slots() {
        let config = NfsServerConfig {
            client: FsConnection::default(),
            server_url: "nfs.example.com".to_string(),
            export_path: "/export".to_string(),
        };
        let bytes = config.pack();
        assert_eq!(&bytes[..8], &NFS_MAGIC);
        let url_off = 8 + FsConnection::SIZE;
        assert_eq!(&bytes[url_off..url_off + 15], b"nfs.example.com");
        let export_off = url_off + NFS_MAX_URL_LEN;
        assert_eq!(&bytes[export_off..export_off + 7], b"/export");
    }
}
