//! Arquivos respaldados por memória
//!
//! Nó regular somente-leitura sobre um blob já residente, tipicamente um
//! módulo carregado pelo bootloader. O page cache lê direto do blob;
//! qualquer escrita devolve ReadOnly.

use crate::fs::mount::MountId;
use crate::fs::node::{Node, NodeId, NodeType};
use crate::{KResult, Status};
use alloc::sync::Arc;

struct MemFileOps {
    blob: &'static [u8],
}

impl crate::fs::node::NodeOps for MemFileOps {
    fn read_page(&self, _node: &Arc<Node>, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        if offset >= self.blob.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.blob.len() - start);
        buf[..n].copy_from_slice(&self.blob[start..start + n]);
        Ok(n)
    }

    fn write_page(&self, _node: &Arc<Node>, _offset: u64, _buf: &[u8]) -> KResult<usize> {
        Err(Status::ReadOnly)
    }

    fn resize(&self, _node: &Arc<Node>, _new_size: u64) -> KResult<()> {
        Err(Status::ReadOnly)
    }
}

/// Cria o nó sobre o blob. O chamador o liga num diretório.
pub fn new(mount: MountId, id: NodeId, blob: &'static [u8]) -> Arc<Node> {
    Node::new(
        id,
        mount,
        NodeType::Regular,
        crate::mm::PAGE_SIZE,
        blob.len() as u64,
        Arc::new(MemFileOps { blob }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::io::IoRequest;

    static BLOB: &[u8] = b"module payload bytes";

    #[test]
    fn reads_through_cache() {
        let node = new(0, 1, BLOB);
        let cache = node.cache.as_ref().unwrap();
        let mut out = [0u8; 6];
        let mut req = IoRequest::read_kernel(7, &mut out);
        cache.read(&node, &mut req).unwrap();
        assert_eq!(req.transferred, 6);
        drop(req);
        assert_eq!(&out, b"payloa");
    }

    #[test]
    fn writes_rejected() {
        let node = new(0, 2, BLOB);
        let cache = node.cache.as_ref().unwrap();
        let mut req = IoRequest::write_kernel(0, b"x");
        assert_eq!(cache.write(&node, &mut req), Err(Status::ReadOnly));
        assert_eq!(node.ops.resize(&node, 0), Err(Status::ReadOnly));
    }

    #[test]
    fn short_read_at_end() {
        let node = new(0, 3, BLOB);
        let cache = node.cache.as_ref().unwrap();
        let mut out = [0u8; 64];
        let mut req = IoRequest::read_kernel(0, &mut out);
        cache.read(&node, &mut req).unwrap();
        assert_eq!(req.transferred, BLOB.len());
    }
}
