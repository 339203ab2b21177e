//! Filesystem em memória
//!
//! Backing do boot e dos testes. Diretórios guardam `Arc<Node>` dos filhos
//! diretamente; um nó desligado sobrevive enquanto algum handle o segurar.
//! Arquivos vivem num `Vec<u8>` dentro das próprias ops do nó, então dados
//! de um arquivo aberto não morrem no unlink.

use crate::fs::node::{DirEntry, Node, NodeId, NodeOps, NodeType};
use crate::fs::mount::MountId;
use crate::mm::PAGE_SIZE;
use crate::sync::Mutex;
use crate::{KResult, Status};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

struct RamMeta {
    mount: MountId,
    next_id: AtomicU64,
}

impl RamMeta {
    fn alloc_id(&self) -> NodeId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct RamDirOps {
    meta: Arc<RamMeta>,
    children: Mutex<Vec<(String, Arc<Node>)>>,
}

struct RamFileOps {
    data: Mutex<Vec<u8>>,
}

struct RamSymlinkOps {
    target: String,
}

fn attach(dir_children: &mut Vec<(String, Arc<Node>)>, name: &str, node: Arc<Node>) {
    node.inner.lock().links += 1;
    dir_children.push((String::from(name), node));
}

impl RamDirOps {
    fn new(meta: Arc<RamMeta>) -> Arc<Self> {
        Arc::new(Self {
            meta,
            children: Mutex::new("ramfs_dir", Vec::new()),
        })
    }
}

impl NodeOps for RamDirOps {
    fn lookup(&self, _dir: &Arc<Node>, name: &str) -> KResult<Arc<Node>> {
        let children = self.children.lock();
        children
            .iter()
            .find(|entry| entry.0 == name)
            .map(|entry| entry.1.clone())
            .ok_or(Status::NotFound)
    }

    fn create(&self, _dir: &Arc<Node>, name: &str, ntype: NodeType) -> KResult<Arc<Node>> {
        let mut children = self.children.lock();
        if children.iter().any(|entry| entry.0 == name) {
            return Err(Status::AlreadyExists);
        }
        let id = self.meta.alloc_id();
        let node = match ntype {
            NodeType::Regular => Node::new(
                id,
                self.meta.mount,
                ntype,
                PAGE_SIZE,
                0,
                Arc::new(RamFileOps {
                    data: Mutex::new("ramfs_file", Vec::new()),
                }),
            ),
            NodeType::Directory => Node::new(
                id,
                self.meta.mount,
                ntype,
                PAGE_SIZE,
                0,
                RamDirOps::new(self.meta.clone()),
            ),
            // Symlinks nascem pela op symlink, devices pela link
            NodeType::Symlink | NodeType::DeviceAlias => return Err(Status::InvalidArg),
        };
        attach(&mut children, name, node.clone());
        Ok(node)
    }

    fn symlink(&self, _dir: &Arc<Node>, name: &str, target: &str) -> KResult<Arc<Node>> {
        let mut children = self.children.lock();
        if children.iter().any(|entry| entry.0 == name) {
            return Err(Status::AlreadyExists);
        }
        let node = Node::new(
            self.meta.alloc_id(),
            self.meta.mount,
            NodeType::Symlink,
            PAGE_SIZE,
            target.len() as u64,
            Arc::new(RamSymlinkOps {
                target: String::from(target),
            }),
        );
        attach(&mut children, name, node.clone());
        Ok(node)
    }

    fn link(&self, _dir: &Arc<Node>, name: &str, node: &Arc<Node>) -> KResult<()> {
        let mut children = self.children.lock();
        if children.iter().any(|entry| entry.0 == name) {
            return Err(Status::AlreadyExists);
        }
        attach(&mut children, name, node.clone());
        Ok(())
    }

    fn unlink(&self, _dir: &Arc<Node>, name: &str) -> KResult<()> {
        let mut children = self.children.lock();
        let position = children
            .iter()
            .position(|entry| entry.0 == name)
            .ok_or(Status::NotFound)?;
        let node = children[position].1.clone();
        if node.is_dir() {
            if node.ops.readdir(&node, 0)?.is_some() {
                return Err(Status::NotEmpty);
            }
        }
        children.remove(position);
        node.inner.lock().links -= 1;
        Ok(())
    }

    fn readdir(&self, _dir: &Arc<Node>, index: usize) -> KResult<Option<DirEntry>> {
        let children = self.children.lock();
        Ok(children.get(index).map(|entry| DirEntry {
            name: entry.0.clone(),
            id: entry.1.id,
            ntype: entry.1.ntype,
        }))
    }
}

impl NodeOps for RamFileOps {
    fn read_page(&self, _node: &Arc<Node>, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let data = self.data.lock();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_page(&self, _node: &Arc<Node>, offset: u64, buf: &[u8]) -> KResult<usize> {
        let mut data = self.data.lock();
        let end = offset as usize + buf.len();
        if end > data.len() {
            // Extensão zero-preenche o buraco
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn resize(&self, _node: &Arc<Node>, new_size: u64) -> KResult<()> {
        self.data.lock().resize(new_size as usize, 0);
        Ok(())
    }
}

impl NodeOps for RamSymlinkOps {
    fn symlink_target(&self, _node: &Arc<Node>) -> KResult<String> {
        Ok(self.target.clone())
    }
}

/// Cria um ramfs vazio e devolve o nó raiz.
pub fn new(mount: MountId) -> Arc<Node> {
    let meta = Arc::new(RamMeta {
        mount,
        next_id: AtomicU64::new(2),
    });
    Node::new(
        1,
        mount,
        NodeType::Directory,
        PAGE_SIZE,
        0,
        RamDirOps::new(meta),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::io::IoRequest;

    #[test]
    fn create_lookup_readdir() {
        let root = new(0);
        let etc = root.ops.create(&root, "etc", NodeType::Directory).unwrap();
        let motd = etc.ops.create(&etc, "motd", NodeType::Regular).unwrap();
        assert!(etc.is_dir());
        assert_eq!(motd.ntype, NodeType::Regular);
        assert_eq!(
            root.ops.lookup(&root, "etc").unwrap().id,
            etc.id
        );
        assert_eq!(
            root.ops.lookup(&root, "nope").map(|n| n.id),
            Err(Status::NotFound)
        );
        assert_eq!(
            root.ops.create(&root, "etc", NodeType::Directory).map(|n| n.id),
            Err(Status::AlreadyExists)
        );
        let first = root.ops.readdir(&root, 0).unwrap().unwrap();
        assert_eq!(first.name, "etc");
        assert!(root.ops.readdir(&root, 1).unwrap().is_none());
    }

    #[test]
    fn file_write_read_through_cache() {
        let root = new(0);
        let file = root.ops.create(&root, "log", NodeType::Regular).unwrap();
        let cache = file.cache.as_ref().unwrap();

        let mut req = IoRequest::write_kernel(0, b"hello ramfs");
        cache.write(&file, &mut req).unwrap();
        assert_eq!(file.size(), 11);

        let mut out = [0u8; 11];
        let mut req = IoRequest::read_kernel(0, &mut out);
        cache.read(&file, &mut req).unwrap();
        assert_eq!(req.transferred, 11);
        drop(req);
        assert_eq!(&out, b"hello ramfs");
    }

    #[test]
    fn sparse_write_zero_fills() {
        let root = new(0);
        let file = root.ops.create(&root, "sparse", NodeType::Regular).unwrap();
        let cache = file.cache.as_ref().unwrap();

        let mut req = IoRequest::write_kernel(100, b"x");
        cache.write(&file, &mut req).unwrap();
        assert_eq!(file.size(), 101);

        let mut out = [0xffu8; 101];
        let mut req = IoRequest::read_kernel(0, &mut out);
        cache.read(&file, &mut req).unwrap();
        drop(req);
        assert_eq!(out[0], 0);
        assert_eq!(out[99], 0);
        assert_eq!(out[100], b'x');
    }

    #[test]
    fn unlink_rules() {
        let root = new(0);
        let dir = root.ops.create(&root, "dir", NodeType::Directory).unwrap();
        let file = dir.ops.create(&dir, "f", NodeType::Regular).unwrap();

        assert_eq!(root.ops.unlink(&root, "dir"), Err(Status::NotEmpty));
        assert_eq!(root.ops.unlink(&root, "ghost"), Err(Status::NotFound));

        dir.ops.unlink(&dir, "f").unwrap();
        // O nó sobrevive à remoção da entrada enquanto houver referência
        assert_eq!(file.inner.lock().links, 0);
        assert_eq!(file.ntype, NodeType::Regular);
        root.ops.unlink(&root, "dir").unwrap();
    }

    #[test]
    fn symlink_target_round() {
        let root = new(0);
        let link = root.ops.symlink(&root, "cur", "/etc/motd").unwrap();
        assert_eq!(link.ntype, NodeType::Symlink);
        assert_eq!(link.ops.symlink_target(&link).unwrap(), "/etc/motd");
        assert_eq!(
            root.ops.symlink(&root, "cur", "x").map(|n| n.id),
            Err(Status::AlreadyExists)
        );
    }

    #[test]
    fn hard_link_shares_node() {
        let root = new(0);
        let file = root.ops.create(&root, "a", NodeType::Regular).unwrap();
        root.ops.link(&root, "b", &file).unwrap();
        assert_eq!(file.inner.lock().links, 2);
        assert_eq!(root.ops.lookup(&root, "b").unwrap().id, file.id);
        root.ops.unlink(&root, "a").unwrap();
        assert_eq!(file.inner.lock().links, 1);
    }
}
