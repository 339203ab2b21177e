//! Nós do VFS
//!
//! Um nó é um `Arc<Node>`: a tabela do filesystem, o cache de entradas do
//! diretório pai e os file handles compartilham a instância. O nó fica
//! vivo enquanto qualquer referência existir; unlink remove só a entrada.

use crate::fs::entry::EntryCache;
use crate::fs::io::IoRequest;
use crate::fs::mount::MountId;
use crate::fs::vmcache::VmCache;
use crate::sync::Spinlock;
use crate::{KResult, Status};
use alloc::string::String;
use alloc::sync::Arc;

/// Id de nó, único dentro do mount
pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Regular,
    Directory,
    Symlink,
    /// Alias para um device da árvore de devices
    DeviceAlias,
}

/// Uma entrada devolvida por `readdir`
pub struct DirEntry {
    pub name: String,
    pub id: NodeId,
    pub ntype: NodeType,
}

/// Estado mutável do nó
pub struct NodeInner {
    pub size: u64,
    pub links: u32,
}

/// Um nó do VFS
pub struct Node {
    pub id: NodeId,
    pub mount: MountId,
    pub ntype: NodeType,
    pub block_size: usize,
    pub ops: Arc<dyn NodeOps>,
    /// Page cache; só nós regulares o carregam
    pub cache: Option<VmCache>,
    /// Cache de entradas; só diretórios o carregam
    pub entries: Option<EntryCache>,
    pub inner: Spinlock<NodeInner>,
}

impl Node {
    pub fn new(
        id: NodeId,
        mount: MountId,
        ntype: NodeType,
        block_size: usize,
        size: u64,
        ops: Arc<dyn NodeOps>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            mount,
            ntype,
            block_size,
            ops,
            cache: match ntype {
                NodeType::Regular => Some(VmCache::new()),
                _ => None,
            },
            entries: match ntype {
                NodeType::Directory => Some(EntryCache::new()),
                _ => None,
            },
            // links conta entradas de diretório; quem liga o nó incrementa
            inner: Spinlock::new("node", NodeInner { size, links: 0 }),
        })
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn is_dir(&self) -> bool {
        self.ntype == NodeType::Directory
    }
}

/// Operações específicas do filesystem
///
/// Os defaults devolvem o erro apropriado para operações que não fazem
/// sentido no tipo do nó.
pub trait NodeOps: Send + Sync {
    /// Resolve `name` dentro do diretório.
    fn lookup(&self, _dir: &Arc<Node>, _name: &str) -> KResult<Arc<Node>> {
        Err(Status::NotDir)
    }

    /// Cria uma entrada nova no diretório.
    fn create(&self, _dir: &Arc<Node>, _name: &str, _ntype: NodeType) -> KResult<Arc<Node>> {
        Err(Status::NotDir)
    }

    /// Cria um symlink para `target` no diretório.
    fn symlink(&self, _dir: &Arc<Node>, _name: &str, _target: &str) -> KResult<Arc<Node>> {
        Err(Status::NotDir)
    }

    /// Insere um nó já existente como entrada do diretório (hard link).
    fn link(&self, _dir: &Arc<Node>, _name: &str, _node: &Arc<Node>) -> KResult<()> {
        Err(Status::NotDir)
    }

    /// Remove uma entrada do diretório. O nó morre só na última referência.
    fn unlink(&self, _dir: &Arc<Node>, _name: &str) -> KResult<()> {
        Err(Status::NotDir)
    }

    /// Entrada de índice `index` do diretório, ou None no fim.
    fn readdir(&self, _dir: &Arc<Node>, _index: usize) -> KResult<Option<DirEntry>> {
        Err(Status::NotDir)
    }

    /// I/O direto, sem passar pelo page cache.
    fn io(&self, _node: &Arc<Node>, _req: &mut IoRequest) -> KResult<()> {
        Err(Status::NotSupported)
    }

    /// Lê a página em `offset` para o buffer (backend do page cache).
    fn read_page(&self, _node: &Arc<Node>, _offset: u64, _buf: &mut [u8]) -> KResult<usize> {
        Err(Status::NotSupported)
    }

    /// Escreve a página em `offset` (writeback do page cache).
    fn write_page(&self, _node: &Arc<Node>, _offset: u64, _buf: &[u8]) -> KResult<usize> {
        Err(Status::NotSupported)
    }

    /// Muda o tamanho do arquivo.
    fn resize(&self, _node: &Arc<Node>, _new_size: u64) -> KResult<()> {
        Err(Status::NotSupported)
    }

    /// Alvo de um symlink.
    fn symlink_target(&self, _node: &Arc<Node>) -> KResult<String> {
        Err(Status::NotSymlink)
    }

    /// Request fora de banda (devices).
    fn request(&self, _node: &Arc<Node>, _code: u32, _arg: usize) -> KResult<usize> {
        Err(Status::InvalidRequest)
    }
}
