//! Tabela de mounts
//!
//! A lista global de mounts é a raiz do ordering de locks do VFS: lista →
//! mount → nó → cache de entradas → cache de dados. Cada mount carrega um
//! registro fraco id → nó para o cache de entradas resolver sem chamar o
//! filesystem.

use crate::fs::node::{Node, NodeId};
use crate::klib::AvlTree;
use crate::sync::Mutex;
use crate::{kinfo, KResult, Status};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Id de mount
pub type MountId = u32;

/// Um filesystem montado
pub struct Mount {
    pub id: MountId,
    pub fs_name: String,
    /// Device de respaldo, se houver
    pub device: Option<Arc<Node>>,
    pub root: Arc<Node>,
    pub read_only: bool,
    /// Nó coberto: (mount do pai, id do nó). None = raiz do VFS
    pub covered: Option<(MountId, NodeId)>,
    nodes: Mutex<AvlTree<Weak<Node>>>,
}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);
static MOUNTS: Mutex<Vec<Arc<Mount>>> = Mutex::new("mount_list", Vec::new());

/// Reserva um id de mount. O filesystem precisa dele antes de criar o nó
/// raiz.
pub fn alloc_id() -> MountId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

fn register(mount: Arc<Mount>) {
    MOUNTS.lock().push(mount);
}

/// Monta a raiz do VFS. Uma vez, no boot.
pub fn mount_root(
    id: MountId,
    fs_name: &str,
    root: Arc<Node>,
    device: Option<Arc<Node>>,
    read_only: bool,
) -> KResult<Arc<Mount>> {
    {
        let mounts = MOUNTS.lock();
        if mounts.iter().any(|mount| mount.covered.is_none()) {
            return Err(Status::AlreadyExists);
        }
    }
    let mount = Arc::new(Mount {
        id,
        fs_name: String::from(fs_name),
        device,
        root,
        read_only,
        covered: None,
        nodes: Mutex::new("mount_nodes", AvlTree::new()),
    });
    register(mount.clone());
    kinfo!("vfs: raiz montada, mount=", id as u64);
    Ok(mount)
}

/// Monta um filesystem sobre um diretório. Um mount por ponto.
pub fn mount_at(
    at: &Arc<Node>,
    id: MountId,
    fs_name: &str,
    root: Arc<Node>,
    device: Option<Arc<Node>>,
    read_only: bool,
) -> KResult<Arc<Mount>> {
    if !at.is_dir() {
        return Err(Status::NotDir);
    }
    let covered = (at.mount, at.id);
    {
        let mounts = MOUNTS.lock();
        if mounts.iter().any(|mount| mount.covered == Some(covered)) {
            return Err(Status::InUse);
        }
    }
    let mount = Arc::new(Mount {
        id,
        fs_name: String::from(fs_name),
        device,
        root,
        read_only,
        covered: Some(covered),
        nodes: Mutex::new("mount_nodes", AvlTree::new()),
    });
    register(mount.clone());
    Ok(mount)
}

/// Desmonta pelo id. A raiz não desmonta.
pub fn unmount(id: MountId) -> KResult<()> {
    let mut mounts = MOUNTS.lock();
    let position = mounts
        .iter()
        .position(|mount| mount.id == id)
        .ok_or(Status::NotFound)?;
    if mounts[position].covered.is_none() {
        return Err(Status::InUse);
    }
    mounts.remove(position);
    Ok(())
}

/// Mount pelo id.
pub fn by_id(id: MountId) -> Option<Arc<Mount>> {
    MOUNTS.lock().iter().find(|mount| mount.id == id).cloned()
}

/// Nó raiz do VFS.
pub fn root() -> KResult<Arc<Node>> {
    let mounts = MOUNTS.lock();
    mounts
        .iter()
        .find(|mount| mount.covered.is_none())
        .map(|mount| mount.root.clone())
        .ok_or(Status::NotFound)
}

/// Cruza um ponto de montagem: se o nó está coberto, desce para a raiz do
/// mount em cima dele.
pub fn cross(node: Arc<Node>) -> Arc<Node> {
    let covered = (node.mount, node.id);
    let mounts = MOUNTS.lock();
    match mounts
        .iter()
        .find(|mount| mount.covered == Some(covered))
    {
        Some(mount) => mount.root.clone(),
        None => {
            drop(mounts);
            node
        }
    }
}

/// Registra um nó no índice do mount (cache de entradas resolve por id).
pub fn register_node(node: &Arc<Node>) {
    if let Some(mount) = by_id(node.mount) {
        mount.nodes.lock().insert(node.id, Arc::downgrade(node));
    }
}

/// Nó pelo id dentro de um mount, se ainda vivo.
pub fn node_by_id(mount_id: MountId, id: NodeId) -> Option<Arc<Node>> {
    let mount = by_id(mount_id)?;
    let mut nodes = mount.nodes.lock();
    match nodes.lookup(id).and_then(Weak::upgrade) {
        Some(node) => Some(node),
        None => {
            // Entrada morta sai do índice
            nodes.remove(id);
            None
        }
    }
}
