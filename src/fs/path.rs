//! Resolução de caminhos
//!
//! Caminha componente a componente a partir da raiz do processo (absoluto)
//! ou do cwd (relativo), cruzando pontos de montagem e seguindo symlinks
//! com limite de aninhamento. `..` não sobe além do ponto de partida.

use crate::fs::mount;
use crate::fs::node::{Node, NodeType};
use crate::{KResult, Status};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Symlinks aninhados no máximo numa resolução
pub const SYMLINK_MAX: usize = 8;
/// Comprimento máximo de um componente
pub const NAME_MAX: usize = 255;

fn process_root() -> KResult<Arc<Node>> {
    if let Some(process) = crate::core::process::current() {
        if let Some(root) = process.inner.lock().io.root.clone() {
            return Ok(root);
        }
    }
    mount::root()
}

fn start_node(path: &str) -> KResult<Arc<Node>> {
    if path.starts_with('/') {
        return process_root();
    }
    if let Some(process) = crate::core::process::current() {
        if let Some(cwd) = process.inner.lock().io.cwd.clone() {
            return Ok(cwd);
        }
    }
    mount::root()
}

/// Resolve `name` dentro de `dir`, consultando o cache de entradas antes
/// do filesystem. Misses não são cacheados.
pub fn dir_lookup(dir: &Arc<Node>, name: &str) -> KResult<Arc<Node>> {
    if !dir.is_dir() {
        return Err(Status::NotDir);
    }
    if let Some(cache) = &dir.entries {
        if let Some(id) = cache.lookup(dir.id, name) {
            if let Some(node) = mount::node_by_id(dir.mount, id) {
                return Ok(node);
            }
            // O nó sumiu do índice; a entrada está podre
            cache.invalidate(dir.id, name);
        }
    }
    let node = dir.ops.lookup(dir, name)?;
    if let Some(cache) = &dir.entries {
        cache.insert(dir.id, name, node.id);
    }
    mount::register_node(&node);
    Ok(node)
}

fn walk(
    start: Arc<Node>,
    path: &str,
    depth: &mut usize,
    follow_last: bool,
) -> KResult<Arc<Node>> {
    let mut ancestors: Vec<Arc<Node>> = Vec::new();
    let mut current = start;
    let mut parts = path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .peekable();
    while let Some(part) = parts.next() {
        let last = parts.peek().is_none();
        if part == ".." {
            if let Some(parent) = ancestors.pop() {
                current = parent;
            }
            continue;
        }
        if part.len() > NAME_MAX {
            return Err(Status::TooLong);
        }
        let mut next = mount::cross(dir_lookup(&current, part)?);
        while next.ntype == NodeType::Symlink && (follow_last || !last) {
            *depth += 1;
            if *depth > SYMLINK_MAX {
                return Err(Status::SymlinkLimit);
            }
            let target = next.ops.symlink_target(&next)?;
            let base = if target.starts_with('/') {
                ancestors.clear();
                process_root()?
            } else {
                current.clone()
            };
            next = walk(base, &target, depth, true)?;
        }
        ancestors.push(current);
        current = next;
    }
    Ok(current)
}

/// Resolve um caminho até o nó final, seguindo symlinks.
pub fn lookup(path: &str) -> KResult<Arc<Node>> {
    lookup_at(start_node(path)?, path, true)
}

/// Resolve sem seguir um symlink no último componente.
pub fn lookup_no_follow(path: &str) -> KResult<Arc<Node>> {
    lookup_at(start_node(path)?, path, false)
}

/// Resolve a partir de um nó arbitrário (cwd alternativo).
pub fn lookup_at(start: Arc<Node>, path: &str, follow_last: bool) -> KResult<Arc<Node>> {
    let mut depth = 0;
    walk(start, path, &mut depth, follow_last)
}

/// Resolve o diretório pai e devolve o último componente por resolver.
/// Para create/unlink, que operam na entrada e não no nó.
pub fn lookup_parent(path: &str) -> KResult<(Arc<Node>, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Status::InvalidArg);
    }
    let (dir_part, leaf) = match trimmed.rfind('/') {
        Some(position) => (&trimmed[..position], &trimmed[position + 1..]),
        None => ("", trimmed),
    };
    if leaf.is_empty() || leaf == "." || leaf == ".." {
        return Err(Status::InvalidArg);
    }
    if leaf.len() > NAME_MAX {
        return Err(Status::TooLong);
    }
    let mut depth = 0;
    let dir = walk(start_node(path)?, dir_part, &mut depth, true)?;
    if !dir.is_dir() {
        return Err(Status::NotDir);
    }
    Ok((dir, leaf))
}
