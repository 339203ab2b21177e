//! Sistema de Arquivos Virtual
//!
//! Núcleo do VFS: nós, mounts, resolução de caminhos, file handles, cache
//! de páginas, cache de entradas e mapa de blocos. Filesystems plugam via
//! `NodeOps`; o boot monta um ramfs na raiz e expõe os módulos do loader
//! em /boot como arquivos somente-leitura.
//!
//! Ordem de locks: lista de mounts → mount → nó → cache de entradas →
//! cache de dados.

pub mod blockmap;
pub mod entry;
pub mod file;
pub mod io;
pub mod memfile;
pub mod mount;
pub mod node;
pub mod path;
pub mod ramfs;
pub mod vmcache;

pub use file::{File, FileFlags, Rights, SeekFrom};
pub use node::{Node, NodeType};

use crate::core::boot::BootInfo;
use crate::mm::PhysAddr;
use crate::{kerror, kinfo, KResult, Status};
use alloc::sync::Arc;

/// Ids dos nós de memfile, fora da faixa que o ramfs aloca
const MEMFILE_ID_BASE: u64 = 1 << 32;

fn check_writable(node: &Arc<Node>) -> KResult<()> {
    if let Some(mount) = mount::by_id(node.mount) {
        if mount.read_only {
            return Err(Status::ReadOnly);
        }
    }
    Ok(())
}

/// Cria uma entrada nova e a registra nos caches.
pub fn create(dir: &Arc<Node>, name: &str, ntype: NodeType) -> KResult<Arc<Node>> {
    check_writable(dir)?;
    let node = dir.ops.create(dir, name, ntype)?;
    if let Some(cache) = &dir.entries {
        cache.insert(dir.id, name, node.id);
    }
    mount::register_node(&node);
    Ok(node)
}

/// Cria um symlink.
pub fn symlink(dir: &Arc<Node>, name: &str, target: &str) -> KResult<Arc<Node>> {
    check_writable(dir)?;
    let node = dir.ops.symlink(dir, name, target)?;
    if let Some(cache) = &dir.entries {
        cache.insert(dir.id, name, node.id);
    }
    mount::register_node(&node);
    Ok(node)
}

/// Liga um nó existente sob um nome novo (hard link).
pub fn link(dir: &Arc<Node>, name: &str, node: &Arc<Node>) -> KResult<()> {
    check_writable(dir)?;
    dir.ops.link(dir, name, node)?;
    if let Some(cache) = &dir.entries {
        cache.insert(dir.id, name, node.id);
    }
    mount::register_node(node);
    Ok(())
}

/// Remove uma entrada. O nó morre na última referência.
pub fn unlink(dir: &Arc<Node>, name: &str) -> KResult<()> {
    check_writable(dir)?;
    dir.ops.unlink(dir, name)?;
    if let Some(cache) = &dir.entries {
        cache.invalidate(dir.id, name);
    }
    Ok(())
}

fn mount_boot_fs(boot: &BootInfo) -> KResult<()> {
    let id = mount::alloc_id();
    let root = ramfs::new(id);
    mount::mount_root(id, "ramfs", root.clone(), None, false)?;
    mount::register_node(&root);

    if boot.modules.is_empty() {
        return Ok(());
    }
    let boot_dir = create(&root, "boot", NodeType::Directory)?;
    for (index, module) in boot.modules.iter().enumerate() {
        let virt = crate::mm::physmap::phys_to_virt(PhysAddr::new(module.base));
        // SAFETY: o range do módulo é memória Allocated do handoff, mapeada
        // no physmap e nunca devolvida ao allocator
        let blob: &'static [u8] =
            unsafe { core::slice::from_raw_parts(virt.as_ptr(), module.size as usize) };
        let node = memfile::new(id, MEMFILE_ID_BASE + index as u64, blob);
        link(&boot_dir, module.name, &node)?;
        kinfo!("vfs: modulo em /boot, bytes=", module.size);
    }
    Ok(())
}

/// Monta a raiz e publica os módulos do loader. Uma vez, no boot.
pub fn init(boot: &BootInfo) {
    if let Err(status) = mount_boot_fs(boot) {
        kerror!("vfs: falha montando a raiz, status=", status.as_isize() as u64);
        panic!("vfs: sem filesystem de raiz");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Os testes que montam a raiz vivem todos aqui: a tabela de mounts é
    // global e só um teste pode possuí-la.
    #[test]
    fn walk_resolves_paths_and_symlinks() {
        let id = mount::alloc_id();
        let root = ramfs::new(id);
        mount::mount_root(id, "ramfs", root.clone(), None, false).unwrap();
        mount::register_node(&root);

        let etc = create(&root, "etc", NodeType::Directory).unwrap();
        let motd = create(&etc, "motd", NodeType::Regular).unwrap();
        symlink(&root, "message", "/etc/motd").unwrap();
        symlink(&root, "rel", "etc/./motd").unwrap();

        assert_eq!(path::lookup("/etc/motd").unwrap().id, motd.id);
        assert_eq!(path::lookup("/etc/../etc/motd").unwrap().id, motd.id);
        assert_eq!(path::lookup("/message").unwrap().id, motd.id);
        assert_eq!(path::lookup("/rel").unwrap().id, motd.id);
        assert_eq!(
            path::lookup_no_follow("/message").unwrap().ntype,
            NodeType::Symlink
        );
        assert_eq!(
            path::lookup("/etc/motd/x").map(|n| n.id),
            Err(Status::NotDir)
        );
        assert_eq!(
            path::lookup("/etc/ghost").map(|n| n.id),
            Err(Status::NotFound)
        );

        // Ciclo de symlinks bate no limite
        symlink(&root, "loop", "/loop").unwrap();
        assert_eq!(
            path::lookup("/loop").map(|n| n.id),
            Err(Status::SymlinkLimit)
        );

        let (dir, leaf) = path::lookup_parent("/etc/newfile").unwrap();
        assert_eq!(dir.id, etc.id);
        assert_eq!(leaf, "newfile");

        // Segundo lookup resolve pelo cache de entradas
        assert_eq!(path::dir_lookup(&etc, "motd").unwrap().id, motd.id);
        unlink(&etc, "motd").unwrap();
        assert_eq!(
            path::dir_lookup(&etc, "motd").map(|n| n.id),
            Err(Status::NotFound)
        );
    }

    #[test]
    fn file_handle_over_ramfs() {
        let id = mount::alloc_id();
        let root = ramfs::new(id);
        let node = create(&root, "data", NodeType::Regular).unwrap();

        let file =
            file::File::from_node(node.clone(), Rights::READ | Rights::WRITE, FileFlags::empty())
                .unwrap();
        assert_eq!(file.write(b"abcdef").unwrap(), 6);
        assert_eq!(file.seek(SeekFrom::Start(2)).unwrap(), 2);
        let mut out = [0u8; 4];
        assert_eq!(file.read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"cdef");
        assert_eq!(file.position(), 6);

        // Posição compartilhada entre handles duplicados
        let alias = file.clone();
        assert_eq!(alias.position(), 6);

        file.resize(3).unwrap();
        assert_eq!(node.size(), 3);
        assert_eq!(file.seek(SeekFrom::End(0)).unwrap(), 3);

        let reader = file::File::from_node(node, Rights::READ, FileFlags::empty()).unwrap();
        assert_eq!(reader.write(b"x"), Err(Status::AccessDenied));
    }

    #[test]
    fn append_goes_to_the_end() {
        let id = mount::alloc_id();
        let root = ramfs::new(id);
        let node = create(&root, "log", NodeType::Regular).unwrap();
        let file = file::File::from_node(
            node.clone(),
            Rights::READ | Rights::WRITE,
            FileFlags::APPEND,
        )
        .unwrap();
        file.write(b"one").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write(b"two").unwrap();
        assert_eq!(node.size(), 6);
    }
}
