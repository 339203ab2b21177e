//! File handles
//!
//! Um `File` amarra um nó a direitos e a uma posição. Handles duplicados
//! compartilham a instância, posição inclusive; a posição é protegida por
//! mutex e fica consistente através de leituras concorrentes.

use crate::core::object::{KernelObject, ObjectType};
use crate::fs::io::{IoOp, IoRequest};
use crate::fs::node::{DirEntry, Node, NodeType};
use crate::fs::{mount, path};
use crate::sync::Mutex;
use crate::{KResult, Status};
use alloc::string::String;
use alloc::sync::Arc;
use bitflags::bitflags;

bitflags! {
    /// Direitos de acesso de um file handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

bitflags! {
    /// Modos de operação
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        /// Toda escrita vai para o fim do arquivo
        const APPEND = 1 << 0;
        /// I/O em devices com fila não dorme
        const NONBLOCK = 1 << 1;
    }
}

/// Origem de um seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

pub struct File {
    pub node: Arc<Node>,
    pub rights: Rights,
    pub flags: FileFlags,
    position: Mutex<u64>,
}

impl File {
    /// Abre um nó já resolvido.
    pub fn from_node(node: Arc<Node>, rights: Rights, flags: FileFlags) -> KResult<Arc<Self>> {
        if rights.contains(Rights::WRITE) {
            if node.is_dir() {
                return Err(Status::IsDir);
            }
            if let Some(mount) = mount::by_id(node.mount) {
                if mount.read_only {
                    return Err(Status::ReadOnly);
                }
            }
        }
        Ok(Arc::new(Self {
            node,
            rights,
            flags,
            position: Mutex::new("file_pos", 0),
        }))
    }

    /// Resolve o caminho e abre.
    pub fn open(pathname: &str, rights: Rights, flags: FileFlags) -> KResult<Arc<Self>> {
        Self::from_node(path::lookup(pathname)?, rights, flags)
    }

    fn do_io(&self, req: &mut IoRequest) -> KResult<()> {
        req.nonblock = self.flags.contains(FileFlags::NONBLOCK);
        match self.node.ntype {
            NodeType::Regular => match &self.node.cache {
                Some(cache) => match req.op {
                    IoOp::Read => cache.read(&self.node, req),
                    IoOp::Write => cache.write(&self.node, req),
                },
                None => self.node.ops.io(&self.node, req),
            },
            NodeType::DeviceAlias => self.node.ops.io(&self.node, req),
            NodeType::Directory => Err(Status::IsDir),
            NodeType::Symlink => Err(Status::NotRegular),
        }
    }

    /// Leitura na posição corrente; a posição avança pelo transferido.
    pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        if !self.rights.contains(Rights::READ) {
            return Err(Status::AccessDenied);
        }
        let mut position = self.position.lock();
        let mut req = IoRequest::read_kernel(*position, buf);
        self.do_io(&mut req)?;
        *position += req.transferred as u64;
        Ok(req.transferred)
    }

    /// Leitura em offset explícito, sem tocar a posição.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        if !self.rights.contains(Rights::READ) {
            return Err(Status::AccessDenied);
        }
        let mut req = IoRequest::read_kernel(offset, buf);
        self.do_io(&mut req)?;
        Ok(req.transferred)
    }

    /// Escrita na posição corrente (no fim, com APPEND).
    pub fn write(&self, buf: &[u8]) -> KResult<usize> {
        if !self.rights.contains(Rights::WRITE) {
            return Err(Status::AccessDenied);
        }
        let mut position = self.position.lock();
        if self.flags.contains(FileFlags::APPEND) {
            *position = self.node.size();
        }
        let mut req = IoRequest::write_kernel(*position, buf);
        self.do_io(&mut req)?;
        *position += req.transferred as u64;
        Ok(req.transferred)
    }

    /// Escrita em offset explícito, sem tocar a posição.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        if !self.rights.contains(Rights::WRITE) {
            return Err(Status::AccessDenied);
        }
        let mut req = IoRequest::write_kernel(offset, buf);
        self.do_io(&mut req)?;
        Ok(req.transferred)
    }

    /// Reposiciona. Posições além do fim são válidas.
    pub fn seek(&self, from: SeekFrom) -> KResult<u64> {
        let mut position = self.position.lock();
        let target = match from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => *position as i64 + delta,
            SeekFrom::End(delta) => self.node.size() as i64 + delta,
        };
        if target < 0 {
            return Err(Status::InvalidArg);
        }
        *position = target as u64;
        Ok(*position)
    }

    /// Muda o tamanho do arquivo; o page cache acompanha.
    pub fn resize(&self, new_size: u64) -> KResult<()> {
        if !self.rights.contains(Rights::WRITE) {
            return Err(Status::AccessDenied);
        }
        if self.node.ntype != NodeType::Regular {
            return Err(crate::fs::io::wrong_node_type(self.node.is_dir()));
        }
        self.node.ops.resize(&self.node, new_size)?;
        if let Some(cache) = &self.node.cache {
            cache.resize(new_size);
        }
        self.node.inner.lock().size = new_size;
        Ok(())
    }

    /// Entrada `index` do diretório, ou None no fim.
    pub fn readdir(&self, index: usize) -> KResult<Option<DirEntry>> {
        if !self.rights.contains(Rights::READ) {
            return Err(Status::AccessDenied);
        }
        self.node.ops.readdir(&self.node, index)
    }

    /// Alvo do symlink aberto com lookup_no_follow.
    pub fn symlink_target(&self) -> KResult<String> {
        self.node.ops.symlink_target(&self.node)
    }

    /// Request fora de banda (devices).
    pub fn request(&self, code: u32, arg: usize) -> KResult<usize> {
        self.node.ops.request(&self.node, code, arg)
    }

    pub fn position(&self) -> u64 {
        *self.position.lock()
    }
}

impl KernelObject for File {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::File
    }
}
