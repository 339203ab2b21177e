//! Tokens de segurança
//!
//! Um token é imutável: trocar as credenciais de um processo é trocar o
//! Arc inteiro. As verificações de capability acontecem nos pontos de
//! criação de objetos, nunca no uso de um handle já aberto.

use crate::core::object::{KernelObject, ObjectType};
use crate::{KResult, Status};
use alloc::sync::Arc;
use bitflags::bitflags;

/// Máximo de gids suplementares por token
pub const MAX_GIDS: usize = 16;

bitflags! {
    /// Capabilities do kernel
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        /// Criar e matar processos arbitrários
        const PROC_ADMIN = 1 << 0;
        /// Trocar o token de um processo/thread
        const SET_TOKEN = 1 << 1;
        /// Abrir devices diretamente
        const DEVICE_ACCESS = 1 << 2;
        /// Montar e desmontar filesystems
        const MOUNT = 1 << 3;
        /// Criar ports de IPC com id fixo
        const IPC_PORT = 1 << 4;
        /// Ignorar verificações de acesso do VFS
        const FS_ADMIN = 1 << 5;
    }
}

/// Credenciais imutáveis de um processo ou thread
#[derive(Debug)]
pub struct Token {
    pub uid: u32,
    gids: [u32; MAX_GIDS],
    gid_count: usize,
    pub caps: Capabilities,
}

impl Token {
    /// Token do kernel: uid 0, todas as capabilities.
    pub fn kernel() -> Arc<Self> {
        Arc::new(Self {
            uid: 0,
            gids: [0; MAX_GIDS],
            gid_count: 1,
            caps: Capabilities::all(),
        })
    }

    pub fn new(uid: u32, gids: &[u32], caps: Capabilities) -> KResult<Arc<Self>> {
        if gids.len() > MAX_GIDS {
            return Err(Status::InvalidArg);
        }
        let mut bounded = [0u32; MAX_GIDS];
        bounded[..gids.len()].copy_from_slice(gids);
        Ok(Arc::new(Self {
            uid,
            gids: bounded,
            gid_count: gids.len(),
            caps,
        }))
    }

    pub fn gids(&self) -> &[u32] {
        &self.gids[..self.gid_count]
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gids().contains(&gid)
    }

    pub fn has_cap(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    /// Erro padronizado de capability ausente.
    pub fn require(&self, cap: Capabilities) -> KResult<()> {
        if self.has_cap(cap) {
            Ok(())
        } else {
            Err(Status::PermDenied)
        }
    }

    /// Um token derivado nunca ganha capabilities que o pai não tem.
    pub fn derive(&self, uid: u32, gids: &[u32], caps: Capabilities) -> KResult<Arc<Self>> {
        Self::new(uid, gids, caps & self.caps)
    }
}

impl KernelObject for Token {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_token_has_everything() {
        let token = Token::kernel();
        assert!(token.has_cap(Capabilities::PROC_ADMIN));
        assert!(token.require(Capabilities::MOUNT).is_ok());
    }

    #[test]
    fn derive_cannot_escalate() {
        let parent = Token::new(1000, &[1000], Capabilities::IPC_PORT).unwrap();
        let child = parent
            .derive(1000, &[1000], Capabilities::IPC_PORT | Capabilities::PROC_ADMIN)
            .unwrap();
        assert!(child.has_cap(Capabilities::IPC_PORT));
        assert!(!child.has_cap(Capabilities::PROC_ADMIN));
    }

    #[test]
    fn gid_bound() {
        let too_many = [0u32; MAX_GIDS + 1];
        assert_eq!(
            Token::new(0, &too_many, Capabilities::empty()).unwrap_err(),
            Status::InvalidArg
        );
    }

    #[test]
    fn group_membership() {
        let token = Token::new(1000, &[7, 42], Capabilities::empty()).unwrap();
        assert!(token.in_group(42));
        assert!(!token.in_group(8));
    }
}
