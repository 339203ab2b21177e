//! Requests de I/O
//!
//! Um request descreve a operação inteira; o progresso fica em
//! `transferred`. Transferências parciais são visíveis e curtas não são
//! erro. O buffer pode ser de kernel ou de usuário; a cópia para usuário
//! passa pela camada de validação.

use crate::{KResult, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// Destino/origem dos dados
enum Buffer {
    Kernel {
        base: *mut u8,
        len: usize,
    },
    User {
        base: u64,
        len: usize,
    },
}

// SAFETY: o dono do request garante a validade do buffer enquanto ele vive
unsafe impl Send for Buffer {}

/// Um request de I/O em andamento
pub struct IoRequest {
    pub op: IoOp,
    /// Offset no arquivo/device
    pub offset: u64,
    /// Bytes pedidos
    pub total: usize,
    /// Bytes já movidos
    pub transferred: usize,
    /// Devices com fila devolvem WouldBlock em vez de dormir
    pub nonblock: bool,
    buffer: Buffer,
}

impl IoRequest {
    /// Leitura para um buffer de kernel.
    pub fn read_kernel(offset: u64, buf: &mut [u8]) -> Self {
        Self {
            op: IoOp::Read,
            offset,
            total: buf.len(),
            transferred: 0,
            nonblock: false,
            buffer: Buffer::Kernel {
                base: buf.as_mut_ptr(),
                len: buf.len(),
            },
        }
    }

    /// Escrita a partir de um buffer de kernel.
    pub fn write_kernel(offset: u64, buf: &[u8]) -> Self {
        Self {
            op: IoOp::Write,
            offset,
            total: buf.len(),
            transferred: 0,
            nonblock: false,
            buffer: Buffer::Kernel {
                base: buf.as_ptr() as *mut u8,
                len: buf.len(),
            },
        }
    }

    /// Request sobre um buffer de usuário já validado.
    pub fn user(op: IoOp, offset: u64, base: u64, len: usize) -> KResult<Self> {
        crate::mm::safe::validate_user_range(base, len)?;
        Ok(Self {
            op,
            offset,
            total: len,
            transferred: 0,
            nonblock: false,
            buffer: Buffer::User { base, len },
        })
    }

    /// Quanto falta transferir.
    pub fn remaining(&self) -> usize {
        self.total - self.transferred
    }

    /// Offset corrente, já contando o progresso.
    pub fn position(&self) -> u64 {
        self.offset + self.transferred as u64
    }

    /// Move `chunk` para o buffer do chamador (caminho de leitura).
    pub fn copy_out(&mut self, chunk: &[u8]) -> KResult<usize> {
        debug_assert_eq!(self.op, IoOp::Read);
        let n = chunk.len().min(self.remaining());
        match self.buffer {
            Buffer::Kernel { base, len } => {
                debug_assert!(self.transferred + n <= len);
                // SAFETY: base/len validados na construção; n limitado acima
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        chunk.as_ptr(),
                        base.add(self.transferred),
                        n,
                    );
                }
            }
            Buffer::User { base, .. } => {
                crate::mm::safe::copy_to_user(base + self.transferred as u64, &chunk[..n])?;
            }
        }
        self.transferred += n;
        Ok(n)
    }

    /// Busca o próximo pedaço do buffer do chamador (caminho de escrita).
    pub fn copy_in(&mut self, chunk: &mut [u8]) -> KResult<usize> {
        debug_assert_eq!(self.op, IoOp::Write);
        let n = chunk.len().min(self.remaining());
        if n == 0 {
            return Ok(0);
        }
        match self.buffer {
            Buffer::Kernel { base, len } => {
                debug_assert!(self.transferred + n <= len);
                // SAFETY: base/len validados na construção; n limitado acima
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        base.add(self.transferred),
                        chunk.as_mut_ptr(),
                        n,
                    );
                }
            }
            Buffer::User { base, .. } => {
                crate::mm::safe::copy_from_user(
                    &mut chunk[..n],
                    base + self.transferred as u64,
                )?;
            }
        }
        self.transferred += n;
        Ok(n)
    }

    /// O request terminou (completo ou curto)?
    pub fn done(&self) -> bool {
        self.transferred >= self.total
    }
}

/// Erro padronizado para requests num tipo de nó errado.
pub fn wrong_node_type(is_dir: bool) -> Status {
    if is_dir {
        Status::IsDir
    } else {
        Status::NotRegular
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_into_kernel_buffer() {
        let mut out = [0u8; 8];
        let mut req = IoRequest::read_kernel(0, &mut out);
        assert_eq!(req.copy_out(&[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(req.copy_out(&[5, 6]).unwrap(), 2);
        assert_eq!(req.transferred, 6);
        assert!(!req.done());
        drop(req);
        assert_eq!(&out[..6], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_transfer_caps_at_total() {
        let mut out = [0u8; 3];
        let mut req = IoRequest::read_kernel(0, &mut out);
        assert_eq!(req.copy_out(&[9, 9, 9, 9, 9]).unwrap(), 3);
        assert!(req.done());
    }

    #[test]
    fn write_from_kernel_buffer() {
        let src = [7u8, 8, 9];
        let mut req = IoRequest::write_kernel(16, &src);
        let mut chunk = [0u8; 2];
        assert_eq!(req.copy_in(&mut chunk).unwrap(), 2);
        assert_eq!(chunk, [7, 8]);
        assert_eq!(req.position(), 18);
        let mut rest = [0u8; 2];
        assert_eq!(req.copy_in(&mut rest).unwrap(), 1);
        assert_eq!(rest[0], 9);
        assert!(req.done());
    }
}
