//! Camadas de classe
//!
//! Tipos que embrulham um device da árvore com a semântica da classe:
//! rede, entrada e framebuffer.

pub mod framebuffer;
pub mod input;
pub mod net;
