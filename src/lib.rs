//! Anvil Kernel Library.
//!
//! Ponto central de exportação dos módulos do Kernel.
//! Define a estrutura hierárquica do sistema operacional.

#![no_std]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]
#![feature(alloc_error_handler)]
#![allow(clippy::new_without_default)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // HAL (CPU, MMU, context switch, IRQ, timer)
pub mod drivers; // Árvore de devices, barramentos, classes, serial

// --- Módulos Centrais (Lógica do Kernel) ---
pub mod core; // Boot, objetos, processos, threads, scheduler, timers
pub mod klib; // Utilitários internos (AVL, hash, RNG, testes)
pub mod mm; // Gerenciamento de Memória (páginas, PMM, MMU, heap, slab)
pub mod sync; // Primitivas de Sincronização

// --- Subsistemas Avançados ---
pub mod fs; // Sistema de Arquivos Virtual (VFS)
pub mod ipc; // Portas, conexões e mensagens tipadas
pub mod syscall; // Interface com Userspace

// Re-exportar tipos de uso constante
pub use crate::core::status::{KResult, Status};
pub use crate::core::BootInfo;
