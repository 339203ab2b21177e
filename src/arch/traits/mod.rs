//! Traits do Hardware Abstraction Layer (HAL).
//! Interfaces públicas que o Kernel Core usa para falar com o hardware.

pub mod cpu;
pub mod irq;
pub mod mmu;

pub use cpu::CpuOps;
pub use irq::IrqChip;
pub use mmu::{CacheMode, MapAccess, PageTableOps};
