//! Drivers e infraestrutura de devices
//!
//! A árvore de devices (`base`), os barramentos (`bus`), as camadas de
//! classe (`class`), os pseudo devices (`pseudo`), o gerenciador genérico
//! de IRQs (`irq`) e o console serial de diagnóstico (`serial`).

pub mod base;
pub mod bus;
pub mod class;
pub mod irq;
pub mod pseudo;
pub mod serial;

use crate::core::boot::BootInfo;
use crate::kinfo;

/// Monta a árvore de devices e publica os pseudo devices. Chamado depois
/// do VFS, com scheduler vivo.
pub fn init(boot: &BootInfo) {
    base::init_tree();
    pseudo::init(boot);
    kinfo!(
        "drivers: arvore pronta, pseudo devices=",
        base::virtual_dir().children().len() as u64
    );
}
