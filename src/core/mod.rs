//! Núcleo do kernel: boot, CPUs, threads, scheduler, objetos e tempo.

pub mod boot;
pub mod condition;
pub mod init;
pub mod logging;
pub mod object;
pub mod process;
pub mod sched;
pub mod smp;
pub mod status;
#[cfg(feature = "self_test")]
pub mod test;
pub mod thread;
pub mod time;
pub mod work;

pub use boot::BootInfo;

use crate::arch::traits::cpu::CpuOps;
use crate::arch::Cpu;

/// Falha irrecuperável: loga a mensagem e congela a CPU.
///
/// Diferente do `panic!` do Rust, pode ser chamada antes do runtime de
/// panic estar utilizável (boot cedo, double fault).
pub fn panic_hard(msg: &str) -> ! {
    Cpu::disable_interrupts();
    crate::drivers::serial::emit_str("\n*** PANIC: ");
    crate::drivers::serial::emit_str(msg);
    crate::drivers::serial::emit_nl();
    loop {
        Cpu::halt();
    }
}
