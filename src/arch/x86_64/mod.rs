//! HAL x86_64

pub mod context;
pub mod cpu;
pub mod interrupts;
pub mod io;
pub mod mmu;
pub mod timer;

pub use cpu::Cpu;

/// Inicialização arquitetural da CPU corrente (BSP e APs).
pub fn init_cpu() {
    interrupts::init_idt();
    interrupts::init_lapic();
    mmu::init_pat();
}

static PIC: interrupts::Pic8259 = interrupts::Pic8259;

/// Inicialização arquitetural global (uma vez, na CPU de boot).
pub fn init() {
    init_cpu();
    interrupts::Pic8259::init();
    crate::drivers::irq::set_chip(&PIC);
}
