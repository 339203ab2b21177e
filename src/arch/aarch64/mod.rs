//! HAL aarch64

pub mod context;
pub mod cpu;
pub mod interrupts;
pub mod mmu;
pub mod timer;

pub use cpu::Cpu;

/// Inicialização arquitetural da CPU corrente (BSP e APs).
pub fn init_cpu() {
    mmu::init_mair();
}

static GIC: interrupts::GicV2 = interrupts::GicV2;

/// Inicialização arquitetural global (uma vez, na CPU de boot).
pub fn init() {
    init_cpu();
    crate::drivers::irq::set_chip(&GIC);
}
