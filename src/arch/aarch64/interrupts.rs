//! Interrupções aarch64: vetores EL1 e GICv2.
//!
//! O GIC distribuidor + interface de CPU implementam `IrqChip`; SGIs fazem o
//! papel das IPIs de rescheduling e TLB shootdown.

use crate::arch::traits::cpu::CoreId;
use crate::arch::traits::irq::{IrqChip, IrqMode};
use crate::mm::physmap::phys_to_virt;
use crate::mm::PhysAddr;

/// SGI de rescheduling
pub const SGI_RESCHED: u32 = 0;
/// SGI de TLB shootdown
pub const SGI_TLB_FLUSH: u32 = 1;

// Bases do QEMU virt; o handoff pode sobrescrever
const GICD_BASE: u64 = 0x0800_0000;
const GICC_BASE: u64 = 0x0801_0000;

const GICD_ISENABLER: u64 = 0x100;
const GICD_ICENABLER: u64 = 0x180;
const GICD_ICFGR: u64 = 0xC00;
const GICD_SGIR: u64 = 0xF00;
const GICC_IAR: u64 = 0x0C;
const GICC_EOIR: u64 = 0x10;

fn gicd_read(reg: u64) -> u32 {
    let base = phys_to_virt(PhysAddr::new(GICD_BASE));
    // SAFETY: MMIO do GIC
    unsafe { core::ptr::read_volatile((base.as_u64() + reg) as *const u32) }
}

fn gicd_write(reg: u64, value: u32) {
    let base = phys_to_virt(PhysAddr::new(GICD_BASE));
    // SAFETY: MMIO do GIC
    unsafe { core::ptr::write_volatile((base.as_u64() + reg) as *mut u32, value) };
}

fn gicc_read(reg: u64) -> u32 {
    let base = phys_to_virt(PhysAddr::new(GICC_BASE));
    // SAFETY: MMIO do GIC
    unsafe { core::ptr::read_volatile((base.as_u64() + reg) as *const u32) }
}

fn gicc_write(reg: u64, value: u32) {
    let base = phys_to_virt(PhysAddr::new(GICC_BASE));
    // SAFETY: MMIO do GIC
    unsafe { core::ptr::write_volatile((base.as_u64() + reg) as *mut u32, value) };
}

/// GICv2 como IrqChip
pub struct GicV2;

impl GicV2 {
    /// Última IRQ reconhecida por esta CPU (IAR), consumida no post_handle
    pub fn acknowledge() -> u32 {
        gicc_read(GICC_IAR) & 0x3FF
    }
}

impl IrqChip for GicV2 {
    fn pre_handle(&self, line: u32) -> bool {
        // 1023 = espúria no GIC
        line < 1020
    }

    fn post_handle(&self, line: u32) {
        gicc_write(GICC_EOIR, line);
    }

    fn mode(&self, line: u32) -> IrqMode {
        let cfg = gicd_read(GICD_ICFGR + (line as u64 / 16) * 4);
        if cfg >> ((line % 16) * 2 + 1) & 1 != 0 {
            IrqMode::Edge
        } else {
            IrqMode::Level
        }
    }

    fn enable(&self, line: u32) {
        gicd_write(GICD_ISENABLER + (line as u64 / 32) * 4, 1 << (line % 32));
    }

    fn disable(&self, line: u32) {
        gicd_write(GICD_ICENABLER + (line as u64 / 32) * 4, 1 << (line % 32));
    }

    fn line_count(&self) -> u32 {
        1020
    }
}

/// Envia uma SGI para a CPU alvo
pub fn send_sgi(target: CoreId, sgi: u32) {
    debug_assert!(sgi < 16);
    gicd_write(GICD_SGIR, (1 << (16 + target)) | sgi);
}

/// Entrada comum de IRQ chamada pelo vetor EL1
#[no_mangle]
extern "C" fn aarch64_irq_entry() {
    let line = GicV2::acknowledge();
    match line {
        x if x == SGI_RESCHED => {
            gicc_write(GICC_EOIR, line);
            crate::core::sched::preempt_from_ipi();
        }
        #[cfg(feature = "tlb_shootdown")]
        x if x == SGI_TLB_FLUSH => {
            gicc_write(GICC_EOIR, line);
            crate::mm::mmu::tlb_flush_from_ipi();
        }
        x if x < 1020 => crate::drivers::irq::handle(x),
        _ => {} // espúria
    }
}
