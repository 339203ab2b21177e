//! Estado per-CPU e bring-up de SMP
//!
//! Cada CPU carrega um `CpuLocal` acessível pelo registrador per-CPU da
//! arquitetura. O id lógico é o primeiro campo; `Cpu::current_id` lê esse
//! u32 diretamente, então o layout é parte do contrato com o HAL.

use crate::arch::traits::cpu::{CoreId, CpuOps};
use crate::arch::Cpu;
use crate::core::boot::BootInfo;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Máximo de CPUs suportadas
pub const MAX_CPUS: usize = 16;

/// Estado local de uma CPU
#[repr(C)]
pub struct CpuLocal {
    /// Id lógico; PRIMEIRO campo, lido cru por `Cpu::current_id`
    pub id: u32,
    /// Id físico informado pelo loader
    pub arch_id: u64,
    /// Contagem de desativação de preempção nesta CPU
    pub preempt_disable: AtomicU32,
    /// Preempção pedida enquanto estava desativada
    pub missed_preempt: AtomicU32,
}

static ONLINE: AtomicUsize = AtomicUsize::new(1);

/// Instala o `CpuLocal` da CPU corrente.
fn install(id: u32, arch_id: u64) {
    let local = Box::leak(Box::new(CpuLocal {
        id,
        arch_id,
        preempt_disable: AtomicU32::new(0),
        missed_preempt: AtomicU32::new(0),
    }));
    // SAFETY: ponteiro recém-leaked, válido para sempre
    unsafe { Cpu::set_percpu_ptr(local as *mut CpuLocal as *mut u8) };
}

/// Estado local da CPU corrente. Válido após `init_boot_cpu`/`init_ap`.
pub fn current() -> &'static CpuLocal {
    let ptr = Cpu::percpu_ptr() as *const CpuLocal;
    if ptr.is_null() {
        crate::core::panic_hard("smp: percpu nao instalado");
    }
    // SAFETY: instalado por install(), nunca liberado
    unsafe { &*ptr }
}

/// Registra a CPU de boot. Primeira chamada de SMP no init.
pub fn init_boot_cpu(boot: &BootInfo) {
    let arch_id = boot.cpus.first().map(|c| c.arch_id).unwrap_or(0);
    install(0, arch_id);
}

/// Entrada das CPUs de aplicação, chamada do trampolim de AP.
pub fn init_ap(id: CoreId, arch_id: u64) {
    install(id, arch_id);
    crate::arch::init_cpu();
    ONLINE.fetch_add(1, Ordering::SeqCst);
    crate::kinfo!("smp: cpu online, id=", id as u64);
    crate::core::sched::init_ap();
}

/// Dispara o boot das CPUs restantes. Sem `smp` na linha de comando ou com
/// uma única CPU no handoff isto é um no-op.
pub fn start_aps(boot: &BootInfo) {
    if boot.options.smp_disabled || boot.cpus.len() <= 1 {
        crate::kinfo!("smp: rodando com uma cpu");
        return;
    }
    let target = boot.cpus.len().min(MAX_CPUS);
    crate::kinfo!("smp: esperando cpus=", target as u64);
    // O loader deixa as APs em espera; o arranque efetivo é feito pelo
    // firmware chamando `init_ap` com o id lógico de cada uma.
    while ONLINE.load(Ordering::SeqCst) < target {
        Cpu::pause();
    }
}

/// Quantidade de CPUs online.
pub fn cpu_count() -> usize {
    ONLINE.load(Ordering::SeqCst)
}

/// Ids lógicos das CPUs online. Ids são densos a partir de 0.
pub fn online_cpus() -> impl Iterator<Item = CoreId> {
    0..cpu_count() as CoreId
}
