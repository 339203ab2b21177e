//! Sequência de boot
//!
//! O loader entrega o controle com o handoff pronto; daqui para frente a
//! inicialização é faseada e a fase corrente funciona como trava: cada
//! subsistema afirma a fase mínima de que depende.

use crate::core::boot::BootInfo;
use crate::core::thread::PriorityClass;
use crate::kinfo;
use core::sync::atomic::{AtomicU32, Ordering};

/// Fases do boot, em ordem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum InitPhase {
    Early = 0,
    Memory = 1,
    Cpu = 2,
    Scheduler = 3,
    Subsystems = 4,
    Running = 5,
}

static PHASE: AtomicU32 = AtomicU32::new(InitPhase::Early as u32);

/// Fase corrente do boot.
pub fn phase() -> InitPhase {
    match PHASE.load(Ordering::Acquire) {
        0 => InitPhase::Early,
        1 => InitPhase::Memory,
        2 => InitPhase::Cpu,
        3 => InitPhase::Scheduler,
        4 => InitPhase::Subsystems,
        _ => InitPhase::Running,
    }
}

fn advance(next: InitPhase) {
    let previous = PHASE.swap(next as u32, Ordering::AcqRel);
    debug_assert!(previous < next as u32, "fase de boot fora de ordem");
}

/// Afirma que o boot já passou pela fase dada.
pub fn require(minimum: InitPhase) {
    if phase() < minimum {
        crate::core::panic_hard("subsistema usado antes da fase de boot");
    }
}

/// Entrada principal do kernel, chamada pelo `_start` com o handoff
/// validado. Nunca retorna: termina entrando no scheduler.
pub fn kernel_main(boot: &'static BootInfo) -> ! {
    crate::drivers::serial::init();
    kinfo!("anvil: boot");
    kinfo!("anvil: memoria utilizavel=", boot.usable_bytes());

    crate::mm::init(boot);
    advance(InitPhase::Memory);

    crate::core::smp::init_boot_cpu(boot);
    crate::arch::init();
    advance(InitPhase::Cpu);

    crate::core::process::init();
    crate::core::sched::init();
    crate::core::time::init();
    advance(InitPhase::Scheduler);

    let kinit = match crate::core::thread::create(
        "kinit",
        crate::core::process::KERNEL_PID,
        PriorityClass::High,
        kinit_main,
        boot as *const BootInfo as usize,
    ) {
        Ok(kinit) => kinit,
        Err(_) => crate::core::panic_hard("init: sem memoria para kinit"),
    };
    crate::core::thread::start(&kinit);
    drop(kinit);

    crate::core::sched::enter();
}

/// Resto do boot, já em contexto de thread com preempção funcionando.
fn kinit_main(arg: usize) {
    // SAFETY: ponteiro do handoff passado por kernel_main; 'static
    let boot = unsafe { &*(arg as *const BootInfo) };

    crate::fs::init(boot);
    crate::drivers::init(boot);
    advance(InitPhase::Subsystems);

    crate::mm::pmm::init_reclaim();
    crate::core::smp::start_aps(boot);
    advance(InitPhase::Running);

    #[cfg(feature = "self_test")]
    crate::core::test::run_all();

    kinfo!("anvil: boot completo, threads=", crate::core::thread::count() as u64);
}
