//! Gerenciador genérico de IRQs
//!
//! O controlador da arquitetura entra como `IrqChip`; aqui ficam as listas
//! de handlers por linha. O chip decide espúrias no `pre_handle` e faz o
//! EOI no `post_handle`. DPCs enfileiradas pelos handlers drenam na saída
//! da interrupção.

use crate::arch::traits::irq::{IrqChip, IrqMode};
use crate::sync::Spinlock;
use crate::{kwarn, KResult, Status};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Resultado de um handler de IRQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Tratada, nada mais a fazer
    Handled,
    /// Tratada; pedir preempção na saída da interrupção
    Reschedule,
}

/// Assinatura dos handlers; recebem o data do registro
pub type IrqHandler = fn(usize) -> IrqReturn;

/// Linhas suportadas pelas tabelas internas
pub const MAX_LINES: usize = 64;

struct LineState {
    handlers: Vec<(IrqHandler, usize)>,
    count: u64,
}

impl LineState {
    const fn new() -> Self {
        Self {
            handlers: Vec::new(),
            count: 0,
        }
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const LINE_INIT: Spinlock<LineState> = Spinlock::new("irq_line", LineState::new());
static LINES: [Spinlock<LineState>; MAX_LINES] = [LINE_INIT; MAX_LINES];

static CHIP: spin::Once<&'static dyn IrqChip> = spin::Once::new();
static SPURIOUS: AtomicU64 = AtomicU64::new(0);

/// Registra o controlador da plataforma. Uma vez, no init da arquitetura.
pub fn set_chip(chip: &'static dyn IrqChip) {
    CHIP.call_once(|| chip);
}

fn chip() -> Option<&'static dyn IrqChip> {
    CHIP.get().copied()
}

/// Instala um handler na linha. Várias instalações por linha são aceitas
/// (linhas compartilhadas).
pub fn install(line: u32, func: IrqHandler, data: usize) -> KResult<()> {
    if line as usize >= MAX_LINES {
        return Err(Status::InvalidArg);
    }
    LINES[line as usize].lock().handlers.push((func, data));
    Ok(())
}

/// Remove o primeiro registro igual a (func, data).
pub fn uninstall(line: u32, func: IrqHandler, data: usize) -> KResult<()> {
    if line as usize >= MAX_LINES {
        return Err(Status::InvalidArg);
    }
    let mut state = LINES[line as usize].lock();
    let position = state
        .handlers
        .iter()
        .position(|&(f, d)| f as usize == func as usize && d == data)
        .ok_or(Status::NotFound)?;
    state.handlers.remove(position);
    Ok(())
}

/// Desmascara a linha no controlador.
pub fn enable_line(line: u32) {
    if let Some(chip) = chip() {
        chip.enable(line);
    }
}

/// Mascara a linha no controlador.
pub fn disable_line(line: u32) {
    if let Some(chip) = chip() {
        chip.disable(line);
    }
}

/// Modo de disparo da linha.
pub fn line_mode(line: u32) -> Option<IrqMode> {
    chip().map(|chip| chip.mode(line))
}

/// Interrupções espúrias descartadas até agora.
pub fn spurious_count() -> u64 {
    SPURIOUS.load(Ordering::Relaxed)
}

/// Entrada comum chamada pelos stubs da arquitetura, em contexto de
/// interrupção.
pub fn handle(line: u32) {
    let Some(chip) = chip() else {
        return;
    };
    if !chip.pre_handle(line) {
        SPURIOUS.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let mut resched = false;
    if (line as usize) < MAX_LINES {
        // Copiar os registros para não segurar o lock durante os handlers
        let handlers: Vec<(IrqHandler, usize)> = {
            let mut state = LINES[line as usize].lock_noirq();
            state.count += 1;
            state.handlers.clone()
        };
        if handlers.is_empty() {
            kwarn!("irq: linha sem handler ", line);
        }
        for (func, data) in handlers {
            if func(data) == IrqReturn::Reschedule {
                resched = true;
            }
        }
    }
    chip.post_handle(line);

    crate::core::work::drain();
    if resched || crate::core::sched::should_preempt() {
        crate::core::sched::preempt_from_ipi();
    }
}
