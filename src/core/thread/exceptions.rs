//! Exceções síncronas
//!
//! Handlers por thread com fallback por processo. O handler roda no IPL
//! declarado na instalação; o IPL anterior é restaurado na volta. Exceção
//! sem handler mata o processo com motivo `Exception`; em contexto de
//! kernel é fatal.

use crate::{KResult, Status};

/// Quantidade de códigos de exceção
pub const EXCEPTION_COUNT: usize = 6;

/// Código de exceção independente de arquitetura
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ExceptionCode {
    DivideByZero = 0,
    InvalidInstruction = 1,
    ProtectionFault = 2,
    PageFault = 3,
    FpuError = 4,
    Breakpoint = 5,
}

/// Um handler instalado
#[derive(Clone, Copy)]
pub struct ExceptionHandler {
    pub func: fn(ExceptionCode, u64, u64),
    pub ipl: u8,
}

/// Instala um handler para a thread corrente.
pub fn install(code: ExceptionCode, handler: ExceptionHandler) -> KResult<()> {
    if handler.ipl > super::IPL_MAX {
        return Err(Status::InvalidArg);
    }
    let thread = crate::core::sched::current_thread().ok_or(Status::NotSupported)?;
    thread.inner.lock().exception_handlers[code as usize] = Some(handler);
    Ok(())
}

/// Remove o handler da thread corrente.
pub fn uninstall(code: ExceptionCode) {
    if let Some(thread) = crate::core::sched::current_thread() {
        thread.inner.lock().exception_handlers[code as usize] = None;
    }
}

/// Entrada comum dos vetores de exceção da arquitetura.
///
/// `detail` carrega o dado específico: endereço da falha para PageFault,
/// código de erro para ProtectionFault, zero nos demais.
pub fn dispatch(code: ExceptionCode, rip: u64, detail: u64) {
    let thread = match crate::core::sched::current_thread() {
        Some(thread) => thread,
        None => {
            crate::kerror!("excecao antes do scheduler, rip=", rip);
            crate::core::panic_hard("excecao sem thread corrente");
        }
    };

    let handler = {
        let inner = thread.inner.lock();
        inner.exception_handlers[code as usize]
    }
    .or_else(|| crate::core::process::exception_handler(thread.owner, code));

    if let Some(handler) = handler {
        let old = super::set_ipl(super::IplMode::Always, handler.ipl);
        (handler.func)(code, rip, detail);
        super::set_ipl(super::IplMode::Always, old);
        return;
    }

    crate::kerror!("excecao fatal, codigo=", code as u64, "rip=", rip);
    if crate::core::process::is_kernel_process(thread.owner) {
        crate::core::panic_hard("excecao em thread de kernel sem handler");
    }
    crate::core::process::fault_current(code, detail);
}
