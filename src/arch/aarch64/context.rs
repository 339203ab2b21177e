//! Context switch aarch64
//!
//! Salva x19-x29, LR e SP da thread de saída e restaura os da entrada.

/// Contexto de CPU (registradores salvos)
#[repr(C)]
#[derive(Debug)]
pub struct CpuContext {
    // Callee-saved (AAPCS64)
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub x29: u64, // frame pointer

    pub sp: u64,
    pub lr: u64, // endereço de retorno
}

impl CpuContext {
    pub const fn new() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x29: 0,
            sp: 0,
            lr: 0,
        }
    }

    /// Configura para iniciar em `entry` com a stack dada.
    /// `arg` é entregue em x19; o trampolim move para x0.
    pub fn setup(&mut self, entry: u64, stack_top: u64, arg: u64) {
        self.lr = entry;
        self.sp = stack_top & !0xF;
        self.x29 = 0;
        self.x19 = arg;
    }
}

/// Realiza o context switch entre duas threads.
///
/// # Safety
/// Interrupções desabilitadas; `new` com contexto e stack válidos.
pub unsafe fn switch(old: &mut CpuContext, new: &CpuContext) {
    context_switch_asm(old as *mut CpuContext as u64, new as *const CpuContext as u64);
}

/// Salta para um contexto sem salvar o atual.
///
/// # Safety
/// Mesmas condições de `switch`; a stack corrente é abandonada.
pub unsafe fn first_enter(new: &CpuContext) -> ! {
    context_enter_asm(new as *const CpuContext as u64);
}

extern "C" {
    fn context_switch_asm(old: u64, new: u64);
    fn context_enter_asm(new: u64) -> !;
}

// x0 = old, x1 = new
// Offsets: x19..x29 em 0..0x50, sp em 0x58, lr em 0x60
core::arch::global_asm!(
    r#"
.global context_switch_asm
context_switch_asm:
    stp x19, x20, [x0, #0x00]
    stp x21, x22, [x0, #0x10]
    stp x23, x24, [x0, #0x20]
    stp x25, x26, [x0, #0x30]
    stp x27, x28, [x0, #0x40]
    str x29,      [x0, #0x50]
    mov x9, sp
    str x9,       [x0, #0x58]
    str x30,      [x0, #0x60]

.global context_enter_body
context_enter_body:
    ldp x19, x20, [x1, #0x00]
    ldp x21, x22, [x1, #0x10]
    ldp x23, x24, [x1, #0x20]
    ldp x25, x26, [x1, #0x30]
    ldp x27, x28, [x1, #0x40]
    ldr x29,      [x1, #0x50]
    ldr x9,       [x1, #0x58]
    mov sp, x9
    ldr x30,      [x1, #0x60]
    ret

.global context_enter_asm
context_enter_asm:
    mov x1, x0
    b context_enter_body
"#
);
