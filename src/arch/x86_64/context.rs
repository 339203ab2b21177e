//! Context switch x86_64
//!
//! Salva os registradores callee-saved (SysV ABI) e o stack pointer da thread
//! de saída e restaura os da thread de entrada. A troca de CR3, quando os
//! espaços de endereçamento diferem, é feita pelo scheduler antes de chamar
//! `switch`.

/// Contexto de CPU (registradores salvos)
#[repr(C)]
#[derive(Debug)]
pub struct CpuContext {
    // Callee-saved registers (SysV ABI)
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    // Stack pointer
    pub rsp: u64,

    // Instruction pointer (endereço de retorno)
    pub rip: u64,
}

impl CpuContext {
    /// Cria contexto zerado
    pub const fn new() -> Self {
        Self {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
            rip: 0,
        }
    }

    /// Configura para iniciar em `entry` com a stack dada.
    ///
    /// `arg` é entregue em r12; o trampolim de entrada da thread move para
    /// RDI antes de chamar a função real.
    pub fn setup(&mut self, entry: u64, stack_top: u64, arg: u64) {
        self.rip = entry;
        // Depois do ret do switch, RSP fica 16-alinhado menos o slot de
        // retorno consumido, como a ABI espera na entrada de função
        self.rsp = (stack_top - 16) & !0xF;
        self.rbp = 0;
        self.r12 = arg;
    }
}

/// Realiza o context switch entre duas threads.
///
/// # Safety
/// - Interrupções devem estar desabilitadas.
/// - `new` deve conter um contexto previamente salvo ou configurado por
///   `setup`, com stack válida.
pub unsafe fn switch(old: &mut CpuContext, new: &CpuContext) {
    context_switch_asm(old as *mut CpuContext as u64, new as *const CpuContext as u64);
}

/// Salta para um contexto sem salvar o atual (primeira thread de uma CPU).
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

// RDI = old (mut ptr), RSI = new (ptr)
// Offsets de CpuContext:
// 0:rbx, 8:rbp, 16:r12, 24:r13, 32:r14, 40:r15, 48:rsp, 56:rip
core::arch::global_asm!(
    r#"
.global context_switch_asm
context_switch_asm:
    // Salvar callee-saved
    mov [rdi + 0x00], rbx
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], r12
    mov [rdi + 0x18], r13
    mov [rdi + 0x20], r14
    mov [rdi + 0x28], r15

    // Salvar stack pointer
    mov [rdi + 0x30], rsp

    // Salvar endereço de retorno como RIP
    mov rax, [rsp]
    mov [rdi + 0x38], rax

    // Restaurar contexto novo
.global context_enter_body
context_enter_body:
    mov rbx, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov r12, [rsi + 0x10]
    mov r13, [rsi + 0x18]
    mov r14, [rsi + 0x20]
    mov r15, [rsi + 0x28]
    mov rsp, [rsi + 0x30]

    // Saltar para o RIP salvo
    mov rax, [rsi + 0x38]
    // Substituir o endereço de retorno no topo da stack
    mov [rsp], rax
    ret

.global context_enter_asm
context_enter_asm:
    mov rsi, rdi
    // Stack nova já configurada pelo setup(); reservar o slot de retorno
    mov rsp, [rsi + 0x30]
    jmp context_enter_body
"#
);
