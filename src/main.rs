//! Binário principal do kernel
//!
//! Recebe o controle do loader, prepara o ambiente mínimo de execução
//! (stack de boot, SSE no x86_64, BSS zerado) e salta para
//! `core::init::kernel_main` da biblioteca `anvil`. O BSS precisa ser
//! zerado aqui: o loader não garante a região limpa e estáticas do kernel
//! assumem zero.

#![no_std]
#![no_main]

use anvil::arch::{Cpu, CpuOps};
use anvil::drivers::serial;
use anvil::BootInfo;

/// Stack usada até o scheduler assumir
const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[no_mangle]
static BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

// O loader entrega o ponteiro do handoff no primeiro registrador de
// argumento da ABI de cada arquitetura.

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    r#"
.global _start
_start:
    mov r15, rdi

    lea rax, [rip + {stack}]
    lea rsp, [rax + {stack_size}]
    xor rbp, rbp

    // SSE: código Rust usa XMM mesmo sem floats explícitos
    mov rax, cr0
    and ax, 0xFFFB
    or ax, 0x2
    mov cr0, rax
    mov rax, cr4
    or ax, 0x600
    mov cr4, rax

    // Zerar BSS
    lea rdi, [rip + __bss_start]
    lea rcx, [rip + __bss_end]
    sub rcx, rdi
    xor eax, eax
    rep stosb

    and rsp, -16
    mov rdi, r15
    call {entry}
2:
    cli
    hlt
    jmp 2b
"#,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    entry = sym boot_entry,
);

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    r#"
.global _start
_start:
    adrp x2, {stack}
    add x2, x2, :lo12:{stack}
    mov x3, {stack_size}
    add x2, x2, x3
    mov sp, x2

    // Zerar BSS (alinhado a 8 pelo linker script)
    adrp x1, __bss_start
    add x1, x1, :lo12:__bss_start
    adrp x2, __bss_end
    add x2, x2, :lo12:__bss_end
1:
    cmp x1, x2
    b.hs 2f
    str xzr, [x1], #8
    b 1b
2:
    bl {entry}
3:
    wfe
    b 3b
"#,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    entry = sym boot_entry,
);

extern "C" {
    static __bss_start: u8;
    static __bss_end: u8;
}

#[no_mangle]
extern "C" fn boot_entry(boot: u64) -> ! {
    // SAFETY: o loader entrega um BootInfo válido que vive pelo boot todo
    let boot = unsafe { &*(boot as *const BootInfo) };
    anvil::core::init::kernel_main(boot)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    Cpu::disable_interrupts();
    serial::emit_str("\n*** PANIC");
    if let Some(location) = info.location() {
        serial::emit_str(" em ");
        serial::emit_str(location.file());
        serial::emit_str(" linha=");
        serial::emit_hex(location.line() as u64);
    }
    serial::emit_nl();
    loop {
        Cpu::halt();
    }
}
