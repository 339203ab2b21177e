//! Interrupções x86_64: IDT, PIC legado e LAPIC.
//!
//! As exceções roteiam para `core::thread::exceptions`; IRQs de hardware vão
//! para o gerenciador genérico em `drivers::irq`. O par de PICs 8259
//! implementa `IrqChip`, incluindo a detecção de interrupção espúria via
//! leitura do registrador ISR.

use crate::arch::traits::cpu::CoreId;
use crate::arch::traits::irq::{IrqChip, IrqMode};
use crate::arch::x86_64::io::{inb, io_wait, outb};
use crate::mm::physmap::phys_to_virt;
use crate::mm::PhysAddr;
use core::sync::atomic::{AtomicU64, Ordering};

/// Base dos vetores de IRQ de hardware
pub const VECTOR_IRQ_BASE: u8 = 32;
/// Porta de syscalls (int 0x80, gate com DPL 3)
pub const VECTOR_SYSCALL: u8 = 0x80;
/// IPI de rescheduling
pub const VECTOR_RESCHED: u8 = 0xFD;
/// IPI de TLB shootdown
pub const VECTOR_TLB_FLUSH: u8 = 0xFE;
/// Vetor espúrio do LAPIC
pub const VECTOR_SPURIOUS: u8 = 0xFF;

// =============================================================================
// IDT
// =============================================================================

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    flags: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn empty() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            flags: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set(&mut self, handler: u64) {
        self.offset_low = handler as u16;
        self.offset_mid = (handler >> 16) as u16;
        self.offset_high = (handler >> 32) as u32;
        self.selector = 0x08; // seletor de código do kernel
        self.ist = 0;
        self.flags = 0x8E; // presente, DPL 0, interrupt gate
    }

    /// Gate invocável de ring 3 (int imediato do usuário).
    fn set_user(&mut self, handler: u64) {
        self.set(handler);
        self.flags = 0xEE; // presente, DPL 3, interrupt gate
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::empty(); 256];

/// Frame de interrupção empilhado pela CPU
#[repr(C)]
#[derive(Debug)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

// --- Exceções ---

extern "x86-interrupt" fn divide_error(frame: InterruptFrame) {
    crate::core::thread::exceptions::dispatch(
        crate::core::thread::exceptions::ExceptionCode::DivideByZero,
        frame.rip,
        0,
    );
}

extern "x86-interrupt" fn invalid_opcode(frame: InterruptFrame) {
    crate::core::thread::exceptions::dispatch(
        crate::core::thread::exceptions::ExceptionCode::InvalidInstruction,
        frame.rip,
        0,
    );
}

extern "x86-interrupt" fn general_protection(frame: InterruptFrame, error: u64) {
    crate::core::thread::exceptions::dispatch(
        crate::core::thread::exceptions::ExceptionCode::ProtectionFault,
        frame.rip,
        error,
    );
}

extern "x86-interrupt" fn page_fault(frame: InterruptFrame, error: u64) {
    let fault_addr: u64;
    // SAFETY: CR2 carrega o endereço da falha
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) fault_addr, options(nomem, nostack));
    }
    crate::mm::fault::handle_page_fault(fault_addr, error, frame.rip);
}

extern "x86-interrupt" fn double_fault(frame: InterruptFrame, _error: u64) -> ! {
    kerror_frame("DOUBLE FAULT rip=", frame.rip);
    crate::core::panic_hard("double fault");
}

fn kerror_frame(msg: &str, rip: u64) {
    crate::kerror!(msg, rip);
}

// --- IRQs de hardware: um stub por linha encaminhando ao gerenciador ---

macro_rules! irq_stub {
    ($name:ident, $line:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptFrame) {
            crate::drivers::irq::handle(($line) as u32);
        }
    };
}

irq_stub!(irq0, 0);
irq_stub!(irq1, 1);
irq_stub!(irq2, 2);
irq_stub!(irq3, 3);
irq_stub!(irq4, 4);
irq_stub!(irq5, 5);
irq_stub!(irq6, 6);
irq_stub!(irq7, 7);
irq_stub!(irq8, 8);
irq_stub!(irq9, 9);
irq_stub!(irq10, 10);
irq_stub!(irq11, 11);
irq_stub!(irq12, 12);
irq_stub!(irq13, 13);
irq_stub!(irq14, 14);
irq_stub!(irq15, 15);

// --- IPIs ---

extern "x86-interrupt" fn resched_ipi(_frame: InterruptFrame) {
    lapic_eoi();
    crate::core::sched::preempt_from_ipi();
}

extern "x86-interrupt" fn tlb_ipi(_frame: InterruptFrame) {
    lapic_eoi();
    crate::mm::mmu::tlb_flush_from_ipi();
}

extern "x86-interrupt" fn spurious(_frame: InterruptFrame) {
    // LAPIC espúria: sem EOI
}

// --- Syscalls ---

// Convenção: RAX = número; argumentos em RDI, RSI, RDX, R10, R8, R9; o
// resultado volta em RAX. O vetor empilha os seis argumentos e entrega um
// ponteiro para eles ao despacho em Rust.
core::arch::global_asm!(
    r#"
.global syscall_vector_asm
syscall_vector_asm:
    push r11
    push rcx
    // 48 bytes de argumentos + 8 de ajuste para a pilha 16-alinhada no call
    sub rsp, 56
    mov [rsp + 8], rdi
    mov [rsp + 16], rsi
    mov [rsp + 24], rdx
    mov [rsp + 32], r10
    mov [rsp + 40], r8
    mov [rsp + 48], r9
    mov rdi, rax
    lea rsi, [rsp + 8]
    call syscall_entry
    add rsp, 56
    pop rcx
    pop r11
    iretq
"#
);

extern "C" {
    fn syscall_vector_asm();
}

#[no_mangle]
extern "C" fn syscall_entry(num: usize, args: *const u64) -> isize {
    // SAFETY: o vetor empilhou exatamente seis palavras em args
    let args = unsafe { core::ptr::read(args as *const [u64; 6]) };
    crate::syscall::dispatch(num, args)
}

/// Instala a IDT nesta CPU. Chamado uma vez por CPU no init.
pub fn init_idt() {
    // SAFETY: executado com interrupções desabilitadas durante o boot da CPU
    unsafe {
        let idt = &mut *core::ptr::addr_of_mut!(IDT);
        idt[0].set(divide_error as usize as u64);
        idt[6].set(invalid_opcode as usize as u64);
        idt[8].set(double_fault as usize as u64);
        idt[13].set(general_protection as usize as u64);
        idt[14].set(page_fault as usize as u64);

        let irqs: [u64; 16] = [
            irq0 as usize as u64,
            irq1 as usize as u64,
            irq2 as usize as u64,
            irq3 as usize as u64,
            irq4 as usize as u64,
            irq5 as usize as u64,
            irq6 as usize as u64,
            irq7 as usize as u64,
            irq8 as usize as u64,
            irq9 as usize as u64,
            irq10 as usize as u64,
            irq11 as usize as u64,
            irq12 as usize as u64,
            irq13 as usize as u64,
            irq14 as usize as u64,
            irq15 as usize as u64,
        ];
        for (i, handler) in irqs.iter().enumerate() {
            idt[VECTOR_IRQ_BASE as usize + i].set(*handler);
        }

        idt[VECTOR_SYSCALL as usize].set_user(syscall_vector_asm as usize as u64);
        idt[VECTOR_RESCHED as usize].set(resched_ipi as usize as u64);
        idt[VECTOR_TLB_FLUSH as usize].set(tlb_ipi as usize as u64);
        idt[VECTOR_SPURIOUS as usize].set(spurious as usize as u64);

        let pointer = IdtPointer {
            limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u64,
        };
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(nostack));
    }
}

// =============================================================================
// PIC 8259 (par master/slave)
// =============================================================================

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;
const PIC_READ_ISR: u8 = 0x0B;

/// Par de PICs 8259 como IrqChip
pub struct Pic8259;

impl Pic8259 {
    /// Remapeia os PICs para a base de vetores do kernel e mascara tudo
    pub fn init() {
        outb(PIC1_CMD, 0x11); // ICW1: init + ICW4
        io_wait();
        outb(PIC2_CMD, 0x11);
        io_wait();
        outb(PIC1_DATA, VECTOR_IRQ_BASE); // ICW2: base de vetores
        io_wait();
        outb(PIC2_DATA, VECTOR_IRQ_BASE + 8);
        io_wait();
        outb(PIC1_DATA, 0x04); // ICW3: slave na linha 2
        io_wait();
        outb(PIC2_DATA, 0x02);
        io_wait();
        outb(PIC1_DATA, 0x01); // ICW4: modo 8086
        io_wait();
        outb(PIC2_DATA, 0x01);
        io_wait();
        // Mascarar todas as linhas; drivers desmascaram via enable()
        outb(PIC1_DATA, 0xFF);
        outb(PIC2_DATA, 0xFF);
    }

    fn read_isr(cmd_port: u16) -> u8 {
        outb(cmd_port, PIC_READ_ISR);
        inb(cmd_port)
    }
}

impl IrqChip for Pic8259 {
    fn pre_handle(&self, line: u32) -> bool {
        // Espúria: linha 7/15 levantada sem o bit correspondente no ISR
        if line == 7 && Self::read_isr(PIC1_CMD) & 0x80 == 0 {
            return false;
        }
        if line == 15 && Self::read_isr(PIC2_CMD) & 0x80 == 0 {
            // O master viu a cascata; precisa de EOI mesmo assim
            outb(PIC1_CMD, PIC_EOI);
            return false;
        }
        true
    }

    fn post_handle(&self, line: u32) {
        if line >= 8 {
            outb(PIC2_CMD, PIC_EOI);
        }
        outb(PIC1_CMD, PIC_EOI);
    }

    fn mode(&self, _line: u32) -> IrqMode {
        // PIC legado é edge-triggered
        IrqMode::Edge
    }

    fn enable(&self, line: u32) {
        let (port, bit) = if line < 8 {
            (PIC1_DATA, line)
        } else {
            (PIC2_DATA, line - 8)
        };
        outb(port, inb(port) & !(1 << bit));
    }

    fn disable(&self, line: u32) {
        let (port, bit) = if line < 8 {
            (PIC1_DATA, line)
        } else {
            (PIC2_DATA, line - 8)
        };
        outb(port, inb(port) | (1 << bit));
    }

    fn line_count(&self) -> u32 {
        16
    }
}

// =============================================================================
// LAPIC (EOI e IPIs)
// =============================================================================

const LAPIC_DEFAULT_BASE: u64 = 0xFEE0_0000;
const LAPIC_REG_EOI: u64 = 0xB0;
const LAPIC_REG_SPURIOUS: u64 = 0xF0;
const LAPIC_REG_ICR_LOW: u64 = 0x300;
const LAPIC_REG_ICR_HIGH: u64 = 0x310;

static LAPIC_BASE: AtomicU64 = AtomicU64::new(LAPIC_DEFAULT_BASE);

fn lapic_write(reg: u64, value: u32) {
    let base = phys_to_virt(PhysAddr::new(LAPIC_BASE.load(Ordering::Relaxed)));
    // SAFETY: MMIO do LAPIC; base registrada no init
    unsafe { core::ptr::write_volatile((base.as_u64() + reg) as *mut u32, value) };
}

/// EOI no LAPIC (IPIs e timer do LAPIC)
pub fn lapic_eoi() {
    lapic_write(LAPIC_REG_EOI, 0);
}

/// Habilita o LAPIC local (software enable + vetor espúrio)
pub fn init_lapic() {
    lapic_write(LAPIC_REG_SPURIOUS, 0x100 | VECTOR_SPURIOUS as u32);
}

/// Envia uma IPI para a CPU alvo (id = APIC id, mapeado pelo handoff)
pub fn send_ipi(target: CoreId, vector: u8) {
    lapic_write(LAPIC_REG_ICR_HIGH, target << 24);
    // Fixed delivery, físico, assert
    lapic_write(LAPIC_REG_ICR_LOW, 0x4000 | vector as u32);
}
