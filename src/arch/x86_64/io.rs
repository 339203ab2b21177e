//! Port I/O legado do x86.
//!
//! Leitura e escrita em portas de I/O (inb, outb, etc.), essenciais para
//! hardware legado como PIC, PIT e Serial.

use core::arch::asm;

/// Lê um byte de uma porta IO
#[inline]
pub fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: IO ports são privilegiados mas seguros do ponto de vista de memória
    unsafe {
        asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack));
    }
    value
}

/// Escreve um byte em uma porta IO
#[inline]
pub fn outb(port: u16, value: u8) {
    // SAFETY: idem inb
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack));
    }
}

/// Lê um word (16 bits) de uma porta IO
#[inline]
pub fn inw(port: u16) -> u16 {
    let value: u16;
    // SAFETY: idem inb
    unsafe {
        asm!("in ax, dx", in("dx") port, out("ax") value, options(nomem, nostack));
    }
    value
}

/// Escreve um word em uma porta IO
#[inline]
pub fn outw(port: u16, value: u16) {
    // SAFETY: idem inb
    unsafe {
        asm!("out dx, ax", in("dx") port, in("ax") value, options(nomem, nostack));
    }
}

/// Lê um dword (32 bits) de uma porta IO
#[inline]
pub fn inl(port: u16) -> u32 {
    let value: u32;
    // SAFETY: idem inb
    unsafe {
        asm!("in eax, dx", in("dx") port, out("eax") value, options(nomem, nostack));
    }
    value
}

/// Escreve um dword em uma porta IO
#[inline]
pub fn outl(port: u16, value: u32) {
    // SAFETY: idem inb
    unsafe {
        asm!("out dx, eax", in("dx") port, in("eax") value, options(nomem, nostack));
    }
}

/// Atraso de barramento (~1us) via porta 0x80
#[inline]
pub fn io_wait() {
    outb(0x80, 0);
}
