//! Console serial de diagnóstico
//!
//! x86_64: UART 16550 na COM1. aarch64: PL011 mapeado pelo loader.
//! É o único sink dos macros de log; nada aqui usa `core::fmt`.

use crate::sync::Spinlock;

#[cfg(target_arch = "x86_64")]
use crate::arch::x86_64::io::{inb, outb};

/// Porta COM1
#[cfg(target_arch = "x86_64")]
const COM1_PORT: u16 = 0x3F8;

/// Base MMIO do PL011 (QEMU virt; o loader pode sobrescrever via handoff)
#[cfg(target_arch = "aarch64")]
const PL011_BASE: u64 = 0x0900_0000;

static SERIAL: Spinlock<SerialPort> = Spinlock::new("serial", SerialPort::new());

struct SerialPort {
    initialized: bool,
}

impl SerialPort {
    const fn new() -> Self {
        Self { initialized: false }
    }

    #[cfg(target_arch = "x86_64")]
    fn init(&mut self) {
        if self.initialized {
            return;
        }
        // Desabilitar interrupções da UART
        outb(COM1_PORT + 1, 0x00);
        // Habilitar DLAB (set baud rate)
        outb(COM1_PORT + 3, 0x80);
        // Divisor 3 = 38400 baud
        outb(COM1_PORT, 0x03);
        outb(COM1_PORT + 1, 0x00);
        // 8 bits, sem paridade, 1 stop bit
        outb(COM1_PORT + 3, 0x03);
        // FIFO habilitada, limpa, threshold 14 bytes
        outb(COM1_PORT + 2, 0xC7);
        // IRQs off, RTS/DSR set
        outb(COM1_PORT + 4, 0x0B);
        self.initialized = true;
    }

    #[cfg(target_arch = "aarch64")]
    fn init(&mut self) {
        // O loader deixa o PL011 configurado; só marcamos como pronto.
        self.initialized = true;
    }

    #[cfg(target_arch = "x86_64")]
    fn write_byte(&self, byte: u8) {
        // Esperar FIFO de transmissão esvaziar
        while (inb(COM1_PORT + 5) & 0x20) == 0 {
            core::hint::spin_loop();
        }
        outb(COM1_PORT, byte);
    }

    #[cfg(target_arch = "aarch64")]
    fn write_byte(&self, byte: u8) {
        // DR em offset 0, FR em 0x18; bit 5 = TX FIFO cheia
        let fr = (PL011_BASE + 0x18) as *const u32;
        let dr = PL011_BASE as *mut u32;
        // SAFETY: MMIO do PL011, endereços fixos da plataforma
        unsafe {
            while core::ptr::read_volatile(fr) & (1 << 5) != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile(dr, byte as u32);
        }
    }
}

/// Inicializa a serial (idempotente)
pub fn init() {
    SERIAL.lock().init();
}

/// Emite uma string literal
pub fn emit_str(s: &str) {
    let serial = SERIAL.lock();
    for byte in s.bytes() {
        serial.write_byte(byte);
    }
}

/// Emite um valor em hexadecimal (16 dígitos, prefixo 0x)
pub fn emit_hex(value: u64) {
    let serial = SERIAL.lock();
    serial.write_byte(b'0');
    serial.write_byte(b'x');
    for i in (0..16).rev() {
        let digit = ((value >> (i * 4)) & 0xF) as u8;
        let c = if digit < 10 {
            b'0' + digit
        } else {
            b'A' + digit - 10
        };
        serial.write_byte(c);
    }
}

/// Emite newline
pub fn emit_nl() {
    let serial = SERIAL.lock();
    serial.write_byte(b'\r');
    serial.write_byte(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_has_debug_name() {
        assert_eq!(SERIAL.name(), "serial");
        assert!(!SERIAL.is_locked());
    }
}
