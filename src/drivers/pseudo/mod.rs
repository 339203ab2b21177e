//! Pseudo devices
//!
//! Devices sem hardware por trás, publicados sob /virtual no boot: o
//! gerador pseudo-aleatório e o framebuffer do kernel, quando o loader
//! entrega um.

pub mod fb;
pub mod random;

use crate::core::boot::BootInfo;

pub fn init(boot: &BootInfo) {
    random::init();
    if let Some(info) = boot.framebuffer {
        if !boot.options.splash_disabled {
            fb::init(&info);
        }
    }
}
