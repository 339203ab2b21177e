//! Framebuffer do kernel
//!
//! /virtual/fb0 sobre o framebuffer descrito no handoff. A geometria sai
//! por `request`; escritas de pixels vão por `io` com offset em bytes na
//! VRAM.

use crate::core::boot::FramebufferInfo;
use crate::drivers::base::{Device, DeviceBuilder, DeviceOps};
use crate::drivers::class::framebuffer::{FbMode, FramebufferDevice};
use crate::fs::io::{IoOp, IoRequest};
use crate::mm::PhysAddr;
use crate::{kerror, kinfo, KResult, Status};
use alloc::sync::Arc;
use core::ptr::NonNull;
use volatile::VolatilePtr;

/// Códigos de request da classe framebuffer
pub const FB_REQ_WIDTH: u32 = 0x4601;
pub const FB_REQ_HEIGHT: u32 = 0x4602;
pub const FB_REQ_PITCH: u32 = 0x4603;
pub const FB_REQ_BPP: u32 = 0x4604;

static KERNEL_FB: spin::Once<Arc<FramebufferDevice>> = spin::Once::new();

struct FbOps;

impl DeviceOps for FbOps {
    fn io(&self, _device: &Arc<Device>, req: &mut IoRequest) -> KResult<()> {
        let fb = kernel_fb().ok_or(Status::DeviceError)?;
        let vram_len = fb.mode.pitch as u64 * fb.mode.height as u64;
        if req.op != IoOp::Write {
            return Err(Status::NotSupported);
        }
        if req.offset >= vram_len {
            return Err(Status::InvalidArg);
        }
        let base = fb.vram_base().as_u64();
        let mut chunk = [0u8; 256];
        while !req.done() && req.position() < vram_len {
            let want = req
                .remaining()
                .min(chunk.len())
                .min((vram_len - req.position()) as usize);
            let position = req.position();
            let n = req.copy_in(&mut chunk[..want])?;
            for (i, &byte) in chunk[..n].iter().enumerate() {
                let Some(ptr) = NonNull::new((base + position + i as u64) as *mut u8) else {
                    return Err(Status::DeviceError);
                };
                // SAFETY: dentro da VRAM mapeada; limites checados acima
                unsafe { VolatilePtr::new(ptr) }.write(byte);
            }
        }
        Ok(())
    }

    fn request(&self, _device: &Arc<Device>, code: u32, _arg: usize) -> KResult<usize> {
        let fb = kernel_fb().ok_or(Status::DeviceError)?;
        match code {
            FB_REQ_WIDTH => Ok(fb.mode.width as usize),
            FB_REQ_HEIGHT => Ok(fb.mode.height as usize),
            FB_REQ_PITCH => Ok(fb.mode.pitch as usize),
            FB_REQ_BPP => Ok(fb.mode.bits_per_pixel as usize),
            _ => Err(Status::InvalidRequest),
        }
    }
}

/// O framebuffer do kernel, se publicado.
pub fn kernel_fb() -> Option<Arc<FramebufferDevice>> {
    KERNEL_FB.get().cloned()
}

/// Publica /virtual/fb0 sobre o framebuffer do handoff.
pub fn init(info: &FramebufferInfo) {
    let mode = FbMode {
        width: info.width,
        height: info.height,
        pitch: info.pitch,
        bits_per_pixel: info.bits_per_pixel,
    };
    let parent = crate::drivers::base::virtual_dir();
    let result = DeviceBuilder::new("fb0", &parent)
        .class("framebuffer")
        .ops(Arc::new(FbOps))
        .attr_uint("width", info.width as u64)
        .attr_uint("height", info.height as u64)
        .publish();
    let device = match result {
        Ok(device) => device,
        Err(status) => {
            kerror!("pseudo: fb0 nao publicado, status=", status.as_isize() as u64);
            return;
        }
    };
    let base = crate::mm::physmap::phys_to_virt(PhysAddr::new(info.phys));
    // SAFETY: o loader garante pitch * height bytes de VRAM em info.phys,
    // visíveis pelo physmap
    let fb = unsafe { FramebufferDevice::new(device, mode, base) };
    KERNEL_FB.call_once(|| fb);
    kinfo!("pseudo: fb0 publicado, ", info.width as u64, "x", info.height as u64);
}
