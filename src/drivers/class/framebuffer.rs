//! Classe de framebuffer
//!
//! Embrulha o device com o modo de vídeo e a memória mapeada. Todo acesso
//! à VRAM passa por ponteiros voláteis; o compilador não pode fundir nem
//! eliminar as escritas.

use crate::drivers::base::Device;
use crate::mm::VirtAddr;
use crate::{KResult, Status};
use alloc::sync::Arc;
use core::ptr::NonNull;
use volatile::VolatilePtr;

/// Modo de vídeo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbMode {
    pub width: u32,
    pub height: u32,
    /// Bytes por linha
    pub pitch: u32,
    pub bits_per_pixel: u8,
}

/// Um framebuffer mapeado
pub struct FramebufferDevice {
    pub device: Arc<Device>,
    pub mode: FbMode,
    base: VirtAddr,
}

impl FramebufferDevice {
    /// # Safety
    ///
    /// `base` deve apontar para um mapeamento de pelo menos
    /// `mode.pitch * mode.height` bytes, vivo pela vida do device.
    pub unsafe fn new(device: Arc<Device>, mode: FbMode, base: VirtAddr) -> Arc<Self> {
        Arc::new(Self { device, mode, base })
    }

    fn pixel_ptr(&self, x: u32, y: u32) -> Option<NonNull<u32>> {
        if x >= self.mode.width || y >= self.mode.height || self.mode.bits_per_pixel != 32 {
            return None;
        }
        let offset = y as u64 * self.mode.pitch as u64 + x as u64 * 4;
        NonNull::new((self.base.as_u64() + offset) as *mut u32)
    }

    /// Escreve um pixel. Fora dos limites é silenciosamente ignorado.
    pub fn put_pixel(&self, x: u32, y: u32, color: u32) {
        if let Some(ptr) = self.pixel_ptr(x, y) {
            // SAFETY: dentro do mapeamento garantido na construção
            unsafe { VolatilePtr::new(ptr) }.write(color);
        }
    }

    /// Preenche uma linha a partir de (x, y).
    pub fn write_row(&self, x: u32, y: u32, pixels: &[u32]) -> KResult<()> {
        if self.mode.bits_per_pixel != 32 {
            return Err(Status::NotSupported);
        }
        if y >= self.mode.height || x as usize + pixels.len() > self.mode.width as usize {
            return Err(Status::InvalidArg);
        }
        for (i, &color) in pixels.iter().enumerate() {
            self.put_pixel(x + i as u32, y, color);
        }
        Ok(())
    }

    /// Pinta a tela inteira.
    pub fn fill(&self, color: u32) {
        for y in 0..self.mode.height {
            for x in 0..self.mode.width {
                self.put_pixel(x, y, color);
            }
        }
    }

    /// Base virtual da VRAM.
    pub fn vram_base(&self) -> VirtAddr {
        self.base
    }

    pub fn read_pixel(&self, x: u32, y: u32) -> Option<u32> {
        self.pixel_ptr(x, y)
            // SAFETY: dentro do mapeamento garantido na construção
            .map(|ptr| unsafe { VolatilePtr::new(ptr) }.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample(buffer: &mut [u32], width: u32, height: u32) -> Arc<FramebufferDevice> {
        let parent = crate::drivers::base::virtual_dir();
        static NAMES: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
        let n = NAMES.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        let name = if n == 0 { "fbt0" } else { "fbt1" };
        let device = crate::drivers::base::DeviceBuilder::new(name, &parent)
            .class("framebuffer")
            .publish()
            .unwrap();
        let mode = FbMode {
            width,
            height,
            pitch: width * 4,
            bits_per_pixel: 32,
        };
        // SAFETY: o buffer de teste cobre pitch * height bytes
        unsafe { FramebufferDevice::new(device, mode, VirtAddr::new(buffer.as_mut_ptr() as u64)) }
    }

    #[test]
    fn pixel_round_trip_and_bounds() {
        let mut buffer = vec![0u32; 8 * 4];
        let fb = sample(&mut buffer, 8, 4);
        fb.put_pixel(3, 2, 0x00FF_00FF);
        assert_eq!(fb.read_pixel(3, 2), Some(0x00FF_00FF));
        // Fora dos limites: sem efeito, sem leitura
        fb.put_pixel(8, 0, 0xDEAD);
        fb.put_pixel(0, 4, 0xDEAD);
        assert_eq!(fb.read_pixel(8, 0), None);
        assert_eq!(
            fb.write_row(6, 0, &[1, 2, 3]),
            Err(Status::InvalidArg)
        );
        fb.write_row(0, 1, &[7, 8]).unwrap();
        assert_eq!(fb.read_pixel(1, 1), Some(8));
    }
}
