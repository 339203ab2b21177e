//! Device pseudo-aleatório
//!
//! /virtual/random: leituras devolvem bytes do xorshift do kernel;
//! escritas misturam o conteúdo como entropia extra.

use crate::drivers::base::{Device, DeviceBuilder, DeviceOps};
use crate::fs::io::{IoOp, IoRequest};
use crate::klib::rng;
use crate::{kerror, KResult};
use alloc::sync::Arc;

struct RandomOps;

impl DeviceOps for RandomOps {
    fn io(&self, _device: &Arc<Device>, req: &mut IoRequest) -> KResult<()> {
        match req.op {
            IoOp::Read => {
                let mut chunk = [0u8; 64];
                while !req.done() {
                    let n = req.remaining().min(chunk.len());
                    rng::fill_bytes(&mut chunk[..n]);
                    req.copy_out(&chunk[..n])?;
                }
                Ok(())
            }
            IoOp::Write => {
                let mut chunk = [0u8; 8];
                while !req.done() {
                    let n = req.copy_in(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    rng::seed(u64::from_le_bytes(chunk));
                    chunk = [0; 8];
                }
                Ok(())
            }
        }
    }
}

/// Publica /virtual/random.
pub fn init() {
    let parent = crate::drivers::base::virtual_dir();
    let result = DeviceBuilder::new("random", &parent)
        .class("random")
        .ops(Arc::new(RandomOps))
        .publish();
    if let Err(status) = result {
        kerror!("pseudo: random nao publicado, status=", status.as_isize() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_fills_buffer() {
        let parent = crate::drivers::base::virtual_dir();
        let device = DeviceBuilder::new("randomt", &parent)
            .class("random")
            .ops(Arc::new(RandomOps))
            .publish()
            .unwrap();
        let mut out = [0u8; 37];
        let mut req = IoRequest::read_kernel(0, &mut out);
        device.ops.io(&device, &mut req).unwrap();
        assert_eq!(req.transferred, 37);
        drop(req);
        assert!(out.iter().any(|&b| b != 0));
    }

    #[test]
    fn write_is_accepted_as_entropy() {
        let parent = crate::drivers::base::virtual_dir();
        let device = DeviceBuilder::new("randomw", &parent)
            .class("random")
            .ops(Arc::new(RandomOps))
            .publish()
            .unwrap();
        let mut req = IoRequest::write_kernel(0, b"some entropy bytes");
        device.ops.io(&device, &mut req).unwrap();
        assert!(req.done());
    }
}
