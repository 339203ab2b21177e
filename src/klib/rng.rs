//! Gerador pseudo-aleatório do kernel
//!
//! xorshift64*, suficiente para o dispositivo pseudo `random` e para
//! decisões internas sem peso criptográfico. Não usar para chaves.

use core::sync::atomic::{AtomicU64, Ordering};

static STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

/// Mistura entropia adicional no estado (ex.: TSC no boot).
pub fn seed(extra: u64) {
    STATE.fetch_xor(extra | 1, Ordering::Relaxed);
}

/// Próximo valor de 64 bits.
pub fn next_u64() -> u64 {
    let mut current = STATE.load(Ordering::Relaxed);
    loop {
        let mut x = current;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        match STATE.compare_exchange_weak(current, x, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
            Err(actual) => current = actual,
        }
    }
}

/// Preenche o buffer com bytes pseudo-aleatórios.
pub fn fill_bytes(buffer: &mut [u8]) {
    for chunk in buffer.chunks_mut(8) {
        let value = next_u64().to_le_bytes();
        chunk.copy_from_slice(&value[..chunk.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_advances() {
        let a = next_u64();
        let b = next_u64();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_bytes_partial_chunk() {
        let mut buffer = [0u8; 13];
        fill_bytes(&mut buffer);
        // 13 bytes todos zero seria astronomicamente improvável
        assert!(buffer.iter().any(|&b| b != 0));
    }
}
