//! Hashing FNV-1a
//!
//! Usado pelo cache de entradas do VFS e pelas tabelas internas que precisam
//! de um hash barato e determinístico.

use core::hash::Hasher;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hasher FNV-1a de 64 bits
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    pub const fn new() -> Self {
        Self { state: FNV_OFFSET }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

/// Hash de uma fatia de bytes em uma chamada
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Hash combinado de (id do pai, nome) para o cache de entradas
pub fn entry_hash(parent: u64, name: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(&parent.to_le_bytes());
    hasher.write(name.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_known_vectors() {
        // Vetores clássicos do FNV-1a 64
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_entry_hash_distinguishes_parent() {
        assert_ne!(entry_hash(1, "file"), entry_hash(2, "file"));
        assert_ne!(entry_hash(1, "file"), entry_hash(1, "file2"));
    }
}
