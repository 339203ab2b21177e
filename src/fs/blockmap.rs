//! Mapa de blocos
//!
//! Cache bloco-de-arquivo → bloco-de-device em dois níveis: uma árvore de
//! chunks, cada chunk com bitmap de presença e vetor de valores. A memória
//! é limitada: estourando o teto de chunks, o mais antigo sai.

use crate::klib::AvlTree;
use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::collections::VecDeque;

/// Entradas por chunk
pub const CHUNK_ENTRIES: usize = 512;
/// Chunks residentes no máximo
pub const MAX_CHUNKS: usize = 64;

const BITMAP_WORDS: usize = CHUNK_ENTRIES / 64;

struct Chunk {
    present: [u64; BITMAP_WORDS],
    blocks: Box<[u64; CHUNK_ENTRIES]>,
}

impl Chunk {
    fn new() -> Self {
        Self {
            present: [0; BITMAP_WORDS],
            blocks: Box::new([0; CHUNK_ENTRIES]),
        }
    }

    fn set(&mut self, slot: usize, device_block: u64) {
        self.present[slot / 64] |= 1 << (slot % 64);
        self.blocks[slot] = device_block;
    }

    fn get(&self, slot: usize) -> Option<u64> {
        if self.present[slot / 64] & (1 << (slot % 64)) != 0 {
            Some(self.blocks[slot])
        } else {
            None
        }
    }

    fn clear(&mut self, slot: usize) {
        self.present[slot / 64] &= !(1 << (slot % 64));
    }
}

struct MapInner {
    chunks: AvlTree<Chunk>,
    /// Ordem de chegada, para a evicção
    order: VecDeque<u64>,
}

/// Mapa de blocos de um arquivo
pub struct BlockMap {
    inner: Mutex<MapInner>,
}

impl BlockMap {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new("blockmap", MapInner {
                chunks: AvlTree::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Registra a tradução de um bloco do arquivo.
    pub fn insert(&self, file_block: u64, device_block: u64) {
        let key = file_block / CHUNK_ENTRIES as u64;
        let slot = (file_block % CHUNK_ENTRIES as u64) as usize;
        let mut inner = self.inner.lock();
        if inner.chunks.lookup(key).is_none() {
            if inner.order.len() >= MAX_CHUNKS {
                if let Some(victim) = inner.order.pop_front() {
                    inner.chunks.remove(victim);
                }
            }
            inner.chunks.insert(key, Chunk::new());
            inner.order.push_back(key);
        }
        if let Some(chunk) = inner.chunks.lookup_mut(key) {
            chunk.set(slot, device_block);
        }
    }

    /// Tradução cacheada, se existir.
    pub fn lookup(&self, file_block: u64) -> Option<u64> {
        let key = file_block / CHUNK_ENTRIES as u64;
        let slot = (file_block % CHUNK_ENTRIES as u64) as usize;
        let inner = self.inner.lock();
        inner.chunks.lookup(key)?.get(slot)
    }

    /// Invalida um bloco (realocação no fs).
    pub fn invalidate(&self, file_block: u64) {
        let key = file_block / CHUNK_ENTRIES as u64;
        let slot = (file_block % CHUNK_ENTRIES as u64) as usize;
        let mut inner = self.inner.lock();
        if let Some(chunk) = inner.chunks.lookup_mut(key) {
            chunk.clear(slot);
        }
    }

    /// Chunks residentes (diagnóstico).
    pub fn resident_chunks(&self) -> usize {
        self.inner.lock().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup() {
        let map = BlockMap::new();
        map.insert(0, 100);
        map.insert(1, 101);
        map.insert(CHUNK_ENTRIES as u64 + 3, 900);
        assert_eq!(map.lookup(0), Some(100));
        assert_eq!(map.lookup(1), Some(101));
        assert_eq!(map.lookup(CHUNK_ENTRIES as u64 + 3), Some(900));
        assert_eq!(map.lookup(2), None);
    }

    #[test]
    fn invalidate_single_block() {
        let map = BlockMap::new();
        map.insert(5, 50);
        map.insert(6, 60);
        map.invalidate(5);
        assert_eq!(map.lookup(5), None);
        assert_eq!(map.lookup(6), Some(60));
    }

    #[test]
    fn bounded_memory_evicts_oldest() {
        let map = BlockMap::new();
        for i in 0..(MAX_CHUNKS as u64 + 1) {
            map.insert(i * CHUNK_ENTRIES as u64, i);
        }
        assert_eq!(map.resident_chunks(), MAX_CHUNKS);
        // O primeiro chunk foi embora
        assert_eq!(map.lookup(0), None);
        assert_eq!(map.lookup(CHUNK_ENTRIES as u64), Some(1));
    }
}
