//! Cache de entradas de diretório
//!
//! name → id do filho, preenchido no lookup e invalidado em
//! unlink/rename. Entradas negativas não são cacheadas: um miss sempre
//! vai ao filesystem. A chave é o hash FNV de (id do pai, nome); colisões
//! ficam num bucket.

use crate::fs::node::NodeId;
use crate::klib::hash::entry_hash;
use crate::klib::AvlTree;
use crate::sync::Mutex;
use alloc::string::String;
use alloc::vec::Vec;

/// Cache de entradas de um diretório
pub struct EntryCache {
    buckets: Mutex<AvlTree<Vec<(String, NodeId)>>>,
}

impl EntryCache {
    pub const fn new() -> Self {
        Self {
            buckets: Mutex::new("entry_cache", AvlTree::new()),
        }
    }

    /// Registra um lookup bem-sucedido.
    pub fn insert(&self, parent: NodeId, name: &str, child: NodeId) {
        let hash = entry_hash(parent, name);
        let mut buckets = self.buckets.lock();
        match buckets.lookup_mut(hash) {
            Some(bucket) => {
                for entry in bucket.iter_mut() {
                    if entry.0 == name {
                        entry.1 = child;
                        return;
                    }
                }
                bucket.push((String::from(name), child));
            }
            None => {
                let mut bucket = Vec::with_capacity(1);
                bucket.push((String::from(name), child));
                buckets.insert(hash, bucket);
            }
        }
    }

    /// Id do filho, se cacheado.
    pub fn lookup(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let hash = entry_hash(parent, name);
        let buckets = self.buckets.lock();
        buckets
            .lookup(hash)?
            .iter()
            .find(|entry| entry.0 == name)
            .map(|entry| entry.1)
    }

    /// Invalida uma entrada (unlink/rename).
    pub fn invalidate(&self, parent: NodeId, name: &str) {
        let hash = entry_hash(parent, name);
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.lookup_mut(hash) {
            bucket.retain(|entry| entry.0 != name);
            if bucket.is_empty() {
                buckets.remove(hash);
            }
        }
    }

    /// Esvazia o cache inteiro.
    pub fn clear(&self) {
        let mut buckets = self.buckets.lock();
        let keys: Vec<u64> = buckets.iter().map(|(key, _)| key).collect();
        for key in keys {
            buckets.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_invalidate() {
        let cache = EntryCache::new();
        cache.insert(1, "etc", 10);
        cache.insert(1, "bin", 11);
        assert_eq!(cache.lookup(1, "etc"), Some(10));
        assert_eq!(cache.lookup(1, "bin"), Some(11));
        assert_eq!(cache.lookup(1, "usr"), None);

        cache.invalidate(1, "etc");
        assert_eq!(cache.lookup(1, "etc"), None);
        assert_eq!(cache.lookup(1, "bin"), Some(11));
    }

    #[test]
    fn reinsert_replaces() {
        let cache = EntryCache::new();
        cache.insert(1, "x", 5);
        cache.insert(1, "x", 6);
        assert_eq!(cache.lookup(1, "x"), Some(6));
    }

    #[test]
    fn distinct_parents() {
        let cache = EntryCache::new();
        cache.insert(1, "a", 10);
        cache.insert(2, "a", 20);
        assert_eq!(cache.lookup(1, "a"), Some(10));
        assert_eq!(cache.lookup(2, "a"), Some(20));
    }
}
