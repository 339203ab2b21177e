//! Árvore AVL baseada em arena
//!
//! Nós vivem num `Vec` e referenciam-se por índice; nada de ponteiros crus.
//! Usada pelas tabelas id→objeto do kernel (handles, processos, nodes do
//! VFS). Chaves são `u64`.

use alloc::vec::Vec;

const NIL: u32 = u32::MAX;

struct Node<V> {
    key: u64,
    // Option para que slots na free list não retenham valores vivos
    value: Option<V>,
    left: u32,
    right: u32,
    height: i32,
}

/// Árvore AVL com chaves u64
pub struct AvlTree<V> {
    nodes: Vec<Node<V>>,
    root: u32,
    free: Vec<u32>,
    len: usize,
}

impl<V> AvlTree<V> {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn height(&self, idx: u32) -> i32 {
        if idx == NIL {
            0
        } else {
            self.nodes[idx as usize].height
        }
    }

    fn update_height(&mut self, idx: u32) {
        let (l, r) = {
            let node = &self.nodes[idx as usize];
            (node.left, node.right)
        };
        self.nodes[idx as usize].height = 1 + core::cmp::max(self.height(l), self.height(r));
    }

    fn balance_factor(&self, idx: u32) -> i32 {
        let node = &self.nodes[idx as usize];
        self.height(node.left) - self.height(node.right)
    }

    fn rotate_right(&mut self, y: u32) -> u32 {
        let x = self.nodes[y as usize].left;
        let t = self.nodes[x as usize].right;
        self.nodes[x as usize].right = y;
        self.nodes[y as usize].left = t;
        self.update_height(y);
        self.update_height(x);
        x
    }

    fn rotate_left(&mut self, x: u32) -> u32 {
        let y = self.nodes[x as usize].right;
        let t = self.nodes[y as usize].left;
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].right = t;
        self.update_height(x);
        self.update_height(y);
        y
    }

    fn rebalance(&mut self, idx: u32) -> u32 {
        self.update_height(idx);
        let factor = self.balance_factor(idx);
        if factor > 1 {
            if self.balance_factor(self.nodes[idx as usize].left) < 0 {
                let left = self.nodes[idx as usize].left;
                self.nodes[idx as usize].left = self.rotate_left(left);
            }
            return self.rotate_right(idx);
        }
        if factor < -1 {
            if self.balance_factor(self.nodes[idx as usize].right) > 0 {
                let right = self.nodes[idx as usize].right;
                self.nodes[idx as usize].right = self.rotate_right(right);
            }
            return self.rotate_left(idx);
        }
        idx
    }

    fn alloc_node(&mut self, key: u64, value: V) -> u32 {
        let node = Node {
            key,
            value: Some(value),
            left: NIL,
            right: NIL,
            height: 1,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = node;
            idx
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as u32
        }
    }

    /// Insere ou substitui. Retorna o valor anterior, se havia.
    pub fn insert(&mut self, key: u64, value: V) -> Option<V> {
        let root = self.root;
        let (new_root, old) = self.insert_at(root, key, value);
        self.root = new_root;
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn insert_at(&mut self, idx: u32, key: u64, value: V) -> (u32, Option<V>) {
        if idx == NIL {
            return (self.alloc_node(key, value), None);
        }
        let node_key = self.nodes[idx as usize].key;
        let old = if key < node_key {
            let left = self.nodes[idx as usize].left;
            let (new_left, old) = self.insert_at(left, key, value);
            self.nodes[idx as usize].left = new_left;
            old
        } else if key > node_key {
            let right = self.nodes[idx as usize].right;
            let (new_right, old) = self.insert_at(right, key, value);
            self.nodes[idx as usize].right = new_right;
            old
        } else {
            return (idx, self.nodes[idx as usize].value.replace(value));
        };
        (self.rebalance(idx), old)
    }

    pub fn lookup(&self, key: u64) -> Option<&V> {
        let mut idx = self.root;
        while idx != NIL {
            let node = &self.nodes[idx as usize];
            if key < node.key {
                idx = node.left;
            } else if key > node.key {
                idx = node.right;
            } else {
                return node.value.as_ref();
            }
        }
        None
    }

    pub fn lookup_mut(&mut self, key: u64) -> Option<&mut V> {
        let mut idx = self.root;
        while idx != NIL {
            let node = &self.nodes[idx as usize];
            if key < node.key {
                idx = node.left;
            } else if key > node.key {
                idx = node.right;
            } else {
                return self.nodes[idx as usize].value.as_mut();
            }
        }
        None
    }

    /// Remove a chave, devolvendo o valor.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        let root = self.root;
        let (new_root, old) = self.remove_at(root, key);
        self.root = new_root;
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    fn remove_at(&mut self, idx: u32, key: u64) -> (u32, Option<V>) {
        if idx == NIL {
            return (NIL, None);
        }
        let node_key = self.nodes[idx as usize].key;
        let old;
        let mut idx = idx;
        if key < node_key {
            let left = self.nodes[idx as usize].left;
            let (new_left, o) = self.remove_at(left, key);
            self.nodes[idx as usize].left = new_left;
            old = o;
        } else if key > node_key {
            let right = self.nodes[idx as usize].right;
            let (new_right, o) = self.remove_at(right, key);
            self.nodes[idx as usize].right = new_right;
            old = o;
        } else {
            let (left, right) = {
                let node = &self.nodes[idx as usize];
                (node.left, node.right)
            };
            if left == NIL || right == NIL {
                let child = if left != NIL { left } else { right };
                let value = self.nodes[idx as usize].value.take();
                self.free.push(idx);
                return (child, value);
            }
            // Dois filhos: substituir pelo sucessor (menor da direita)
            let mut succ = right;
            while self.nodes[succ as usize].left != NIL {
                succ = self.nodes[succ as usize].left;
            }
            let succ_key = self.nodes[succ as usize].key;
            // Trocar chave/valor e remover o sucessor da subárvore direita
            self.nodes[idx as usize].key = succ_key;
            if idx != succ {
                let succ_value = self.nodes[succ as usize].value.take();
                let own = core::mem::replace(&mut self.nodes[idx as usize].value, succ_value);
                self.nodes[succ as usize].value = own;
            }
            let (new_right, o) = self.remove_at(right, succ_key);
            self.nodes[idx as usize].right = new_right;
            old = o;
        }
        (self.rebalance(idx), old)
    }

    /// Menor chave ≥ `key`
    pub fn lookup_ge(&self, key: u64) -> Option<(u64, &V)> {
        let mut idx = self.root;
        let mut best: Option<u32> = None;
        while idx != NIL {
            let node = &self.nodes[idx as usize];
            if node.key >= key {
                best = Some(idx);
                idx = node.left;
            } else {
                idx = node.right;
            }
        }
        best.and_then(|i| {
            let node = &self.nodes[i as usize];
            node.value.as_ref().map(|v| (node.key, v))
        })
    }

    /// Itera em ordem de chave
    pub fn iter(&self) -> AvlIter<'_, V> {
        let mut stack = Vec::new();
        let mut idx = self.root;
        while idx != NIL {
            stack.push(idx);
            idx = self.nodes[idx as usize].left;
        }
        AvlIter { tree: self, stack }
    }
}

pub struct AvlIter<'a, V> {
    tree: &'a AvlTree<V>,
    stack: Vec<u32>,
}

impl<'a, V> Iterator for AvlIter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let node = &self.tree.nodes[idx as usize];
        let mut child = node.right;
        while child != NIL {
            self.stack.push(child);
            child = self.tree.nodes[child as usize].left;
        }
        node.value.as_ref().map(|v| (node.key, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let mut tree = AvlTree::new();
        for key in [50u64, 20, 70, 10, 30, 60, 80, 25, 65] {
            assert!(tree.insert(key, key * 2).is_none());
        }
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.lookup(30), Some(&60));
        assert_eq!(tree.remove(20), Some(40));
        assert_eq!(tree.lookup(20), None);
        assert_eq!(tree.lookup(25), Some(&50));
        assert_eq!(tree.len(), 8);
    }

    #[test]
    fn test_insert_replaces() {
        let mut tree = AvlTree::new();
        assert!(tree.insert(1, "a").is_none());
        assert_eq!(tree.insert(1, "b"), Some("a"));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.lookup(1), Some(&"b"));
    }

    #[test]
    fn test_ordered_iteration() {
        let mut tree = AvlTree::new();
        for key in [5u64, 3, 8, 1, 4, 7, 9] {
            tree.insert(key, ());
        }
        let keys: alloc::vec::Vec<u64> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [1, 3, 4, 5, 7, 8, 9]);
    }

    #[test]
    fn test_lookup_ge() {
        let mut tree = AvlTree::new();
        for key in [10u64, 20, 30] {
            tree.insert(key, ());
        }
        assert_eq!(tree.lookup_ge(15).map(|(k, _)| k), Some(20));
        assert_eq!(tree.lookup_ge(20).map(|(k, _)| k), Some(20));
        assert_eq!(tree.lookup_ge(31), None);
    }

    #[test]
    fn test_sequential_stress() {
        let mut tree = AvlTree::new();
        for key in 0u64..512 {
            tree.insert(key, key);
        }
        for key in (0u64..512).step_by(2) {
            assert_eq!(tree.remove(key), Some(key));
        }
        assert_eq!(tree.len(), 256);
        for key in (1u64..512).step_by(2) {
            assert_eq!(tree.lookup(key), Some(&key));
        }
    }
}
