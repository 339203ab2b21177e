//! Tabela de handles por processo
//!
//! Handles são índices pequenos alocados pelo bitmap; a AVL guarda a
//! entrada (objeto + flags). A tabela inteira fica atrás de um mutex
//! dormível: operações de handle nunca rodam em contexto de interrupção.

use crate::core::object::KernelObject;
use crate::klib::avl::AvlTree;
use crate::sync::Mutex;
use crate::{KResult, Status};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

/// Handle reservado para "nenhum"
pub const INVALID_HANDLE: u32 = u32::MAX;
/// Limite de handles por processo
pub const MAX_HANDLES: usize = 1024;

const BITMAP_WORDS: usize = MAX_HANDLES / 64;

bitflags! {
    /// Flags de uma entrada da tabela
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u32 {
        /// Copiado para o filho em process_create
        const INHERITABLE = 1 << 0;
    }
}

/// Uma entrada da tabela
#[derive(Clone)]
pub struct HandleEntry {
    pub object: Arc<dyn KernelObject>,
    pub flags: HandleFlags,
}

impl core::fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandleEntry")
            .field("otype", &self.object.otype())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Modo de alocação do destino em `duplicate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMode {
    /// Qualquer índice livre
    Allocate,
    /// Índice exato; fecha o que estiver lá
    Exact(u32),
}

struct TableInner {
    bitmap: [u64; BITMAP_WORDS],
    entries: AvlTree<HandleEntry>,
    /// Ponto de partida da busca por índice livre
    hint: usize,
}

impl TableInner {
    fn take_slot(&mut self) -> Option<u32> {
        for offset in 0..BITMAP_WORDS {
            let word_index = (self.hint + offset) % BITMAP_WORDS;
            let word = self.bitmap[word_index];
            if word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                self.bitmap[word_index] |= 1 << bit;
                self.hint = word_index;
                return Some((word_index * 64 + bit) as u32);
            }
        }
        None
    }

    fn mark_slot(&mut self, handle: u32) {
        let index = handle as usize;
        self.bitmap[index / 64] |= 1 << (index % 64);
    }

    fn release_slot(&mut self, handle: u32) {
        let index = handle as usize;
        self.bitmap[index / 64] &= !(1 << (index % 64));
        self.hint = index / 64;
    }

    fn slot_used(&self, handle: u32) -> bool {
        let index = handle as usize;
        self.bitmap[index / 64] & (1 << (index % 64)) != 0
    }
}

/// Tabela de handles
pub struct HandleTable {
    inner: Mutex<TableInner>,
}

impl HandleTable {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new("handle_table", TableInner {
                bitmap: [0; BITMAP_WORDS],
                entries: AvlTree::new(),
                hint: 0,
            }),
        }
    }

    /// Insere um objeto, devolvendo o novo handle.
    pub fn insert(&self, object: Arc<dyn KernelObject>, flags: HandleFlags) -> KResult<u32> {
        let mut inner = self.inner.lock();
        let handle = inner.take_slot().ok_or(Status::NoHandles)?;
        inner.entries.insert(handle as u64, HandleEntry { object, flags });
        Ok(handle)
    }

    /// Insere num índice específico (mapa de handles do process_create).
    pub fn insert_at(
        &self,
        handle: u32,
        object: Arc<dyn KernelObject>,
        flags: HandleFlags,
    ) -> KResult<()> {
        if handle as usize >= MAX_HANDLES {
            return Err(Status::InvalidArg);
        }
        let mut inner = self.inner.lock();
        if inner.slot_used(handle) {
            return Err(Status::AlreadyExists);
        }
        inner.mark_slot(handle);
        inner.entries.insert(handle as u64, HandleEntry { object, flags });
        Ok(())
    }

    /// Entrada completa de um handle.
    pub fn lookup(&self, handle: u32) -> KResult<HandleEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .lookup(handle as u64)
            .cloned()
            .ok_or(Status::InvalidHandle)
    }

    /// Só o objeto.
    pub fn lookup_object(&self, handle: u32) -> KResult<Arc<dyn KernelObject>> {
        Ok(self.lookup(handle)?.object)
    }

    /// Objeto com verificação de tipo.
    pub fn lookup_typed(
        &self,
        handle: u32,
        otype: crate::core::object::ObjectType,
    ) -> KResult<Arc<dyn KernelObject>> {
        let object = self.lookup_object(handle)?;
        if object.otype() != otype {
            return Err(Status::InvalidHandle);
        }
        Ok(object)
    }

    /// Objeto com o tipo concreto pedido. A etiqueta de tipo é verificada
    /// antes do downcast; os dois falham como `InvalidHandle`.
    pub fn lookup_concrete<T: KernelObject + 'static>(
        &self,
        handle: u32,
        otype: crate::core::object::ObjectType,
    ) -> KResult<Arc<T>> {
        let object = self.lookup_typed(handle, otype)?;
        object
            .as_any()
            .downcast::<T>()
            .map_err(|_| Status::InvalidHandle)
    }

    /// Fecha um handle. A última referência ao objeto dispara `on_close`.
    pub fn close(&self, handle: u32) -> KResult<()> {
        let entry = {
            let mut inner = self.inner.lock();
            let entry = inner.entries.remove(handle as u64).ok_or(Status::InvalidHandle)?;
            inner.release_slot(handle);
            entry
        };
        close_entry(entry);
        Ok(())
    }

    /// Duplica um handle. `Exact` fecha o que ocupava o destino.
    pub fn duplicate(
        &self,
        handle: u32,
        mode: DuplicateMode,
        flags: HandleFlags,
    ) -> KResult<u32> {
        let mut closed = None;
        let new_handle = {
            let mut inner = self.inner.lock();
            let entry = inner
                .entries
                .lookup(handle as u64)
                .cloned()
                .ok_or(Status::InvalidHandle)?;
            let entry = HandleEntry {
                object: entry.object,
                flags,
            };
            match mode {
                DuplicateMode::Allocate => {
                    let new_handle = inner.take_slot().ok_or(Status::NoHandles)?;
                    inner.entries.insert(new_handle as u64, entry);
                    new_handle
                }
                DuplicateMode::Exact(target) => {
                    if target as usize >= MAX_HANDLES || target == handle {
                        return Err(Status::InvalidArg);
                    }
                    closed = inner.entries.remove(target as u64);
                    if closed.is_none() {
                        inner.mark_slot(target);
                    }
                    inner.entries.insert(target as u64, entry);
                    target
                }
            }
        };
        if let Some(entry) = closed {
            close_entry(entry);
        }
        Ok(new_handle)
    }

    /// Troca as flags de um handle existente.
    pub fn set_flags(&self, handle: u32, flags: HandleFlags) -> KResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .lookup_mut(handle as u64)
            .ok_or(Status::InvalidHandle)?;
        entry.flags = flags;
        Ok(())
    }

    /// Entradas marcadas INHERITABLE, com seus índices (process_create).
    pub fn inheritable_entries(&self) -> Vec<(u32, HandleEntry)> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.flags.contains(HandleFlags::INHERITABLE))
            .map(|(handle, entry)| (handle as u32, entry.clone()))
            .collect()
    }

    /// Fecha tudo (morte do processo).
    pub fn clear(&self) {
        let entries: Vec<HandleEntry> = {
            let mut inner = self.inner.lock();
            let handles: Vec<u64> = inner.entries.iter().map(|(handle, _)| handle).collect();
            let mut taken = Vec::with_capacity(handles.len());
            for handle in handles {
                if let Some(entry) = inner.entries.remove(handle) {
                    taken.push(entry);
                }
            }
            inner.bitmap = [0; BITMAP_WORDS];
            inner.hint = 0;
            taken
        };
        for entry in entries {
            close_entry(entry);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

fn close_entry(entry: HandleEntry) {
    let object = entry.object;
    // Dois strong counts aqui: o nosso e o de quem mais segurar. Com só o
    // nosso, este era o último handle vivo.
    if Arc::strong_count(&object) == 1 {
        object.on_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::ObjectType;
    use core::sync::atomic::{AtomicU32, Ordering};

    struct Dummy {
        closes: Arc<AtomicU32>,
    }

    impl Dummy {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closes: Arc::new(AtomicU32::new(0)),
            })
        }
    }

    impl KernelObject for Dummy {
        fn otype(&self) -> ObjectType {
            ObjectType::Timer
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
            self
        }

        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn insert_lookup_close() {
        let table = HandleTable::new();
        let object = Dummy::new();
        let handle = table.insert(object.clone(), HandleFlags::empty()).unwrap();
        assert!(table.lookup_object(handle).is_ok());
        table.close(handle).unwrap();
        assert_eq!(table.lookup(handle).unwrap_err(), Status::InvalidHandle);
    }

    #[test]
    fn close_reports_last_handle() {
        let table = HandleTable::new();
        let object = Dummy::new();
        let first = table.insert(object.clone(), HandleFlags::empty()).unwrap();
        let second = table
            .duplicate(first, DuplicateMode::Allocate, HandleFlags::empty())
            .unwrap();
        let closes = object.closes.clone();
        drop(object);
        table.close(first).unwrap();
        assert_eq!(closes.load(Ordering::Relaxed), 0);
        table.close(second).unwrap();
        assert_eq!(closes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn duplicate_exact_replaces() {
        let table = HandleTable::new();
        let a = table.insert(Dummy::new(), HandleFlags::empty()).unwrap();
        let b = table.insert(Dummy::new(), HandleFlags::empty()).unwrap();
        let target = table
            .duplicate(a, DuplicateMode::Exact(b), HandleFlags::INHERITABLE)
            .unwrap();
        assert_eq!(target, b);
        assert!(table.lookup(b).unwrap().flags.contains(HandleFlags::INHERITABLE));
    }

    #[test]
    fn duplicate_exact_self_rejected() {
        let table = HandleTable::new();
        let a = table.insert(Dummy::new(), HandleFlags::empty()).unwrap();
        assert_eq!(
            table
                .duplicate(a, DuplicateMode::Exact(a), HandleFlags::empty())
                .unwrap_err(),
            Status::InvalidArg
        );
    }

    #[test]
    fn inheritable_listing() {
        let table = HandleTable::new();
        let a = table.insert(Dummy::new(), HandleFlags::INHERITABLE).unwrap();
        let _b = table.insert(Dummy::new(), HandleFlags::empty()).unwrap();
        let inherited = table.inheritable_entries();
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].0, a);
    }

    #[test]
    fn exhaustion() {
        let table = HandleTable::new();
        for _ in 0..MAX_HANDLES {
            table.insert(Dummy::new(), HandleFlags::empty()).unwrap();
        }
        assert_eq!(
            table.insert(Dummy::new(), HandleFlags::empty()).unwrap_err(),
            Status::NoHandles
        );
    }
}
