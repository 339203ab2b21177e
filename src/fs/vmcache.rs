//! Page cache de arquivo (`VmCache`)
//!
//! offset → página. O fault-in é serializado por página com a flag busy:
//! quem chega com a página em trânsito dorme e tenta de novo. O conteúdo
//! vem de `read_page`/`write_page` do filesystem dono do nó.

use crate::core::sched::WaitQueue;
use crate::fs::node::Node;
use crate::klib::AvlTree;
use crate::mm::{PAGE_SHIFT, PAGE_SIZE};
use crate::sync::Mutex;
use crate::{KResult, Status};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

enum Slot {
    /// Fault-in em andamento por outra thread
    Busy,
    Ready {
        data: Box<[u8]>,
        dirty: bool,
    },
}

/// Cache de páginas de um nó regular
pub struct VmCache {
    pages: Mutex<AvlTree<Slot>>,
    busy_wait: WaitQueue,
}

impl VmCache {
    pub const fn new() -> Self {
        Self {
            pages: Mutex::new("vmcache", AvlTree::new()),
            busy_wait: WaitQueue::new(),
        }
    }

    /// Roda `f` sobre a página `index`, trazendo-a do fs se preciso.
    fn with_page<R>(
        &self,
        node: &Arc<Node>,
        index: u64,
        f: impl FnOnce(&mut Box<[u8]>, &mut bool) -> R,
    ) -> KResult<R> {
        loop {
            {
                let mut pages = self.pages.lock();
                match pages.lookup_mut(index) {
                    Some(Slot::Busy) => {}
                    Some(Slot::Ready { data, dirty }) => return Ok(f(data, dirty)),
                    None => {
                        pages.insert(index, Slot::Busy);
                        drop(pages);
                        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
                        let result =
                            node.ops
                                .read_page(node, index << PAGE_SHIFT, &mut buf);
                        let mut pages = self.pages.lock();
                        match result {
                            // Curto é normal: o resto da página fica em zero
                            Ok(_) => {
                                pages.insert(index, Slot::Ready {
                                    data: buf,
                                    dirty: false,
                                });
                            }
                            Err(status) => {
                                pages.remove(index);
                                drop(pages);
                                self.busy_wait.wake_all();
                                return Err(status);
                            }
                        }
                        drop(pages);
                        self.busy_wait.wake_all();
                        continue;
                    }
                }
            }
            // Busy: esperar o fault-in do outro e reavaliar
            match self.busy_wait.sleep(-1, false) {
                Ok(()) => {}
                // Sem scheduler (boot cedo) ninguém compete; reavaliar direto
                Err(Status::NotSupported) => {}
                Err(status) => return Err(status),
            }
        }
    }

    /// Leitura via cache. Curto no fim do arquivo não é erro.
    pub fn read(&self, node: &Arc<Node>, req: &mut crate::fs::io::IoRequest) -> KResult<()> {
        let size = node.size();
        while !req.done() && req.position() < size {
            let position = req.position();
            let index = position >> PAGE_SHIFT;
            let page_off = (position & (PAGE_SIZE as u64 - 1)) as usize;
            let want = req
                .remaining()
                .min(PAGE_SIZE - page_off)
                .min((size - position) as usize);
            self.with_page(node, index, |data, _| -> KResult<()> {
                req.copy_out(&data[page_off..page_off + want])?;
                Ok(())
            })??;
        }
        Ok(())
    }

    /// Escrita via cache, write-through para o filesystem.
    pub fn write(&self, node: &Arc<Node>, req: &mut crate::fs::io::IoRequest) -> KResult<()> {
        while !req.done() {
            let position = req.position();
            let index = position >> PAGE_SHIFT;
            let page_off = (position & (PAGE_SIZE as u64 - 1)) as usize;
            let want = req.remaining().min(PAGE_SIZE - page_off);
            self.with_page(node, index, |data, dirty| -> KResult<usize> {
                let n = req.copy_in(&mut data[page_off..page_off + want])?;
                *dirty = true;
                node.ops
                    .write_page(node, index << PAGE_SHIFT, &data[..])?;
                *dirty = false;
                Ok(n)
            })??;
            // Escrever além do fim estende o arquivo
            let end = req.position();
            let mut inner = node.inner.lock();
            if end > inner.size {
                inner.size = end;
            }
        }
        Ok(())
    }

    /// Ajusta o cache a um novo tamanho: páginas além dele caem; o resto da
    /// última página é zerado. Extensão zero-preenche por construção.
    pub fn resize(&self, new_size: u64) {
        let keep_pages = new_size.div_ceil(PAGE_SIZE as u64);
        let mut pages = self.pages.lock();
        let doomed: Vec<u64> = pages
            .iter()
            .filter(|(index, _)| *index >= keep_pages)
            .map(|(index, _)| index)
            .collect();
        for index in doomed {
            pages.remove(index);
        }
        let tail = (new_size & (PAGE_SIZE as u64 - 1)) as usize;
        if tail > 0 {
            if let Some(Slot::Ready { data, .. }) = pages.lookup_mut(keep_pages - 1) {
                data[tail..].fill(0);
            }
        }
    }

    /// Páginas residentes (diagnóstico).
    pub fn resident(&self) -> usize {
        self.pages.lock().len()
    }
}
