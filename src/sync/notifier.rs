//! Notificadores
//!
//! Lista de callbacks (função, dado) disparados juntos. Registros
//! duplicados são permitidos e disparam mais de uma vez. O mutex interno é
//! recursivo: um callback pode desregistrar outros durante o `run`.

use crate::sync::Mutex;
use alloc::vec::Vec;

/// Assinatura dos callbacks: (dado do registro, dado do disparo)
pub type NotifierFn = fn(usize, usize);

/// Lista de callbacks de um evento
pub struct Notifier {
    entries: Mutex<Vec<(NotifierFn, usize)>>,
}

impl Notifier {
    pub const fn new(name: &'static str) -> Self {
        Self {
            entries: Mutex::new_recursive(name, Vec::new()),
        }
    }

    /// Registra um callback. Duplicatas são aceitas.
    pub fn register(&self, func: NotifierFn, data: usize) {
        self.entries.lock().push((func, data));
    }

    /// Remove um registro igual a (func, data). Só o primeiro encontrado.
    pub fn unregister(&self, func: NotifierFn, data: usize) -> bool {
        let mut entries = self.entries.lock();
        if let Some(position) = entries
            .iter()
            .position(|&(f, d)| f as usize == func as usize && d == data)
        {
            entries.remove(position);
            true
        } else {
            false
        }
    }

    /// Dispara todos os callbacks com `caller_data`.
    ///
    /// A lista é percorrida por índice sob o mutex recursivo, então um
    /// callback pode desregistrar irmãos ainda não visitados.
    pub fn run(&self, caller_data: usize) {
        let mut index = 0;
        loop {
            // Relock por iteração: o callback pode mexer na lista
            let entry = {
                let entries = self.entries.lock();
                if index >= entries.len() {
                    break;
                }
                entries[index]
            };
            (entry.0)(entry.1, caller_data);
            index += 1;
        }
    }

    /// Dispara e esvazia a lista (notificações de uso único, como morte de
    /// processo).
    pub fn run_and_drain(&self, caller_data: usize) {
        self.run(caller_data);
        self.entries.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
