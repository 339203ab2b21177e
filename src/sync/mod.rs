//! Primitivas de sincronização
//!
//! Ordem de travamento: código segurando um spinlock nunca pode adquirir um
//! mutex. No VFS a ordem é lista de mounts → mount → node → cache de
//! entradas → cache de dados.

pub mod mutex;
pub mod notifier;
pub mod semaphore;
pub mod spinlock;

pub use mutex::Mutex;
pub use notifier::Notifier;
pub use semaphore::Semaphore;
pub use spinlock::{Spinlock, SpinlockGuard};
