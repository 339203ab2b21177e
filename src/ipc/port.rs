//! Ports de IPC
//!
//! Registro global id → port. Abrir um port cria uma conexão e deixa o
//! endpoint do servidor na fila de pendentes; `listen` do dono aceita uma
//! por vez. Ports com id fixo exigem a capability IPC_PORT.

use crate::core::object::{EventList, EventRegistration, KernelObject, ObjectType};
use crate::core::process::{Capabilities, Pid};
use crate::ipc::connection::{self, ConnEnd};
use crate::klib::AvlTree;
use crate::sync::{Semaphore, Spinlock};
use crate::{kdebug, KResult, Status};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// Id de port
pub type PortId = u64;

/// Evento: conexão pendente aguardando listen
pub const EVENT_CONNECTION: u32 = 0;

/// Conexões pendentes por port
pub const MAX_PENDING: usize = 32;

/// Ids dinâmicos começam aqui; abaixo ficam os well-known fixos
const DYNAMIC_BASE: u64 = 0x1000;

static NEXT_ID: AtomicU64 = AtomicU64::new(DYNAMIC_BASE);
static PORTS: Spinlock<AvlTree<Arc<Port>>> = Spinlock::new("port_table", AvlTree::new());

/// Um port de IPC
pub struct Port {
    pub id: PortId,
    pub owner: Pid,
    pending: Spinlock<VecDeque<Arc<ConnEnd>>>,
    ready: Semaphore,
    events: EventList,
}

/// Cria um port. `fixed_id` abaixo da faixa dinâmica exige IPC_PORT.
pub fn create(owner: Pid, fixed_id: Option<PortId>) -> KResult<Arc<Port>> {
    let id = match fixed_id {
        Some(id) => {
            if id >= DYNAMIC_BASE {
                return Err(Status::InvalidArg);
            }
            if let Some(process) = crate::core::process::lookup(owner) {
                process.token().require(Capabilities::IPC_PORT)?;
            }
            id
        }
        None => NEXT_ID.fetch_add(1, Ordering::Relaxed),
    };
    let port = Arc::new(Port {
        id,
        owner,
        pending: Spinlock::new("port_pending", VecDeque::new()),
        ready: Semaphore::new(0),
        events: EventList::new(),
    });
    {
        let mut ports = PORTS.lock();
        if ports.lookup(id).is_some() {
            return Err(Status::AlreadyExists);
        }
        ports.insert(id, port.clone());
    }
    kdebug!("port criado, id=", id);
    Ok(port)
}

/// Busca por id.
pub fn lookup(id: PortId) -> Option<Arc<Port>> {
    PORTS.lock().lookup(id).cloned()
}

/// Abre uma conexão com o port. O endpoint do cliente volta na hora; o do
/// servidor espera um `listen`.
pub fn open(id: PortId) -> KResult<Arc<ConnEnd>> {
    let port = lookup(id).ok_or(Status::NotFound)?;
    let (client, server) = connection::pair();
    {
        let mut pending = port.pending.lock();
        if pending.len() >= MAX_PENDING {
            return Err(Status::WouldBlock);
        }
        pending.push_back(server);
    }
    port.ready.up(1);
    port.events.signal(EVENT_CONNECTION, 0);
    Ok(client)
}

impl Port {
    /// Aceita a próxima conexão pendente. Só o processo dono escuta.
    pub fn listen(&self, caller: Pid, timeout_ns: i64) -> KResult<Arc<ConnEnd>> {
        if caller != self.owner {
            return Err(Status::PermDenied);
        }
        loop {
            if let Some(server) = self.pending.lock().pop_front() {
                return Ok(server);
            }
            self.ready.down(timeout_ns)?;
        }
    }

    /// Conexões aguardando aceitação.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Remove o port do registro. Conexões pendentes são penduradas.
pub fn destroy(id: PortId, caller: Pid) -> KResult<()> {
    let port = {
        let mut ports = PORTS.lock();
        let port = ports.lookup(id).cloned().ok_or(Status::NotFound)?;
        if port.owner != caller {
            return Err(Status::PermDenied);
        }
        ports.remove(id);
        port
    };
    let pending: VecDeque<Arc<ConnEnd>> = {
        let mut queue = port.pending.lock();
        core::mem::take(&mut *queue)
    };
    for server in pending {
        server.on_close();
    }
    port.events.error_all();
    Ok(())
}

impl KernelObject for Port {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Port
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        if reg.event_id != EVENT_CONNECTION {
            return Err(Status::InvalidEvent);
        }
        self.events.attach(reg.clone());
        if !reg.wants_edge() && self.pending_count() > 0 {
            reg.signal(0);
            if reg.oneshot() {
                self.events.detach(reg);
            }
        }
        Ok(())
    }

    fn detach_event(&self, reg: &Arc<EventRegistration>) {
        self.events.detach(reg);
    }

    fn on_close(&self) {
        let _ = destroy(self.id, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::Message;
    use alloc::vec;

    #[test]
    fn open_then_listen() {
        let port = create(1, None).unwrap();
        let client = open(port.id).unwrap();
        let server = port.listen(1, 0).unwrap();

        client
            .send(Message::new(3, vec![1, 2]).unwrap())
            .unwrap();
        assert_eq!(server.receive(0).unwrap().mtype, 3);
        destroy(port.id, 1).unwrap();
    }

    #[test]
    fn listen_requires_ownership() {
        let port = create(1, None).unwrap();
        assert_eq!(port.listen(2, 0).unwrap_err(), Status::PermDenied);
        destroy(port.id, 1).unwrap();
    }

    #[test]
    fn open_unknown_port() {
        assert_eq!(open(0xFFFF_FFFF).unwrap_err(), Status::NotFound);
    }

    #[test]
    fn destroy_hangs_pending() {
        let port = create(1, None).unwrap();
        let client = open(port.id).unwrap();
        destroy(port.id, 1).unwrap();
        assert!(client.hungup());
    }
}
