//! Conexões de IPC
//!
//! Uma conexão tem dois endpoints; cada um carrega a fila FIFO do que lhe
//! foi enviado. Fechar um lado marca o outro como pendurado: o peer ainda
//! drena o que já está na fila e só então vê `ConnHungup`.

use crate::core::object::{EventList, EventRegistration, KernelObject, ObjectType};
use crate::ipc::message::Message;
use crate::sync::{Semaphore, Spinlock};
use crate::{KResult, Status};
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Evento: mensagem disponível; data = tipo da mensagem
pub const EVENT_MESSAGE: u32 = 0;
/// Evento: o outro lado fechou
pub const EVENT_HANGUP: u32 = 1;

/// Mensagens enfileiradas por endpoint
pub const MAX_QUEUE: usize = 64;

struct EndState {
    queue: VecDeque<Message>,
    /// O outro lado fechou
    peer_closed: bool,
}

struct End {
    state: Spinlock<EndState>,
    /// Um up por mensagem ou por hangup
    ready: Semaphore,
    events: EventList,
}

impl End {
    fn new() -> Self {
        Self {
            state: Spinlock::new("conn_end", EndState {
                queue: VecDeque::new(),
                peer_closed: false,
            }),
            ready: Semaphore::new(0),
            events: EventList::new(),
        }
    }
}

struct Connection {
    ends: [End; 2],
}

/// Um endpoint de conexão, exposto via handle
pub struct ConnEnd {
    conn: Arc<Connection>,
    side: usize,
}

impl core::fmt::Debug for ConnEnd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnEnd")
            .field("side", &self.side)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Cria uma conexão nova e devolve os dois endpoints.
pub fn pair() -> (Arc<ConnEnd>, Arc<ConnEnd>) {
    let conn = Arc::new(Connection {
        ends: [End::new(), End::new()],
    });
    (
        Arc::new(ConnEnd {
            conn: conn.clone(),
            side: 0,
        }),
        Arc::new(ConnEnd { conn, side: 1 }),
    )
}

impl ConnEnd {
    fn me(&self) -> &End {
        &self.conn.ends[self.side]
    }

    fn peer(&self) -> &End {
        &self.conn.ends[1 - self.side]
    }

    /// Envia uma mensagem para o outro lado.
    ///
    /// `WouldBlock` com a fila do peer cheia; `ConnHungup` se o peer fechou.
    pub fn send(&self, msg: Message) -> KResult<()> {
        let mtype = msg.mtype;
        {
            let mut state = self.me().state.lock();
            if state.peer_closed {
                return Err(Status::ConnHungup);
            }
            drop(state);
            let mut peer = self.peer().state.lock();
            if peer.queue.len() >= MAX_QUEUE {
                return Err(Status::WouldBlock);
            }
            peer.queue.push_back(msg);
        }
        self.peer().ready.up(1);
        self.peer().events.signal(EVENT_MESSAGE, mtype as u64);
        Ok(())
    }

    /// Recebe a próxima mensagem, dormindo até `timeout_ns`.
    ///
    /// A fila é drenada antes do hangup ser reportado.
    pub fn receive(&self, timeout_ns: i64) -> KResult<Message> {
        loop {
            {
                let mut state = self.me().state.lock();
                if let Some(msg) = state.queue.pop_front() {
                    return Ok(msg);
                }
                if state.peer_closed {
                    drop(state);
                    // O close posta um único crédito; repassar adiante
                    // acorda em cascata os outros receivers bloqueados
                    self.me().ready.up(1);
                    return Err(Status::ConnHungup);
                }
            }
            self.me().ready.down(timeout_ns)?;
        }
    }

    /// (tipo, tamanho) da próxima mensagem, sem consumir.
    pub fn peek(&self) -> Option<(u32, usize)> {
        let state = self.me().state.lock();
        state
            .queue
            .front()
            .map(|msg| (msg.mtype, msg.payload.len()))
    }

    /// Mensagens aguardando neste endpoint.
    pub fn pending(&self) -> usize {
        self.me().state.lock().queue.len()
    }

    /// O outro lado já fechou?
    pub fn hungup(&self) -> bool {
        self.me().state.lock().peer_closed
    }
}

impl KernelObject for ConnEnd {
    fn as_any(self: Arc<Self>) -> Arc<dyn core::any::Any + Send + Sync> {
        self
    }

    fn otype(&self) -> ObjectType {
        ObjectType::Connection
    }

    fn attach_event(&self, reg: &Arc<EventRegistration>) -> KResult<()> {
        let end = self.me();
        match reg.event_id {
            EVENT_MESSAGE => {
                end.events.attach(reg.clone());
                if !reg.wants_edge() {
                    let front = self.peek();
                    if let Some((mtype, _)) = front {
                        reg.signal(mtype as u64);
                        if reg.oneshot() {
                            end.events.detach(reg);
                        }
                    }
                }
                Ok(())
            }
            EVENT_HANGUP => {
                end.events.attach(reg.clone());
                if !reg.wants_edge() && self.hungup() {
                    reg.signal(0);
                    if reg.oneshot() {
                        end.events.detach(reg);
                    }
                }
                Ok(())
            }
            _ => Err(Status::InvalidEvent),
        }
    }

    fn detach_event(&self, reg: &Arc<EventRegistration>) {
        self.me().events.detach(reg);
    }

    /// Último handle deste endpoint fechado: pendurar o peer.
    fn on_close(&self) {
        {
            let mut peer = self.peer().state.lock();
            peer.peer_closed = true;
        }
        // Acordar receivers bloqueados; eles drenam a fila e veem o hangup
        self.peer().ready.up(1);
        self.peer().events.signal(EVENT_HANGUP, 0);
        self.me().events.error_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::Message;
    use alloc::vec;

    fn msg(mtype: u32) -> Message {
        Message::new(mtype, vec![0xAB; 4]).unwrap()
    }

    #[test]
    fn fifo_per_direction() {
        let (a, b) = pair();
        a.send(msg(1)).unwrap();
        a.send(msg(2)).unwrap();
        b.send(msg(9)).unwrap();

        assert_eq!(b.receive(0).unwrap().mtype, 1);
        assert_eq!(b.receive(0).unwrap().mtype, 2);
        assert_eq!(a.receive(0).unwrap().mtype, 9);
    }

    #[test]
    fn peek_does_not_consume() {
        let (a, b) = pair();
        a.send(msg(5)).unwrap();
        assert_eq!(b.peek(), Some((5, 4)));
        assert_eq!(b.pending(), 1);
        assert_eq!(b.receive(0).unwrap().mtype, 5);
        assert_eq!(b.peek(), None);
    }

    #[test]
    fn drain_before_hangup() {
        let (a, b) = pair();
        a.send(msg(1)).unwrap();
        a.on_close();
        // A mensagem pendente sai antes do hangup aparecer
        assert_eq!(b.receive(0).unwrap().mtype, 1);
        assert_eq!(b.receive(0).unwrap_err(), Status::ConnHungup);
    }

    #[test]
    fn send_after_hangup() {
        let (a, b) = pair();
        b.on_close();
        assert_eq!(a.send(msg(1)).unwrap_err(), Status::ConnHungup);
        assert!(a.hungup());
    }

    #[test]
    fn bounded_queue() {
        let (a, _b) = pair();
        for i in 0..MAX_QUEUE {
            a.send(msg(i as u32)).unwrap();
        }
        assert_eq!(a.send(msg(0)).unwrap_err(), Status::WouldBlock);
    }
}
