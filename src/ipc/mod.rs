//! IPC: ports, conexões e mensagens tipadas
//!
//! Um port é o ponto de encontro: o dono escuta, qualquer um abre. Abrir
//! cria uma conexão de dois endpoints com filas FIFO independentes por
//! direção. O payload é opaco; o formato tipado de `message` é uma
//! convenção em cima dele.

pub mod connection;
pub mod message;
pub mod port;

pub use connection::{ConnEnd, EVENT_HANGUP, EVENT_MESSAGE};
pub use message::{Message, MessageReader, MessageWriter};
pub use port::{Port, PortId};
