//! Classe de rede
//!
//! Um `NetDevice` embrulha o device da árvore com tipo de enlace, endereço
//! de hardware, MTU e uma interface. A recepção entra em contexto de IRQ,
//! vai para uma fila e o callback do consumidor roda via DPC, fora da
//! interrupção.

use crate::drivers::base::Device;
use crate::sync::{Mutex, Spinlock};
use crate::{kinfo, KResult, Status};
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

/// Tipo de enlace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
}

/// Endereço de hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

/// Um endereço de camada de rede atribuído à interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfAddr {
    /// IPv4 nos 4 primeiros bytes, IPv6 nos 16
    pub bytes: [u8; 16],
    pub prefix: u8,
}

/// Frames na fila de recepção no máximo
const RX_QUEUE_MAX: usize = 128;

/// Operações do driver de rede
pub trait NetDeviceOps: Send + Sync {
    fn up(&self, net: &NetDevice) -> KResult<()>;
    fn down(&self, net: &NetDevice) -> KResult<()>;
    fn transmit(&self, net: &NetDevice, frame: &[u8]) -> KResult<()>;
}

/// Callback de recepção, fora de contexto de IRQ
pub type RxHandler = fn(&NetDevice, &[u8]);

/// A interface vista pelas camadas superiores
pub struct Interface {
    pub name: String,
    addrs: Mutex<Vec<IfAddr>>,
}

impl Interface {
    pub fn add_addr(&self, addr: IfAddr) {
        self.addrs.lock().push(addr);
    }

    pub fn remove_addr(&self, addr: &IfAddr) {
        self.addrs.lock().retain(|a| a != addr);
    }

    pub fn addrs(&self) -> Vec<IfAddr> {
        self.addrs.lock().clone()
    }
}

/// Um device de rede registrado
pub struct NetDevice {
    pub device: Arc<Device>,
    pub link: LinkType,
    pub hw_addr: MacAddr,
    pub mtu: u32,
    pub iface: Interface,
    ops: Arc<dyn NetDeviceOps>,
    up: AtomicBool,
    rx_queue: Spinlock<VecDeque<Vec<u8>>>,
    rx_handler: Spinlock<Option<RxHandler>>,
}

static INTERFACES: Mutex<Vec<Arc<NetDevice>>> = Mutex::new("net_ifaces", Vec::new());

impl NetDevice {
    /// Registra o device na lista de interfaces.
    pub fn register(
        device: Arc<Device>,
        name: &str,
        hw_addr: MacAddr,
        mtu: u32,
        ops: Arc<dyn NetDeviceOps>,
    ) -> Arc<Self> {
        let net = Arc::new(Self {
            device,
            link: LinkType::Ethernet,
            hw_addr,
            mtu,
            iface: Interface {
                name: String::from(name),
                addrs: Mutex::new("if_addrs", Vec::new()),
            },
            ops,
            up: AtomicBool::new(false),
            rx_queue: Spinlock::new("net_rx", VecDeque::new()),
            rx_handler: Spinlock::new("net_rx_cb", None),
        });
        INTERFACES.lock().push(net.clone());
        kinfo!("net: interface registrada, mtu=", mtu);
        net
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn up(&self) -> KResult<()> {
        self.ops.up(self)?;
        self.up.store(true, Ordering::Release);
        Ok(())
    }

    pub fn down(&self) -> KResult<()> {
        self.ops.down(self)?;
        self.up.store(false, Ordering::Release);
        Ok(())
    }

    /// Transmite um frame pronto de enlace.
    pub fn transmit(&self, frame: &[u8]) -> KResult<()> {
        if !self.is_up() {
            return Err(Status::NetDown);
        }
        if frame.len() > self.mtu as usize {
            return Err(Status::TooLarge);
        }
        self.ops.transmit(self, frame)
    }

    /// Define o consumidor dos frames recebidos.
    pub fn set_rx_handler(&self, handler: Option<RxHandler>) {
        *self.rx_handler.lock() = handler;
    }

    /// Entrada de recepção, chamável de contexto de IRQ: enfileira e adia
    /// a entrega. Fila cheia descarta o mais antigo.
    pub fn receive(self: &Arc<Self>, frame: &[u8]) {
        {
            let mut queue = self.rx_queue.lock();
            if queue.len() >= RX_QUEUE_MAX {
                queue.pop_front();
            }
            queue.push_back(frame.to_vec());
        }
        if let Some(index) = index_of(self) {
            crate::core::work::queue(rx_dpc, index);
        }
    }

    fn drain_rx(&self) {
        let handler = *self.rx_handler.lock();
        loop {
            let frame = self.rx_queue.lock().pop_front();
            match frame {
                Some(frame) => {
                    if let Some(handler) = handler {
                        handler(self, &frame);
                    }
                }
                None => break,
            }
        }
    }
}

fn index_of(net: &Arc<NetDevice>) -> Option<usize> {
    INTERFACES
        .lock()
        .iter()
        .position(|iface| Arc::ptr_eq(iface, net))
}

fn rx_dpc(index: usize) {
    let net = INTERFACES.lock().get(index).cloned();
    if let Some(net) = net {
        net.drain_rx();
    }
}

/// Interfaces registradas.
pub fn interfaces() -> Vec<Arc<NetDevice>> {
    INTERFACES.lock().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static TX: AtomicU32 = AtomicU32::new(0);

    struct LoopNet;

    impl NetDeviceOps for LoopNet {
        fn up(&self, _net: &NetDevice) -> KResult<()> {
            Ok(())
        }

        fn down(&self, _net: &NetDevice) -> KResult<()> {
            Ok(())
        }

        fn transmit(&self, _net: &NetDevice, _frame: &[u8]) -> KResult<()> {
            TX.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sample() -> Arc<NetDevice> {
        let parent = crate::drivers::base::virtual_dir();
        let device = crate::drivers::base::DeviceBuilder::new("netloop", &parent)
            .class("net")
            .publish()
            .unwrap();
        NetDevice::register(device, "lo0", MacAddr([0; 6]), 1500, Arc::new(LoopNet))
    }

    #[test]
    fn transmit_respects_state_and_mtu() {
        let net = sample();
        assert_eq!(net.transmit(&[0u8; 64]), Err(Status::NetDown));
        net.up().unwrap();
        net.transmit(&[0u8; 64]).unwrap();
        assert_eq!(TX.load(Ordering::Relaxed), 1);
        assert_eq!(net.transmit(&[0u8; 2000]), Err(Status::TooLarge));
        net.down().unwrap();
        assert_eq!(net.transmit(&[0u8; 64]), Err(Status::NetDown));

        net.iface.add_addr(IfAddr {
            bytes: [10, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            prefix: 24,
        });
        assert_eq!(net.iface.addrs().len(), 1);
    }
}
