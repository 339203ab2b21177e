//! Barramentos
//!
//! Um `BusType` decide o casamento device↔driver e faz a inicialização.
//! O probe corre nos dois sentidos: device novo testa todos os drivers do
//! barramento; driver novo testa todos os devices já publicados da classe
//! do barramento.

use crate::drivers::base::{self, Device};
use crate::sync::Mutex;
use crate::{kinfo, kwarn, KResult, Status};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Um driver registrável num barramento
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;
}

/// Um tipo de barramento
pub trait BusType: Send + Sync {
    fn name(&self) -> &str;

    /// Classe de devices que este barramento atende.
    fn device_class(&self) -> &str;

    /// O driver serve para o device?
    fn match_device(&self, device: &Arc<Device>, driver: &Arc<dyn Driver>) -> bool;

    /// Liga o driver no device.
    fn init_device(&self, device: &Arc<Device>, driver: &Arc<dyn Driver>) -> KResult<()>;
}

struct Bus {
    btype: &'static dyn BusType,
    drivers: Vec<Arc<dyn Driver>>,
}

static BUSES: Mutex<Vec<Bus>> = Mutex::new("bus_list", Vec::new());

/// Registra um tipo de barramento. Nomes são únicos.
pub fn register_bus(btype: &'static dyn BusType) -> KResult<()> {
    let mut buses = BUSES.lock();
    if buses.iter().any(|bus| bus.btype.name() == btype.name()) {
        return Err(Status::AlreadyExists);
    }
    buses.push(Bus {
        btype,
        drivers: Vec::new(),
    });
    Ok(())
}

fn probe(btype: &'static dyn BusType, device: &Arc<Device>, driver: &Arc<dyn Driver>) -> bool {
    if !btype.match_device(device, driver) {
        return false;
    }
    match btype.init_device(device, driver) {
        Ok(()) => true,
        Err(status) => {
            kwarn!("bus: init_device falhou, status=", status.as_isize() as u64);
            false
        }
    }
}

/// Registra um driver e o testa contra os devices existentes da classe do
/// barramento.
pub fn register_driver(bus_name: &str, driver: Arc<dyn Driver>) -> KResult<()> {
    let btype = {
        let mut buses = BUSES.lock();
        let bus = buses
            .iter_mut()
            .find(|bus| bus.btype.name() == bus_name)
            .ok_or(Status::NotFound)?;
        bus.drivers.push(driver.clone());
        bus.btype
    };
    let mut bound = 0u64;
    for device in base::collect_class(btype.device_class()) {
        if probe(btype, &device, &driver) {
            bound += 1;
        }
    }
    kinfo!("bus: driver registrado, devices ligados=", bound);
    Ok(())
}

/// Chamado pelo publish da árvore: testa o device novo contra os drivers
/// dos barramentos que atendem a classe dele.
pub fn device_added(device: &Arc<Device>) {
    // Snapshot fora do lock: init_device pode publicar devices filhos
    let candidates: Vec<(&'static dyn BusType, Vec<Arc<dyn Driver>>)> = {
        let buses = BUSES.lock();
        buses
            .iter()
            .filter(|bus| bus.btype.device_class() == device.class)
            .map(|bus| (bus.btype, bus.drivers.clone()))
            .collect()
    };
    for (btype, drivers) in candidates {
        for driver in drivers {
            if probe(btype, device, &driver) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::base::DeviceBuilder;
    use core::sync::atomic::{AtomicU32, Ordering};

    static INITS: AtomicU32 = AtomicU32::new(0);

    struct LoopBus;

    impl BusType for LoopBus {
        fn name(&self) -> &str {
            "loopbus"
        }

        fn device_class(&self) -> &str {
            "loopdev"
        }

        fn match_device(&self, _device: &Arc<Device>, driver: &Arc<dyn Driver>) -> bool {
            driver.name() == "loopdrv"
        }

        fn init_device(&self, _device: &Arc<Device>, _driver: &Arc<dyn Driver>) -> KResult<()> {
            INITS.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct LoopDriver;

    impl Driver for LoopDriver {
        fn name(&self) -> &str {
            "loopdrv"
        }
    }

    static LOOP_BUS: LoopBus = LoopBus;

    #[test]
    fn probe_both_directions() {
        register_bus(&LOOP_BUS).unwrap();
        assert_eq!(register_bus(&LOOP_BUS), Err(Status::AlreadyExists));

        let parent = crate::drivers::base::virtual_dir();
        // Device antes do driver: ligado quando o driver chegar
        DeviceBuilder::new("loop0", &parent)
            .class("loopdev")
            .publish()
            .unwrap();
        assert_eq!(INITS.load(Ordering::Relaxed), 0);

        register_driver("loopbus", Arc::new(LoopDriver)).unwrap();
        assert_eq!(INITS.load(Ordering::Relaxed), 1);

        // Driver antes do device: ligado no publish
        DeviceBuilder::new("loop1", &parent)
            .class("loopdev")
            .publish()
            .unwrap();
        assert_eq!(INITS.load(Ordering::Relaxed), 2);

        assert_eq!(
            register_driver("nobus", Arc::new(LoopDriver)),
            Err(Status::NotFound)
        );
    }
}
