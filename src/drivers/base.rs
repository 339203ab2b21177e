//! Árvore de devices
//!
//! Todo device é um nó com nome, classe, atributos tipados e um vtable de
//! operações. A árvore é enraizada em "/"; o diretório "virtual" abriga os
//! pseudo devices. Um device só aparece na árvore no `publish`: construção
//! parcial que falha morre no drop, sem rastro.

use crate::fs::io::IoRequest;
use crate::fs::mount::MountId;
use crate::fs::node::{Node, NodeType};
use crate::sync::Mutex;
use crate::{KResult, Status};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Mount sentinela dos nós de device; nenhum mount real usa 0
const DEV_MOUNT: MountId = 0;

/// Valor de um atributo de device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Uint(u64),
    Str(String),
}

/// Operações de um device
///
/// Os defaults valem para devices puramente estruturais (diretórios da
/// árvore, barramentos).
pub trait DeviceOps: Send + Sync {
    /// I/O de dados (leitura do random, escrita num console).
    fn io(&self, _device: &Arc<Device>, _req: &mut IoRequest) -> KResult<()> {
        Err(Status::NotSupported)
    }

    /// Request fora de banda, com códigos por classe.
    fn request(&self, _device: &Arc<Device>, _code: u32, _arg: usize) -> KResult<usize> {
        Err(Status::InvalidRequest)
    }
}

struct NullOps;

impl DeviceOps for NullOps {}

struct DeviceInner {
    children: Vec<Arc<Device>>,
    attrs: Vec<(String, Attr)>,
}

/// Um nó da árvore de devices
pub struct Device {
    pub name: String,
    pub class: String,
    pub ops: Arc<dyn DeviceOps>,
    pub parent: Weak<Device>,
    /// Device apontado quando este nó é só um apelido
    pub alias: Option<Arc<Device>>,
    inner: Mutex<DeviceInner>,
}

impl Device {
    /// Alvo real: segue o apelido, se houver.
    pub fn target(self: &Arc<Self>) -> Arc<Device> {
        match &self.alias {
            Some(target) => target.clone(),
            None => self.clone(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<Attr> {
        let inner = self.inner.lock();
        inner
            .attrs
            .iter()
            .find(|attr| attr.0 == name)
            .map(|attr| attr.1.clone())
    }

    pub fn set_attr(&self, name: &str, value: Attr) {
        let mut inner = self.inner.lock();
        for attr in inner.attrs.iter_mut() {
            if attr.0 == name {
                attr.1 = value;
                return;
            }
        }
        inner.attrs.push((String::from(name), value));
    }

    pub fn child(&self, name: &str) -> Option<Arc<Device>> {
        let inner = self.inner.lock();
        inner
            .children
            .iter()
            .find(|child| child.name == name)
            .cloned()
    }

    pub fn children(&self) -> Vec<Arc<Device>> {
        self.inner.lock().children.clone()
    }
}

static ROOT: spin::Once<Arc<Device>> = spin::Once::new();
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn bare(name: &str, class: &str, parent: Weak<Device>) -> Arc<Device> {
    Arc::new(Device {
        name: String::from(name),
        class: String::from(class),
        ops: Arc::new(NullOps),
        parent,
        alias: None,
        inner: Mutex::new("device", DeviceInner {
            children: Vec::new(),
            attrs: Vec::new(),
        }),
    })
}

/// Cria a raiz e o diretório de pseudo devices. Uma vez, no boot.
pub fn init_tree() {
    ROOT.call_once(|| {
        let root = bare("", "root", Weak::new());
        let virt = bare("virtual", "directory", Arc::downgrade(&root));
        root.inner.lock().children.push(virt);
        root
    });
}

pub fn root() -> Arc<Device> {
    init_tree();
    match ROOT.get() {
        Some(root) => root.clone(),
        // call_once acima garante o Some
        None => unreachable!(),
    }
}

/// Diretório dos pseudo devices.
pub fn virtual_dir() -> Arc<Device> {
    match root().child("virtual") {
        Some(dir) => dir,
        None => unreachable!(),
    }
}

/// Resolve um caminho na árvore ("/virtual/random").
pub fn lookup(path: &str) -> KResult<Arc<Device>> {
    let mut current = root();
    for part in path.split('/').filter(|part| !part.is_empty()) {
        current = current.child(part).ok_or(Status::NotFound)?;
    }
    Ok(current)
}

fn collect_class_into(device: &Arc<Device>, class: &str, out: &mut Vec<Arc<Device>>) {
    if device.class == class {
        out.push(device.clone());
    }
    for child in device.children() {
        collect_class_into(&child, class, out);
    }
}

/// Todos os devices de uma classe.
pub fn collect_class(class: &str) -> Vec<Arc<Device>> {
    let mut out = Vec::new();
    collect_class_into(&root(), class, &mut out);
    out
}

/// Construção incremental de um device. Nada é visível antes do
/// `publish`; um builder abandonado não deixa rastro na árvore.
pub struct DeviceBuilder {
    name: String,
    class: String,
    ops: Arc<dyn DeviceOps>,
    parent: Arc<Device>,
    alias: Option<Arc<Device>>,
    attrs: Vec<(String, Attr)>,
}

impl DeviceBuilder {
    pub fn new(name: &str, parent: &Arc<Device>) -> Self {
        Self {
            name: String::from(name),
            class: String::new(),
            ops: Arc::new(NullOps),
            parent: parent.clone(),
            alias: None,
            attrs: Vec::new(),
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.class = String::from(class);
        self
    }

    pub fn ops(mut self, ops: Arc<dyn DeviceOps>) -> Self {
        self.ops = ops;
        self
    }

    pub fn alias_of(mut self, target: &Arc<Device>) -> Self {
        self.alias = Some(target.clone());
        self
    }

    pub fn attr_uint(mut self, name: &str, value: u64) -> Self {
        self.attrs.push((String::from(name), Attr::Uint(value)));
        self
    }

    pub fn attr_str(mut self, name: &str, value: &str) -> Self {
        self.attrs
            .push((String::from(name), Attr::Str(String::from(value))));
        self
    }

    /// Insere o device na árvore. A inserção é atômica: ou o device
    /// aparece completo ou não aparece.
    pub fn publish(self) -> KResult<Arc<Device>> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(Status::InvalidArg);
        }
        let device = Arc::new(Device {
            name: self.name,
            class: self.class,
            ops: self.ops,
            parent: Arc::downgrade(&self.parent),
            alias: self.alias,
            inner: Mutex::new("device", DeviceInner {
                children: Vec::new(),
                attrs: self.attrs,
            }),
        });
        {
            let mut inner = self.parent.inner.lock();
            if inner.children.iter().any(|child| child.name == device.name) {
                return Err(Status::AlreadyExists);
            }
            inner.children.push(device.clone());
        }
        crate::drivers::bus::device_added(&device);
        Ok(device)
    }
}

struct DeviceNodeOps {
    device: Arc<Device>,
}

impl crate::fs::node::NodeOps for DeviceNodeOps {
    fn io(&self, _node: &Arc<Node>, req: &mut IoRequest) -> KResult<()> {
        let target = self.device.target();
        target.ops.io(&target, req)
    }

    fn request(&self, _node: &Arc<Node>, code: u32, arg: usize) -> KResult<usize> {
        let target = self.device.target();
        target.ops.request(&target, code, arg)
    }
}

/// Nó de VFS apontando para o device, para abrir via file handle.
pub fn fs_node(device: &Arc<Device>) -> Arc<Node> {
    Node::new(
        NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
        DEV_MOUNT,
        NodeType::DeviceAlias,
        crate::mm::PAGE_SIZE,
        0,
        Arc::new(DeviceNodeOps {
            device: device.clone(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_publish_and_lookup() {
        let parent = virtual_dir();
        let device = DeviceBuilder::new("probe0", &parent)
            .class("test")
            .attr_uint("irq", 5)
            .attr_str("model", "loop")
            .publish()
            .unwrap();
        assert_eq!(device.attr("irq"), Some(Attr::Uint(5)));
        assert_eq!(
            device.attr("model"),
            Some(Attr::Str(String::from("loop")))
        );
        assert_eq!(device.attr("nope"), None);
        assert_eq!(
            lookup("/virtual/probe0").unwrap().name,
            "probe0"
        );
        assert_eq!(
            DeviceBuilder::new("probe0", &parent)
                .publish()
                .map(|d| d.name.clone()),
            Err(Status::AlreadyExists)
        );
    }

    #[test]
    fn alias_routes_to_target() {
        let parent = virtual_dir();
        let real = DeviceBuilder::new("real0", &parent)
            .class("test")
            .publish()
            .unwrap();
        let alias = DeviceBuilder::new("alias0", &parent)
            .alias_of(&real)
            .publish()
            .unwrap();
        assert_eq!(alias.target().name, "real0");
        assert_eq!(real.target().name, "real0");
    }
}
