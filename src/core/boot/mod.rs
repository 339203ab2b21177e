//! Bloco de handoff do loader

pub mod handoff;

pub use handoff::{
    ArchBootInfo, BootInfo, BootModule, BootOptions, CpuDesc, FramebufferInfo, MemoryRange,
    RangeKind,
};
