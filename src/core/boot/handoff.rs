//! Descrição do estado da máquina entregue pelo loader
//!
//! O loader monta estas estruturas em memória do tipo `Internal` e passa um
//! `&'static BootInfo` para `kernel_main`. Depois de `pmm::init_reclaim` os
//! ranges `Internal` e `Reclaimable` voltam ao allocator, então nada aqui
//! pode ser referenciado após o fim do boot.

/// Classificação de um range físico no handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Livre para uso imediato
    Free,
    /// Já em uso pelo kernel (imagem, pilhas de boot)
    Allocated,
    /// Usado pelo loader, liberável após o boot
    Reclaimable,
    /// Nunca tocar (firmware, MMIO)
    Reserved,
    /// Estruturas do próprio handoff, liberáveis com as reclaimable
    Internal,
}

/// Um range físico contíguo
#[derive(Debug, Clone, Copy)]
pub struct MemoryRange {
    pub base: u64,
    pub size: u64,
    pub kind: RangeKind,
}

/// Uma CPU enumerada pelo loader
#[derive(Debug, Clone, Copy)]
pub struct CpuDesc {
    /// Id lógico, denso a partir de 0 (0 = CPU de boot)
    pub id: u32,
    /// Id físico da arquitetura (APIC id / MPIDR)
    pub arch_id: u64,
}

/// Framebuffer descoberto pelo loader
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub phys: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bits_per_pixel: u8,
}

/// Um módulo carregado junto com o kernel (initrd, drivers)
#[derive(Debug, Clone, Copy)]
pub struct BootModule {
    pub base: u64,
    pub size: u64,
    pub name: &'static str,
}

/// Opções booleanas da linha de comando do loader
#[derive(Debug, Clone, Copy, Default)]
pub struct BootOptions {
    pub smp_disabled: bool,
    pub splash_disabled: bool,
    pub force_ramfs: bool,
}

/// Sub-bloco dependente de arquitetura
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchBootInfo {
    /// Base física do controlador de interrupção local (LAPIC / GIC)
    pub intc_base: u64,
    /// Ponteiro para tabelas de firmware (RSDP / DTB)
    pub fw_tables: u64,
}

/// Bloco de handoff completo
pub struct BootInfo {
    pub memory: &'static [MemoryRange],
    pub cpus: &'static [CpuDesc],
    pub framebuffer: Option<FramebufferInfo>,
    pub modules: &'static [BootModule],
    /// UUID do volume com o filesystem de boot
    pub boot_fs_uuid: [u8; 16],
    pub options: BootOptions,
    /// Offset virtual do mapa físico direto
    pub phys_offset: u64,
    pub arch: ArchBootInfo,
}

impl BootInfo {
    /// Total de bytes utilizáveis reportados pelo loader.
    pub fn usable_bytes(&self) -> u64 {
        self.memory
            .iter()
            .filter(|range| {
                matches!(
                    range.kind,
                    RangeKind::Free | RangeKind::Allocated | RangeKind::Reclaimable
                )
            })
            .map(|range| range.size)
            .sum()
    }
}
