//! Interface Abstrata de Controlador de Interrupções (HAL).

/// Modo de disparo de uma linha de IRQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    Edge,
    Level,
}

/// Controlador de interrupções (PIC/APIC no x86, GIC no ARM).
///
/// O gerenciador genérico (`drivers::irq`) chama `pre_handle` antes de rodar
/// os handlers da linha e `post_handle` depois; é aqui que vive a disciplina
/// de EOI e a detecção de interrupções espúrias.
pub trait IrqChip: Send + Sync {
    /// Prepara o tratamento da linha. Retorna `false` para interrupção
    /// espúria (a linha é descartada sem rodar handlers).
    fn pre_handle(&self, line: u32) -> bool;

    /// Finaliza o tratamento (EOI).
    fn post_handle(&self, line: u32);

    /// Modo de disparo da linha.
    fn mode(&self, line: u32) -> IrqMode;

    /// Desmascara a linha.
    fn enable(&self, line: u32);

    /// Mascara a linha.
    fn disable(&self, line: u32);

    /// Quantidade de linhas gerenciadas.
    fn line_count(&self) -> u32;
}
