//! Códigos de Status do Anvil
//!
//! Taxonomia unificada de erros para todo o kernel. Syscalls devolvem o
//! código como isize negativo; internamente tudo circula como
//! `Result<T, Status>`.

/// Código de status do kernel.
///
/// Valores positivos pequenos; negativados apenas na fronteira de syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    // === Gerais (1-15) ===
    /// Operação não implementada
    NotImplemented = 1,
    /// Operação não suportada pelo objeto
    NotSupported = 2,
    /// Operação bloquearia (timeout zero)
    WouldBlock = 3,
    /// Sono interrompido (thread marcada para morrer)
    Interrupted = 4,
    /// Timeout expirado
    TimedOut = 5,
    /// Número de syscall inválido
    InvalidSyscall = 6,
    /// Argumento inválido
    InvalidArg = 7,
    /// Handle inexistente ou de tipo errado
    InvalidHandle = 8,
    /// Endereço de memória inválido
    InvalidAddr = 9,
    /// Request de device/arquivo desconhecido
    InvalidRequest = 10,
    /// Evento de objeto inválido ou não suportado
    InvalidEvent = 11,
    /// Overflow aritmético
    Overflow = 12,

    // === Recursos (16-31) ===
    /// Sem memória disponível
    NoMemory = 16,
    /// Tabela de handles cheia
    NoHandles = 17,
    /// Limite de processos atingido
    ProcessLimit = 18,
    /// Limite de threads atingido
    ThreadLimit = 19,
    /// Objeto em uso
    InUse = 20,

    // === Permissão (32-39) ===
    /// Operação não permitida (capability ausente)
    PermDenied = 32,
    /// Direitos de acesso solicitados negados
    AccessDenied = 33,
    /// Objeto é somente leitura
    ReadOnly = 34,

    // === Filesystem (40-55) ===
    /// Componente do path não é diretório
    NotDir = 40,
    /// Path não é arquivo regular
    NotRegular = 41,
    /// Path não é link simbólico
    NotSymlink = 42,
    /// Objeto não encontrado
    NotFound = 43,
    /// Diretório não vazio
    NotEmpty = 44,
    /// Objeto já existe
    AlreadyExists = 45,
    /// Path refere-se a um diretório
    IsDir = 46,
    /// Formato de filesystem desconhecido
    UnknownFs = 47,
    /// Corrupção detectada no filesystem
    CorruptFs = 48,
    /// Sem espaço no filesystem
    FsFull = 49,
    /// Limite de symlinks aninhados excedido
    SymlinkLimit = 50,

    // === Buffers (56-63) ===
    /// Buffer fornecido pequeno demais
    TooSmall = 56,
    /// Buffer/mensagem grande demais
    TooLarge = 57,
    /// String longa demais
    TooLong = 58,

    // === IPC (64-71) ===
    /// Conexão foi desligada pelo outro lado
    ConnHungup = 64,
    /// Tipo de entrada errado na mensagem tipada
    TypeMismatch = 65,

    // === Processo/Imagem (72-79) ===
    /// Processo/thread ainda em execução
    StillRunning = 72,
    /// Imagem executável com formato desconhecido
    UnknownImage = 73,
    /// Imagem executável malformada
    MalformedImage = 74,

    // === Device/Rede (80-95) ===
    /// Erro durante operação de hardware
    DeviceError = 80,
    /// Família de endereço não suportada
    AddrNotSupported = 81,
    /// Interface de rede fora do ar
    NetDown = 82,
}

impl Status {
    /// Converte para isize negativo (formato de retorno da syscall)
    #[inline]
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }

    /// Cria status a partir de código negativo de syscall
    pub fn from_code(code: isize) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        let abs = (-code) as i32;
        // Tabela inversa explícita: mantém o repr como fonte de verdade
        const ALL: &[Status] = &[
            Status::NotImplemented,
            Status::NotSupported,
            Status::WouldBlock,
            Status::Interrupted,
            Status::TimedOut,
            Status::InvalidSyscall,
            Status::InvalidArg,
            Status::InvalidHandle,
            Status::InvalidAddr,
            Status::InvalidRequest,
            Status::InvalidEvent,
            Status::Overflow,
            Status::NoMemory,
            Status::NoHandles,
            Status::ProcessLimit,
            Status::ThreadLimit,
            Status::InUse,
            Status::PermDenied,
            Status::AccessDenied,
            Status::ReadOnly,
            Status::NotDir,
            Status::NotRegular,
            Status::NotSymlink,
            Status::NotFound,
            Status::NotEmpty,
            Status::AlreadyExists,
            Status::IsDir,
            Status::UnknownFs,
            Status::CorruptFs,
            Status::FsFull,
            Status::SymlinkLimit,
            Status::TooSmall,
            Status::TooLarge,
            Status::TooLong,
            Status::ConnHungup,
            Status::TypeMismatch,
            Status::StillRunning,
            Status::UnknownImage,
            Status::MalformedImage,
            Status::DeviceError,
            Status::AddrNotSupported,
            Status::NetDown,
        ];
        ALL.iter().copied().find(|s| *s as i32 == abs)
    }

    /// Nome curto para diagnóstico
    pub fn name(self) -> &'static str {
        match self {
            Status::NotImplemented => "NOT_IMPLEMENTED",
            Status::NotSupported => "NOT_SUPPORTED",
            Status::WouldBlock => "WOULD_BLOCK",
            Status::Interrupted => "INTERRUPTED",
            Status::TimedOut => "TIMED_OUT",
            Status::InvalidSyscall => "INVALID_SYSCALL",
            Status::InvalidArg => "INVALID_ARG",
            Status::InvalidHandle => "INVALID_HANDLE",
            Status::InvalidAddr => "INVALID_ADDR",
            Status::InvalidRequest => "INVALID_REQUEST",
            Status::InvalidEvent => "INVALID_EVENT",
            Status::Overflow => "OVERFLOW",
            Status::NoMemory => "NO_MEMORY",
            Status::NoHandles => "NO_HANDLES",
            Status::ProcessLimit => "PROCESS_LIMIT",
            Status::ThreadLimit => "THREAD_LIMIT",
            Status::InUse => "IN_USE",
            Status::PermDenied => "PERM_DENIED",
            Status::AccessDenied => "ACCESS_DENIED",
            Status::ReadOnly => "READ_ONLY",
            Status::NotDir => "NOT_DIR",
            Status::NotRegular => "NOT_REGULAR",
            Status::NotSymlink => "NOT_SYMLINK",
            Status::NotFound => "NOT_FOUND",
            Status::NotEmpty => "NOT_EMPTY",
            Status::AlreadyExists => "ALREADY_EXISTS",
            Status::IsDir => "IS_DIR",
            Status::UnknownFs => "UNKNOWN_FS",
            Status::CorruptFs => "CORRUPT_FS",
            Status::FsFull => "FS_FULL",
            Status::SymlinkLimit => "SYMLINK_LIMIT",
            Status::TooSmall => "TOO_SMALL",
            Status::TooLarge => "TOO_LARGE",
            Status::TooLong => "TOO_LONG",
            Status::ConnHungup => "CONN_HUNGUP",
            Status::TypeMismatch => "TYPE_MISMATCH",
            Status::StillRunning => "STILL_RUNNING",
            Status::UnknownImage => "UNKNOWN_IMAGE",
            Status::MalformedImage => "MALFORMED_IMAGE",
            Status::DeviceError => "DEVICE_ERROR",
            Status::AddrNotSupported => "ADDR_NOT_SUPPORTED",
            Status::NetDown => "NET_DOWN",
        }
    }
}

/// Result padrão do kernel
pub type KResult<T> = Result<T, Status>;

/// Converte um KResult<()> para o formato isize de syscall
#[inline]
pub fn result_to_isize(result: KResult<()>) -> isize {
    match result {
        Ok(()) => 0,
        Err(status) => status.as_isize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            Status::InvalidArg,
            Status::NoMemory,
            Status::ConnHungup,
            Status::NetDown,
        ] {
            assert_eq!(Status::from_code(s.as_isize()), Some(s));
        }
    }

    #[test]
    fn test_positive_code_is_not_error() {
        assert_eq!(Status::from_code(0), None);
        assert_eq!(Status::from_code(42), None);
    }
}
