// =============================================================================
// KERNEL LOGGING SYSTEM - ZERO OVERHEAD
// =============================================================================
//
// Sistema de logging do Anvil com custo ZERO em release.
//
// - Features do Cargo fazem o filtering em compile-time.
// - Com "no_logs", TODOS os macros viram expressões vazias.
// - SEM core::fmt - evita geração de código SSE/AVX.
// - SEM alocação - apenas strings literais e valores hex.
// - Escreve APENAS na serial.
//
// NÍVEIS (do mais crítico ao menos):
//   ERROR > WARN > INFO > DEBUG > TRACE
//
// USO:
//   kinfo!("(PMM) Inicializando...");
//   kinfo!("(PMM) Addr=", 0x1000);
//   ktrace!("(Slab) Cache=", id, " Objs=", count);
//
// =============================================================================

/// Prefixos com cores ANSI (QEMU serial console)
pub const P_ERROR: &str = "\x1b[1;31m[ERRO]\x1b[0m ";
pub const P_WARN: &str = "\x1b[1;33m[WARN]\x1b[0m ";
pub const P_INFO: &str = "\x1b[32m[INFO]\x1b[0m ";
pub const P_DEBUG: &str = "\x1b[36m[DEBG]\x1b[0m ";
pub const P_TRACE: &str = "\x1b[35m[TRAC]\x1b[0m ";

/// Corpo comum dos macros: prefixo + pares (string, valor)
#[doc(hidden)]
#[macro_export]
macro_rules! __klog_body {
    ($prefix:expr, $msg:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg);
        $crate::drivers::serial::emit_nl();
    }};
    ($prefix:expr, $msg:expr, $val:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg);
        $crate::drivers::serial::emit_hex($val as u64);
        $crate::drivers::serial::emit_nl();
    }};
    ($prefix:expr, $msg:expr, $val:expr, $msg2:expr, $val2:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg);
        $crate::drivers::serial::emit_hex($val as u64);
        $crate::drivers::serial::emit_str($msg2);
        $crate::drivers::serial::emit_hex($val2 as u64);
        $crate::drivers::serial::emit_nl();
    }};
}

// --- ERROR: ativo exceto com no_logs ---

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kerror {
    ($($t:tt)*) => { $crate::__klog_body!($crate::core::logging::P_ERROR, $($t)*) };
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kerror {
    ($($t:tt)*) => {{}};
}

// --- WARN: ativo exceto com no_logs ---

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kwarn {
    ($($t:tt)*) => { $crate::__klog_body!($crate::core::logging::P_WARN, $($t)*) };
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kwarn {
    ($($t:tt)*) => {{}};
}

// --- INFO: requer log_info ou superior ---

#[cfg(any(feature = "log_info", feature = "log_debug", feature = "log_trace"))]
#[macro_export]
macro_rules! kinfo {
    ($($t:tt)*) => { $crate::__klog_body!($crate::core::logging::P_INFO, $($t)*) };
}

#[cfg(not(any(feature = "log_info", feature = "log_debug", feature = "log_trace")))]
#[macro_export]
macro_rules! kinfo {
    ($($t:tt)*) => {{}};
}

// --- DEBUG: requer log_debug ou log_trace ---

#[cfg(any(feature = "log_debug", feature = "log_trace"))]
#[macro_export]
macro_rules! kdebug {
    ($($t:tt)*) => { $crate::__klog_body!($crate::core::logging::P_DEBUG, $($t)*) };
}

#[cfg(not(any(feature = "log_debug", feature = "log_trace")))]
#[macro_export]
macro_rules! kdebug {
    ($($t:tt)*) => {{}};
}

// --- TRACE: requer log_trace ---

#[cfg(feature = "log_trace")]
#[macro_export]
macro_rules! ktrace {
    ($($t:tt)*) => { $crate::__klog_body!($crate::core::logging::P_TRACE, $($t)*) };
}

#[cfg(not(feature = "log_trace"))]
#[macro_export]
macro_rules! ktrace {
    ($($t:tt)*) => {{}};
}
