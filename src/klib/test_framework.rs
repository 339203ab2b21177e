//! Framework de testes do kernel
//!
//! Suites executadas em runtime depois do boot, quando a feature
//! `self_test` está ativa. Cada caso roda no contexto de uma thread de
//! kernel com interrupções habilitadas.

use crate::drivers::serial;

/// Resultado de teste
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestResult {
    Passed,
    Failed,
    Skipped,
}

/// Um caso de teste
pub struct TestCase {
    pub name: &'static str,
    pub func: fn() -> TestResult,
}

fn emit_line(tag: &str, name: &str) {
    serial::emit_str(tag);
    serial::emit_str(name);
    serial::emit_nl();
}

/// Executa uma suite e devolve (passed, failed, skipped).
pub fn run_test_suite(name: &str, tests: &[TestCase]) -> (usize, usize, usize) {
    emit_line("=== suite: ", name);

    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;

    for test in tests {
        match (test.func)() {
            TestResult::Passed => {
                emit_line("[PASS] ", test.name);
                passed += 1;
            }
            TestResult::Failed => {
                emit_line("[FAIL] ", test.name);
                failed += 1;
            }
            TestResult::Skipped => {
                emit_line("[SKIP] ", test.name);
                skipped += 1;
            }
        }
    }

    crate::kinfo!("suite concluida, passed=", passed as u64, "failed=", failed as u64);
    (passed, failed, skipped)
}

/// Falha o caso se a condição não vale, imprimindo o motivo.
#[macro_export]
macro_rules! ktest_assert {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            $crate::kerror!($msg);
            return $crate::klib::test_framework::TestResult::Failed;
        }
    };
}

/// Extrai um Ok ou falha o caso.
#[macro_export]
macro_rules! ktest_unwrap {
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(value) => value,
            Err(status) => {
                $crate::kerror!($msg, status as u64);
                return $crate::klib::test_framework::TestResult::Failed;
            }
        }
    };
}
