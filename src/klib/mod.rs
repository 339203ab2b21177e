//! Utilitários internos do kernel

pub mod avl;
pub mod hash;
pub mod rng;
pub mod test_framework;

pub use avl::AvlTree;
