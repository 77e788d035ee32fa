//! Tern IR — the low-level intermediate representation of the Tern
//! middle-end.
//!
//! The IR is a CFG of basic blocks over per-function instruction arenas,
//! close in shape to what a compiler back-end consumes: explicit types,
//! calls, memory operations, casts, and block terminators.
//!
//! # Architecture
//!
//! - **`ir`** — Core data structures (Module, Function, Block, Op, Value)
//!   plus the mutation primitives the passes need (insert/erase/split,
//!   replace-all-uses, def-use queries).
//! - **`print`** — Human-readable textual printer.
//! - **`verify`** — Structural verification pass.

pub mod ir;
pub mod print;
pub mod verify;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod adversarial_tests;

pub use ir::*;
pub use print::{print_function, print_module};
pub use verify::verify_module;
