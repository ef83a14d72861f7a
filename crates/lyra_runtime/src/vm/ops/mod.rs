//! Opcode handler families, grouped the way the dispatch table groups them.

mod calls;
mod collections;
mod concurrent;
mod error;
mod math;
mod pattern;
