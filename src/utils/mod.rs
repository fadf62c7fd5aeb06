//! Process-level helpers for the host binary.

pub mod bootstrap;
