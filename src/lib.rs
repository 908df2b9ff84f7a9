//! An implementation of the GDB Remote Serial Protocol for memory-mapped
//! mesh accelerators.
//!
//! The server listens on a TCP port, speaks RSP to an unmodified GDB
//! client, and translates every request into word-granular reads and writes
//! against the target's memory-mapped debug unit. The target has no
//! hardware single-step: one-instruction progress is synthesised by
//! predicting successor PCs, planting temporary breakpoints, and unwinding
//! after the halt (`core::stepper`). Semi-hosted system calls raised with
//! TRAP instructions are redirected to the client through GDB's File-I/O
//! extension (`core::semihost`).
//!
//! The crate splits along its seams:
//!
//! - [`protocol`]: packet framing and the byte-level codec.
//! - [`connection`]: the transport trait and its TCP implementation.
//! - [`target`]: the [`target::TargetControl`] gateway to the silicon, the
//!   injected memory map, and an in-process simulator.
//! - `core`: breakpoints, registers, halt/run control, the step engine,
//!   and the semihosting bridge.
//! - [`server`]: the per-session dispatcher.

pub mod common;
pub mod config;
pub mod connection;
pub mod core;
pub mod protocol;
pub mod server;
pub mod target;

pub use config::Config;
pub use connection::Connection;
pub use server::{GdbServer, SessionEnd};
pub use target::TargetControl;
