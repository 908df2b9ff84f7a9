//! The gateway to the silicon.
//!
//! Everything the server does to the mesh goes through [`TargetControl`]:
//! word-granular reads and writes of memory-mapped registers, bursts for
//! bulk transfers, platform reset, core enumeration, and per-thread
//! steering. Implementations wrap whatever physical transport reaches the
//! chip; [`sim::SimMesh`] is the in-process stand-in used for bring-up and
//! by the test-suite.

pub mod memmap;
pub mod sim;

use thiserror::Error;

/// Why a target access failed.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The debug unit did not complete a word access.
    #[error("bus error at {addr:#010x}")]
    Bus { addr: u32 },
    /// A burst stopped short. Bursts are not atomic; partial completion is
    /// failure.
    #[error("burst at {addr:#010x} completed {done} of {len} bytes")]
    PartialBurst { addr: u32, len: usize, done: usize },
    /// A thread selection named a core that does not exist.
    #[error("no core for thread {0}")]
    BadThread(i32),
}

pub type TargetResult<T> = Result<T, TargetError>;

/// Access to the mesh's memory-mapped debug and register facilities.
///
/// Addresses are core-local; the implementation steers them to the core
/// selected by the most recent [`set_thread_general`] /
/// [`set_thread_execute`] call, as appropriate for the operation.
///
/// [`set_thread_general`]: TargetControl::set_thread_general
/// [`set_thread_execute`]: TargetControl::set_thread_execute
pub trait TargetControl {
    fn read_mem8(&mut self, addr: u32) -> TargetResult<u8>;
    fn read_mem16(&mut self, addr: u32) -> TargetResult<u16>;
    fn read_mem32(&mut self, addr: u32) -> TargetResult<u32>;

    fn write_mem8(&mut self, addr: u32, value: u8) -> TargetResult<()>;
    fn write_mem16(&mut self, addr: u32, value: u16) -> TargetResult<()>;
    fn write_mem32(&mut self, addr: u32, value: u32) -> TargetResult<()>;

    /// Fill `buf` from consecutive addresses starting at `addr`.
    fn read_burst(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()>;

    /// Write `buf` to consecutive addresses starting at `addr`.
    fn write_burst(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()>;

    /// Reset the whole platform through its external reset facility.
    fn platform_reset(&mut self) -> TargetResult<()>;

    /// COREID values of every live core, row-major.
    fn list_core_ids(&self) -> Vec<u16>;

    fn rows(&self) -> u32;
    fn cols(&self) -> u32;

    /// Steer register/memory operations at the core behind `tid`.
    fn set_thread_general(&mut self, tid: i32) -> TargetResult<()>;

    /// Steer execution-control operations at the core behind `tid`.
    fn set_thread_execute(&mut self, tid: i32) -> TargetResult<()>;

    // Trace capture is accepted but not implemented by current transports.
    fn init_trace(&mut self) -> TargetResult<()> {
        Ok(())
    }
    fn start_trace(&mut self) -> TargetResult<()> {
        Ok(())
    }
    fn stop_trace(&mut self) -> TargetResult<()> {
        Ok(())
    }
}
