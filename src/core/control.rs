//! Execution control: halting and releasing the core, and probing its
//! debug, exception and idle state.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::common::Signal;
use crate::target::memmap::{
    CORE_DEBUGCMD, DEBUGCMD_HALT, DEBUGCMD_RUN, DEBUG_HALT_BIT, DEBUG_OUT_TRAN_BIT,
    EXCAUSE_FPU, EXCAUSE_NONE, EXCAUSE_UNALIGNED, EXCAUSE_UNIMPLEMENTED, MESH_SWRESET,
    STATUS_ACTIVE_BIT, STATUS_EXCAUSE_MASK, STATUS_EXCAUSE_SHIFT,
};
use crate::target::{TargetControl, TargetResult};

/// Halt-verification budget: `HALT_PROBES` probes of `HALT_PROBE_MS` each.
const HALT_PROBES: u32 = 20;
const HALT_PROBE_MS: u64 = 50;

/// In debug state: halted with no outstanding external transaction.
pub fn is_in_debug_state<T: TargetControl>(t: &mut T) -> TargetResult<bool> {
    let debug = super::regs::read_debug(t)?;
    Ok(debug & DEBUG_HALT_BIT != 0 && debug & DEBUG_OUT_TRAN_BIT == 0)
}

/// Command a halt and verify the core lands in debug state within one
/// second. `false` means the core would not stop.
pub fn halt<T: TargetControl>(t: &mut T) -> TargetResult<bool> {
    t.write_mem32(CORE_DEBUGCMD, DEBUGCMD_HALT)?;
    for probe in 0..HALT_PROBES {
        if is_in_debug_state(t)? {
            return Ok(true);
        }
        if probe + 1 < HALT_PROBES {
            thread::sleep(Duration::from_millis(HALT_PROBE_MS));
        }
    }
    warn!("core did not reach debug state within {} ms", u64::from(HALT_PROBES) * HALT_PROBE_MS);
    Ok(false)
}

/// Release the core.
pub fn resume<T: TargetControl>(t: &mut T) -> TargetResult<()> {
    t.write_mem32(CORE_DEBUGCMD, DEBUGCMD_RUN)
}

/// The signal corresponding to a pending exception, if STATUS records one.
pub fn exception_signal<T: TargetControl>(t: &mut T) -> TargetResult<Option<Signal>> {
    let status = super::regs::read_status(t)?;
    let cause = (status >> STATUS_EXCAUSE_SHIFT) & STATUS_EXCAUSE_MASK;
    Ok(match cause {
        EXCAUSE_NONE => None,
        EXCAUSE_UNALIGNED => Some(Signal::Bus),
        EXCAUSE_FPU => Some(Signal::Fpe),
        EXCAUSE_UNIMPLEMENTED => Some(Signal::Ill),
        _ => Some(Signal::Abrt),
    })
}

/// True when the core has executed IDLE and is waiting for an interrupt.
pub fn is_idle<T: TargetControl>(t: &mut T) -> TargetResult<bool> {
    let status = super::regs::read_status(t)?;
    Ok(status & STATUS_ACTIVE_BIT == 0)
}

/// Pulse the mesh software-reset register.
pub fn sw_reset<T: TargetControl>(t: &mut T) -> TargetResult<()> {
    for _ in 0..12 {
        t.write_mem32(MESH_SWRESET, 1)?;
    }
    t.write_mem32(MESH_SWRESET, 0)
}

/// Reset through the platform's external facility.
pub fn hw_reset<T: TargetControl>(t: &mut T) -> TargetResult<()> {
    t.platform_reset()
}
