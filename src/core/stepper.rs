//! Software single-step and continue.
//!
//! The target has no hardware step bit, so one-instruction progress is
//! synthesised: decode the instruction at the resume point, predict every
//! place control can land next (fall-through, branch target, or an
//! interrupt vector), plant temporary breakpoints there, let the core run,
//! and unwind once it halts. Interrupts are covered by shadowing the vector
//! table and arming every non-reset entry for the duration of the step.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::common::Signal;
use crate::core::breakpoints::{BreakType, BreakpointTable};
use crate::core::{control, regs};
use crate::target::memmap::{
    is_trap, trap_number, BKPT_INSTR, BKPT_SIZE, IDLE_INSTR, IVT_BASE, IVT_BYTES,
    IVT_ENTRIES, IVT_ENTRY_BYTES, JALR_LONG_MASK9, JALR_MASK9, JR_LONG_MASK9, JR_MASK9,
    NOP_INSTR, RTI_MASK9, STATUS_GID_BIT,
};
use crate::target::{TargetControl, TargetResult};

/// Debug-state polling budget for `continue`: kept short so the session
/// loop can interleave Ctrl-C checks between rounds.
const RESUME_POLLS: u32 = 3;
const RESUME_POLL_MS: u64 = 300;

/// Polling budget for the resume inside a step; a planted breakpoint is one
/// instruction away, so this only expires when something is wrong.
const STEP_POLLS: u32 = 20;
const STEP_POLL_MS: u64 = 50;

/// A semihosting trap the engine ran into. The PC has already been advanced
/// past the trap instruction; `addr` is where it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub trap: u8,
    pub addr: u32,
}

/// What came of releasing the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Halted; PC has been corrected and written back.
    Stopped { pc: u32, signal: Signal },
    /// Halted on a semihosting trap; the bridge takes over.
    Semihost(TrapFrame),
    /// The polling budget expired with the core still running.
    StillRunning,
    /// A step was requested while the core is not halted.
    NotInDebugState,
}

/// Shadow of the interrupt vector table, filled before a step that may be
/// diverted into an ISR and restored verbatim once the core halts.
pub struct IvtShadow {
    buf: [u8; IVT_BYTES],
}

impl IvtShadow {
    pub fn new() -> IvtShadow {
        IvtShadow {
            buf: [0u8; IVT_BYTES],
        }
    }

    fn fill<T: TargetControl>(&mut self, t: &mut T) -> TargetResult<()> {
        t.read_burst(IVT_BASE, &mut self.buf)
    }

    fn restore<T: TargetControl>(&self, t: &mut T) -> TargetResult<()> {
        t.write_burst(IVT_BASE, &self.buf)
    }
}

impl Default for IvtShadow {
    fn default() -> IvtShadow {
        IvtShadow::new()
    }
}

/// A temporary breakpoint. `ours` is false when the user already had one at
/// the same address; we then leave instruction and table entry alone on
/// unwind.
struct Planted {
    addr: u32,
    ours: bool,
}

fn plant<T: TargetControl>(
    t: &mut T,
    bps: &mut BreakpointTable,
    addr: u32,
) -> TargetResult<Planted> {
    if bps.lookup(BreakType::Memory, addr).is_some() {
        trace!(target: "stop-resume", "step target {:#010x} already has a user breakpoint", addr);
        return Ok(Planted { addr, ours: false });
    }
    let saved = t.read_mem16(addr)?;
    t.write_mem16(addr, BKPT_INSTR)?;
    bps.add(BreakType::Memory, addr, saved);
    trace!(target: "stop-resume", "planted step breakpoint at {:#010x} (saved {:#06x})", addr, saved);
    Ok(Planted { addr, ours: true })
}

fn unplant<T: TargetControl>(
    t: &mut T,
    bps: &mut BreakpointTable,
    planted: &[Planted],
) -> TargetResult<()> {
    let mut result = Ok(());
    for p in planted.iter().filter(|p| p.ours) {
        if let Some(saved) = bps.remove(BreakType::Memory, p.addr) {
            if let Err(e) = t.write_mem16(p.addr, saved) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
    }
    result
}

/// 32-bit wide when the low nibble selects the extension space, or the low
/// three bits select a load/store, register-immediate or branch form with
/// the long bit (bit 3) set.
fn is_32bit(instr: u16) -> bool {
    let ext = instr & 0xf == 0xf;
    let regi = instr & 0x7 == 0b011;
    let loadstore = instr & 0x7 == 0b100 || instr & 0b11 == 0b01;
    let branch = instr & 0x7 == 0b000;
    let long = instr & 0b1000 != 0;
    ext || (long && (regi || loadstore || branch))
}

/// Where the instruction at `pc` can divert control to, if anywhere.
fn branch_target<T: TargetControl>(
    t: &mut T,
    pc: u32,
    iw: u32,
    is32: bool,
) -> TargetResult<Option<u32>> {
    if iw & 0x7 == 0 {
        // Immediate branch: displacement in half-words, sign-extended from
        // bits [31:8] (long form) or [15:8].
        let disp = if is32 {
            (iw as i32) >> 8
        } else {
            i32::from((iw as u16 as i16) >> 8)
        };
        return Ok(Some(pc.wrapping_add((disp as u32).wrapping_mul(2))));
    }

    let low9 = (iw & 0x1ff) as u16;
    match low9 {
        RTI_MASK9 => Ok(Some(regs::read_iret(t)?)),
        JR_MASK9 | JALR_MASK9 => {
            let rn = (iw >> 10) & 0x7;
            Ok(Some(regs::read_gpr(t, rn)?))
        }
        JR_LONG_MASK9 | JALR_LONG_MASK9 => {
            let rn = ((iw >> 10) & 0x7) | (((iw >> 26) & 0x7) << 3);
            Ok(Some(regs::read_gpr(t, rn)?))
        }
        _ => Ok(None),
    }
}

/// Arm every vector-table entry except reset and the one being stepped.
fn arm_ivt<T: TargetControl>(t: &mut T, pc: u32) -> TargetResult<()> {
    for entry in 1..IVT_ENTRIES {
        let addr = IVT_BASE + (entry * IVT_ENTRY_BYTES) as u32;
        if addr == pc {
            continue;
        }
        t.write_mem16(addr, BKPT_INSTR)?;
    }
    Ok(())
}

/// Wait for the core to halt; force a halt when the budget expires.
/// `Ok(false)` means even the forced halt failed.
fn wait_halt<T: TargetControl>(t: &mut T) -> TargetResult<bool> {
    for _ in 0..STEP_POLLS {
        if control::is_in_debug_state(t)? {
            return Ok(true);
        }
        thread::sleep(Duration::from_millis(STEP_POLL_MS));
    }
    warn!(target: "stop-resume", "step did not halt within budget; forcing a halt");
    control::halt(t)
}

/// Execute one instruction starting at `start`.
pub fn step<T: TargetControl>(
    t: &mut T,
    bps: &mut BreakpointTable,
    ivt: &mut IvtShadow,
    start: u32,
) -> TargetResult<RunOutcome> {
    if !control::is_in_debug_state(t)? {
        warn!(target: "stop-resume", "step requested while the target is running");
        return Ok(RunOutcome::NotInDebugState);
    }

    let instr = t.read_mem16(start)?;

    if instr == IDLE_INSTR {
        return step_idle(t, ivt, start);
    }

    if is_trap(instr) {
        // Semihosting drives resumption; no stop report from here.
        regs::write_pc(t, start.wrapping_add(2))?;
        return Ok(RunOutcome::Semihost(TrapFrame {
            trap: trap_number(instr),
            addr: start,
        }));
    }

    regs::write_pc(t, start)?;

    let is32 = is_32bit(instr);
    let iw = if is32 {
        t.read_mem32(start)?
    } else {
        u32::from(instr)
    };
    let fall_through = start.wrapping_add(if is32 { 4 } else { 2 });
    let branch = branch_target(t, start, iw, is32)?;
    debug!(
        target: "stop-resume",
        "step at {:#010x}: instr {:#06x}, fall-through {:#010x}, branch {:?}",
        start, instr, fall_through, branch
    );

    let mut planted = Vec::with_capacity(2);
    planted.push(plant(t, bps, fall_through)?);
    if let Some(target) = branch.filter(|&a| a != fall_through) {
        match plant(t, bps, target) {
            Ok(p) => planted.push(p),
            Err(e) => {
                let _ = unplant(t, bps, &planted);
                return Err(e);
            }
        }
    }

    if let Err(e) = ivt.fill(t) {
        let _ = unplant(t, bps, &planted);
        return Err(e);
    }
    if let Err(e) = arm_ivt(t, start).and_then(|()| control::resume(t)) {
        let _ = ivt.restore(t);
        let _ = unplant(t, bps, &planted);
        return Err(e);
    }

    let halted = match wait_halt(t) {
        Ok(halted) => halted,
        Err(e) => {
            let _ = ivt.restore(t);
            let _ = unplant(t, bps, &planted);
            return Err(e);
        }
    };
    if let Err(e) = ivt.restore(t) {
        let _ = unplant(t, bps, &planted);
        return Err(e);
    }
    if !halted {
        let _ = unplant(t, bps, &planted);
        return Ok(RunOutcome::Stopped {
            pc: start,
            signal: Signal::Hup,
        });
    }

    // The observed PC is one past the breakpoint instruction.
    let tail = (|| -> TargetResult<u32> {
        let observed = regs::read_pc(t)?;
        let bp_addr = observed.wrapping_sub(BKPT_SIZE);
        assert!(
            bps.lookup(BreakType::Memory, bp_addr).is_some()
                || t.read_mem16(bp_addr)? == BKPT_INSTR,
            "single-step halted at {:#010x} with no breakpoint trace at {:#010x}",
            observed,
            bp_addr
        );
        Ok(bp_addr)
    })();
    let bp_addr = match tail {
        Ok(bp_addr) => bp_addr,
        Err(e) => {
            let _ = unplant(t, bps, &planted);
            return Err(e);
        }
    };

    unplant(t, bps, &planted)?;
    regs::write_pc(t, bp_addr)?;
    Ok(RunOutcome::Stopped {
        pc: bp_addr,
        signal: Signal::Trap,
    })
}

/// Step an IDLE instruction. When an unmasked interrupt is already latched
/// the core will dispatch its ISR on wakeup, so every non-reset vector is
/// armed and the core released; otherwise there is nothing to run. Either
/// way the stop is reported at the pre-idle PC.
fn step_idle<T: TargetControl>(
    t: &mut T,
    ivt: &mut IvtShadow,
    start: u32,
) -> TargetResult<RunOutcome> {
    let stop_pc = start.wrapping_sub(2);

    let status = regs::read_status(t)?;
    let imask = regs::read_imask(t)?;
    let ilat = regs::read_ilat(t)?;
    let pending = status & STATUS_GID_BIT == 0 && (!imask & ilat) != 0;
    debug!(
        target: "stop-resume",
        "step over IDLE at {:#010x}: pending interrupt = {}", start, pending
    );

    if pending {
        ivt.fill(t)?;
        if let Err(e) = arm_ivt(t, start).and_then(|()| control::resume(t)) {
            let _ = ivt.restore(t);
            return Err(e);
        }
        let halted = match wait_halt(t) {
            Ok(halted) => halted,
            Err(e) => {
                let _ = ivt.restore(t);
                return Err(e);
            }
        };
        ivt.restore(t)?;
        if !halted {
            return Ok(RunOutcome::Stopped {
                pc: stop_pc,
                signal: Signal::Hup,
            });
        }
    }

    regs::write_pc(t, stop_pc)?;
    Ok(RunOutcome::Stopped {
        pc: stop_pc,
        signal: Signal::Trap,
    })
}

/// Resume execution, optionally from `addr`, and poll for the next halt.
pub fn continue_run<T: TargetControl>(
    t: &mut T,
    bps: &BreakpointTable,
    addr: Option<u32>,
) -> TargetResult<RunOutcome> {
    if let Some(pc) = addr {
        regs::write_pc(t, pc)?;
    }
    control::resume(t)?;
    poll_for_halt(t, bps)
}

/// One bounded round of halt polling for a running target. The session loop
/// alternates this with break-request checks.
pub fn poll_for_halt<T: TargetControl>(
    t: &mut T,
    bps: &BreakpointTable,
) -> TargetResult<RunOutcome> {
    for _ in 0..RESUME_POLLS {
        if control::is_in_debug_state(t)? {
            return classify_stop(t, bps);
        }
        thread::sleep(Duration::from_millis(RESUME_POLL_MS));
    }
    Ok(RunOutcome::StillRunning)
}

/// Work out why a continued core halted and correct the PC.
fn classify_stop<T: TargetControl>(
    t: &mut T,
    bps: &BreakpointTable,
) -> TargetResult<RunOutcome> {
    if let Some(signal) = control::exception_signal(t)? {
        let pc = regs::read_pc(t)?;
        debug!(target: "stop-resume", "exception at {:#010x}: {:?}", pc, signal);
        return Ok(RunOutcome::Stopped { pc, signal });
    }

    let pc = regs::read_pc(t)?;
    let prev = pc.wrapping_sub(BKPT_SIZE);
    if t.read_mem16(prev)? == BKPT_INSTR && bps.lookup(BreakType::Memory, prev).is_some() {
        regs::write_pc(t, prev)?;
        debug!(target: "stop-resume", "breakpoint hit at {:#010x}", prev);
        return Ok(RunOutcome::Stopped {
            pc: prev,
            signal: Signal::Trap,
        });
    }

    // Traps are NOP-padded by the compiler; the halt PC can trail the trap
    // instruction by several slots.
    for slot in 1..=9u32 {
        let addr = pc.wrapping_sub(2 * slot);
        let word = t.read_mem16(addr)?;
        if is_trap(word) {
            return Ok(RunOutcome::Semihost(TrapFrame {
                trap: trap_number(word),
                addr,
            }));
        }
        if word != NOP_INSTR {
            break;
        }
    }

    Ok(RunOutcome::Stopped {
        pc,
        signal: Signal::Trap,
    })
}
