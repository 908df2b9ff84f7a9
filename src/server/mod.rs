//! The RSP dispatcher: one session loop, a flat match over packet letters,
//! and the context every handler works against.

mod base;
mod osdata;
mod query;

use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::common::{Signal, Tid, TID_ANY};
use crate::config::Config;
use crate::connection::Connection;
use crate::core::breakpoints::BreakpointTable;
use crate::core::semihost::{self, TrapAction};
use crate::core::stepper::{self, IvtShadow, RunOutcome, TrapFrame};
use crate::core::{control, regs};
use crate::protocol::Packet;
use crate::target::TargetControl;

pub use osdata::OsData;

/// A session ended for one of these reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client went away (EOF on the transport).
    Disconnected,
    /// The client detached with `D`.
    Detached,
    /// The client killed the session with `k`.
    Killed,
}

#[derive(Debug, Error)]
pub enum SessionError<E: Display> {
    #[error("transport failed: {0}")]
    Transport(E),
}

/// Whether the dispatcher keeps going after a packet.
enum Flow {
    Continue,
    Close(SessionEnd),
}

/// Everything one debug session owns. Handlers take `&mut self`; the
/// engine, table and register window are reached through fields rather
/// than back-pointers.
pub struct GdbServer<C: Connection, T: TargetControl> {
    conn: C,
    target: T,
    cfg: Config,
    pkt: Packet,
    bps: BreakpointTable,
    ivt: IvtShadow,
    thread_general: Tid,
    thread_execute: Tid,
    running: bool,
    osdata: OsData,
    tty: Option<Box<dyn Write>>,
}

impl<C: Connection, T: TargetControl> GdbServer<C, T> {
    pub fn new(conn: C, target: T, cfg: Config) -> std::io::Result<GdbServer<C, T>> {
        let tty = match &cfg.tty {
            Some(path) => {
                let sink = OpenOptions::new().append(true).create(true).open(path)?;
                Some(Box::new(sink) as Box<dyn Write>)
            }
            None => None,
        };
        Ok(GdbServer {
            conn,
            target,
            cfg,
            pkt: Packet::new(),
            bps: BreakpointTable::new(),
            ivt: IvtShadow::new(),
            thread_general: TID_ANY,
            thread_execute: TID_ANY,
            running: false,
            osdata: OsData::new(),
            tty,
        })
    }

    /// Replace the semihosted-printf sink, regardless of configuration.
    pub fn set_tty_sink(&mut self, sink: Box<dyn Write>) {
        self.tty = Some(sink);
    }

    /// Tear the session down, handing back the transport and the target.
    pub fn into_parts(self) -> (C, T) {
        (self.conn, self.target)
    }

    /// Run the session until the client goes away or ends it.
    pub fn serve(&mut self) -> Result<SessionEnd, SessionError<C::Error>> {
        self.conn
            .on_session_start()
            .map_err(SessionError::Transport)?;

        if self.cfg.halt_on_attach {
            match control::halt(&mut self.target) {
                Ok(true) => debug!(target: "stop-resume", "target halted on attach"),
                Ok(false) => warn!("target refused to halt on attach"),
                Err(e) => warn!("halt on attach failed: {}", e),
            }
        }

        loop {
            if self.running {
                self.service_running()?;
                continue;
            }

            if !self
                .pkt
                .recv(&mut self.conn)
                .map_err(SessionError::Transport)?
            {
                info!("client disconnected");
                return Ok(SessionEnd::Disconnected);
            }

            match self.dispatch()? {
                Flow::Continue => {}
                Flow::Close(end) => return Ok(end),
            }
        }
    }

    /// One round of the running-state loop: look for a break request, then
    /// give the halt poll another bounded turn.
    fn service_running(&mut self) -> Result<(), SessionError<C::Error>> {
        trace!(target: "ctrl-c-wait", "checking for break request");
        match self.conn.poll_byte().map_err(SessionError::Transport)? {
            Some(0x03) => {
                self.conn.read().map_err(SessionError::Transport)?;
                return self.handle_break();
            }
            Some(byte) => {
                // Not a break; the packet will be picked up once the target
                // stops.
                trace!(target: "ctrl-c-wait", "byte {:#04x} pending while running", byte);
            }
            None => {}
        }

        match stepper::poll_for_halt(&mut self.target, &self.bps) {
            Ok(outcome) => self.act_on_outcome(outcome),
            Err(e) => {
                warn!("lost the target while it was running: {}", e);
                self.running = false;
                self.reply_error()
            }
        }
    }

    /// Ctrl-C: halt the target, fix up the PC, and report.
    fn handle_break(&mut self) -> Result<(), SessionError<C::Error>> {
        debug!(target: "ctrl-c-wait", "break request from the client");
        self.running = false;

        let halted = match control::halt(&mut self.target) {
            Ok(halted) => halted,
            Err(e) => {
                warn!("halt after break failed: {}", e);
                false
            }
        };
        if !halted {
            return self.reply_stop(Signal::Hup);
        }

        // The halted PC points one past the next instruction unless the
        // core was sitting in IDLE.
        let idle = control::is_idle(&mut self.target).unwrap_or(false);
        if !idle {
            match regs::read_pc(&mut self.target) {
                Ok(pc) => {
                    if let Err(e) = regs::write_pc(&mut self.target, pc.wrapping_sub(2)) {
                        warn!("could not back up the PC after break: {}", e);
                    }
                }
                Err(e) => warn!("could not read the PC after break: {}", e),
            }
        }
        self.reply_stop(Signal::Trap)
    }

    /// Route a step/continue outcome to the wire.
    fn act_on_outcome(&mut self, outcome: RunOutcome) -> Result<(), SessionError<C::Error>> {
        match outcome {
            RunOutcome::Stopped { pc, signal } => {
                debug!(target: "stop-resume", "stopped at {:#010x} with {:?}", pc, signal);
                self.running = false;
                self.reply_stop(signal)
            }
            RunOutcome::Semihost(frame) => self.service_trap_frame(frame),
            RunOutcome::StillRunning => {
                self.running = true;
                Ok(())
            }
            RunOutcome::NotInDebugState => {
                self.running = false;
                self.reply_error()
            }
        }
    }

    /// Hand a trap to the semihosting bridge and act on its verdict.
    fn service_trap_frame(&mut self, frame: TrapFrame) -> Result<(), SessionError<C::Error>> {
        let action = {
            let tty = self.tty.as_mut().map(|sink| &mut **sink as &mut dyn Write);
            semihost::service_trap(&mut self.target, &frame, tty)
        };
        match action {
            Ok(TrapAction::FileIo(body)) => {
                // The target waits halted for the F reply.
                self.running = false;
                self.reply(&body)
            }
            Ok(TrapAction::Stop(signal)) => {
                self.running = false;
                self.reply_stop(signal)
            }
            Ok(TrapAction::Resume) => match control::resume(&mut self.target) {
                Ok(()) => {
                    self.running = true;
                    Ok(())
                }
                Err(e) => {
                    warn!("resume after semihosted output failed: {}", e);
                    self.running = false;
                    self.reply_error()
                }
            },
            Err(e) => {
                warn!("semihosting bridge failed: {}", e);
                self.running = false;
                self.reply_error()
            }
        }
    }

    // ------------------------- reply helpers -------------------------- //

    fn reply(&mut self, body: &[u8]) -> Result<(), SessionError<C::Error>> {
        trace!(target: "trap-and-rsp-con", "rsp tx: {}", String::from_utf8_lossy(body));
        self.pkt.set(body);
        self.pkt.send(&mut self.conn).map_err(SessionError::Transport)
    }

    fn reply_empty(&mut self) -> Result<(), SessionError<C::Error>> {
        self.reply(b"")
    }

    fn reply_ok(&mut self) -> Result<(), SessionError<C::Error>> {
        self.reply(b"OK")
    }

    fn reply_error(&mut self) -> Result<(), SessionError<C::Error>> {
        self.reply(b"E01")
    }

    /// `S<hh>` for the "any"/"all" execute selections, `T<hh>thread:<tid>;`
    /// for a specific one.
    fn reply_stop(&mut self, signal: Signal) -> Result<(), SessionError<C::Error>> {
        let body = if self.thread_execute <= TID_ANY {
            format!("S{:02x}", signal.code())
        } else {
            format!("T{:02x}thread:{:x};", signal.code(), self.thread_execute)
        };
        self.reply(body.as_bytes())
    }
}
