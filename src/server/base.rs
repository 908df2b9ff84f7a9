//! Handlers for the core packet letters, dispatched by a flat match on the
//! first byte.

use log::{debug, trace, warn};

use super::{Flow, GdbServer, SessionError};
use crate::common::Signal;
use crate::connection::Connection;
use crate::core::breakpoints::BreakType;
use crate::core::semihost;
use crate::core::regs;
use crate::core::stepper;
use crate::protocol::codec;
use crate::protocol::PACKET_CAPACITY;
use crate::target::memmap::BKPT_INSTR;
use crate::target::TargetControl;

impl<C: Connection, T: TargetControl> GdbServer<C, T> {
    pub(super) fn dispatch(&mut self) -> Result<Flow, SessionError<C::Error>> {
        let mut data = self.pkt.data().to_vec();
        trace!(target: "trap-and-rsp-con", "rsp rx: {}", String::from_utf8_lossy(&data));

        let first = match data.first() {
            Some(&byte) => byte,
            None => {
                self.reply_empty()?;
                return Ok(Flow::Continue);
            }
        };

        match first {
            // Extended mode is unsupported.
            b'!' => self.reply_empty()?,
            // Last stop status: report TRAP for all threads.
            b'?' => self.reply(b"S05")?,
            b'A' => {
                warn!("program arguments are not supported");
                self.reply_error()?;
            }
            b'b' | b'B' | b'd' | b'r' | b't' | b'i' | b'I' => {
                warn!("deprecated/unsupported packet '{}'", first as char);
                self.reply_empty()?;
            }
            b'c' => self.handle_continue(&data)?,
            b'C' => self.handle_continue_with_signal(&data)?,
            b'D' => {
                self.reply_ok()?;
                return Ok(Flow::Close(super::SessionEnd::Detached));
            }
            b'F' => self.handle_fileio_reply(&data)?,
            b'g' => self.handle_read_all_registers()?,
            b'G' => self.handle_write_all_registers(&data)?,
            b'H' => self.handle_set_thread(&data)?,
            b'k' => {
                debug!("kill request; closing the session");
                self.running = false;
                return Ok(Flow::Close(super::SessionEnd::Killed));
            }
            b'm' => self.handle_mem_read(&data)?,
            b'M' => self.handle_mem_write(&data)?,
            b'p' => self.handle_reg_read(&data)?,
            b'P' => self.handle_reg_write(&data)?,
            b'q' => self.handle_query(&data)?,
            b'Q' => self.handle_set(&data)?,
            b'R' => {
                debug!(target: "stop-resume", "restart: PC <- 0");
                if let Err(e) = regs::write_pc(&mut self.target, 0) {
                    warn!("restart failed: {}", e);
                }
            }
            b's' => self.handle_step(&data)?,
            b'S' => {
                warn!("step-with-signal is not supported");
                self.reply(&data)?;
            }
            b'T' => self.reply_ok()?,
            b'v' => self.handle_v_packet(&data)?,
            b'X' => self.handle_binary_write(&mut data)?,
            b'z' | b'Z' => self.handle_breakpoint(first == b'Z', &data)?,
            _ => {
                warn!("unsupported packet '{}'", first as char);
                self.reply_empty()?;
            }
        }
        Ok(Flow::Continue)
    }

    // --------------------- execution control -------------------------- //

    fn handle_continue(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let addr = if data.len() > 1 {
            match codec::parse_hex(&data[1..]) {
                Some(addr) => Some(addr),
                None => {
                    warn!("malformed continue packet");
                    return self.reply_error();
                }
            }
        } else {
            None
        };
        debug!(target: "stop-resume", "continue from {:?}", addr);

        match stepper::continue_run(&mut self.target, &self.bps, addr) {
            Ok(outcome) => self.act_on_outcome(outcome),
            Err(e) => {
                warn!("continue failed: {}", e);
                self.reply_error()
            }
        }
    }

    /// `C<sig>[;addr]`: resuming with a signal is not possible on this
    /// target; `C03` reports QUIT, anything else TRAP, without resuming.
    fn handle_continue_with_signal(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        warn!("continue-with-signal is not supported; reporting a stop instead");
        if data.len() >= 3 && &data[1..3] == b"03" {
            self.reply_stop(Signal::Quit)
        } else {
            self.reply_stop(Signal::Trap)
        }
    }

    fn handle_step(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let start = if data.len() > 1 {
            match codec::parse_hex(&data[1..]) {
                Some(addr) => addr,
                None => {
                    warn!("malformed step packet");
                    return self.reply_error();
                }
            }
        } else {
            match regs::read_pc(&mut self.target) {
                Ok(pc) => pc,
                Err(e) => {
                    warn!("could not read the PC for a step: {}", e);
                    return self.reply_error();
                }
            }
        };

        match stepper::step(&mut self.target, &mut self.bps, &mut self.ivt, start) {
            Ok(outcome) => self.act_on_outcome(outcome),
            Err(e) => {
                warn!("step failed: {}", e);
                self.reply_error()
            }
        }
    }

    /// `F<ret>[,<errno>[,C]]`: the client's answer to a File-I/O request.
    fn handle_fileio_reply(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let reply = match semihost::parse_reply(&data[1..]) {
            Some(reply) => reply,
            None => {
                warn!("malformed F reply");
                return self.reply_error();
            }
        };
        debug!(target: "trap-and-rsp-con", "file-i/o reply: {:?}", reply);

        if let Err(e) = semihost::apply_reply(&mut self.target, &reply) {
            warn!("could not apply the F reply: {}", e);
            return self.reply_error();
        }

        if reply.interrupted {
            // Interrupted syscall: registers are in place, but stay stopped.
            return self.reply_stop(Signal::Trap);
        }

        match crate::core::control::resume(&mut self.target) {
            Ok(()) => {
                self.running = true;
                Ok(())
            }
            Err(e) => {
                warn!("resume after the F reply failed: {}", e);
                self.reply_error()
            }
        }
    }

    // ------------------------- registers ------------------------------ //

    fn handle_read_all_registers(&mut self) -> Result<(), SessionError<C::Error>> {
        let mut image = Vec::with_capacity(regs::NUM_REGS * 8);
        match regs::read_all(&mut self.target, &mut image) {
            Ok(()) => self.reply(&image),
            Err(e) => {
                warn!("register file read failed: {}", e);
                self.reply_error()
            }
        }
    }

    fn handle_write_all_registers(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        match regs::write_all(&mut self.target, &data[1..]) {
            Ok(true) => self.reply_ok(),
            Ok(false) => {
                warn!("malformed register file image ({} bytes)", data.len() - 1);
                self.reply_error()
            }
            Err(e) => {
                warn!("register file write failed: {}", e);
                self.reply_error()
            }
        }
    }

    fn handle_reg_read(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let n = match codec::parse_hex(&data[1..]) {
            Some(n) => n as usize,
            None => return self.reply_error(),
        };
        match regs::read_reg(&mut self.target, n) {
            Some(Ok(val)) => {
                let mut hex = [0u8; 8];
                codec::reg32_to_hex(val, &mut hex);
                self.reply(&hex)
            }
            Some(Err(e)) => {
                warn!("register {} read failed: {}", n, e);
                self.reply_error()
            }
            None => {
                warn!("no such register {}", n);
                self.reply_error()
            }
        }
    }

    fn handle_reg_write(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let body = &data[1..];
        let eq = match body.iter().position(|&b| b == b'=') {
            Some(eq) => eq,
            None => return self.reply_error(),
        };
        let n = codec::parse_hex(&body[..eq]);
        let val = codec::hex_to_reg32(&body[eq + 1..]);
        match (n, val) {
            (Some(n), Some(val)) => match regs::write_reg(&mut self.target, n as usize, val) {
                Some(Ok(())) => self.reply_ok(),
                Some(Err(e)) => {
                    warn!("register {} write failed: {}", n, e);
                    self.reply_error()
                }
                None => self.reply_error(),
            },
            _ => self.reply_error(),
        }
    }

    // --------------------------- memory ------------------------------- //

    fn handle_mem_read(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let (addr, len) = match parse_addr_len(&data[1..]) {
            Some(pair) => pair,
            None => {
                warn!("malformed memory read");
                return self.reply_error();
            }
        };
        // The hex rendering must fit in the packet buffer.
        if 2 * len as usize >= PACKET_CAPACITY {
            warn!("memory read of {:#x} bytes exceeds the packet buffer", len);
            return self.reply_error();
        }
        trace!(target: "tran-detail", "read {:#x} bytes at {:#010x}", len, addr);

        let mut buf = vec![0u8; len as usize];
        match self.target.read_burst(addr, &mut buf) {
            Ok(()) => {
                let hex = codec::ascii_to_hex(&buf);
                self.reply(&hex)
            }
            Err(e) => {
                warn!("memory read at {:#010x} failed: {}", addr, e);
                self.reply_error()
            }
        }
    }

    fn handle_mem_write(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let colon = match data.iter().position(|&b| b == b':') {
            Some(colon) => colon,
            None => return self.reply_error(),
        };
        let (addr, len) = match parse_addr_len(&data[1..colon]) {
            Some(pair) => pair,
            None => {
                warn!("malformed memory write");
                return self.reply_error();
            }
        };
        let hex = &data[colon + 1..];
        if hex.len() != 2 * len as usize {
            warn!(
                "memory write length mismatch: {} digits for {:#x} bytes",
                hex.len(),
                len
            );
            return self.reply_error();
        }
        let bytes = match codec::hex_to_ascii(hex) {
            Some(bytes) => bytes,
            None => return self.reply_error(),
        };
        trace!(target: "tran-detail", "write {:#x} bytes at {:#010x}", len, addr);

        match self.target.write_burst(addr, &bytes) {
            Ok(()) => self.reply_ok(),
            Err(e) => {
                warn!("memory write at {:#010x} failed: {}", addr, e);
                self.reply_error()
            }
        }
    }

    /// `X<addr>,<len>:<bin>`: binary write; the body carries the RSP escape.
    fn handle_binary_write(&mut self, data: &mut [u8]) -> Result<(), SessionError<C::Error>> {
        let colon = match data.iter().position(|&b| b == b':') {
            Some(colon) => colon,
            None => return self.reply_error(),
        };
        let (addr, len) = match parse_addr_len(&data[1..colon]) {
            Some(pair) => pair,
            None => {
                warn!("malformed binary write");
                return self.reply_error();
            }
        };

        let body = &mut data[colon + 1..];
        let body_len = body.len();
        let unescaped = codec::rsp_unescape(body, body_len);
        if unescaped != len as usize {
            warn!(
                "binary write length mismatch: {} bytes for {:#x}",
                unescaped, len
            );
            return self.reply_error();
        }
        trace!(target: "tran-detail", "binary write of {:#x} bytes at {:#010x}", len, addr);

        let body = &data[colon + 1..colon + 1 + unescaped];
        match self.target.write_burst(addr, body) {
            Ok(()) => self.reply_ok(),
            Err(e) => {
                warn!("binary write at {:#010x} failed: {}", addr, e);
                self.reply_error()
            }
        }
    }

    // -------------------------- threads ------------------------------- //

    /// `H<op><tid>`: select the thread for later operations.
    fn handle_set_thread(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        if data.len() < 3 {
            return self.reply_error();
        }
        let tid = match codec::parse_hex_signed(&data[2..]) {
            Some(tid) => tid,
            None => return self.reply_error(),
        };
        let result = match data[1] {
            b'g' => self
                .target
                .set_thread_general(tid)
                .map(|()| self.thread_general = tid),
            b'c' => self
                .target
                .set_thread_execute(tid)
                .map(|()| self.thread_execute = tid),
            op => {
                warn!("unknown thread op '{}'", op as char);
                return self.reply_error();
            }
        };
        match result {
            Ok(()) => self.reply_ok(),
            Err(e) => {
                warn!("thread selection failed: {}", e);
                self.reply_error()
            }
        }
    }

    // ------------------------ breakpoints ----------------------------- //

    /// `Z`/`z`: insert or remove a breakpoint. Only memory breakpoints are
    /// implemented; other kinds get the empty "unsupported" reply.
    fn handle_breakpoint(&mut self, insert: bool, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        let mut fields = data[1..].split(|&b| b == b',');
        let kind = fields.next().and_then(|f| f.first().copied());
        let addr = fields.next().and_then(codec::parse_hex);
        let length = fields.next().and_then(codec::parse_hex);

        let (kind, addr) = match (kind.and_then(BreakType::from_z), addr, length) {
            (Some(kind), Some(addr), Some(_)) => (kind, addr),
            _ => {
                warn!("malformed breakpoint packet");
                return self.reply_error();
            }
        };

        if kind != BreakType::Memory {
            // Recognised but unimplemented; GDB falls back on its own.
            return self.reply_empty();
        }

        if insert {
            if self.bps.lookup(kind, addr).is_some() {
                // Already planted; the saved word must not be clobbered.
                return self.reply_ok();
            }
            let saved = match self.target.read_mem16(addr) {
                Ok(word) => word,
                Err(e) => {
                    warn!("breakpoint insert at {:#010x} failed: {}", addr, e);
                    return self.reply_error();
                }
            };
            if let Err(e) = self.target.write_mem16(addr, BKPT_INSTR) {
                warn!("breakpoint insert at {:#010x} failed: {}", addr, e);
                return self.reply_error();
            }
            self.bps.add(kind, addr, saved);
            debug!(target: "stop-resume", "breakpoint set at {:#010x} (saved {:#06x})", addr, saved);
            self.reply_ok()
        } else {
            match self.bps.remove(kind, addr) {
                Some(saved) => match self.target.write_mem16(addr, saved) {
                    Ok(()) => {
                        debug!(target: "stop-resume", "breakpoint cleared at {:#010x}", addr);
                        self.reply_ok()
                    }
                    Err(e) => {
                        warn!("breakpoint removal at {:#010x} failed: {}", addr, e);
                        self.reply_error()
                    }
                },
                None => {
                    warn!("no breakpoint at {:#010x} to remove", addr);
                    self.reply_ok()
                }
            }
        }
    }

    // --------------------------- v packets ---------------------------- //

    fn handle_v_packet(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        if data.starts_with(b"vAttach;") {
            return self.reply(b"S05");
        }
        if data == b"vCont?" {
            // No vCont action lists; the plain c/s packets are used instead.
            return self.reply_empty();
        }
        if data.starts_with(b"vRun;") {
            if let Err(e) = regs::write_pc(&mut self.target, 0) {
                warn!("restart for vRun failed: {}", e);
                return self.reply_error();
            }
            return self.reply(b"S05");
        }
        if data.starts_with(b"vMustReplyEmpty") {
            return self.reply_empty();
        }
        warn!("unsupported v packet: {}", String::from_utf8_lossy(data));
        self.reply_empty()
    }
}

/// Parse `<addr>,<len>` out of a packet body.
fn parse_addr_len(body: &[u8]) -> Option<(u32, u32)> {
    let comma = body.iter().position(|&b| b == b',')?;
    let addr = codec::parse_hex(&body[..comma])?;
    let len = codec::parse_hex(&body[comma + 1..])?;
    Some((addr, len))
}
