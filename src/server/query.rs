//! The `q`/`Q` subsystems: handshake queries, thread info, monitor
//! commands, and the OS-data transfer object.

use log::{debug, info, warn};

use super::{GdbServer, SessionError};
use crate::connection::Connection;
use crate::core::{control, regs};
use crate::protocol::codec;
use crate::protocol::PACKET_CAPACITY;
use crate::target::TargetControl;

/// Monitor commands shown by `monitor help`.
const MONITOR_HELP: &str = "monitor commands:\n\
     swreset   software reset of the mesh\n\
     hwreset   platform reset\n\
     halt      halt the current core\n\
     run       release the current core\n\
     coreid    show the current core's COREID\n\
     help      this list\n";

/// The full list, including legacy commands kept for bring-up scripts.
const MONITOR_HELP_HIDDEN: &str = "hidden monitor commands:\n\
     help-hidden   this list\n\
     link          legacy link bring-up (no-op)\n\
     spi           legacy spi bring-up (no-op)\n";

impl<C: Connection, T: TargetControl> GdbServer<C, T> {
    pub(super) fn handle_query(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        if data == b"qC" {
            return self.reply(b"QC1");
        }
        if data == b"qfThreadInfo" {
            return self.reply(b"m1");
        }
        if data == b"qsThreadInfo" {
            return self.reply(b"l");
        }
        if data.starts_with(b"qSupported") {
            let features = format!("PacketSize={:x};qXfer:osdata:read+", PACKET_CAPACITY);
            return self.reply(features.as_bytes());
        }
        if data == b"qOffsets" {
            return self.reply(b"Text=0;Data=0;Bss=0");
        }
        if data.starts_with(b"qAttached") {
            return self.reply_empty();
        }
        if data.starts_with(b"qTStatus") {
            return self.reply_empty();
        }
        if data.starts_with(b"qSymbol:") {
            return self.reply_ok();
        }
        if data.starts_with(b"qThreadExtraInfo,") {
            return self.reply(&codec::ascii_to_hex(b"Runnable"));
        }
        if let Some(hex) = data.strip_prefix(b"qRcmd,") {
            return self.handle_monitor(hex);
        }
        if let Some(args) = data.strip_prefix(b"qXfer:osdata:read:") {
            return self.handle_osdata(args);
        }
        debug!("unsupported query: {}", String::from_utf8_lossy(data));
        self.reply_empty()
    }

    pub(super) fn handle_set(&mut self, data: &[u8]) -> Result<(), SessionError<C::Error>> {
        if data == b"QTinit" {
            return match self.target.init_trace() {
                Ok(()) => self.reply_ok(),
                Err(_) => self.reply_error(),
            };
        }
        if data == b"QTStart" {
            return match self.target.start_trace() {
                Ok(()) => self.reply_ok(),
                Err(_) => self.reply_error(),
            };
        }
        if data == b"QTStop" {
            return match self.target.stop_trace() {
                Ok(()) => self.reply_ok(),
                Err(_) => self.reply_error(),
            };
        }
        if data.starts_with(b"QTDP") || data.starts_with(b"QFrame") || data.starts_with(b"QTro") {
            // Tracepoint bookkeeping is accepted and ignored.
            return self.reply_ok();
        }
        if data.starts_with(b"QPassSignals:") {
            return self.reply_empty();
        }
        debug!("unsupported set packet: {}", String::from_utf8_lossy(data));
        self.reply_empty()
    }

    /// `qRcmd,<hex>`: monitor commands typed at the GDB prompt.
    fn handle_monitor(&mut self, hex: &[u8]) -> Result<(), SessionError<C::Error>> {
        let cmd = match codec::hex_to_ascii(hex) {
            Some(bytes) => bytes,
            None => {
                warn!("undecodable monitor command");
                return self.reply_error();
            }
        };
        let cmd = String::from_utf8_lossy(&cmd);
        let cmd = cmd.trim();
        info!("monitor command: {}", cmd);

        match cmd {
            "swreset" => match control::sw_reset(&mut self.target) {
                Ok(()) => self.reply_ok(),
                Err(e) => {
                    warn!("swreset failed: {}", e);
                    self.reply_error()
                }
            },
            "hwreset" => match control::hw_reset(&mut self.target) {
                Ok(()) => self.reply_ok(),
                Err(e) => {
                    warn!("hwreset failed: {}", e);
                    self.reply_error()
                }
            },
            "halt" => match control::halt(&mut self.target) {
                Ok(halted) => {
                    if !halted {
                        warn!("monitor halt: core did not stop");
                    }
                    self.reply_ok()
                }
                Err(e) => {
                    warn!("monitor halt failed: {}", e);
                    self.reply_error()
                }
            },
            "run" => match control::resume(&mut self.target) {
                Ok(()) => self.reply_ok(),
                Err(e) => {
                    warn!("monitor run failed: {}", e);
                    self.reply_error()
                }
            },
            "coreid" => match regs::read_coreid(&mut self.target) {
                Ok(id) => {
                    debug!("coreid for thread {}: {:#05x}", self.thread_general, id);
                    let text = format!("0x{:03x}\n", id);
                    self.reply(&codec::ascii_to_hex(text.as_bytes()))
                }
                Err(e) => {
                    warn!("coreid read failed: {}", e);
                    self.reply_error()
                }
            },
            "help" => self.reply(&codec::ascii_to_hex(MONITOR_HELP.as_bytes())),
            "help-hidden" => self.reply(&codec::ascii_to_hex(MONITOR_HELP_HIDDEN.as_bytes())),
            "link" | "spi" => {
                info!("legacy monitor command '{}' accepted", cmd);
                self.reply_ok()
            }
            other => {
                warn!("unknown monitor command '{}'", other);
                self.reply_ok()
            }
        }
    }

    /// `qXfer:osdata:read:<annex>:<offset>,<length>`.
    fn handle_osdata(&mut self, args: &[u8]) -> Result<(), SessionError<C::Error>> {
        let colon = match args.iter().position(|&b| b == b':') {
            Some(colon) => colon,
            None => return self.reply_error(),
        };
        let annex = &args[..colon];
        let window = &args[colon + 1..];
        let comma = match window.iter().position(|&b| b == b',') {
            Some(comma) => comma,
            None => return self.reply_error(),
        };
        let offset = codec::parse_hex(&window[..comma]);
        let length = codec::parse_hex(&window[comma + 1..]);
        let (offset, length) = match (offset, length) {
            (Some(offset), Some(length)) => (offset as usize, length as usize),
            _ => return self.reply_error(),
        };

        // Leave headroom for the frame and the escape expansion.
        let length = length.min(PACKET_CAPACITY / 2 - 8);
        let body = self
            .osdata
            .window(annex, offset, length, &mut self.target);
        match body {
            Some(body) => self.reply(&body),
            None => {
                warn!("unknown osdata annex: {}", String::from_utf8_lossy(annex));
                self.reply_error()
            }
        }
    }
}
