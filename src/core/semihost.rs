//! Semi-hosted syscalls: TRAP instructions whose requests are satisfied by
//! the debugger through GDB's File-I/O extension.
//!
//! The register convention is R0–R2 = arguments, R3 = sub-function for the
//! generic trap 7. Replies come back as `F<ret>[,<errno>[,C]]` packets and
//! land in R0/R3 before the core is released again.

use std::io::Write;

use log::{debug, warn};

use crate::common::Signal;
use crate::core::regs;
use crate::core::stepper::TrapFrame;
use crate::protocol::codec;
use crate::target::{TargetControl, TargetResult};

/// Trap numbers (bits [15:10] of the trap instruction).
const TRAP_WRITE: u8 = 0;
const TRAP_READ: u8 = 1;
const TRAP_OPEN: u8 = 2;
const TRAP_EXIT: u8 = 3;
const TRAP_PASS: u8 = 4;
const TRAP_FAIL: u8 = 5;
const TRAP_CLOSE: u8 = 6;
const TRAP_OTHER: u8 = 7;

/// Sub-functions of [`TRAP_OTHER`], in R3; newlib syscall numbering.
const SYS_OPEN: u32 = 2;
const SYS_CLOSE: u32 = 3;
const SYS_READ: u32 = 4;
const SYS_WRITE: u32 = 5;
const SYS_LSEEK: u32 = 6;
const SYS_UNLINK: u32 = 7;
const SYS_FSTAT: u32 = 10;
const SYS_STAT: u32 = 15;

/// Pathnames fetched from target memory are capped at this many bytes.
const PATH_CAP: u32 = 1024;

/// `S_IRUSR | S_IWUSR`, the mode passed with `Fopen`.
const OPEN_MODE: u32 = 0o600;

/// Upper bound on a trap-7 printf transfer.
const PRINTF_CAP: usize = 0x10000;

/// What the dispatcher should do about a trap.
#[derive(Debug, PartialEq, Eq)]
pub enum TrapAction {
    /// Send this `F` request to the client and wait for its reply.
    FileIo(Vec<u8>),
    /// Report a stop with this signal.
    Stop(Signal),
    /// Handled locally; release the core.
    Resume,
}

/// A parsed `F<ret>[,<errno>[,C]]` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIoReply {
    pub ret: i32,
    pub errno: Option<i32>,
    /// The syscall was interrupted by Ctrl-C; registers are still applied
    /// but the target stays stopped.
    pub interrupted: bool,
}

/// Decode a trap and marshal its register arguments.
pub fn service_trap<T: TargetControl>(
    t: &mut T,
    frame: &TrapFrame,
    tty: Option<&mut dyn Write>,
) -> TargetResult<TrapAction> {
    let r0 = regs::read_gpr(t, 0)?;
    let r1 = regs::read_gpr(t, 1)?;
    let r2 = regs::read_gpr(t, 2)?;
    debug!(
        target: "trap-and-rsp-con",
        "trap {} at {:#010x}: r0={:#x} r1={:#x} r2={:#x}",
        frame.trap, frame.addr, r0, r1, r2
    );

    let action = match frame.trap {
        TRAP_WRITE => TrapAction::FileIo(format!("Fwrite,{:x},{:x},{:x}", r0, r1, r2).into_bytes()),
        TRAP_READ => TrapAction::FileIo(format!("Fread,{:x},{:x},{:x}", r0, r1, r2).into_bytes()),
        TRAP_OPEN => {
            let len = pathname_len(t, r0)?;
            TrapAction::FileIo(
                format!("Fopen,{:x}/{:x},{:x},{:x}", r0, len, r1, OPEN_MODE).into_bytes(),
            )
        }
        TRAP_EXIT => TrapAction::Stop(Signal::Quit),
        TRAP_PASS => TrapAction::Stop(Signal::Trap),
        TRAP_FAIL => TrapAction::Stop(Signal::Quit),
        TRAP_CLOSE => TrapAction::FileIo(format!("Fclose,{:x}", r0).into_bytes()),
        TRAP_OTHER => match tty {
            Some(out) => {
                tty_printf(t, out, r0, r1, r2)?;
                TrapAction::Resume
            }
            None => {
                let r3 = regs::read_gpr(t, 3)?;
                service_syscall(t, r3, r0, r1, r2)?
            }
        },
        n => {
            warn!(target: "trap-and-rsp-con", "unknown trap number {}", n);
            TrapAction::Stop(Signal::Quit)
        }
    };
    Ok(action)
}

/// Trap 7 without a tty: dispatch on the syscall number in R3.
fn service_syscall<T: TargetControl>(
    t: &mut T,
    sys: u32,
    r0: u32,
    r1: u32,
    r2: u32,
) -> TargetResult<TrapAction> {
    let body = match sys {
        SYS_CLOSE => format!("Fclose,{:x}", r0),
        SYS_OPEN => {
            let len = pathname_len(t, r0)?;
            format!("Fopen,{:x}/{:x},{:x},{:x}", r0, len, r1, OPEN_MODE)
        }
        SYS_READ => format!("Fread,{:x},{:x},{:x}", r0, r1, r2),
        SYS_WRITE => format!("Fwrite,{:x},{:x},{:x}", r0, r1, r2),
        SYS_LSEEK => format!("Flseek,{:x},{:x},{:x}", r0, r1, r2),
        SYS_UNLINK => {
            let len = pathname_len(t, r0)?;
            format!("Funlink,{:x}/{:x}", r0, len)
        }
        SYS_STAT => {
            let len = pathname_len(t, r0)?;
            format!("Fstat,{:x}/{:x},{:x}", r0, len, r1)
        }
        SYS_FSTAT => format!("Ffstat,{:x},{:x}", r0, r1),
        other => {
            warn!(target: "trap-and-rsp-con", "unknown syscall {} in trap 7", other);
            return Ok(TrapAction::Stop(Signal::Quit));
        }
    };
    Ok(TrapAction::FileIo(body.into_bytes()))
}

/// Length of the NUL-terminated pathname at `addr`, including the
/// terminator, capped at [`PATH_CAP`].
fn pathname_len<T: TargetControl>(t: &mut T, addr: u32) -> TargetResult<u32> {
    for i in 0..PATH_CAP {
        if t.read_mem8(addr.wrapping_add(i))? == 0 {
            return Ok(i + 1);
        }
    }
    Ok(PATH_CAP)
}

/// Semihosted printf: `r2` bytes at `r0`, of which the first `r1` are the
/// format string and the rest the packed argument blob.
fn tty_printf<T: TargetControl>(
    t: &mut T,
    out: &mut dyn Write,
    r0: u32,
    r1: u32,
    r2: u32,
) -> TargetResult<()> {
    let total = (r2 as usize).min(PRINTF_CAP);
    if total < r2 as usize {
        warn!(target: "trap-and-rsp-con", "printf transfer truncated to {} bytes", PRINTF_CAP);
    }
    let mut data = vec![0u8; total];
    t.read_burst(r0, &mut data)?;

    let split = (r1 as usize).min(data.len());
    let (fmt, blob) = data.split_at(split);
    let text = format_printf(fmt, blob);
    if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        warn!(target: "trap-and-rsp-con", "tty sink write failed: {}", e);
    }
    Ok(())
}

/// Render a printf-style format against the packed argument blob: `%s` is
/// NUL-terminated in the blob; the numeric conversions each consume four
/// big-endian bytes.
fn format_printf(fmt: &[u8], blob: &[u8]) -> String {
    let mut out = String::new();
    let mut args = blob;

    let mut take_word = |args: &mut &[u8]| -> u32 {
        if args.len() < 4 {
            *args = &args[args.len()..];
            return 0;
        }
        let word = u32::from_be_bytes(args[..4].try_into().unwrap());
        *args = &args[4..];
        word
    };

    let mut it = fmt.iter().copied();
    while let Some(ch) = it.next() {
        if ch != b'%' {
            // The format string is NUL-terminated like everything else.
            if ch == 0 {
                break;
            }
            out.push(ch as char);
            continue;
        }
        match it.next() {
            Some(b'%') => out.push('%'),
            Some(b's') => {
                let end = args.iter().position(|&b| b == 0).unwrap_or(args.len());
                out.push_str(&String::from_utf8_lossy(&args[..end]));
                args = &args[(end + 1).min(args.len())..];
            }
            Some(b'd') | Some(b'i') => out.push_str(&(take_word(&mut args) as i32).to_string()),
            Some(b'u') => out.push_str(&take_word(&mut args).to_string()),
            Some(b'x') => out.push_str(&format!("{:x}", take_word(&mut args))),
            Some(b'X') => out.push_str(&format!("{:X}", take_word(&mut args))),
            Some(b'p') => out.push_str(&format!("{:#010x}", take_word(&mut args))),
            Some(b'f') => {
                let val = f32::from_bits(take_word(&mut args));
                out.push_str(&val.to_string());
            }
            Some(other) => {
                out.push('%');
                out.push(other as char);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Parse the body of an `F` reply (without the leading `F`).
pub fn parse_reply(body: &[u8]) -> Option<FileIoReply> {
    let mut fields = body.split(|&b| b == b',');
    let ret = codec::parse_hex_signed(fields.next()?)?;

    let mut errno = None;
    let mut interrupted = false;
    for field in fields {
        if field == b"C" {
            interrupted = true;
        } else {
            errno = Some(codec::parse_hex_signed(field)?);
        }
    }
    Some(FileIoReply {
        ret,
        errno,
        interrupted,
    })
}

/// Write a reply back into the register convention: return value in R0,
/// errno in R3.
pub fn apply_reply<T: TargetControl>(t: &mut T, reply: &FileIoReply) -> TargetResult<()> {
    regs::write_gpr(t, 0, reply.ret as u32)?;
    if let Some(errno) = reply.errno {
        regs::write_gpr(t, 3, errno as u32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memmap::gpr_addr;
    use crate::target::sim::SimMesh;

    fn frame(trap: u8) -> TrapFrame {
        TrapFrame { trap, addr: 0x100 }
    }

    fn set_args(sim: &mut SimMesh, r0: u32, r1: u32, r2: u32) {
        sim.poke32(gpr_addr(0), r0);
        sim.poke32(gpr_addr(1), r1);
        sim.poke32(gpr_addr(2), r2);
    }

    #[test]
    fn trap_write_marshals_fd_buf_len() {
        let mut sim = SimMesh::new(1, 1);
        set_args(&mut sim, 1, 0x8000, 5);
        let action = service_trap(&mut sim, &frame(0), None).unwrap();
        assert_eq!(action, TrapAction::FileIo(b"Fwrite,1,8000,5".to_vec()));
    }

    #[test]
    fn trap_open_measures_the_pathname() {
        let mut sim = SimMesh::new(1, 1);
        sim.write_burst(0x8000, b"log.txt\0").unwrap();
        set_args(&mut sim, 0x8000, 2, 0);
        let action = service_trap(&mut sim, &frame(2), None).unwrap();
        assert_eq!(action, TrapAction::FileIo(b"Fopen,8000/8,2,180".to_vec()));
    }

    #[test]
    fn exit_pass_fail_map_to_signals() {
        let mut sim = SimMesh::new(1, 1);
        assert_eq!(
            service_trap(&mut sim, &frame(3), None).unwrap(),
            TrapAction::Stop(Signal::Quit)
        );
        assert_eq!(
            service_trap(&mut sim, &frame(4), None).unwrap(),
            TrapAction::Stop(Signal::Trap)
        );
        assert_eq!(
            service_trap(&mut sim, &frame(5), None).unwrap(),
            TrapAction::Stop(Signal::Quit)
        );
    }

    #[test]
    fn trap_seven_dispatches_on_r3() {
        let mut sim = SimMesh::new(1, 1);
        set_args(&mut sim, 4, 0x9000, 16);
        sim.poke32(gpr_addr(3), SYS_LSEEK);
        let action = service_trap(&mut sim, &frame(7), None).unwrap();
        assert_eq!(action, TrapAction::FileIo(b"Flseek,4,9000,10".to_vec()));
    }

    #[test]
    fn trap_seven_with_tty_formats_and_resumes() {
        let mut sim = SimMesh::new(1, 1);
        let fmt = b"x=%d s=%s\n";
        let mut image = Vec::new();
        image.extend_from_slice(fmt);
        image.extend_from_slice(&42u32.to_be_bytes());
        image.extend_from_slice(b"ok\0");
        sim.write_burst(0x8000, &image).unwrap();
        set_args(&mut sim, 0x8000, fmt.len() as u32, image.len() as u32);

        let mut tty = Vec::new();
        let action = {
            let sink: &mut dyn Write = &mut tty;
            service_trap(&mut sim, &frame(7), Some(sink)).unwrap()
        };
        assert_eq!(action, TrapAction::Resume);
        assert_eq!(tty, b"x=42 s=ok\n");
    }

    #[test]
    fn printf_conversions() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&0xdeadbeefu32.to_be_bytes());
        blob.extend_from_slice(&1.5f32.to_bits().to_be_bytes());
        assert_eq!(format_printf(b"%x %f 100%%", &blob), "deadbeef 1.5 100%");
    }

    #[test]
    fn reply_parsing() {
        assert_eq!(
            parse_reply(b"5"),
            Some(FileIoReply {
                ret: 5,
                errno: None,
                interrupted: false
            })
        );
        assert_eq!(
            parse_reply(b"-1,2"),
            Some(FileIoReply {
                ret: -1,
                errno: Some(2),
                interrupted: false
            })
        );
        assert_eq!(
            parse_reply(b"-1,4,C"),
            Some(FileIoReply {
                ret: -1,
                errno: Some(4),
                interrupted: true
            })
        );
        assert_eq!(parse_reply(b""), None);
    }

    #[test]
    fn reply_lands_in_r0_and_r3() {
        let mut sim = SimMesh::new(1, 1);
        apply_reply(
            &mut sim,
            &FileIoReply {
                ret: -1,
                errno: Some(13),
                interrupted: false,
            },
        )
        .unwrap();
        assert_eq!(sim.peek32(gpr_addr(0)), 0xffff_ffff);
        assert_eq!(sim.peek32(gpr_addr(3)), 13);
    }
}
