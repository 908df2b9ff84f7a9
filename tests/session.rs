//! Wire-level session tests: a scripted client feeds framed packets to the
//! server over an in-memory connection and the replies are checked as raw
//! bytes, with the simulator standing in for the mesh.

use std::collections::VecDeque;
use std::convert::Infallible;

use mesh_gdbserver::config::Config;
use mesh_gdbserver::connection::Connection;
use mesh_gdbserver::server::{GdbServer, SessionEnd};
use mesh_gdbserver::target::memmap::{gpr_addr, CORE_PC, CORE_STATUS, STATUS_ACTIVE_BIT};
use mesh_gdbserver::target::sim::{RunEffect, SimMesh};
use mesh_gdbserver::TargetControl;

/// A connection whose client side is a pre-scripted byte stream.
struct ScriptedClient {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl ScriptedClient {
    fn new() -> ScriptedClient {
        ScriptedClient {
            rx: VecDeque::new(),
            tx: Vec::new(),
        }
    }

    fn queue_packet(&mut self, body: &[u8]) {
        let sum: u8 = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        self.rx.push_back(b'$');
        self.rx.extend(body.iter().copied());
        self.rx.push_back(b'#');
        self.rx.extend(format!("{:02x}", sum).bytes());
    }

    fn queue_break(&mut self) {
        self.rx.push_back(0x03);
    }
}

impl Connection for ScriptedClient {
    type Error = Infallible;

    fn read(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.rx.pop_front())
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.rx.front().copied())
    }

    fn poll_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.rx.front().copied())
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.tx.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Payloads of the packets the server sent, in order.
fn sent_packets(tx: &[u8]) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let mut rest = tx;
    while let Some(start) = rest.iter().position(|&b| b == b'$') {
        let after = &rest[start + 1..];
        let end = after.iter().position(|&b| b == b'#').unwrap();
        packets.push(after[..end].to_vec());
        rest = &after[end + 1..];
    }
    packets
}

fn serve(client: ScriptedClient, sim: SimMesh) -> (Vec<Vec<u8>>, SimMesh) {
    let mut server = GdbServer::new(client, sim, Config::default()).unwrap();
    assert_eq!(server.serve().unwrap(), SessionEnd::Disconnected);
    let (client, sim) = server.into_parts();
    (sent_packets(&client.tx), sim)
}

#[test]
fn attach_reports_a_trap_stop() {
    let mut client = ScriptedClient::new();
    client.queue_packet(b"?");

    let mut server = GdbServer::new(client, SimMesh::new(2, 2), Config::default()).unwrap();
    assert_eq!(server.serve().unwrap(), SessionEnd::Disconnected);
    let (client, _) = server.into_parts();

    // Ack for the request, then the literal stop reply.
    assert_eq!(&client.tx, b"+$S05#b8");
}

#[test]
fn read_pc_register_by_number() {
    let mut sim = SimMesh::new(2, 2);
    sim.poke32(CORE_PC, 0x0000_0100);

    let mut client = ScriptedClient::new();
    client.queue_packet(b"p40");

    let (replies, _) = serve(client, sim);
    assert_eq!(replies, vec![b"00010000".to_vec()]);
}

#[test]
fn set_hit_and_remove_a_memory_breakpoint() {
    let mut sim = SimMesh::new(2, 2);
    // The instruction bytes 04 02 live at 0x1000.
    sim.write_burst(0x1000, &[0x04, 0x02]).unwrap();
    // On release the core runs into the breakpoint; the halted PC is one
    // past the breakpoint instruction.
    sim.on_run.push_back(RunEffect {
        writes: vec![(CORE_PC, 0x1002)],
        halt: true,
    });

    let mut client = ScriptedClient::new();
    client.queue_packet(b"Z0,1000,2");
    client.queue_packet(b"c");
    client.queue_packet(b"z0,1000,2");
    client.queue_packet(b"m1000,2");

    let (replies, sim) = serve(client, sim);
    assert_eq!(
        replies,
        vec![
            b"OK".to_vec(),
            b"S05".to_vec(),
            b"OK".to_vec(),
            b"0402".to_vec(),
        ]
    );
    // PC was rolled back onto the breakpoint before reporting.
    assert_eq!(sim.peek32(CORE_PC), 0x1000);
    // The original instruction is back.
    assert_eq!(sim.peek16(0x1000), u16::from_le_bytes([0x04, 0x02]));
}

#[test]
fn semihosted_write_round_trip() {
    let mut sim = SimMesh::new(2, 2);
    // TRAP 0 (write) at 0x100 with fd/buffer/length in R0-R2.
    sim.poke16(0x100, 0x03e2);
    sim.poke32(gpr_addr(0), 1);
    sim.poke32(gpr_addr(1), 0x8000);
    sim.poke32(gpr_addr(2), 5);
    // The resume after the F reply eventually halts somewhere ordinary.
    sim.on_run.push_back(RunEffect {
        writes: vec![(CORE_PC, 0x200)],
        halt: true,
    });

    let mut client = ScriptedClient::new();
    client.queue_packet(b"s100");
    client.queue_packet(b"F5");

    let (replies, sim) = serve(client, sim);
    assert_eq!(
        replies,
        vec![b"Fwrite,1,8000,5".to_vec(), b"S05".to_vec()]
    );
    // The return value landed in R0 before the resume.
    assert_eq!(sim.peek32(gpr_addr(0)), 5);
}

#[test]
fn ctrl_c_interrupts_a_continue() {
    let mut sim = SimMesh::new(2, 2);
    sim.poke32(CORE_STATUS, STATUS_ACTIVE_BIT);
    sim.poke32(CORE_PC, 0x2004);

    let mut client = ScriptedClient::new();
    client.queue_packet(b"c");
    client.queue_break();

    let (replies, sim) = serve(client, sim);
    assert_eq!(replies, vec![b"S05".to_vec()]);
    // Stopped on a non-IDLE core: the PC is backed up one slot.
    assert_eq!(sim.peek32(CORE_PC), 0x2002);
}

#[test]
fn supported_features_advertise_the_packet_size() {
    let mut client = ScriptedClient::new();
    client.queue_packet(b"qSupported:multiprocess+;xmlRegisters=i386");

    let (replies, _) = serve(client, SimMesh::new(2, 2));
    assert_eq!(replies, vec![b"PacketSize=2000;qXfer:osdata:read+".to_vec()]);
}

#[test]
fn whole_register_file_read_serialises_in_gdb_order() {
    let mut sim = SimMesh::new(2, 2);
    sim.poke32(gpr_addr(7), 0xcafe_f00d);

    let mut client = ScriptedClient::new();
    client.queue_packet(b"g");

    let (replies, _) = serve(client, sim);
    assert_eq!(replies.len(), 1);
    let image = &replies[0];
    assert_eq!(image.len(), 88 * 8);
    assert_eq!(&image[7 * 8..8 * 8], b"0df0feca");
}

#[test]
fn thread_selection_shapes_stop_replies() {
    let mut sim = SimMesh::new(2, 2);
    sim.write_burst(0x1000, &[0x04, 0x02]).unwrap();
    sim.on_run.push_back(RunEffect {
        writes: vec![(CORE_PC, 0x1002)],
        halt: true,
    });

    let mut client = ScriptedClient::new();
    client.queue_packet(b"Hc1");
    client.queue_packet(b"Z0,1000,2");
    client.queue_packet(b"c");

    let (replies, _) = serve(client, sim);
    assert_eq!(
        replies,
        vec![
            b"OK".to_vec(),
            b"OK".to_vec(),
            b"T05thread:1;".to_vec(),
        ]
    );
}

#[test]
fn monitor_coreid_returns_a_hex_ascii_payload() {
    // "coreid" in hex.
    let mut client = ScriptedClient::new();
    client.queue_packet(b"qRcmd,636f72656964");

    let (replies, _) = serve(client, SimMesh::new(2, 2));
    // "0x000\n" hex-encoded: core (0,0).
    assert_eq!(replies, vec![b"30783030300a".to_vec()]);
}

#[test]
fn binary_write_collapses_the_escape() {
    let sim = SimMesh::new(2, 2);

    let mut body = b"X2000,4:".to_vec();
    body.extend_from_slice(&[0x41, 0x42, 0x7d, 0x5d, 0x43]);

    let mut client = ScriptedClient::new();
    client.queue_packet(&body);
    client.queue_packet(b"m2000,4");

    let (replies, _) = serve(client, sim);
    assert_eq!(replies, vec![b"OK".to_vec(), b"41427d43".to_vec()]);
}

#[test]
fn oversized_memory_reads_are_refused() {
    let mut client = ScriptedClient::new();
    // 0x1000 bytes would render as 0x2000 hex characters: too big.
    client.queue_packet(b"m0,1000");

    let (replies, _) = serve(client, SimMesh::new(2, 2));
    assert_eq!(replies, vec![b"E01".to_vec()]);
}

#[test]
fn detach_acknowledges_and_closes() {
    let mut client = ScriptedClient::new();
    client.queue_packet(b"D");
    client.queue_packet(b"?"); // never read

    let mut server = GdbServer::new(client, SimMesh::new(2, 2), Config::default()).unwrap();
    assert_eq!(server.serve().unwrap(), SessionEnd::Detached);
    let (client, _) = server.into_parts();
    assert_eq!(sent_packets(&client.tx), vec![b"OK".to_vec()]);
}

#[test]
fn unknown_packets_get_the_empty_reply() {
    let mut client = ScriptedClient::new();
    client.queue_packet(b"vMustReplyEmpty");
    client.queue_packet(b"qFoo");

    let (replies, _) = serve(client, SimMesh::new(2, 2));
    assert_eq!(replies, vec![b"".to_vec(), b"".to_vec()]);
}
