//! The register window: named accessors for the core registers the debug
//! engine manipulates, plus single-register and whole-file access in the
//! numbering the GDB client uses.
//!
//! GDB numbering: GPRs 0–63, then PC, STATUS, CONFIG, DEBUG, IRET, ILAT,
//! IMASK, IPEND (64–71), then the sixteen DMA words (72–87). The whole-file
//! image serialises in that same order, each word as 8 hex characters in
//! target byte order.

use crate::protocol::codec;
use crate::target::memmap::{
    gpr_addr, CORE_CONFIG, CORE_DEBUG, CORE_ILAT, CORE_IMASK, CORE_IPEND, CORE_IRET, CORE_PC,
    CORE_R0, CORE_STATUS, DMA0_CONFIG, DMA_WORDS, MESH_COREID, NUM_GPRS, SCR0_WINDOW_WORDS,
};
use crate::target::{TargetControl, TargetResult};

/// ABI register aliases.
pub const GPR_FP: u32 = 11;
pub const GPR_SP: u32 = 13;
pub const GPR_LR: u32 = 14;

/// Special core registers in GDB numbering order, as word offsets into the
/// group-0 burst window at [`CORE_CONFIG`].
const SCR0_GDB_ORDER: [usize; 8] = [
    2,  // PC
    1,  // STATUS
    0,  // CONFIG
    3,  // DEBUG
    8,  // IRET
    10, // ILAT
    9,  // IMASK
    13, // IPEND
];

/// Total registers visible to the client.
pub const NUM_REGS: usize = NUM_GPRS as usize + SCR0_GDB_ORDER.len() + DMA_WORDS;

/// Memory-mapped address of GDB register `n`, or `None` for an
/// out-of-range number.
pub fn reg_addr(n: usize) -> Option<u32> {
    const SCR0_ADDRS: [u32; 8] = [
        CORE_PC,
        CORE_STATUS,
        CORE_CONFIG,
        CORE_DEBUG,
        CORE_IRET,
        CORE_ILAT,
        CORE_IMASK,
        CORE_IPEND,
    ];
    let gprs = NUM_GPRS as usize;
    match n {
        n if n < gprs => Some(gpr_addr(n as u32)),
        n if n < gprs + SCR0_ADDRS.len() => Some(SCR0_ADDRS[n - gprs]),
        n if n < NUM_REGS => Some(DMA0_CONFIG + 4 * (n - gprs - SCR0_ADDRS.len()) as u32),
        _ => None,
    }
}

pub fn read_reg<T: TargetControl>(t: &mut T, n: usize) -> Option<TargetResult<u32>> {
    reg_addr(n).map(|addr| t.read_mem32(addr))
}

pub fn write_reg<T: TargetControl>(t: &mut T, n: usize, val: u32) -> Option<TargetResult<()>> {
    reg_addr(n).map(|addr| t.write_mem32(addr, val))
}

pub fn read_gpr<T: TargetControl>(t: &mut T, n: u32) -> TargetResult<u32> {
    t.read_mem32(gpr_addr(n))
}

pub fn write_gpr<T: TargetControl>(t: &mut T, n: u32, val: u32) -> TargetResult<()> {
    t.write_mem32(gpr_addr(n), val)
}

pub fn read_pc<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_PC)
}

pub fn write_pc<T: TargetControl>(t: &mut T, pc: u32) -> TargetResult<()> {
    t.write_mem32(CORE_PC, pc)
}

pub fn read_lr<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    read_gpr(t, GPR_LR)
}

pub fn read_fp<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    read_gpr(t, GPR_FP)
}

pub fn read_sp<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    read_gpr(t, GPR_SP)
}

pub fn read_status<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_STATUS)
}

pub fn read_debug<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_DEBUG)
}

pub fn read_imask<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_IMASK)
}

pub fn read_ilat<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_ILAT)
}

pub fn read_iret<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(CORE_IRET)
}

pub fn read_coreid<T: TargetControl>(t: &mut T) -> TargetResult<u32> {
    t.read_mem32(MESH_COREID)
}

/// Read the whole register file: one burst each over the GPR block, the
/// group-0 window and the DMA block, serialised in GDB order.
pub fn read_all<T: TargetControl>(t: &mut T, out: &mut Vec<u8>) -> TargetResult<()> {
    let mut gprs = [0u8; NUM_GPRS as usize * 4];
    t.read_burst(CORE_R0, &mut gprs)?;

    let mut scr0 = [0u8; SCR0_WINDOW_WORDS * 4];
    t.read_burst(CORE_CONFIG, &mut scr0)?;

    let mut dma = [0u8; DMA_WORDS * 4];
    t.read_burst(DMA0_CONFIG, &mut dma)?;

    let mut hex = [0u8; 8];
    for word in gprs.chunks_exact(4) {
        codec::reg32_to_hex(u32::from_le_bytes(word.try_into().unwrap()), &mut hex);
        out.extend_from_slice(&hex);
    }
    for &slot in &SCR0_GDB_ORDER {
        let word = &scr0[4 * slot..4 * slot + 4];
        codec::reg32_to_hex(u32::from_le_bytes(word.try_into().unwrap()), &mut hex);
        out.extend_from_slice(&hex);
    }
    for word in dma.chunks_exact(4) {
        codec::reg32_to_hex(u32::from_le_bytes(word.try_into().unwrap()), &mut hex);
        out.extend_from_slice(&hex);
    }
    Ok(())
}

/// Write the whole register file from a `G` packet image. The GPR and DMA
/// blocks go down as bursts; the group-0 registers are written one word at
/// a time so the unarchitected words of the window are left alone.
pub fn write_all<T: TargetControl>(t: &mut T, image: &[u8]) -> TargetResult<bool> {
    if image.len() != NUM_REGS * 8 {
        return Ok(false);
    }

    let mut words = [0u32; NUM_REGS];
    for (i, chunk) in image.chunks_exact(8).enumerate() {
        match codec::hex_to_reg32(chunk) {
            Some(word) => words[i] = word,
            None => return Ok(false),
        }
    }

    let gprs = NUM_GPRS as usize;
    let mut block = [0u8; NUM_GPRS as usize * 4];
    for (i, word) in words[..gprs].iter().enumerate() {
        block[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
    }
    t.write_burst(CORE_R0, &block)?;

    for (i, _) in SCR0_GDB_ORDER.iter().enumerate() {
        let addr = reg_addr(gprs + i).unwrap();
        t.write_mem32(addr, words[gprs + i])?;
    }

    let mut dma = [0u8; DMA_WORDS * 4];
    for (i, word) in words[gprs + SCR0_GDB_ORDER.len()..].iter().enumerate() {
        dma[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
    }
    t.write_burst(DMA0_CONFIG, &dma)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::sim::SimMesh;

    #[test]
    fn pc_is_register_64_at_config_plus_8() {
        assert_eq!(reg_addr(64), Some(CORE_CONFIG + 8));

        let mut sim = SimMesh::new(1, 1);
        sim.poke32(CORE_PC, 0x100);
        assert_eq!(read_reg(&mut sim, 64).unwrap().unwrap(), 0x100);
    }

    #[test]
    fn reg_numbering_covers_the_file_exactly() {
        assert_eq!(NUM_REGS, 88);
        assert_eq!(reg_addr(0), Some(CORE_R0));
        assert_eq!(reg_addr(63), Some(CORE_R0 + 63 * 4));
        assert_eq!(reg_addr(71), Some(CORE_IPEND));
        assert_eq!(reg_addr(72), Some(DMA0_CONFIG));
        assert_eq!(reg_addr(87), Some(DMA0_CONFIG + 15 * 4));
        assert_eq!(reg_addr(88), None);
    }

    #[test]
    fn read_all_serialises_in_gdb_order() {
        let mut sim = SimMesh::new(1, 1);
        sim.poke32(gpr_addr(0), 0x11111111);
        sim.poke32(gpr_addr(63), 0x63636363);
        sim.poke32(CORE_PC, 0x0000_0100);

        let mut out = Vec::new();
        read_all(&mut sim, &mut out).unwrap();
        assert_eq!(out.len(), NUM_REGS * 8);
        assert_eq!(&out[..8], b"11111111");
        // PC is the first word after the GPRs, little-endian on the wire.
        assert_eq!(&out[64 * 8..64 * 8 + 8], b"00010000");
    }

    #[test]
    fn write_all_round_trips_through_read_all() {
        let mut sim = SimMesh::new(1, 1);
        let mut image = Vec::new();
        for n in 0..NUM_REGS as u32 {
            let mut hex = [0u8; 8];
            codec::reg32_to_hex(n * 0x01010101 ^ 0xa5, &mut hex);
            image.extend_from_slice(&hex);
        }
        assert!(write_all(&mut sim, &image).unwrap());

        let mut back = Vec::new();
        read_all(&mut sim, &mut back).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn write_all_rejects_bad_images() {
        let mut sim = SimMesh::new(1, 1);
        assert!(!write_all(&mut sim, b"0011").unwrap());
        let bad = vec![b'z'; NUM_REGS * 8];
        assert!(!write_all(&mut sim, &bad).unwrap());
    }
}
