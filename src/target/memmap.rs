//! Properties of the target: the per-core memory map, register layout, and
//! the instruction words the debug engine recognises. These are facts about
//! the silicon, injected here as constants.

/// Base of the general-purpose register file; GPR `n` lives at `+ 4n`.
pub const CORE_R0: u32 = 0xf0000;
/// Number of general-purpose registers.
pub const NUM_GPRS: u32 = 64;

/// Base of special-core-register group 0. STATUS, PC and DEBUG follow at
/// word offsets 1, 2 and 3.
pub const CORE_CONFIG: u32 = 0xf0400;
pub const CORE_STATUS: u32 = CORE_CONFIG + 0x04;
pub const CORE_PC: u32 = CORE_CONFIG + 0x08;
pub const CORE_DEBUG: u32 = CORE_CONFIG + 0x0c;
pub const CORE_IRET: u32 = CORE_CONFIG + 0x20;
pub const CORE_IMASK: u32 = CORE_CONFIG + 0x24;
pub const CORE_ILAT: u32 = CORE_CONFIG + 0x28;
pub const CORE_IPEND: u32 = CORE_CONFIG + 0x34;
/// Words covered by one burst over group 0 (CONFIG through IPEND).
pub const SCR0_WINDOW_WORDS: usize = 14;

/// Debug command register. Writing [`DEBUGCMD_HALT`] stops the core;
/// [`DEBUGCMD_RUN`] releases it.
pub const CORE_DEBUGCMD: u32 = 0xf0448;
pub const DEBUGCMD_HALT: u32 = 1;
pub const DEBUGCMD_RUN: u32 = 0;

/// DMA register block: eight words for DMA0 followed by eight for DMA1
/// (CONFIG, STRIDE, COUNT, SRCADDR, DSTADDR, AUTO0, AUTO1, STATUS each).
pub const DMA0_CONFIG: u32 = 0xf0500;
pub const DMA_WORDS: usize = 16;

/// Mesh registers.
pub const MESH_COREID: u32 = 0xf0704;
pub const MESH_SWRESET: u32 = 0xf070c;

/// DEBUG register fields.
pub const DEBUG_HALT_BIT: u32 = 1 << 0;
pub const DEBUG_OUT_TRAN_BIT: u32 = 1 << 1;

/// STATUS register fields.
pub const STATUS_ACTIVE_BIT: u32 = 1 << 0;
/// Global interrupt disable; interrupts are enabled while this bit is clear.
pub const STATUS_GID_BIT: u32 = 1 << 1;
pub const STATUS_EXCAUSE_SHIFT: u32 = 16;
pub const STATUS_EXCAUSE_MASK: u32 = 0x7;
/// Exception cause codes found in STATUS[18:16].
pub const EXCAUSE_NONE: u32 = 0b000;
pub const EXCAUSE_UNALIGNED: u32 = 0b001;
pub const EXCAUSE_ILLEGAL_ACCESS: u32 = 0b010;
pub const EXCAUSE_FPU: u32 = 0b011;
pub const EXCAUSE_UNIMPLEMENTED: u32 = 0b100;

/// The interrupt vector table: one 32-bit entry per interrupt, at address 0.
/// Entry 0 is reset.
pub const IVT_BASE: u32 = 0;
pub const IVT_ENTRIES: usize = 10;
pub const IVT_ENTRY_BYTES: usize = 4;
pub const IVT_BYTES: usize = IVT_ENTRIES * IVT_ENTRY_BYTES;

/// The dedicated 16-bit breakpoint instruction.
pub const BKPT_INSTR: u16 = 0x01c2;
/// Size of the breakpoint instruction in bytes.
pub const BKPT_SIZE: u32 = 2;
/// 16-bit no-op, used by the compiler to pad trap sites.
pub const NOP_INSTR: u16 = 0x01a2;
/// Puts the core to sleep until an interrupt is latched.
pub const IDLE_INSTR: u16 = 0x01b2;
/// Return-from-interrupt: low nine bits.
pub const RTI_MASK9: u16 = 0x1d2;
/// Register jumps: low nine bits of the 16-bit forms.
pub const JR_MASK9: u16 = 0x142;
pub const JALR_MASK9: u16 = 0x152;
/// Register jumps: low nine bits of the 32-bit forms.
pub const JR_LONG_MASK9: u16 = 0x14f;
pub const JALR_LONG_MASK9: u16 = 0x15f;
/// Semihosting trap: low ten bits; the trap number sits in bits [15:10].
pub const TRAP_MASK10: u16 = 0x3e2;

/// True when `instr` is a semihosting trap.
pub fn is_trap(instr: u16) -> bool {
    instr & 0x3ff == TRAP_MASK10
}

/// The trap number of a trap instruction.
pub fn trap_number(instr: u16) -> u8 {
    (instr >> 10) as u8
}

/// Address of GPR `n` for the selected core.
pub fn gpr_addr(n: u32) -> u32 {
    debug_assert!(n < NUM_GPRS);
    CORE_R0 + 4 * n
}
