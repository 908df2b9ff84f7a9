//! An in-process mesh: sparse memory plus just enough debug-unit behavior
//! to exercise the server without silicon. The test-suite drives it with
//! scripted run effects; the binary falls back to it when no transport is
//! configured.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::target::memmap::{
    CORE_DEBUG, CORE_DEBUGCMD, DEBUGCMD_HALT, DEBUGCMD_RUN, DEBUG_HALT_BIT, MESH_COREID,
};
use crate::target::{TargetControl, TargetError, TargetResult};

/// What the simulated core does when it is released with a RUN command:
/// apply `writes` (32-bit stores), then halt again if `halt` is set.
#[derive(Debug, Default, Clone)]
pub struct RunEffect {
    pub writes: Vec<(u32, u32)>,
    pub halt: bool,
}

pub struct SimMesh {
    mem: HashMap<u32, u8>,
    rows: u32,
    cols: u32,
    general_core: usize,
    execute_core: usize,
    /// Scripted behavior for successive RUN commands. With the queue empty a
    /// released core just keeps running until the next HALT command.
    pub on_run: VecDeque<RunEffect>,
    /// Values written to the mesh software-reset register, in order.
    pub swreset_writes: Vec<u32>,
    pub platform_resets: u32,
}

impl SimMesh {
    pub fn new(rows: u32, cols: u32) -> SimMesh {
        let mut sim = SimMesh {
            mem: HashMap::new(),
            rows,
            cols,
            general_core: 0,
            execute_core: 0,
            on_run: VecDeque::new(),
            swreset_writes: Vec::new(),
            platform_resets: 0,
        };
        // Cores come up halted.
        sim.poke32(CORE_DEBUG, DEBUG_HALT_BIT);
        sim
    }

    /// COREID encodes the mesh coordinate: row in [9:6], column in [5:0].
    fn coreid(&self, core: usize) -> u16 {
        let row = core as u32 / self.cols;
        let col = core as u32 % self.cols;
        ((row << 6) | col) as u16
    }

    /// Back-door store, bypassing debug-unit side effects.
    pub fn poke32(&mut self, addr: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.mem.insert(addr + i as u32, *byte);
        }
    }

    pub fn poke16(&mut self, addr: u32, value: u16) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.mem.insert(addr + i as u32, *byte);
        }
    }

    pub fn peek32(&self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = *self.mem.get(&(addr + i as u32)).unwrap_or(&0);
        }
        u32::from_le_bytes(bytes)
    }

    pub fn peek16(&self, addr: u32) -> u16 {
        let lo = *self.mem.get(&addr).unwrap_or(&0);
        let hi = *self.mem.get(&(addr + 1)).unwrap_or(&0);
        u16::from_le_bytes([lo, hi])
    }

    fn debugcmd(&mut self, value: u32) {
        debug!(
            "sim: debug command {:#x} for core {}",
            value, self.execute_core
        );
        match value {
            DEBUGCMD_HALT => {
                let debug = self.peek32(CORE_DEBUG) | DEBUG_HALT_BIT;
                self.poke32(CORE_DEBUG, debug);
            }
            DEBUGCMD_RUN => match self.on_run.pop_front() {
                Some(effect) => {
                    debug!("sim: run effect with {} writes", effect.writes.len());
                    for (addr, value) in effect.writes {
                        self.poke32(addr, value);
                    }
                    let debug = self.peek32(CORE_DEBUG);
                    if effect.halt {
                        self.poke32(CORE_DEBUG, debug | DEBUG_HALT_BIT);
                    } else {
                        self.poke32(CORE_DEBUG, debug & !DEBUG_HALT_BIT);
                    }
                }
                None => {
                    let debug = self.peek32(CORE_DEBUG) & !DEBUG_HALT_BIT;
                    self.poke32(CORE_DEBUG, debug);
                }
            },
            other => debug!("sim: unknown debug command {:#x}", other),
        }
    }

    fn core_for_tid(&self, tid: i32) -> TargetResult<usize> {
        let cores = (self.rows * self.cols) as i32;
        match tid {
            // "Any" and "all" both steer at the first core.
            -1 | 0 => Ok(0),
            t if t > 0 && t <= cores => Ok((t - 1) as usize),
            t => Err(TargetError::BadThread(t)),
        }
    }
}

impl TargetControl for SimMesh {
    fn read_mem8(&mut self, addr: u32) -> TargetResult<u8> {
        Ok(*self.mem.get(&addr).unwrap_or(&0))
    }

    fn read_mem16(&mut self, addr: u32) -> TargetResult<u16> {
        Ok(self.peek16(addr))
    }

    fn read_mem32(&mut self, addr: u32) -> TargetResult<u32> {
        if addr == MESH_COREID {
            return Ok(u32::from(self.coreid(self.general_core)));
        }
        Ok(self.peek32(addr))
    }

    fn write_mem8(&mut self, addr: u32, value: u8) -> TargetResult<()> {
        self.mem.insert(addr, value);
        Ok(())
    }

    fn write_mem16(&mut self, addr: u32, value: u16) -> TargetResult<()> {
        self.poke16(addr, value);
        Ok(())
    }

    fn write_mem32(&mut self, addr: u32, value: u32) -> TargetResult<()> {
        match addr {
            CORE_DEBUGCMD => self.debugcmd(value),
            crate::target::memmap::MESH_SWRESET => self.swreset_writes.push(value),
            _ => self.poke32(addr, value),
        }
        Ok(())
    }

    fn read_burst(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = *self.mem.get(&(addr + i as u32)).unwrap_or(&0);
        }
        Ok(())
    }

    fn write_burst(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        for (i, &byte) in buf.iter().enumerate() {
            self.mem.insert(addr + i as u32, byte);
        }
        Ok(())
    }

    fn platform_reset(&mut self) -> TargetResult<()> {
        self.platform_resets += 1;
        Ok(())
    }

    fn list_core_ids(&self) -> Vec<u16> {
        (0..(self.rows * self.cols) as usize)
            .map(|core| self.coreid(core))
            .collect()
    }

    fn rows(&self) -> u32 {
        self.rows
    }

    fn cols(&self) -> u32 {
        self.cols
    }

    fn set_thread_general(&mut self, tid: i32) -> TargetResult<()> {
        self.general_core = self.core_for_tid(tid)?;
        Ok(())
    }

    fn set_thread_execute(&mut self, tid: i32) -> TargetResult<()> {
        self.execute_core = self.core_for_tid(tid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memmap::DEBUGCMD_RUN;

    #[test]
    fn halt_and_run_drive_the_debug_register() {
        let mut sim = SimMesh::new(2, 2);
        assert_eq!(sim.read_mem32(CORE_DEBUG).unwrap() & DEBUG_HALT_BIT, 1);

        sim.write_mem32(CORE_DEBUGCMD, DEBUGCMD_RUN).unwrap();
        assert_eq!(sim.read_mem32(CORE_DEBUG).unwrap() & DEBUG_HALT_BIT, 0);

        sim.write_mem32(CORE_DEBUGCMD, DEBUGCMD_HALT).unwrap();
        assert_eq!(sim.read_mem32(CORE_DEBUG).unwrap() & DEBUG_HALT_BIT, 1);
    }

    #[test]
    fn run_effects_apply_in_order() {
        let mut sim = SimMesh::new(1, 1);
        sim.on_run.push_back(RunEffect {
            writes: vec![(0x1000, 0xdead_beef)],
            halt: true,
        });
        sim.write_mem32(CORE_DEBUGCMD, DEBUGCMD_RUN).unwrap();
        assert_eq!(sim.peek32(0x1000), 0xdead_beef);
        assert_eq!(sim.read_mem32(CORE_DEBUG).unwrap() & DEBUG_HALT_BIT, 1);
    }

    #[test]
    fn thread_steering_validates_ids() {
        let mut sim = SimMesh::new(2, 2);
        assert!(sim.set_thread_general(4).is_ok());
        assert!(sim.set_thread_general(5).is_err());
        assert!(sim.set_thread_execute(0).is_ok());
    }
}
