//! Server configuration, parsed from the command line.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Log categories that can be opened up individually. Each maps to a log
/// target used by the corresponding subsystem.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogCategory {
    /// Stop/resume decisions of the step engine and controller.
    StopResume,
    /// Semihosting traps and RSP connection traffic.
    TrapAndRspCon,
    /// Break polling while the target runs.
    CtrlCWait,
    /// Word-level target transactions.
    TranDetail,
}

impl LogCategory {
    pub fn target(self) -> &'static str {
        match self {
            LogCategory::StopResume => "stop-resume",
            LogCategory::TrapAndRspCon => "trap-and-rsp-con",
            LogCategory::CtrlCWait => "ctrl-c-wait",
            LogCategory::TranDetail => "tran-detail",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mesh-gdbserver", version, about = "GDB RSP server for mesh accelerators")]
pub struct Config {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 51000, env = "MESH_GDBSERVER_PORT")]
    pub port: u16,

    /// Halt the target as soon as a client attaches.
    #[arg(long)]
    pub halt_on_attach: bool,

    /// File or device that receives semihosted printf output. Without it,
    /// trap 7 falls back to GDB File-I/O.
    #[arg(long)]
    pub tty: Option<PathBuf>,

    /// Open up an extra log category (repeatable).
    #[arg(long = "verbose", value_enum, value_name = "CATEGORY")]
    pub verbose: Vec<LogCategory>,

    /// Mesh rows of the built-in simulator backend.
    #[arg(long, default_value_t = 2)]
    pub rows: u32,

    /// Mesh columns of the built-in simulator backend.
    #[arg(long, default_value_t = 2)]
    pub cols: u32,
}

impl Config {
    pub fn is_verbose(&self, category: LogCategory) -> bool {
        self.verbose.contains(&category)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 51000,
            halt_on_attach: false,
            tty: None,
            verbose: Vec::new(),
            rows: 2,
            cols: 2,
        }
    }
}
