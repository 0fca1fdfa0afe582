// Heap/RSS probe for the observed process.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::signals::SignalError;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of the memory figure. Absence is an error, not a zero.
pub trait MemoryProbe: Send {
    fn heap_bytes(&mut self) -> Result<u64, SignalError>;
}

/// Resident memory of one process via sysinfo.
pub struct ProcessMemory {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemory {
    /// Probe the running process. If its pid cannot be determined every read fails.
    pub fn current() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!(error = %e, "cannot determine own pid; memory signal disabled"))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }

    pub fn for_pid(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: Some(Pid::from_u32(pid)),
        }
    }
}

impl MemoryProbe for ProcessMemory {
    fn heap_bytes(&mut self) -> Result<u64, SignalError> {
        let pid = self.pid.ok_or(SignalError::Unavailable("process id"))?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system
            .process(pid)
            .map(|p| p.memory())
            .ok_or(SignalError::Failed {
                signal: "memory",
                reason: format!("process {} not found", pid),
            })
    }
}
