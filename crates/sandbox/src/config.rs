use std::time::Duration;

/// Validated resource limits for one sandboxed run.
///
/// All fields are non-negative; zero means "use the backend default",
/// never "unlimited". The backend maps these onto whichever limit
/// mechanism it supports (classic rlimits or cgroup-style accounting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceBudget {
    /// Hard memory ceiling in bytes.
    pub memory_bytes: u64,
    /// Soft memory ceiling in bytes.
    pub memory_soft_bytes: u64,
    /// Relative CPU weight (cgroup shares).
    pub cpu_shares: u64,
    /// Maximum number of processes/threads.
    pub max_pids: u64,
    /// Maximum number of open files.
    pub max_open_files: u64,
    /// Maximum core-dump size in bytes. Unlike the other fields this is
    /// always applied by the backend; 0 disables core dumps.
    pub core_dump_bytes: u64,
    /// Maximum bytes lockable with mlock(2).
    pub memlock_bytes: u64,
    /// Maximum size of any single file written, in bytes.
    pub max_file_bytes: u64,
    /// Wall-clock timeout in seconds.
    pub timeout_secs: u64,
}

fn clamp(value: u64, cap: u64) -> u64 {
    if value == 0 || cap == 0 {
        value
    } else {
        value.min(cap)
    }
}

impl ResourceBudget {
    /// Clamp caller-declared limits to server-side caps.
    ///
    /// Every non-zero caller value is clamped to the corresponding cap
    /// (a zero cap leaves the value untouched). The timeout is special:
    /// a zero caller timeout takes the cap's timeout, so the watchdog
    /// always has a concrete deadline.
    pub fn clamped_to(&self, caps: &ResourceBudget) -> ResourceBudget {
        ResourceBudget {
            memory_bytes: clamp(self.memory_bytes, caps.memory_bytes),
            memory_soft_bytes: clamp(self.memory_soft_bytes, caps.memory_soft_bytes),
            cpu_shares: clamp(self.cpu_shares, caps.cpu_shares),
            max_pids: clamp(self.max_pids, caps.max_pids),
            max_open_files: clamp(self.max_open_files, caps.max_open_files),
            core_dump_bytes: clamp(self.core_dump_bytes, caps.core_dump_bytes),
            memlock_bytes: clamp(self.memlock_bytes, caps.memlock_bytes),
            max_file_bytes: clamp(self.max_file_bytes, caps.max_file_bytes),
            timeout_secs: if self.timeout_secs == 0 {
                caps.timeout_secs
            } else {
                clamp(self.timeout_secs, caps.timeout_secs)
            },
        }
    }

    /// Wall-clock timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
