use sandbox::ResourceBudget;
use serde_json::{Map, Value, json};

/// Which limit mechanism the daemon generation accounts with.
///
/// Older daemons take classic per-process rlimits; newer ones expose
/// cgroup controllers for memory/CPU/pids. Resource accounting differs
/// between the two, so one strategy is picked per backend instance and
/// applied consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitStrategy {
    /// Hard memory ceiling plus classic per-process ulimits.
    #[default]
    Rlimits,
    /// Cgroup memory/CPU-share/pid-count limits.
    Cgroups,
}

fn ulimit(name: &str, limit: u64) -> Value {
    json!({ "Name": name, "Soft": limit, "Hard": limit })
}

impl LimitStrategy {
    /// Insert the limit fields for `budget` into a HostConfig map.
    ///
    /// Zero-valued budget fields are omitted so the daemon default
    /// applies. The core-dump limit is the exception and is always
    /// emitted: 0 means core dumps are disabled, never unlimited.
    pub fn apply(&self, budget: &ResourceBudget, host_config: &mut Map<String, Value>) {
        if budget.memory_bytes > 0 {
            host_config.insert("Memory".into(), json!(budget.memory_bytes));
        }
        match self {
            Self::Rlimits => {
                let mut ulimits = vec![ulimit("core", budget.core_dump_bytes)];
                if budget.max_open_files > 0 {
                    ulimits.push(ulimit("nofile", budget.max_open_files));
                }
                if budget.max_pids > 0 {
                    // NOTE: per-user limit
                    ulimits.push(ulimit("nproc", budget.max_pids));
                }
                if budget.memlock_bytes > 0 {
                    ulimits.push(ulimit("memlock", budget.memlock_bytes));
                }
                if budget.timeout_secs > 0 {
                    ulimits.push(ulimit("cpu", budget.timeout_secs));
                }
                if budget.max_file_bytes > 0 {
                    ulimits.push(ulimit("fsize", budget.max_file_bytes));
                }
                // The "as" ulimit is rejected by the daemon; the memory
                // ceiling above covers address space.
                host_config.insert("Ulimits".into(), Value::Array(ulimits));
            }
            Self::Cgroups => {
                if budget.memory_soft_bytes > 0 {
                    host_config.insert("MemoryReservation".into(), json!(budget.memory_soft_bytes));
                }
                if budget.cpu_shares > 0 {
                    host_config.insert("CpuShares".into(), json!(budget.cpu_shares));
                }
                if budget.max_pids > 0 {
                    host_config.insert("PidsLimit".into(), json!(budget.max_pids));
                }
            }
        }
    }
}
