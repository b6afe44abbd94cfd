//! Pre-built mock filesystem scenarios for testing.

use super::filesystem::MockFs;

/// `/proc/stat` of an idle four-core machine.
pub const IDLE_STAT: &str = "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
";

/// Same machine after cpu0 went fully busy for 100 jiffies and cpu1 half busy.
pub const BUSY_STAT: &str = "\
cpu  10150 500 3000 80050 1000 200 100 0 0 0
cpu0 2600 125 750 20000 250 50 25 0 0 0
cpu1 2550 125 750 20050 250 50 25 0 0 0
cpu2 2500 125 750 20100 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1001000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500700
btime 1700000000
processes 10012
procs_running 3
procs_blocked 0
";

impl MockFs {
    /// Creates a typical idle system.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
",
        );
        fs.add_file("/proc/stat", IDLE_STAT);

        fs
    }

    /// Advances `/proc/stat` to the busy state.
    pub fn make_busy(&self) {
        self.add_file("/proc/stat", BUSY_STAT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_typical_system_has_system_files() {
        let fs = MockFs::typical_system();
        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc/stat")));
        assert!(fs.exists(Path::new("/proc/loadavg")));
    }
}
