use std::fs;
use std::time::Instant;

use log::info;

/// Logs elapsed time and resident memory at the end of each pipeline stage.
pub struct StageClock {
    started: Instant,
    last: Instant,
}

impl StageClock {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
        }
    }

    pub fn finish(&mut self, stage: &str) {
        let now = Instant::now();
        let stage_secs = now.duration_since(self.last).as_secs_f64();
        let total_secs = now.duration_since(self.started).as_secs_f64();
        self.last = now;

        match resident_set_kib() {
            Some(kib) => info!(
                "{stage} finished in {stage_secs:.1}s (total {total_secs:.1}s, rss {:.1} MiB)",
                kib as f64 / 1024.0
            ),
            None => info!("{stage} finished in {stage_secs:.1}s (total {total_secs:.1}s)"),
        }
    }
}

/// Resident set size of this process; `None` off Linux.
pub fn resident_set_kib() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_vm_rss_line() {
        let status = "Name:\ttrain-tokenizer\nVmPeak:\t  20480 kB\nVmRSS:\t   10240 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(10240));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }
}
