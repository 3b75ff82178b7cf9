use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Aggregate CPU jiffies from the first `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle
    }

    /// Busy percentage between two samples, 0 when no time elapsed
    pub fn usage_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(earlier.total());
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle);
        100.0 * total.saturating_sub(idle) as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub available_mib: u64,
    pub total_mib: u64,
}

impl MemInfo {
    pub fn usage_string(&self) -> String {
        format!("{}/{} MiB", self.available_mib, self.total_mib)
    }
}

fn invalid(details: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, details.into())
}

pub fn parse_cpu_times(contents: &str) -> io::Result<CpuTimes> {
    let line = contents
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| invalid("no aggregate cpu line"))?;

    let mut values = line.split_whitespace().skip(1).map(str::parse::<u64>);
    let mut next = || {
        values
            .next()
            .ok_or_else(|| invalid("truncated cpu line"))?
            .map_err(|e| invalid(e.to_string()))
    };

    Ok(CpuTimes {
        user: next()?,
        nice: next()?,
        system: next()?,
        idle: next()?,
    })
}

pub fn parse_meminfo(contents: &str) -> io::Result<MemInfo> {
    let mut total = None;
    let mut available = None;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let slot = match key {
            "MemTotal:" => &mut total,
            "MemAvailable:" => &mut available,
            _ => continue,
        };
        *slot = Some(value.parse::<u64>().map_err(|e| invalid(e.to_string()))?);
        if total.is_some() && available.is_some() {
            break;
        }
    }

    match (available, total) {
        (Some(available_kb), Some(total_kb)) => Ok(MemInfo {
            available_mib: available_kb / 1024,
            total_mib: total_kb / 1024,
        }),
        _ => Err(invalid("MemTotal or MemAvailable missing")),
    }
}

/// Millidegree reading of a thermal zone in °C
pub fn parse_temperature(contents: &str) -> io::Result<f64> {
    contents
        .trim()
        .parse::<f64>()
        .map(|millideg| millideg / 1000.0)
        .map_err(|e| invalid(e.to_string()))
}

/// Host probe rooted at `/` in production and at a scratch dir in tests
#[derive(Debug, Clone)]
pub struct SystemProbe {
    root: PathBuf,
    sample_window: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new("/", Duration::from_millis(500))
    }
}

impl SystemProbe {
    pub fn new(root: impl AsRef<Path>, sample_window: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sample_window,
        }
    }

    fn read(&self, relative: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(relative))
    }

    pub fn temperature(&self) -> io::Result<f64> {
        parse_temperature(&self.read("sys/class/thermal/thermal_zone0/temp")?)
    }

    /// CPU usage over the sample window; blocks for that long
    pub fn cpu_usage(&self) -> io::Result<f64> {
        let before = parse_cpu_times(&self.read("proc/stat")?)?;
        thread::sleep(self.sample_window);
        let after = parse_cpu_times(&self.read("proc/stat")?)?;
        Ok(after.usage_since(&before))
    }

    pub fn memory(&self) -> io::Result<MemInfo> {
        parse_meminfo(&self.read("proc/meminfo")?)
    }
}
