// src/hardware/mod.rs
// Background telemetry sampler. Publishes a latest-wins snapshot so the
// worker's read path never blocks on I/O.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{debug, warn};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HardwareSnapshot {
    pub cpu_usage: f32,
    pub ram_usage: f32,
    pub gpu_usage: f32,
    pub gpu_power_w: f32,
    pub gpu_temp: f32,
    pub soc_temp: f32,
}

pub struct HardwareMonitor {
    latest: Arc<RwLock<HardwareSnapshot>>,
}

impl HardwareMonitor {
    /// Spawn the sampler task and return a handle to read snapshots from.
    pub fn spawn(gpu_probe_binary: Option<String>) -> Self {
        let latest = Arc::new(RwLock::new(HardwareSnapshot::default()));
        let latest_task = latest.clone();

        tokio::spawn(async move {
            let mut sys = sysinfo::System::new();
            let mut interval = time::interval(SAMPLE_INTERVAL);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            let gpu_probe = gpu_probe_binary.and_then(|bin| {
                which_on_path(&bin).then_some(bin)
            });
            if gpu_probe.is_none() {
                debug!("no gpu probe binary configured; gpu/soc fields will read zero");
            }

            loop {
                interval.tick().await;

                sys.refresh_cpu_usage();
                sys.refresh_memory();
                let cpu_usage = sys.global_cpu_usage();
                let ram_usage = if sys.total_memory() > 0 {
                    (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
                } else {
                    0.0
                };

                let (gpu_usage, gpu_power_w, gpu_temp, soc_temp) = match &gpu_probe {
                    Some(bin) => sample_gpu(bin).await.unwrap_or((0.0, 0.0, 0.0, 0.0)),
                    None => (0.0, 0.0, 0.0, 0.0),
                };

                let mut guard = latest_task.write().await;
                *guard = HardwareSnapshot {
                    cpu_usage,
                    ram_usage,
                    gpu_usage,
                    gpu_power_w,
                    gpu_temp,
                    soc_temp,
                };
            }
        });

        Self { latest }
    }

    /// Non-blocking read of the most recent sample.
    pub async fn get_snapshot(&self) -> HardwareSnapshot {
        *self.latest.read().await
    }
}

fn which_on_path(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
        })
        .unwrap_or(false)
}

/// Run the configured GPU/SoC probe binary once and parse its one-line JSON
/// output. Degrades to zeros on any failure rather than propagating an error -
/// the sampler loop must never die because a probe binary misbehaves.
async fn sample_gpu(bin: &str) -> Option<(f32, f32, f32, f32)> {
    let output = Command::new(bin).arg("--once").output().await.ok()?;
    if !output.status.success() {
        warn!("gpu probe {bin} exited with {:?}", output.status.code());
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;

    Some((
        coerce_float(value.get("gpu_usage")),
        coerce_float(value.get("gpu_power_w")),
        coerce_float(value.get("gpu_temp")),
        coerce_float(value.get("soc_temp")),
    ))
}

fn coerce_float(value: Option<&serde_json::Value>) -> f32 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_defaults_to_zero_before_first_sample() {
        let latest = Arc::new(RwLock::new(HardwareSnapshot::default()));
        let monitor = HardwareMonitor { latest };
        let snap = monitor.get_snapshot().await;
        assert_eq!(snap.gpu_usage, 0.0);
        assert_eq!(snap.cpu_usage, 0.0);
    }
}
