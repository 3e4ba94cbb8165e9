use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::services::ResourceTrackable;

const SAMPLE_INTERVAL_MS: u64 = 500;

/// CPU/RAM usage summed across every tracked external process, summarized
/// over one phase window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub peak_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub avg_memory_mb: f64,
}

struct TrackedProcess {
    name: String,
    pid: Pid,
}

struct SamplerState {
    system: System,
    tracked: Vec<TrackedProcess>,
}

/// Polls the OS for CPU/RAM of registered external processes while a phase
/// is active. Adapters expose themselves through [`ResourceTrackable`], so
/// the sampler needs no adapter-specific knowledge; a sampler without
/// registrations simply reports nothing.
#[derive(Clone)]
pub struct ResourceSampler {
    inner: Arc<Mutex<SamplerState>>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SamplerState {
                system: System::new(),
                tracked: Vec::new(),
            })),
        }
    }

    /// Register an adapter's current external process. Adapters without a
    /// live process are skipped; re-registering the same PID is a no-op.
    pub fn register(&self, adapter: &dyn ResourceTrackable) {
        let Some(pid) = adapter.pid() else {
            return;
        };
        let pid = Pid::from_u32(pid);

        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.tracked.iter().any(|t| t.pid == pid) {
            return;
        }
        state.tracked.push(TrackedProcess {
            name: adapter.name().to_string(),
            pid,
        });
        // Baseline refresh so the first window's CPU delta is meaningful
        let pids: Vec<Pid> = state.tracked.iter().map(|t| t.pid).collect();
        state.system.refresh_processes(ProcessesToUpdate::Some(&pids));
    }

    pub fn tracked_names(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.tracked.iter().map(|t| t.name.clone()).collect()
    }

    /// Sample until `cancel` fires, then resolve with the window summary.
    /// `None` when nothing was tracked or no sample landed.
    pub fn begin_window(&self, cancel: CancellationToken) -> JoinHandle<Option<ResourceUsage>> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(SAMPLE_INTERVAL_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut samples: u64 = 0;
            let mut cpu_sum = 0.0f64;
            let mut cpu_peak = 0.0f64;
            let mut mem_sum = 0.0f64;
            let mut mem_peak = 0.0f64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let (cpu, mem) = {
                            let mut state =
                                inner.lock().unwrap_or_else(|e| e.into_inner());
                            if state.tracked.is_empty() {
                                continue;
                            }
                            let pids: Vec<Pid> =
                                state.tracked.iter().map(|t| t.pid).collect();
                            state
                                .system
                                .refresh_processes(ProcessesToUpdate::Some(&pids));

                            let mut cpu = 0.0f64;
                            let mut mem = 0.0f64;
                            for tracked in &state.tracked {
                                if let Some(process) = state.system.process(tracked.pid) {
                                    cpu += f64::from(process.cpu_usage());
                                    mem += process.memory() as f64 / 1024.0 / 1024.0;
                                }
                            }
                            (cpu, mem)
                        };

                        samples += 1;
                        cpu_sum += cpu;
                        mem_sum += mem;
                        cpu_peak = cpu_peak.max(cpu);
                        mem_peak = mem_peak.max(mem);
                    }
                    _ = cancel.cancelled() => break,
                }
            }

            if samples == 0 {
                return None;
            }
            Some(ResourceUsage {
                peak_cpu_percent: cpu_peak,
                avg_cpu_percent: cpu_sum / samples as f64,
                peak_memory_mb: mem_peak,
                avg_memory_mb: mem_sum / samples as f64,
            })
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeAdapter {
        name: &'static str,
        pid: Option<u32>,
    }

    impl ResourceTrackable for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn pid(&self) -> Option<u32> {
            self.pid
        }
    }

    #[test]
    fn register_skips_adapters_without_a_process() {
        let sampler = ResourceSampler::new();
        sampler.register(&FakeAdapter {
            name: "whisper",
            pid: None,
        });
        assert!(sampler.tracked_names().is_empty());
    }

    #[test]
    fn register_deduplicates_by_pid() {
        let sampler = ResourceSampler::new();
        let pid = std::process::id();
        sampler.register(&FakeAdapter {
            name: "ffmpeg",
            pid: Some(pid),
        });
        sampler.register(&FakeAdapter {
            name: "ffmpeg-again",
            pid: Some(pid),
        });
        assert_eq!(sampler.tracked_names(), vec!["ffmpeg".to_string()]);
    }

    #[tokio::test]
    async fn empty_window_reports_nothing() {
        let sampler = ResourceSampler::new();
        let cancel = CancellationToken::new();
        let window = sampler.begin_window(cancel.clone());
        cancel.cancel();
        assert_eq!(window.await.unwrap(), None);
    }
}
