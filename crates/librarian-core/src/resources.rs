use sysinfo::System;
use tracing::{info, warn};

use crate::config::LibraryConfig;

/// Pacing for one run. Changes throughput, never the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePlan {
    pub workers: usize,
    pub batch_size: usize,
    pub constrained: bool,
}

impl ResourcePlan {
    pub fn from_config(config: &LibraryConfig) -> Self {
        let available_mb = config.memory_threshold_mb.map(|_| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.available_memory() / (1024 * 1024)
        });
        let plan = Self::compute(config, rayon::current_num_threads(), available_mb);
        if plan.constrained {
            warn!(
                "Available memory {} MB is below the {} MB threshold; running constrained \
                 ({} worker, batches of {})",
                available_mb.unwrap_or(0),
                config.memory_threshold_mb.unwrap_or(0),
                plan.workers,
                plan.batch_size
            );
        } else {
            info!(
                "Resource plan: {} workers, batches of {}",
                plan.workers, plan.batch_size
            );
        }
        plan
    }

    pub fn compute(config: &LibraryConfig, default_workers: usize, available_mb: Option<u64>) -> Self {
        let batch_size = config.batch_size.max(1);
        let constrained = match (config.memory_threshold_mb, available_mb) {
            (Some(threshold), Some(available)) => available < threshold,
            _ => false,
        };
        if constrained {
            return Self {
                workers: 1,
                batch_size: (batch_size / 4).max(1),
                constrained,
            };
        }

        let mut workers = default_workers.max(1);
        if let Some(max) = config.max_workers {
            workers = workers.min(max.max(1));
        }
        Self {
            workers,
            batch_size,
            constrained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> LibraryConfig {
        LibraryConfig::new(vec![PathBuf::from("/src")], PathBuf::from("/lib"))
    }

    #[test]
    fn test_workers_capped_by_max_workers() {
        let mut cfg = config();
        cfg.max_workers = Some(2);
        let plan = ResourcePlan::compute(&cfg, 8, None);
        assert_eq!(plan.workers, 2);
        assert_eq!(plan.batch_size, 100);
        assert!(!plan.constrained);
    }

    #[test]
    fn test_low_memory_enters_constrained_mode() {
        let mut cfg = config();
        cfg.memory_threshold_mb = Some(2048);
        let plan = ResourcePlan::compute(&cfg, 8, Some(512));
        assert_eq!(
            plan,
            ResourcePlan {
                workers: 1,
                batch_size: 25,
                constrained: true
            }
        );

        let plan = ResourcePlan::compute(&cfg, 8, Some(4096));
        assert_eq!(plan.workers, 8);
        assert!(!plan.constrained);
    }
}
