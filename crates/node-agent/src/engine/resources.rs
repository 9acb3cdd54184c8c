//! CPU and memory accounting
//!
//! Cached CPU shares are normalized: 1024 shares stand for one full core's
//! worth relative to the engine's core count, so allocations compare across
//! engines of different sizes. All arithmetic truncates.

use super::Engine;

/// Base of the normalized CPU share unit
pub const CPU_SHARE_BASE: i64 = 1024;

/// Engine-native shares to normalized shares (`native * 1024 / cpus`)
pub fn normalize_cpu_shares(native: i64, cpus: i64) -> i64 {
    if cpus <= 0 {
        return 0;
    }
    native.saturating_mul(CPU_SHARE_BASE) / cpus
}

/// Normalized shares to engine-native shares (`normalized * cpus / 1024`)
pub fn native_cpu_shares(normalized: i64, cpus: i64) -> i64 {
    if cpus <= 0 {
        return 0;
    }
    normalized.saturating_mul(cpus) / CPU_SHARE_BASE
}

/// Capacity inflated by an overcommit ratio scaled ×100
pub fn with_overcommit(capacity: i64, ratio_x100: i64) -> i64 {
    capacity.saturating_add(capacity.saturating_mul(ratio_x100) / 100)
}

impl Engine {
    /// Memory reserved by all cached containers
    pub async fn used_memory(&self) -> i64 {
        self.state.read().await.cache.used_memory()
    }

    /// Normalized CPU shares reserved by all cached containers
    pub async fn used_cpus(&self) -> i64 {
        self.state.read().await.cache.used_cpus()
    }

    /// Physical memory plus overcommit
    pub async fn total_memory(&self) -> i64 {
        with_overcommit(self.state.read().await.memory, self.overcommit_ratio)
    }

    /// Physical cores plus overcommit
    pub async fn total_cpus(&self) -> i64 {
        with_overcommit(self.state.read().await.cpus, self.overcommit_ratio)
    }
}
