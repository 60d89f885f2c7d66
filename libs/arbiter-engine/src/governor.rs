//! Resource Governor
//!
//! Enforces the memory ceiling for one test case. The ceiling is installed on
//! the worker thread that runs the case and removed when the returned
//! [`MemoryScope`] drops, so consecutive cases never share a budget.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use arbiter_common::config::MemoryBackend;
use serde::Serialize;

use crate::script::heap;

/// Whether a memory limit is actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCapability {
    Enforced,
    /// Runs proceed without a ceiling. Reported on every result.
    Degraded,
}

impl MemoryCapability {
    pub fn is_enforced(self) -> bool {
        self == MemoryCapability::Enforced
    }
}

pub trait ResourceGovernor: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn capability(&self) -> MemoryCapability;

    /// Apply `limit_bytes` to the calling thread until the scope drops.
    fn install(&self, limit_bytes: u64) -> MemoryScope;
}

/// Guard for an installed ceiling. Tied to the installing thread.
#[must_use = "the limit is removed when the scope drops"]
pub struct MemoryScope {
    metered: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl MemoryScope {
    fn metered() -> Self {
        Self {
            metered: true,
            _thread_bound: PhantomData,
        }
    }

    fn unmetered() -> Self {
        Self {
            metered: false,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if self.metered {
            heap::uninstall();
        }
    }
}

/// Counts the live bytes of interpreter strings and containers against the
/// limit. Works on every platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapMeterGovernor;

impl ResourceGovernor for HeapMeterGovernor {
    fn name(&self) -> &'static str {
        "heap_meter"
    }

    fn capability(&self) -> MemoryCapability {
        MemoryCapability::Enforced
    }

    fn install(&self, limit_bytes: u64) -> MemoryScope {
        heap::install(Some(usize::try_from(limit_bytes).unwrap_or(usize::MAX)));
        MemoryScope::metered()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnmeteredGovernor;

impl ResourceGovernor for UnmeteredGovernor {
    fn name(&self) -> &'static str {
        "none"
    }

    fn capability(&self) -> MemoryCapability {
        MemoryCapability::Degraded
    }

    fn install(&self, _limit_bytes: u64) -> MemoryScope {
        MemoryScope::unmetered()
    }
}

pub fn governor_for(backend: MemoryBackend) -> Arc<dyn ResourceGovernor> {
    match backend {
        MemoryBackend::HeapMeter => Arc::new(HeapMeterGovernor),
        MemoryBackend::None => Arc::new(UnmeteredGovernor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_meter_scope_resets_on_drop() {
        let governor = governor_for(MemoryBackend::HeapMeter);
        assert!(governor.capability().is_enforced());
        {
            let _scope = governor.install(100);
            assert!(heap::reserve(50).is_ok());
            assert!(heap::reserve(200).is_err());
            assert!(heap::exceeded());
        }
        assert!(!heap::exceeded());
        assert!(heap::reserve(1 << 30).is_ok());
    }

    #[test]
    fn unmetered_governor_reports_degraded() {
        let governor = governor_for(MemoryBackend::None);
        assert_eq!(governor.capability(), MemoryCapability::Degraded);
        let _scope = governor.install(1);
        assert!(heap::reserve(1 << 30).is_ok());
        assert_eq!(governor.name(), "none");
    }
}
