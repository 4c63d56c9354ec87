//! Resource bookkeeping hooks (spec §A.2 of `SPEC_FULL.md`).
//!
//! Spec §1 disclaims sandboxing/resource-limit *enforcement* as a feature,
//! but the core still carries the bookkeeping mechanism so an embedder can
//! opt in — this mirrors the teacher's own `resource.rs`, trimmed of the
//! Python-exception-mapping machinery that has no counterpart here.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Error returned when a resource limit is exceeded during evaluation.
#[derive(Debug, Clone)]
pub enum ResourceError {
    Allocation { limit: usize, count: usize },
    Time { limit: Duration, elapsed: Duration },
    Memory { limit: usize, used: usize },
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Recursion { limit, .. } => write!(f, "maximum recursion depth exceeded ({limit})"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Tracks resource usage across one `Runner` execution.
///
/// Every `Environment::fork` and every heap-backed `Value` allocation routes
/// through a tracker; the default `NoLimitTracker` makes this a no-op so the
/// Non-goal (no sandbox enforcement) is honored while the hook still exists.
pub trait ResourceTracker: fmt::Debug {
    fn on_allocate(&mut self, size: usize) -> Result<(), ResourceError>;
    fn on_free(&mut self, size: usize);
    fn check_time(&mut self) -> Result<(), ResourceError>;
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;
}

#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub max_duration: Option<Duration>,
    pub max_memory: Option<usize>,
    pub max_recursion_depth: Option<usize>,
}

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 2000;

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self { max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH), ..Default::default() }
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// No limits enforced — the default for embedders that don't opt in.
#[derive(Debug, Clone, Default)]
pub struct NoLimitTracker {
    limits: ResourceLimits,
    current_memory: usize,
}

impl NoLimitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self { limits, current_memory: 0 }
    }
}

impl ResourceTracker for NoLimitTracker {
    fn on_allocate(&mut self, size: usize) -> Result<(), ResourceError> {
        let Some(max) = self.limits.max_memory else { return Ok(()) };
        let new_memory = self.current_memory + size;
        if new_memory > max {
            return Err(ResourceError::Memory { limit: max, used: new_memory });
        }
        self.current_memory = new_memory;
        Ok(())
    }

    fn on_free(&mut self, size: usize) {
        if self.limits.max_memory.is_some() {
            self.current_memory = self.current_memory.saturating_sub(size);
        }
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let max = self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH);
        if current_depth >= max {
            Err(ResourceError::Recursion { limit: max, depth: current_depth + 1 })
        } else {
            Ok(())
        }
    }
}

/// Enforces configured limits; used by embedders that want a hard ceiling.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    allocation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits, start_time: Instant::now(), allocation_count: 0, current_memory: 0 }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, size: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory { limit: max, used: new_memory });
            }
        }
        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, size: usize) {
        self.current_memory = self.current_memory.saturating_sub(size);
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion { limit: max, depth: current_depth + 1 });
        }
        Ok(())
    }
}
