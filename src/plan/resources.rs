// src/plan/resources.rs

//! Per-attempt resource requests with escalation on retry.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::model::{EscalationKind, ResourceConfig};
use crate::types::StageClass;

/// CPU / memory / wall-time envelope for one attempt of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceRequest {
    pub cpus: u32,
    pub memory_gb: u32,
    pub wall_time_h: u32,
}

impl ResourceRequest {
    pub const fn new(cpus: u32, memory_gb: u32, wall_time_h: u32) -> Self {
        Self {
            cpus,
            memory_gb,
            wall_time_h,
        }
    }

    /// Component-wise `<=`.
    pub fn fits_within(&self, limit: &ResourceRequest) -> bool {
        self.cpus <= limit.cpus
            && self.memory_gb <= limit.memory_gb
            && self.wall_time_h <= limit.wall_time_h
    }

    /// Component-wise minimum.
    pub fn clamp_to(&self, limit: &ResourceRequest) -> ResourceRequest {
        ResourceRequest {
            cpus: self.cpus.min(limit.cpus),
            memory_gb: self.memory_gb.min(limit.memory_gb),
            wall_time_h: self.wall_time_h.min(limit.wall_time_h),
        }
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.wall_time_h) * 3600)
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu / {} GB / {} h",
            self.cpus, self.memory_gb, self.wall_time_h
        )
    }
}

/// Growth rule applied between attempts. CPU count never grows: a job that
/// ran out of memory or time needs more of those, not more threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Memory and wall time double on every retry.
    Double,
    /// Memory and wall time grow by a fixed step on every retry.
    Step { memory_gb: u32, wall_time_h: u32 },
    /// Same request on every attempt. A class with this policy opts out of
    /// retries: repeating an identical request cannot fix a resource failure.
    Fixed,
}

/// Resource policy for a single stage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicy {
    pub base: ResourceRequest,
    pub escalation: Escalation,
    pub ceiling: ResourceRequest,
}

impl ClassPolicy {
    /// Unclamped request for a 1-based attempt (0 is treated as 1).
    pub fn raw_request(&self, attempt: u32) -> ResourceRequest {
        let retries = attempt.max(1) - 1;
        match self.escalation {
            Escalation::Fixed => self.base,
            Escalation::Double => {
                let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
                ResourceRequest {
                    cpus: self.base.cpus,
                    memory_gb: self.base.memory_gb.saturating_mul(factor),
                    wall_time_h: self.base.wall_time_h.saturating_mul(factor),
                }
            }
            Escalation::Step {
                memory_gb,
                wall_time_h,
            } => ResourceRequest {
                cpus: self.base.cpus,
                memory_gb: self
                    .base
                    .memory_gb
                    .saturating_add(memory_gb.saturating_mul(retries)),
                wall_time_h: self
                    .base
                    .wall_time_h
                    .saturating_add(wall_time_h.saturating_mul(retries)),
            },
        }
    }

    /// Request for an attempt, never above the ceiling.
    pub fn request(&self, attempt: u32) -> ResourceRequest {
        self.raw_request(attempt).clamp_to(&self.ceiling)
    }

    /// Whether a retry asks for strictly more memory than the attempt before.
    pub fn escalates(&self) -> bool {
        match self.escalation {
            Escalation::Double => self.base.memory_gb > 0,
            Escalation::Step { memory_gb, .. } => memory_gb > 0,
            Escalation::Fixed => false,
        }
    }

    /// Whether the unclamped request for `attempt` stays within the ceiling.
    pub fn within_ceiling(&self, attempt: u32) -> bool {
        self.raw_request(attempt).fits_within(&self.ceiling)
    }

    fn overlay(mut self, cfg: &ResourceConfig) -> Self {
        if let Some(v) = cfg.cpus {
            self.base.cpus = v;
        }
        if let Some(v) = cfg.memory_gb {
            self.base.memory_gb = v;
        }
        if let Some(v) = cfg.wall_time_h {
            self.base.wall_time_h = v;
        }
        if let Some(v) = cfg.max_cpus {
            self.ceiling.cpus = v;
        }
        if let Some(v) = cfg.max_memory_gb {
            self.ceiling.memory_gb = v;
        }
        if let Some(v) = cfg.max_wall_time_h {
            self.ceiling.wall_time_h = v;
        }

        let (prev_mem, prev_time) = match self.escalation {
            Escalation::Step {
                memory_gb,
                wall_time_h,
            } => (memory_gb, wall_time_h),
            _ => (self.base.memory_gb, self.base.wall_time_h),
        };
        let step_memory_gb = cfg.step_memory_gb.unwrap_or(prev_mem);
        let step_wall_time_h = cfg.step_wall_time_h.unwrap_or(prev_time);

        self.escalation = match cfg.escalation {
            Some(EscalationKind::Double) => Escalation::Double,
            Some(EscalationKind::Fixed) => Escalation::Fixed,
            Some(EscalationKind::Step) => Escalation::Step {
                memory_gb: step_memory_gb,
                wall_time_h: step_wall_time_h,
            },
            None => match self.escalation {
                Escalation::Step { .. } => Escalation::Step {
                    memory_gb: step_memory_gb,
                    wall_time_h: step_wall_time_h,
                },
                other => other,
            },
        };

        self
    }
}

/// Built-in policy for each class.
pub fn default_class_policy(class: StageClass) -> ClassPolicy {
    let (base, ceiling) = match class {
        StageClass::Light => (ResourceRequest::new(1, 2, 1), ResourceRequest::new(2, 8, 4)),
        StageClass::Heavy => (
            ResourceRequest::new(8, 32, 12),
            ResourceRequest::new(32, 256, 72),
        ),
        StageClass::Checkpoint => (ResourceRequest::new(2, 4, 1), ResourceRequest::new(4, 16, 4)),
        StageClass::Batch => (ResourceRequest::new(4, 8, 2), ResourceRequest::new(16, 64, 24)),
        StageClass::Reduce => (
            ResourceRequest::new(4, 16, 4),
            ResourceRequest::new(16, 128, 24),
        ),
    };

    ClassPolicy {
        base,
        escalation: Escalation::Double,
        ceiling,
    }
}

/// Resource policy for all stage classes.
///
/// `request` is pure and total: it always returns a request, clamped to the
/// class ceiling. Callers detect an exhausted ceiling with `within_ceiling`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    classes: BTreeMap<StageClass, ClassPolicy>,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self::from_overrides(&BTreeMap::new())
    }
}

impl ResourcePolicy {
    /// Built-in defaults with `[resources.<class>]` overrides applied.
    pub fn from_overrides(overrides: &BTreeMap<StageClass, ResourceConfig>) -> Self {
        let classes = StageClass::ALL
            .iter()
            .map(|&class| {
                let policy = default_class_policy(class);
                let policy = match overrides.get(&class) {
                    Some(cfg) => policy.overlay(cfg),
                    None => policy,
                };
                (class, policy)
            })
            .collect();

        Self { classes }
    }

    pub fn with_class(mut self, class: StageClass, policy: ClassPolicy) -> Self {
        self.classes.insert(class, policy);
        self
    }

    pub fn class(&self, class: StageClass) -> ClassPolicy {
        self.classes
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_class_policy(class))
    }

    pub fn request(&self, class: StageClass, attempt: u32) -> ResourceRequest {
        self.class(class).request(attempt)
    }

    pub fn within_ceiling(&self, class: StageClass, attempt: u32) -> bool {
        self.class(class).within_ceiling(attempt)
    }

    pub fn escalates(&self, class: StageClass) -> bool {
        self.class(class).escalates()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageClass, &ClassPolicy)> {
        self.classes.iter().map(|(c, p)| (*c, p))
    }
}
