// src/engine/budget.rs

//! Global per-run resource budget, enforced at dispatch time.
//!
//! Stages only declare what they need; this decides whether a declared
//! request may start now.

use tracing::debug;

use crate::plan::ResourceRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchBudget {
    limit: Option<(u32, u32)>,
    cpus_in_flight: u32,
    memory_in_flight: u32,
    stages_in_flight: usize,
}

impl DispatchBudget {
    pub fn new(cpus: u32, memory_gb: u32) -> Self {
        Self {
            limit: Some((cpus, memory_gb)),
            cpus_in_flight: 0,
            memory_in_flight: 0,
            stages_in_flight: 0,
        }
    }

    /// A budget that admits everything.
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            cpus_in_flight: 0,
            memory_in_flight: 0,
            stages_in_flight: 0,
        }
    }

    /// Reserve `req` if it fits in what is left.
    ///
    /// A request larger than the whole budget is admitted only when nothing
    /// else is in flight, so it cannot starve forever.
    pub fn try_reserve(&mut self, req: &ResourceRequest) -> bool {
        let fits = match self.limit {
            None => true,
            Some((cpus, mem)) => {
                let fits_now = self.cpus_in_flight + req.cpus <= cpus
                    && self.memory_in_flight + req.memory_gb <= mem;
                fits_now || self.stages_in_flight == 0
            }
        };

        if fits {
            self.cpus_in_flight += req.cpus;
            self.memory_in_flight += req.memory_gb;
            self.stages_in_flight += 1;
        } else {
            debug!(
                cpus = req.cpus,
                memory_gb = req.memory_gb,
                cpus_in_flight = self.cpus_in_flight,
                memory_in_flight = self.memory_in_flight,
                "request does not fit remaining budget; deferring"
            );
        }
        fits
    }

    pub fn release(&mut self, req: &ResourceRequest) {
        self.cpus_in_flight = self.cpus_in_flight.saturating_sub(req.cpus);
        self.memory_in_flight = self.memory_in_flight.saturating_sub(req.memory_gb);
        self.stages_in_flight = self.stages_in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> (u32, u32) {
        (self.cpus_in_flight, self.memory_in_flight)
    }

    pub fn stages_in_flight(&self) -> usize {
        self.stages_in_flight
    }
}
