//! Optimization remarks.
//!
//! Every attempt reports its outcome through a [`RemarkEmitter`]. Rejections
//! are `Missed` remarks carrying the reason and, when known, the offending
//! instruction.

use lanewise_ir::InstId;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;

/// Remark category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemarkKind {
    /// The transformation was not applied.
    Missed,
    /// The transformation was applied.
    Passed,
    /// Informational finding of an analysis.
    Analysis,
}

/// A structured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remark {
    pub kind: RemarkKind,
    pub function: String,
    pub inst: Option<InstId>,
    pub message: String,
}

impl Remark {
    pub fn missed(function: &str, inst: Option<InstId>, message: impl Into<String>) -> Self {
        Self {
            kind: RemarkKind::Missed,
            function: function.to_string(),
            inst,
            message: message.into(),
        }
    }

    pub fn passed(function: &str, message: impl Into<String>) -> Self {
        Self {
            kind: RemarkKind::Passed,
            function: function.to_string(),
            inst: None,
            message: message.into(),
        }
    }

    pub fn analysis(function: &str, message: impl Into<String>) -> Self {
        Self {
            kind: RemarkKind::Analysis,
            function: function.to_string(),
            inst: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Remark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RemarkKind::Missed => "missed",
            RemarkKind::Passed => "passed",
            RemarkKind::Analysis => "analysis",
        };
        write!(f, "[{}] @{}", kind, self.function)?;
        if let Some(inst) = self.inst {
            write!(f, " inst {}", inst)?;
        }
        write!(f, ": {}", self.message)
    }
}

// =============================================================================
// Emitters
// =============================================================================

/// Receives remarks from vectorization attempts.
pub trait RemarkEmitter {
    fn emit(&self, remark: Remark);
}

/// Forwards remarks to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRemarks;

impl RemarkEmitter for LogRemarks {
    fn emit(&self, remark: Remark) {
        match remark.kind {
            RemarkKind::Missed => warn!(target: "lanewise::remark", "{}", remark),
            RemarkKind::Passed => info!(target: "lanewise::remark", "{}", remark),
            RemarkKind::Analysis => debug!(target: "lanewise::remark", "{}", remark),
        }
    }
}

/// Collects remarks in memory. Safe to share between threads.
#[derive(Debug, Default)]
pub struct CollectedRemarks {
    remarks: Mutex<Vec<Remark>>,
}

impl CollectedRemarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<Remark> {
        self.remarks.lock().clone()
    }

    /// Drain collected remarks.
    pub fn take(&self) -> Vec<Remark> {
        std::mem::take(&mut *self.remarks.lock())
    }

    pub fn len(&self) -> usize {
        self.remarks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remarks of one kind.
    pub fn of_kind(&self, kind: RemarkKind) -> Vec<Remark> {
        self.remarks
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

impl RemarkEmitter for CollectedRemarks {
    fn emit(&self, remark: Remark) {
        self.remarks.lock().push(remark);
    }
}

// =============================================================================
// Tests
// =============================================================================
