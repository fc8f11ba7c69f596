//! Pass trait and per-run context for the deobfuscation pipeline.
//!
//! This module defines the [`AstPass`] trait that all tree transformations
//! implement, the [`PassContext`] shared by every pass of one run, and the
//! [`PassReport`] a pass hands back to the scheduler.

use std::collections::HashSet;

use crate::{
    deobfuscation::{
        changes::{TransformationKind, TransformationLog, TransformationRecord},
        config::{EngineConfig, OptionFlags},
        detection::{DetectionSignature, Technique},
    },
    source::SyntaxTree,
    Result,
};

/// A deobfuscation pass that rewrites the syntax tree in place.
///
/// All passes must be thread-safe (Send + Sync) so one engine can serve
/// concurrent runs. A pass receives exclusive access to the tree for the
/// duration of [`run`](Self::run) and shared access to the run context.
///
/// # Reporting
///
/// Passes do not write to the transformation log themselves. They return a
/// [`PassReport`] and the scheduler appends its records once the pass has
/// returned, so the log always describes a tree state that actually exists.
/// Returning an input-driven [`Error`](crate::Error) records a failed
/// transformation of [`kind`](Self::kind) and the pipeline moves on.
pub trait AstPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// The transformation kind recorded when this pass fails.
    fn kind(&self) -> TransformationKind;

    /// Should this pass run for the current request?
    ///
    /// Override to skip passes gated behind an option flag.
    fn should_run(&self, _ctx: &PassContext) -> bool {
        true
    }

    /// Runs the pass over the whole tree.
    ///
    /// # Arguments
    ///
    /// * `tree` - The tree to transform.
    /// * `ctx` - The run context (shared reference).
    ///
    /// # Errors
    ///
    /// Returns an error if the pass hit a construct it could not handle.
    fn run(&self, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<PassReport>;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}

/// What one pass invocation did.
#[derive(Debug, Default)]
pub struct PassReport {
    records: Vec<TransformationRecord>,
}

impl PassReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `count` successful rewrites of `kind`. Nothing is recorded for zero.
    pub fn changed(&mut self, kind: TransformationKind, count: usize, detail: impl Into<String>) {
        if count > 0 {
            self.records
                .push(TransformationRecord::success(kind, detail.into()));
        }
    }

    /// Records something the pass found but deliberately left unresolved.
    pub fn unresolved(&mut self, kind: TransformationKind, detail: impl Into<String>) {
        self.records
            .push(TransformationRecord::failure(kind, detail.into()));
    }

    /// Appends all records of `other`.
    pub fn extend(&mut self, other: PassReport) {
        self.records.extend(other.records);
    }

    /// Returns `true` if any successful rewrite was recorded.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.records.iter().any(|r| r.succeeded)
    }

    /// Returns `true` if nothing at all was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records collected so far.
    #[must_use]
    pub fn records(&self) -> &[TransformationRecord] {
        &self.records
    }

    /// Consumes the report.
    #[must_use]
    pub fn into_records(self) -> Vec<TransformationRecord> {
        self.records
    }
}

/// State shared by every pass of one pipeline run.
///
/// All collections are append-only and can be written through `&self`.
pub struct PassContext {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Request options.
    pub flags: OptionFlags,
    /// The run's audit trail.
    pub log: TransformationLog,
    /// Warnings for the caller.
    warnings: boxcar::Vec<String>,
    /// Detection signatures fired so far.
    signatures: boxcar::Vec<DetectionSignature>,
    /// Failures already recorded; the fixed point would otherwise repeat them.
    reported_failures: std::sync::Mutex<HashSet<(TransformationKind, String)>>,
}

impl PassContext {
    /// Creates a context for one run.
    #[must_use]
    pub fn new(config: EngineConfig, flags: OptionFlags) -> Self {
        Self {
            config,
            flags,
            log: TransformationLog::new(),
            warnings: boxcar::Vec::new(),
            signatures: boxcar::Vec::new(),
            reported_failures: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` if `flag` is set for this request.
    #[must_use]
    pub fn has(&self, flag: OptionFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Adds a warning for the caller.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.push(message);
    }

    /// Iterates over the warnings in insertion order.
    pub fn warnings(&self) -> impl Iterator<Item = &String> {
        (0..self.warnings.count()).filter_map(|i| self.warnings.get(i))
    }

    /// Adds a detection signature.
    pub fn add_signature(&self, signature: DetectionSignature) {
        log::debug!(
            "signature {} ({:.2}): {}",
            signature.technique,
            signature.confidence,
            signature.evidence.join(", ")
        );
        self.signatures.push(signature);
    }

    /// Adds a signature unless one for the same technique already exists.
    pub fn add_signature_once(&self, signature: DetectionSignature) {
        if !self.has_technique(&signature.technique) {
            self.add_signature(signature);
        }
    }

    /// Iterates over the signatures in insertion order.
    pub fn signatures(&self) -> impl Iterator<Item = &DetectionSignature> {
        (0..self.signatures.count()).filter_map(|i| self.signatures.get(i))
    }

    /// Returns `true` if a signature for `technique` has fired.
    #[must_use]
    pub fn has_technique(&self, technique: &Technique) -> bool {
        self.signatures().any(|s| &s.technique == technique)
    }

    /// Appends the records of a pass report to the log.
    ///
    /// Successful records are always appended. A failed record is appended
    /// only the first time its `(kind, detail)` pair is seen in this run.
    pub fn commit(&self, report: PassReport) {
        for record in report.into_records() {
            if record.succeeded {
                self.log.push(record);
            } else if self.first_failure(record.kind, &record.detail) {
                self.log.failure(record.kind, record.detail);
            }
        }
    }

    /// Records a failed transformation once per run.
    pub fn record_failure(&self, kind: TransformationKind, detail: impl Into<String>) {
        let detail = detail.into();
        if self.first_failure(kind, &detail) {
            self.log.failure(kind, detail);
        }
    }

    /// Records a construct that was recognised but left in place.
    ///
    /// Adds a failed record and a warning carrying the same text, both once
    /// per run, so fixed-point iteration does not repeat them.
    pub fn unresolved(&self, kind: TransformationKind, detail: impl Into<String>) {
        let detail = detail.into();
        if self.first_failure(kind, &detail) {
            self.warn(detail.clone());
            self.log.failure(kind, detail);
        }
    }

    fn first_failure(&self, kind: TransformationKind, detail: &str) -> bool {
        match self.reported_failures.lock() {
            Ok(mut seen) => seen.insert((kind, detail.to_string())),
            Err(poisoned) => poisoned.into_inner().insert((kind, detail.to_string())),
        }
    }
}
