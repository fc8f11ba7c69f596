//! Append-only audit trail of transformations.
//!
//! Every pass invocation that changed the tree, failed, or found something it
//! deliberately left unresolved appends exactly one [`TransformationRecord`] to
//! the run's [`TransformationLog`]. The log is backed by [`boxcar::Vec`], which
//! has no removal API, so a record can never disappear once written.

use std::fmt;

use serde::{Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Closed set of transformation kinds.
///
/// The kebab-case string form (`constant-folding`, `vm-restoration`, ...) is the
/// stable name used in serialised results.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum TransformationKind {
    /// Literal escapes decoded and invisible characters stripped.
    EscapeNormalization,
    /// Binary expressions over literals replaced by their value.
    ConstantFolding,
    /// Statically decided branches replaced by the taken arm.
    DeadBranchElimination,
    /// Trivial expressions rewritten to their plain form.
    ExpressionSimplification,
    /// Hash-like declared names replaced by sequential names.
    IdentifierRenaming,
    /// String-array access sites replaced by the literal.
    StringArrayExtraction,
    /// A runtime rotation of a string array was simulated.
    StringArrayReorder,
    /// A flattened dispatch loop was linearised.
    ControlFlowRestoration,
    /// A bytecode interpreter was restored or cleaned up.
    VmRestoration,
    /// Bare `debugger` statements removed.
    DebuggerStatementRemoval,
    /// Timers whose callback only hits `debugger` removed.
    DebuggerTimerRemoval,
    /// `constructor("debugger")` invocations removed.
    DebuggerConstructorRemoval,
    /// Decrypt helper call sites replaced with a placeholder.
    DecryptHelperPlaceholder,
    /// Decoder scaffolding that became unreferenced removed.
    ScaffoldingRemoval,
    /// The external collaborator rewrote or annotated the output.
    CollaboratorCleanup,
}

impl Serialize for TransformationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformationRecord {
    /// What kind of transformation was attempted.
    pub kind: TransformationKind,
    /// Whether the transformation completed.
    pub succeeded: bool,
    /// Human-readable detail (counts, names, failure reason).
    pub detail: String,
}

impl TransformationRecord {
    /// Creates a successful record.
    #[must_use]
    pub fn success(kind: TransformationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            succeeded: true,
            detail: detail.into(),
        }
    }

    /// Creates a failed record.
    #[must_use]
    pub fn failure(kind: TransformationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            succeeded: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TransformationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.succeeded { "ok" } else { "failed" };
        write!(f, "[{}] {}: {}", status, self.kind, self.detail)
    }
}

/// Append-only log of [`TransformationRecord`]s.
///
/// Pushing only needs `&self`, so passes holding a shared
/// [`PassContext`](crate::deobfuscation::PassContext) can record directly.
#[derive(Default)]
pub struct TransformationLog {
    records: boxcar::Vec<TransformationRecord>,
}

impl TransformationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: boxcar::Vec::new(),
        }
    }

    /// Appends a record.
    pub fn push(&self, record: TransformationRecord) {
        log::debug!("{record}");
        self.records.push(record);
    }

    /// Appends a successful record.
    pub fn success(&self, kind: TransformationKind, detail: impl Into<String>) {
        self.push(TransformationRecord::success(kind, detail));
    }

    /// Appends a failed record and logs it as a warning.
    pub fn failure(&self, kind: TransformationKind, detail: impl Into<String>) {
        let record = TransformationRecord::failure(kind, detail);
        log::warn!("{record}");
        self.records.push(record);
    }

    /// Number of records written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TransformationRecord> {
        (0..self.records.count()).filter_map(|i| self.records.get(i))
    }

    /// Number of failed records.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.iter().filter(|r| !r.succeeded).count()
    }

    /// Returns `true` if any successful record of `kind` exists.
    #[must_use]
    pub fn has_success(&self, kind: TransformationKind) -> bool {
        self.iter().any(|r| r.kind == kind && r.succeeded)
    }

    /// Copies the records into an owned vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<TransformationRecord> {
        self.iter().cloned().collect()
    }
}

impl fmt::Debug for TransformationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationLog")
            .field("records", &self.len())
            .field("failed", &self.failed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_kind_names_are_kebab_case() {
        assert_eq!(
            TransformationKind::DeadBranchElimination.to_string(),
            "dead-branch-elimination"
        );
        assert_eq!(
            TransformationKind::from_str("vm-restoration").unwrap(),
            TransformationKind::VmRestoration
        );
        for kind in TransformationKind::iter() {
            let name: &'static str = kind.into();
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '-'));
        }
    }

    #[test]
    fn test_log_grows_in_order() {
        let log = TransformationLog::new();
        assert!(log.is_empty());

        log.success(TransformationKind::ConstantFolding, "folded 2");
        log.failure(TransformationKind::StringArrayReorder, "step limit");

        assert_eq!(log.len(), 2);
        assert_eq!(log.failed_count(), 1);
        assert!(log.has_success(TransformationKind::ConstantFolding));
        assert!(!log.has_success(TransformationKind::StringArrayReorder));

        let kinds: Vec<_> = log.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransformationKind::ConstantFolding,
                TransformationKind::StringArrayReorder
            ]
        );
    }

    #[test]
    fn test_record_serializes_kind_as_name() {
        let record = TransformationRecord::success(TransformationKind::IdentifierRenaming, "3");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"identifier-renaming","succeeded":true,"detail":"3"}"#
        );
    }
}
