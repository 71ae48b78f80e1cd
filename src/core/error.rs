// This module defines error types for the flatgraph exporter using the thiserror crate.
// ExportError is the main error enum. Hard variants abort an export immediately: a module
// without an entry function, a region with more than one block, a tensor dimension that does
// not fit in 32 bits, a variant type with several nested subtypes, an element type the
// container cannot represent, a while loop whose regions are not single calls, a dangling
// control edge, a model that is too large even in the out-of-band layout, malformed module
// metadata, an invalid configuration, and failures while patching or reading back the
// finished container. Soft failures (ops that cannot be encoded) are gathered in Diagnostics
// while the whole module is scanned, and surface once as ExportError::Unsupported with a
// combined summary. ExportResult<T> is the convenience alias used throughout the crate.

//! Error types for the exporter.
//!
//! Using thiserror for the error enum, plain sorted maps for the
//! accumulated op diagnostics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use thiserror::Error;

/// Main error type for model export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("entry point function not found")]
    NoEntryFunction,

    #[error("more than one entry function found: {names:?}")]
    AmbiguousEntryFunction {
        names: Vec<String>,
    },

    #[error("'{function}': only single block regions are supported (found {blocks})")]
    MultiBlockRegion {
        function: String,
        blocks: usize,
    },

    #[error("'{value}': result shape dimensions out of 32 bit int type range")]
    ShapeOutOfRange {
        value: String,
    },

    #[error("'{value}': only one nested subtype is supported in variant types, found {count}")]
    TooManyVariantSubtypes {
        value: String,
        count: usize,
    },

    #[error("'{value}': unsupported element type {ty}")]
    UnsupportedType {
        value: String,
        ty: String,
    },

    #[error("'{op}': only single call cond/body while export supported")]
    WhileNotSingleCall {
        op: String,
    },

    #[error("control edge {from} -> {to} in '{subgraph}' does not name an exported operator")]
    DanglingControlEdge {
        subgraph: String,
        from: usize,
        to: usize,
    },

    #[error("model structure size {size} is bigger than the {limit} byte limit")]
    ModelTooLarge {
        size: usize,
        limit: usize,
    },

    #[error("'{op}': {reason}")]
    InvalidAttribute {
        op: String,
        reason: String,
    },

    #[error("invalid metadata: {reason}")]
    InvalidMetadata {
        reason: String,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("failed to patch {target}: {reason}")]
    Patch {
        target: String,
        reason: String,
    },

    #[error("malformed container: {reason}")]
    Container {
        reason: String,
    },

    #[error("model is not compatible with the {backend} delegate:\n{summary}")]
    DelegateIncompatible {
        backend: String,
        summary: String,
    },

    #[error("failed while converting: '{function}': {summary}")]
    Unsupported {
        function: String,
        summary: String,
    },
}

/// Result type alias for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Op name -> set of op descriptions.
pub type OpBucket = BTreeMap<String, BTreeSet<String>>;

/// Accumulated soft diagnostics of one export attempt.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// Ops touching resource-typed values.
    pub resource_ops: OpBucket,
    /// Foreign ops exported through the flex path.
    pub flex_ops: OpBucket,
    /// Foreign ops exported as generic custom ops.
    pub custom_ops: OpBucket,
    /// Foreign ops that need the flex path but it is disabled.
    pub failed_flex_ops: OpBucket,
    /// Foreign ops that need the custom path but it is disabled.
    pub failed_custom_ops: OpBucket,
    /// Ops rejected by the delegate compatibility check.
    pub delegate_incompatible: OpBucket,
    /// Free-form op errors, in discovery order.
    pub op_errors: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(bucket: &mut OpBucket, op_name: &str, description: String) {
        bucket.entry(op_name.to_string()).or_default().insert(description);
    }

    pub fn op_error(&mut self, op_name: &str, message: impl AsRef<str>) {
        let message = format!("'{}' op {}", op_name, message.as_ref());
        log::debug!("{}", message);
        self.op_errors.push(message);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_flex_ops.is_empty()
            || !self.failed_custom_ops.is_empty()
            || !self.op_errors.is_empty()
    }

    /// Summary of the failure buckets and op errors, in the order they are reported.
    pub fn failure_summary(&self) -> String {
        let mut err = String::new();
        if !self.failed_flex_ops.is_empty() {
            let _ = write!(
                err,
                "\nSome ops are not supported by the native runtime, you can enable \
                 foreign kernel fallback using flex ops.\n{}\n",
                ops_summary(&self.failed_flex_ops, "Flex")
            );
        }
        if !self.failed_custom_ops.is_empty() {
            let _ = write!(
                err,
                "\nSome ops in the model are custom ops.\n{}\n",
                ops_summary(&self.failed_custom_ops, "Custom")
            );
        }
        for message in &self.op_errors {
            let _ = write!(err, "\n{}", message);
        }
        err
    }
}

/// Render one bucket as `<title> ops: a, b\nDetails:\n\t<desc>\n\t<desc>`.
pub fn ops_summary(ops: &OpBucket, title: &str) -> String {
    let names: Vec<&str> = ops.keys().map(String::as_str).collect();
    let details: Vec<&str> = ops.values().flatten().map(String::as_str).collect();
    format!(
        "{} ops: {}\nDetails:\n\t{}",
        title,
        names.join(", "),
        details.join("\n\t")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_summary_format() {
        let mut bucket = OpBucket::new();
        Diagnostics::record(&mut bucket, "Bar", "tf.Bar() -> ()".into());
        Diagnostics::record(&mut bucket, "Foo", "tf.Foo(f32) -> (f32)".into());
        Diagnostics::record(&mut bucket, "Foo", "tf.Foo(f32) -> (f32)".into());

        let summary = ops_summary(&bucket, "Custom");
        assert_eq!(
            summary,
            "Custom ops: Bar, Foo\nDetails:\n\ttf.Bar() -> ()\n\ttf.Foo(f32) -> (f32)"
        );
    }

    #[test]
    fn test_failure_summary() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_failures());

        Diagnostics::record(&mut diags.failed_custom_ops, "Odd", "tf.Odd() -> ()".into());
        diags.op_error("tfl.mystery", "is not a supported op");
        assert!(diags.has_failures());

        let summary = diags.failure_summary();
        assert!(summary.contains("Custom ops: Odd"));
        assert!(summary.contains("'tfl.mystery' op is not a supported op"));
        assert!(!summary.contains("Flex ops"));
    }

    #[test]
    fn test_unsupported_display() {
        let err = ExportError::Unsupported { function: "main".into(), summary: "boom".into() };
        assert_eq!(err.to_string(), "failed while converting: 'main': boom");
    }
}
