// This module defines ExportConfig, the caller-facing switches of one export. The flags decide
// which representation strategies the operation encoder may use (native builtin ops, the flex
// passthrough for foreign ops, generic custom ops), which foreign ops are eligible for the flex
// path, which extension-dialect ops are serialized, whether constant data is stored inline or
// out of band, the alignment applied to user custom options, extra metadata entries, and the
// delegate backends whose compatibility is verified after finalization. max_container_size is
// the inline size ceiling; it defaults to the 2 GiB addressing limit of the container format.
// Builder-style with_* methods return the updated config; validate() rejects contradictory
// flags and alignments that are not powers of two.

use std::collections::{BTreeMap, BTreeSet};

use super::error::{ExportError, ExportResult};

/// Largest container the format can address (2^31 - 1 bytes).
pub const MAX_CONTAINER_SIZE: usize = i32::MAX as usize;

/// Export configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Every op must be a native builtin: no flex and no generic custom fallback.
    pub force_builtin_only: bool,
    /// Do not emit native builtin ops at all.
    pub force_foreign_passthrough: bool,
    /// Allow foreign ops to be exported through the flex path.
    pub enable_foreign_passthrough: bool,
    /// Any registered foreign op may use the flex path.
    pub allow_all_foreign_ops: bool,
    /// Foreign op names selected by the user for the flex path.
    pub allowlisted_foreign_op_names: BTreeSet<String>,
    /// Allow foreign ops to be exported as generic custom ops.
    pub enable_custom_ops: bool,
    /// Delegate backends to verify (only `GPU` is known).
    pub supported_backends: BTreeSet<String>,
    /// Extra metadata entries; values are stored as 16-byte fields.
    pub metadata: BTreeMap<String, String>,
    /// Alignment of user custom option payloads.
    pub custom_option_alignment: Option<usize>,
    /// Store constant data after the container instead of inside it.
    pub use_out_of_band_buffers: bool,
    /// Serialize extension-dialect ops that have no runtime kernel.
    pub serialize_extension_ops: bool,
    /// Inline size ceiling.
    pub max_container_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            force_builtin_only: false,
            force_foreign_passthrough: false,
            enable_foreign_passthrough: false,
            allow_all_foreign_ops: false,
            allowlisted_foreign_op_names: BTreeSet::new(),
            enable_custom_ops: false,
            supported_backends: BTreeSet::new(),
            metadata: BTreeMap::new(),
            custom_option_alignment: None,
            use_out_of_band_buffers: false,
            serialize_extension_ops: false,
            max_container_size: MAX_CONTAINER_SIZE,
        }
    }
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force_builtin_only(mut self, enabled: bool) -> Self {
        self.force_builtin_only = enabled;
        self
    }

    pub fn with_force_foreign_passthrough(mut self, enabled: bool) -> Self {
        self.force_foreign_passthrough = enabled;
        self
    }

    pub fn with_foreign_passthrough(mut self, enabled: bool) -> Self {
        self.enable_foreign_passthrough = enabled;
        self
    }

    pub fn with_allow_all_foreign_ops(mut self, enabled: bool) -> Self {
        self.allow_all_foreign_ops = enabled;
        self
    }

    pub fn with_allowlisted_foreign_op(mut self, name: &str) -> Self {
        self.allowlisted_foreign_op_names.insert(name.to_string());
        self
    }

    pub fn with_custom_ops(mut self, enabled: bool) -> Self {
        self.enable_custom_ops = enabled;
        self
    }

    pub fn with_supported_backend(mut self, backend: &str) -> Self {
        self.supported_backends.insert(backend.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_custom_option_alignment(mut self, alignment: usize) -> Self {
        self.custom_option_alignment = Some(alignment);
        self
    }

    pub fn with_out_of_band_buffers(mut self, enabled: bool) -> Self {
        self.use_out_of_band_buffers = enabled;
        self
    }

    pub fn with_extension_ops(mut self, enabled: bool) -> Self {
        self.serialize_extension_ops = enabled;
        self
    }

    pub fn with_max_container_size(mut self, size: usize) -> Self {
        self.max_container_size = size;
        self
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.force_builtin_only && self.force_foreign_passthrough {
            return Err(ExportError::InvalidConfig {
                reason: "force_builtin_only and force_foreign_passthrough are mutually exclusive"
                    .into(),
            });
        }
        if let Some(alignment) = self.custom_option_alignment {
            if !alignment.is_power_of_two() {
                return Err(ExportError::InvalidConfig {
                    reason: format!("custom option alignment {} is not a power of two", alignment),
                });
            }
        }
        if self.max_container_size == 0 || self.max_container_size > MAX_CONTAINER_SIZE {
            return Err(ExportError::InvalidConfig {
                reason: format!(
                    "max container size must be in 1..={}, got {}",
                    MAX_CONTAINER_SIZE, self.max_container_size
                ),
            });
        }
        Ok(())
    }

    /// Native builtin ops may be emitted.
    pub fn builtin_enabled(&self) -> bool {
        !self.force_foreign_passthrough
    }

    /// Foreign ops may use the flex path.
    pub fn flex_enabled(&self) -> bool {
        self.enable_foreign_passthrough && !self.force_builtin_only
    }

    /// Foreign ops may become generic custom ops.
    pub fn custom_enabled(&self) -> bool {
        self.enable_custom_ops && !self.force_builtin_only
    }
}
