// This module provides arena-based export session management using the bumpalo crate.
// ExportSession lives for one call of the top-level export and outlives the individual
// attempts (the inline attempt and, when the model is too large, the out-of-band restart).
// It owns a reference to the arena allocator, interns tensor and op names so the name mapper
// can hand out &'arena str without copying, tracks the sub-graph currently being built for
// log context, and accumulates statistics: attempts made, sub-graphs, tensors and operators
// encoded, buffers allocated and deduplicated, out-of-band bytes appended and the final
// container size. SessionStats is a plain snapshot with a Display impl used by the CLI and by
// debug logging at the end of an export.

//! Arena-based export session management.
//!
//! All names interned during an export share the session lifetime, so the
//! per-attempt tables can borrow them freely.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based export session.
pub struct ExportSession<'arena> {
    /// Arena allocator for interned names.
    arena: &'arena Bump,

    /// Session statistics for debugging.
    stats: RefCell<SessionStats>,

    /// String interning for tensor and op names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Sub-graph being built, for log context.
    current_subgraph: RefCell<Option<String>>,
}

impl<'arena> ExportSession<'arena> {
    /// Create a new export session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_subgraph: RefCell::new(None),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    pub fn set_current_subgraph(&self, name: &str) {
        *self.current_subgraph.borrow_mut() = Some(name.to_string());
    }

    pub fn current_subgraph(&self) -> Option<String> {
        self.current_subgraph.borrow().clone()
    }

    /// Record the start of an attempt.
    pub fn record_attempt(&self, out_of_band: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.attempts += 1;
        stats.out_of_band = out_of_band;
        // Counters describe the latest attempt only.
        stats.subgraphs_built = 0;
        stats.tensors_built = 0;
        stats.operators_built = 0;
        stats.buffers_allocated = 0;
        stats.buffer_bytes = 0;
        stats.dedup_hits = 0;
        stats.operator_counts.clear();
        stats.largest_subgraph_name.clear();
        stats.largest_subgraph_ops = 0;
    }

    /// Record a finished sub-graph.
    pub fn record_subgraph(&self, name: &str, operators: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.subgraphs_built += 1;
        if stats.largest_subgraph_name.is_empty() || operators > stats.largest_subgraph_ops {
            stats.largest_subgraph_ops = operators;
            stats.largest_subgraph_name = name.to_string();
        }
        *self.current_subgraph.borrow_mut() = None;
    }

    pub fn record_tensor(&self) {
        self.stats.borrow_mut().tensors_built += 1;
    }

    /// Record an encoded operator by op name.
    pub fn record_operator(&self, op_name: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.operators_built += 1;
        *stats.operator_counts.entry(op_name.to_string()).or_insert(0) += 1;
    }

    pub fn record_buffer(&self, bytes: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.buffers_allocated += 1;
        stats.buffer_bytes += bytes;
    }

    pub fn record_dedup_hit(&self) {
        self.stats.borrow_mut().dedup_hits += 1;
    }

    pub fn record_out_of_band_bytes(&self, bytes: usize) {
        self.stats.borrow_mut().out_of_band_bytes = bytes;
    }

    pub fn record_container_size(&self, bytes: usize) {
        self.stats.borrow_mut().container_size = bytes;
    }

    /// Get export statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Export session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Attempts made (2 when the out-of-band restart happened).
    pub attempts: usize,

    /// Whether the latest attempt used the out-of-band layout.
    pub out_of_band: bool,

    pub subgraphs_built: usize,
    pub tensors_built: usize,
    pub operators_built: usize,

    /// Count of encoded operators per op name.
    pub operator_counts: HashMap<String, usize>,

    /// Buffer records with a payload.
    pub buffers_allocated: usize,

    /// Payload bytes stored in buffers.
    pub buffer_bytes: usize,

    /// Constants that reused an existing buffer.
    pub dedup_hits: usize,

    /// Bytes appended after the container in the out-of-band layout.
    pub out_of_band_bytes: usize,

    /// Size of the finished output.
    pub container_size: usize,

    pub largest_subgraph_name: String,
    pub largest_subgraph_ops: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Export Session Statistics:")?;
        writeln!(f, "  Attempts: {}", self.attempts)?;
        writeln!(
            f,
            "  Buffer layout: {}",
            if self.out_of_band { "out-of-band" } else { "inline" }
        )?;
        writeln!(f, "  Subgraphs built: {}", self.subgraphs_built)?;
        writeln!(f, "  Tensors built: {}", self.tensors_built)?;
        writeln!(f, "  Operators built: {}", self.operators_built)?;
        writeln!(
            f,
            "  Buffers: {} ({} bytes, {} deduplicated)",
            self.buffers_allocated, self.buffer_bytes, self.dedup_hits
        )?;
        if self.out_of_band {
            writeln!(f, "  Out-of-band bytes: {}", self.out_of_band_bytes)?;
        }
        writeln!(f, "  Container size: {} bytes", self.container_size)?;

        if !self.largest_subgraph_name.is_empty() {
            writeln!(
                f,
                "  Largest subgraph: {} ({} operators)",
                self.largest_subgraph_name, self.largest_subgraph_ops
            )?;
        }

        if !self.operator_counts.is_empty() {
            writeln!(f, "  Operator breakdown:")?;
            let mut sorted: Vec<_> = self.operator_counts.iter().collect();
            sorted.sort_by(|(a_name, a), (b_name, b)| b.cmp(a).then(a_name.cmp(b_name)));

            for (op, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", op, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_session_creation() {
        let arena = Bump::new();
        let session = ExportSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.attempts, 0);
        assert_eq!(stats.operators_built, 0);
        assert!(session.current_subgraph().is_none());
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = ExportSession::new(&arena);

        let s1 = session.intern_str("conv/weights");
        let s2 = session.intern_str("conv/weights");
        let s3 = session.intern_str("conv/bias");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_attempt_resets_counters() {
        let arena = Bump::new();
        let session = ExportSession::new(&arena);

        session.record_attempt(false);
        session.record_operator("tfl.add");
        session.record_buffer(64);
        session.record_dedup_hit();
        assert_eq!(session.stats().operators_built, 1);

        session.record_attempt(true);
        let stats = session.stats();
        assert_eq!(stats.attempts, 2);
        assert!(stats.out_of_band);
        assert_eq!(stats.operators_built, 0);
        assert_eq!(stats.buffer_bytes, 0);
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = ExportSession::new(&arena);

        session.record_attempt(false);
        session.set_current_subgraph("main");
        session.record_operator("tfl.add");
        session.record_operator("tfl.add");
        session.record_operator("tfl.mul");
        session.record_subgraph("main", 3);
        session.record_container_size(512);

        let output = format!("{}", session.stats());
        assert!(output.contains("Attempts: 1"));
        assert!(output.contains("Operators built: 3"));
        assert!(output.contains("main (3 operators)"));
        assert!(output.contains("tfl.add: 2"));
        assert!(output.contains("Container size: 512 bytes"));
    }
}
