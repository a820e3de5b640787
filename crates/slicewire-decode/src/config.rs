//! Decoder configuration (spec §6's `classGraphDepthMax` / `traceLevels.slicing`).

/// Knobs that shape how aggressively the decoder defends against hostile
/// input and how much it logs along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Maximum depth of nested class instances before a decode is aborted
    /// with [`slicewire_core::WireError::Marshal`]. Matches the reference
    /// runtime's default of 100.
    pub class_graph_depth_max: u32,

    /// Whether slicing (tolerating and preserving unknown derived types) is
    /// permitted. When `false`, an unresolvable most-derived slice is a
    /// hard failure instead of an `UnknownSlicedClass`/`UnknownUserException`.
    pub sliced_format: bool,

    /// Emit `tracing` events for slice skips, cache hits/misses on the
    /// compact-id and type-id caches, and class-graph-depth transitions.
    pub trace_slicing: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            class_graph_depth_max: 100,
            sliced_format: true,
            trace_slicing: false,
        }
    }
}
