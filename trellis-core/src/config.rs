//! Engine configuration.

/// Options recognized by [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When true, a cell that re-enters `Pending` after having settled
    /// `Ready` keeps exposing its previous result through views until the
    /// new one lands (stale-while-revalidate). When false, views report no
    /// result while pending.
    ///
    /// This is the engine-wide default; individual views may override it.
    pub show_last_result_while_recomputing: bool,

    /// Upper bound on concurrently running recomputations.
    /// `None` means unbounded.
    pub max_concurrent_recomputations: Option<usize>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_last_result_while_recomputing(mut self, enabled: bool) -> Self {
        self.show_last_result_while_recomputing = enabled;
        self
    }

    pub fn max_concurrent_recomputations(mut self, limit: usize) -> Self {
        self.max_concurrent_recomputations = Some(limit);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            show_last_result_while_recomputing: false,
            max_concurrent_recomputations: None,
        }
    }
}
