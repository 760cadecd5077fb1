//! Lightweight run counters, reported at the end of a run.

/// Counters maintained by the [`Compiler`][crate::compile::Compiler].
#[derive(Debug, Default, Clone)]
pub struct CompileStats {
    /// Top-level invocations of the builtin knowledge compiler.
    pub builtin_kc_calls: u64,
    /// Invocations of the external D-DNNF compiler.
    pub external_kc_calls: u64,
}

/// Counters maintained by the [`Projector`][crate::project::Projector].
#[derive(Debug, Default, Clone)]
pub struct TraverseStats {
    pub sat_calls: u64,
    pub visit_product: u64,
    pub visit_data_sum: u64,
    pub visit_mutex_sum: u64,
    pub visit_tautology_sum: u64,
    pub visit_subsumed_sum: u64,
    pub visit_counted_sum: u64,
    pub visit_excluding_sum: u64,
    pub cache_reuse: u64,
    pub data_only_shortcut: u64,
    pub projection_only_shortcut: u64,
}

impl TraverseStats {
    pub fn visit_sum_total(&self) -> u64 {
        self.visit_data_sum
            + self.visit_mutex_sum
            + self.visit_tautology_sum
            + self.visit_subsumed_sum
            + self.visit_counted_sum
            + self.visit_excluding_sum
    }
}
