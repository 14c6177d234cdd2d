//! In-process optimizer configuration (spec.md §6). There is no file or
//! environment-variable surface here — the pass signature spec.md names simply
//! carries a config value through, so one has to exist (SPEC_FULL.md §2).

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfiguration {
    /// If false, a callee marked `returns_twice` unconditionally blocks tail-call
    /// promotion of its call site by default. Exposed as a toggle only so tests can
    /// exercise the escape-analysis path that would otherwise be unreachable in
    /// this crate's small synthetic programs.
    pub allow_returns_twice_tail_call: bool,
}

impl Default for OptimizerConfiguration {
    fn default() -> Self {
        OptimizerConfiguration {
            allow_returns_twice_tail_call: false,
        }
    }
}
