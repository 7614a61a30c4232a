//! Pipeline state machine.

use std::fmt;

use super::stage::StageKind;

/// Where a pipeline run currently is.
///
/// `Init -> FetchDependencies -> Compile -> Compress -> Package -> Verify -> Done`;
/// any stage may move to `Failed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    FetchDependencies,
    Compile,
    Compress,
    Package,
    Verify,
    Done,
    /// Halted in the named state
    Failed(&'static str),
}

impl PipelineState {
    /// The state after this one succeeds
    pub const fn next(self, compress: bool, verify: bool) -> Self {
        match self {
            Self::Init => Self::FetchDependencies,
            Self::FetchDependencies => Self::Compile,
            Self::Compile if compress => Self::Compress,
            Self::Compile | Self::Compress => Self::Package,
            Self::Package if verify => Self::Verify,
            Self::Package | Self::Verify | Self::Done => Self::Done,
            Self::Failed(stage) => Self::Failed(stage),
        }
    }

    /// The state reached when this one fails
    pub const fn fail(self) -> Self {
        match self {
            Self::Failed(stage) => Self::Failed(stage),
            other => Self::Failed(other.name()),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::FetchDependencies => StageKind::FetchDependencies.name(),
            Self::Compile => StageKind::Compile.name(),
            Self::Compress => StageKind::Compress.name(),
            Self::Package => StageKind::Package.name(),
            Self::Verify => "verify",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Build stage run in this state, if any
    pub const fn stage(self) -> Option<StageKind> {
        match self {
            Self::FetchDependencies => Some(StageKind::FetchDependencies),
            Self::Compile => Some(StageKind::Compile),
            Self::Compress => Some(StageKind::Compress),
            Self::Package => Some(StageKind::Package),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(stage) => write!(f, "failed ({stage})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(compress: bool, verify: bool) -> Vec<&'static str> {
        let mut state = PipelineState::Init;
        let mut seen = vec![state.name()];
        while !state.is_terminal() {
            state = state.next(compress, verify);
            seen.push(state.name());
        }
        seen
    }

    #[test]
    fn test_full_sequence() {
        assert_eq!(
            walk(true, true),
            vec!["init", "fetch-dependencies", "compile", "compress", "package", "verify", "done"]
        );
    }

    #[test]
    fn test_optional_states_skipped() {
        assert_eq!(
            walk(false, false),
            vec!["init", "fetch-dependencies", "compile", "package", "done"]
        );
        assert!(!walk(false, true).contains(&"compress"));
    }

    #[test]
    fn test_failure_is_terminal() {
        let failed = PipelineState::Compile.fail();
        assert_eq!(failed, PipelineState::Failed("compile"));
        assert!(failed.is_terminal());
        assert_eq!(failed.next(true, true), failed);
        assert_eq!(failed.fail(), failed);
        assert_eq!(failed.to_string(), "failed (compile)");
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(PipelineState::Compress.stage(), Some(StageKind::Compress));
        assert_eq!(PipelineState::Verify.stage(), None);
        assert_eq!(PipelineState::Done.stage(), None);
    }
}
