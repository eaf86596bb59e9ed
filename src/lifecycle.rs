use std::fmt;

use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ViewerPhase {
    Initializing,
    PlaceholderVisible,
    AssetLoaded,
    AssetFailed,
}

impl ViewerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewerPhase::Initializing => "initializing",
            ViewerPhase::PlaceholderVisible => "loading",
            ViewerPhase::AssetLoaded => "ready",
            ViewerPhase::AssetFailed => "error",
        }
    }
}

impl fmt::Display for ViewerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Mounted,
    FetchStarted,
    Loaded,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("{event:?} is not valid while {from}")]
    InvalidTransition { from: ViewerPhase, event: LifecycleEvent },
}

/// Load state of one mounted viewer. At most one fetch is ever started.
#[derive(Debug)]
pub struct Lifecycle {
    phase: ViewerPhase,
    fetch_started: bool,
    progress: f32,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { phase: ViewerPhase::Initializing, fetch_started: false, progress: 0.0 }
    }

    pub fn phase(&self) -> ViewerPhase {
        self.phase
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn fetch_started(&self) -> bool {
        self.fetch_started
    }

    fn invalid(&self, event: LifecycleEvent) -> LifecycleError {
        LifecycleError::InvalidTransition { from: self.phase, event }
    }

    pub fn mounted(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            ViewerPhase::Initializing => {
                self.phase = ViewerPhase::PlaceholderVisible;
                Ok(())
            }
            _ => Err(self.invalid(LifecycleEvent::Mounted)),
        }
    }

    /// Claims the single fetch allowed per mount.
    pub fn begin_fetch(&mut self) -> Result<(), LifecycleError> {
        if self.fetch_started || self.phase != ViewerPhase::PlaceholderVisible {
            return Err(self.invalid(LifecycleEvent::FetchStarted));
        }
        self.fetch_started = true;
        Ok(())
    }

    /// Progress reports are informational; stale ones are dropped silently.
    pub fn report_progress(&mut self, ratio: f32) {
        if self.phase == ViewerPhase::PlaceholderVisible {
            self.progress = ratio.clamp(0.0, 1.0).max(self.progress);
        }
    }

    pub fn loaded(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            ViewerPhase::PlaceholderVisible if self.fetch_started => {
                self.phase = ViewerPhase::AssetLoaded;
                self.progress = 1.0;
                Ok(())
            }
            _ => Err(self.invalid(LifecycleEvent::Loaded)),
        }
    }

    pub fn failed(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            ViewerPhase::PlaceholderVisible if self.fetch_started => {
                self.phase = ViewerPhase::AssetFailed;
                Ok(())
            }
            _ => Err(self.invalid(LifecycleEvent::Failed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loading() -> Lifecycle {
        let mut lc = Lifecycle::new();
        lc.mounted().unwrap();
        lc.begin_fetch().unwrap();
        lc
    }

    #[test]
    fn happy_path() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.phase(), ViewerPhase::Initializing);
        lc.mounted().unwrap();
        assert_eq!(lc.phase(), ViewerPhase::PlaceholderVisible);
        lc.begin_fetch().unwrap();
        lc.report_progress(0.4);
        lc.report_progress(0.2);
        assert_eq!(lc.progress(), 0.4);
        lc.loaded().unwrap();
        assert_eq!(lc.phase(), ViewerPhase::AssetLoaded);
        assert_eq!(lc.progress(), 1.0);
    }

    #[test]
    fn failure_is_terminal_and_never_refetches() {
        let mut lc = loading();
        lc.failed().unwrap();
        assert_eq!(lc.phase(), ViewerPhase::AssetFailed);
        assert_eq!(
            lc.begin_fetch(),
            Err(LifecycleError::InvalidTransition { from: ViewerPhase::AssetFailed, event: LifecycleEvent::FetchStarted })
        );
        assert!(lc.loaded().is_err());
        assert!(lc.failed().is_err());
        assert!(lc.mounted().is_err());
        assert_eq!(lc.phase(), ViewerPhase::AssetFailed);
    }

    #[test]
    fn second_fetch_is_refused_while_pending() {
        let mut lc = loading();
        assert!(lc.begin_fetch().is_err());
        assert!(lc.fetch_started());
    }

    #[test]
    fn completion_requires_a_fetch() {
        let mut lc = Lifecycle::new();
        lc.mounted().unwrap();
        assert!(lc.loaded().is_err());
        assert!(lc.failed().is_err());
        assert_eq!(lc.phase(), ViewerPhase::PlaceholderVisible);
    }

    #[test]
    fn progress_ignored_after_failure() {
        let mut lc = loading();
        lc.report_progress(0.1);
        lc.failed().unwrap();
        lc.report_progress(0.9);
        assert_eq!(lc.progress(), 0.1);
        assert_eq!(ViewerPhase::AssetFailed.to_string(), "error");
    }
}
