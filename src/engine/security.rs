use std::sync::Arc;

use crate::engine::env::{DeterrenceHooks, EnvEvent};

/// Proctoring-style signal tracker. Fullscreen exit and tab hiding are
/// independent; either one is a violation. State is session-local and never
/// reported to the server.
pub struct SecurityMonitor {
    deterrence: Arc<dyn DeterrenceHooks>,
    fullscreen: bool,
    visible: bool,
    warnings: u32,
    engaged: bool,
}

/// What the state machine should do in response to an environment signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityAction {
    /// Pause the attempt and show the warning modal.
    Violation { warnings: u32 },
    /// All clear again; the candidate may resume.
    ClearedForResume,
}

impl SecurityMonitor {
    pub fn new(deterrence: Arc<dyn DeterrenceHooks>) -> Self {
        Self { deterrence, fullscreen: true, visible: true, warnings: 0, engaged: false }
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// Install the clipboard/context-menu interceptors for the attempt.
    pub fn engage(&mut self) {
        if !self.engaged {
            self.deterrence.engage();
            self.engaged = true;
        }
    }

    pub fn release(&mut self) {
        if self.engaged {
            self.deterrence.release();
            self.engaged = false;
        }
    }

    pub fn observe(&mut self, event: EnvEvent) -> Option<SecurityAction> {
        let was_clear = self.is_clear();
        match event {
            EnvEvent::FullscreenExited => self.fullscreen = false,
            EnvEvent::FullscreenEntered => self.fullscreen = true,
            EnvEvent::TabHidden => self.visible = false,
            EnvEvent::TabVisible => self.visible = true,
            EnvEvent::Online | EnvEvent::Offline => return None,
        }

        if was_clear && !self.is_clear() {
            self.warnings += 1;
            return Some(SecurityAction::Violation { warnings: self.warnings });
        }
        if !was_clear && self.is_clear() {
            return Some(SecurityAction::ClearedForResume);
        }
        None
    }

    fn is_clear(&self) -> bool {
        self.fullscreen && self.visible
    }
}

impl Drop for SecurityMonitor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::env::NoopDeterrence;

    fn monitor() -> SecurityMonitor {
        SecurityMonitor::new(Arc::new(NoopDeterrence))
    }

    #[test]
    fn fullscreen_exit_is_a_violation() {
        let mut m = monitor();
        assert_eq!(
            m.observe(EnvEvent::FullscreenExited),
            Some(SecurityAction::Violation { warnings: 1 })
        );
        assert_eq!(m.observe(EnvEvent::FullscreenEntered), Some(SecurityAction::ClearedForResume));
    }

    #[test]
    fn overlapping_violations_clear_only_when_both_signals_recover() {
        let mut m = monitor();
        assert!(matches!(
            m.observe(EnvEvent::TabHidden),
            Some(SecurityAction::Violation { warnings: 1 })
        ));
        // Fullscreen drops while already hidden; still one ongoing violation.
        assert_eq!(m.observe(EnvEvent::FullscreenExited), None);
        assert_eq!(m.observe(EnvEvent::TabVisible), None);
        assert_eq!(m.observe(EnvEvent::FullscreenEntered), Some(SecurityAction::ClearedForResume));
        assert_eq!(m.warnings(), 1);
    }

    #[test]
    fn each_distinct_violation_increments_warnings() {
        let mut m = monitor();
        m.observe(EnvEvent::TabHidden);
        m.observe(EnvEvent::TabVisible);
        m.observe(EnvEvent::FullscreenExited);
        m.observe(EnvEvent::FullscreenEntered);
        assert_eq!(m.warnings(), 2);
    }

    #[test]
    fn connectivity_events_are_ignored() {
        let mut m = monitor();
        assert_eq!(m.observe(EnvEvent::Offline), None);
        assert_eq!(m.observe(EnvEvent::Online), None);
        assert_eq!(m.warnings(), 0);
    }
}
