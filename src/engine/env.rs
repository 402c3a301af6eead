use std::sync::Arc;

use time::OffsetDateTime;

/// Wall clock seam. The session never calls `now_utc` directly so tests can
/// drive time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

pub type DynClock = Arc<dyn Clock>;

/// Browser-level events the host forwards into the session. These are the
/// only environment inputs the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvEvent {
    FullscreenExited,
    FullscreenEntered,
    TabHidden,
    TabVisible,
    Online,
    Offline,
}

/// Best-effort input deterrence (clipboard, context menu, text selection).
/// Engaged for the whole attempt, released on submission. Not a trust
/// boundary; the server never sees or relies on it.
pub trait DeterrenceHooks: Send + Sync {
    fn engage(&self);
    fn release(&self);
}

#[derive(Debug, Default)]
pub struct NoopDeterrence;

impl DeterrenceHooks for NoopDeterrence {
    fn engage(&self) {}
    fn release(&self) {}
}
