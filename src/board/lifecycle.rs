//! Room expiry timers.
//!
//! Every room carries two timers:
//!
//! - an idle timer armed at creation that closes the room once the fixed
//!   time horizon elapses, whatever the activity in between;
//! - a grace timer armed whenever the last member leaves, cancelled by a
//!   rejoin.
//!
//! Timer tasks only hold a weak handle to the registry plus the room's code
//! and generation. When they fire they ask the registry to re-check the
//! room under its locks, so a timer left over from a deleted room can never
//! close a newer room that happens to reuse the code.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::registry::RoomRegistry;

pub const ROOM_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Fixed lifetime of a room, counted from creation.
    pub room_timeout: Duration,
    /// Delay between the last member leaving and the room being deleted.
    pub empty_room_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            room_timeout: ROOM_TIMEOUT,
            empty_room_grace: EMPTY_ROOM_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TimeHorizonElapsed,
    AllMembersLeft,
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::TimeHorizonElapsed => "time horizon elapsed",
            CloseReason::AllMembersLeft => "all members left",
            CloseReason::ServerShutdown => "server shutting down",
        };
        f.write_str(reason)
    }
}

/// Pending timer tasks of one room. At most one of each kind.
#[derive(Debug, Default)]
pub struct RoomTimers {
    idle: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

impl RoomTimers {
    pub fn has_idle(&self) -> bool {
        self.idle.is_some()
    }

    pub fn has_grace(&self) -> bool {
        self.grace.is_some()
    }

    /// Returns whether a grace timer was pending.
    pub fn cancel_grace(&mut self) -> bool {
        match self.grace.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        if let Some(handle) = self.idle.take() {
            handle.abort();
        }
        self.cancel_grace();
    }
}

impl Drop for RoomTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Arms room timers on behalf of a registry.
pub(crate) struct Lifecycle {
    config: LifecycleConfig,
    registry: Weak<RoomRegistry>,
}

impl Lifecycle {
    pub(crate) fn new(config: LifecycleConfig, registry: Weak<RoomRegistry>) -> Self {
        Self { config, registry }
    }

    pub(crate) fn config(&self) -> LifecycleConfig {
        self.config
    }

    pub(crate) fn arm_idle_timer(&self, code: &str, generation: u64, timers: &mut RoomTimers) {
        if let Some(previous) = timers.idle.take() {
            previous.abort();
        }
        timers.idle = Some(self.spawn_expiry(
            code,
            generation,
            self.config.room_timeout,
            CloseReason::TimeHorizonElapsed,
        ));
    }

    /// Replaces any pending grace timer, so a room never has two.
    pub(crate) fn arm_grace_timer(&self, code: &str, generation: u64, timers: &mut RoomTimers) {
        timers.cancel_grace();
        timers.grace = Some(self.spawn_expiry(
            code,
            generation,
            self.config.empty_room_grace,
            CloseReason::AllMembersLeft,
        ));
    }

    fn spawn_expiry(
        &self,
        code: &str,
        generation: u64,
        after: Duration,
        reason: CloseReason,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let code = code.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(after).await;

            let Some(registry) = registry.upgrade() else {
                return;
            };
            tracing::debug!(room_id = %code, generation, reason = %reason, "Room timer fired");
            registry.expire_room(&code, generation, reason).await;
        })
    }
}
