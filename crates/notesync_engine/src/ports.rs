//! Narrow interfaces to the collaborators the cache depends on.
//!
//! Authentication, user-facing notifications and wall-clock time live
//! outside the cache. Each is reached through a small trait so the service
//! can be wired to real implementations in production and to fakes in tests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Scope used for cache keys when nobody is signed in.
pub const ANONYMOUS_SCOPE: &str = "anonymous";

/// The currently authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id; used to namespace cached entries.
    pub id: String,
    /// Email address, if known.
    pub email: Option<String>,
}

impl Identity {
    /// Creates an identity.
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
        }
    }
}

/// Source of the current authenticated identity.
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in identity, or `None` when anonymous.
    fn current_identity(&self) -> Option<Identity>;
}

/// Identity provider for a process that never signs in.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn current_identity(&self) -> Option<Identity> {
        None
    }
}

/// Identity provider whose identity can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    identity: Mutex<Option<Identity>>,
}

impl StaticIdentity {
    /// Creates a provider that reports `identity`.
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: Mutex::new(identity),
        }
    }

    /// Replaces the reported identity (sign-in / sign-out).
    pub fn set(&self, identity: Option<Identity>) {
        *self.identity.lock() = identity;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }
}

/// Severity of a user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something was dropped but local data is intact.
    Warning,
    /// Local data was lost.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    /// Shows `message` to the user.
    fn notify_user(&self, message: &str, severity: Severity);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_user(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(%severity, "{message}"),
            Severity::Warning => tracing::warn!(%severity, "{message}"),
            Severity::Error => tracing::error!(%severity, "{message}"),
        }
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock stopped at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
