use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for conditions that are logged but never surfaced as errors.
#[derive(Default, Debug)]
pub struct SharedDiagnostics {
    pub notifications: AtomicU64,
    pub subscription_errors: AtomicU64,
    pub decode_failures: AtomicU64,
    pub commands_accepted: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub commands_failed: AtomicU64,
    pub commands_completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsSnapshot {
    pub notifications: u64,
    pub subscription_errors: u64,
    pub decode_failures: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub commands_failed: u64,
    pub commands_completed: u64,
}

impl SharedDiagnostics {
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription_error(&self) {
        self.subscription_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_accepted(&self) {
        self.commands_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_completed(&self) {
        self.commands_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            subscription_errors: self.subscription_errors.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_completed: self.commands_completed.load(Ordering::Relaxed),
        }
    }
}
