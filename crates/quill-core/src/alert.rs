use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Success,
    Notice,
    Error,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertKind::Success => "Success",
            AlertKind::Notice => "Notice",
            AlertKind::Error => "Error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub body: String,
}

/// User-visible notice channel. Presentation belongs to the implementor.
pub trait Notifier {
    fn notify(&mut self, kind: AlertKind, message: &str);

    /// Withdraw every pending alert of `kind`. Channels that keep nothing
    /// ignore it.
    fn dismiss(&mut self, _kind: AlertKind) {}
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&mut self, kind: AlertKind, message: &str) {
        (**self).notify(kind, message);
    }

    fn dismiss(&mut self, kind: AlertKind) {
        (**self).dismiss(kind);
    }
}

/// Fans one alert out to two channels.
impl<A: Notifier, B: Notifier> Notifier for (A, B) {
    fn notify(&mut self, kind: AlertKind, message: &str) {
        self.0.notify(kind, message);
        self.1.notify(kind, message);
    }

    fn dismiss(&mut self, kind: AlertKind) {
        self.0.dismiss(kind);
        self.1.dismiss(kind);
    }
}

/// Keeps alerts in memory until removed.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerts: Vec<Alert>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: AlertKind, body: impl Into<String>) -> Uuid {
        let alert = Alert {
            id: Uuid::new_v4(),
            kind,
            body: body.into(),
        };
        let id = alert.id;
        self.alerts.push(alert);
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Alert> {
        let idx = self.alerts.iter().position(|alert| alert.id == id)?;
        Some(self.alerts.remove(idx))
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn of_kind(&self, kind: AlertKind) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(move |alert| alert.kind == kind)
    }

    pub fn latest(&self) -> Option<&Alert> {
        self.alerts.last()
    }

    /// Drop every alert of `kind`, as when a connection is re-established
    /// and stale error banners are dismissed.
    pub fn dismiss_kind(&mut self, kind: AlertKind) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|alert| alert.kind != kind);
        before - self.alerts.len()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

impl Notifier for AlertLog {
    fn notify(&mut self, kind: AlertKind, message: &str) {
        self.add(kind, message);
    }

    fn dismiss(&mut self, kind: AlertKind) {
        let dropped = self.dismiss_kind(kind);
        debug!(%kind, dropped, "dismissed alerts");
    }
}

/// Routes alerts into the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&mut self, kind: AlertKind, message: &str) {
        match kind {
            AlertKind::Error => error!(%kind, body = message, "alert"),
            AlertKind::Success | AlertKind::Notice => info!(%kind, body = message, "alert"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_adds_and_removes_by_id() {
        let mut log = AlertLog::new();
        let first = log.add(AlertKind::Notice, "hello");
        log.notify(AlertKind::Error, "boom");
        assert_eq!(log.alerts().len(), 2);

        let removed = log.remove(first).expect("alert present");
        assert_eq!(removed.body, "hello");
        assert!(log.remove(first).is_none());
        assert_eq!(log.latest().map(|a| a.kind), Some(AlertKind::Error));
    }

    #[test]
    fn dismiss_kind_only_drops_matching() {
        let mut log = AlertLog::new();
        log.notify(AlertKind::Error, "a");
        log.notify(AlertKind::Success, "b");
        log.notify(AlertKind::Error, "c");
        assert_eq!(log.dismiss_kind(AlertKind::Error), 2);
        assert_eq!(log.of_kind(AlertKind::Success).count(), 1);
    }

    #[test]
    fn pair_delivers_to_both() {
        let mut pair = (AlertLog::new(), AlertLog::new());
        pair.notify(AlertKind::Notice, "both");
        assert_eq!(pair.0.alerts().len(), 1);
        assert_eq!(pair.1.latest().map(|a| a.body.as_str()), Some("both"));

        pair.notify(AlertKind::Error, "gone");
        pair.dismiss(AlertKind::Error);
        assert_eq!(pair.0.of_kind(AlertKind::Error).count(), 0);
        assert_eq!(pair.1.alerts().len(), 1);
    }
}
