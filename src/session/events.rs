use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::broadcast;

use super::SessionSnapshot;

/// How long transient notices stay visible.
pub const NOTICE_TTL: Duration = Duration::from_secs(3);

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    /// `None` keeps the notice up until the user dismisses it.
    pub dismiss_after_ms: Option<u64>,
}

impl Notice {
    pub fn is_blocking(&self) -> bool {
        self.dismiss_after_ms.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ControllerEvent {
    StateChanged(SessionSnapshot),
    Notice(Notice),
}

/// Fan-out of controller events to any number of observers. Sending with no
/// subscriber is fine; the event is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    pub fn emit_state(&self, snapshot: SessionSnapshot) {
        let _ = self.tx.send(ControllerEvent::StateChanged(snapshot));
    }

    /// Auto-dismissing notice.
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.push(level, message.into(), Some(NOTICE_TTL));
    }

    /// Notice that stays until dismissed; used when a run could not start.
    pub fn notify_blocking(&self, level: NoticeLevel, message: impl Into<String>) {
        self.push(level, message.into(), None);
    }

    fn push(&self, level: NoticeLevel, message: String, ttl: Option<Duration>) {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            message,
            dismiss_after_ms: ttl.map(|ttl| ttl.as_millis() as u64),
        };
        let _ = self.tx.send(ControllerEvent::Notice(notice));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
