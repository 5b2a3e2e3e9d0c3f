use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_AUTOSAVE_DELAY_MS: i64 = 500;

/// Trailing-edge debounce for field edits.
///
/// Every edit pushes the deadline back; the write happens once the deadline
/// passes with no further edits.
#[derive(Debug, Clone)]
pub struct Autosave {
    delay: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl Autosave {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::new(Duration::milliseconds(ms.max(0)))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, now: DateTime<Utc>) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl Default for Autosave {
    fn default() -> Self {
        Self::from_millis(DEFAULT_AUTOSAVE_DELAY_MS)
    }
}
