use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamped, append-only list of human readable messages.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    entries: Vec<(f64, String)>,
}

impl LogEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self::default().add(text)
    }

    pub fn add(mut self, text: impl Into<String>) -> Self {
        self.entries.push((now_secs(), text.into()));
        self
    }

    pub fn merge(mut self, other: LogEntry) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Messages in insertion order.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, text)| text.as_str())
    }

    /// Entries strictly newer than `t` (seconds since the unix epoch), oldest first.
    pub fn entries_after(&self, t: f64) -> Vec<(f64, &str)> {
        let mut out: Vec<(f64, &str)> = self
            .entries
            .iter()
            .filter(|(ts, _)| *ts > t)
            .map(|(ts, text)| (*ts, text.as_str()))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        out
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
