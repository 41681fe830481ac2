//! In-memory, bounded log buffers keyed by (app, channel).
//!
//! Holds the live output of the remediation agent and the deploy provider so
//! operators can tail them while a run is in progress. Volatile: nothing
//! here survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lines kept per app per channel.
pub const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogChannel {
    /// Remediation agent transcript.
    Agent,
    /// Deployment provider build/deploy output.
    DeployProvider,
}

impl LogChannel {
    pub const ALL: [LogChannel; 2] = [LogChannel::Agent, LogChannel::DeployProvider];

    /// Name used on the HTTP surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "dedalus",
            Self::DeployProvider => "vercel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dedalus" | "agent" => Some(Self::Agent),
            "vercel" | "deploy-provider" => Some(Self::DeployProvider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

type Buffer = Arc<Mutex<VecDeque<LogEntry>>>;

/// Shared log store. One mutex per (app, channel); the outer map lock is only
/// held long enough to find or create a buffer.
#[derive(Debug)]
pub struct LogStore {
    max_entries: usize,
    buffers: RwLock<HashMap<(i64, LogChannel), Buffer>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(MAX_ENTRIES)
    }
}

impl LogStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Append one line. Trailing whitespace is trimmed and blank lines dropped.
    pub fn append(&self, app_id: i64, channel: LogChannel, message: &str) {
        let message = message.trim_end();
        if message.trim().is_empty() {
            return;
        }

        let buffer = self.buffer_or_create(app_id, channel);
        let mut entries = lock_or_recover(&buffer);
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            message: message.to_string(),
        });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Append every non-blank line of a multi-line block, in order.
    pub fn append_lines(&self, app_id: i64, channel: LogChannel, block: &str) {
        for line in block.lines() {
            if !line.trim().is_empty() {
                self.append(app_id, channel, line);
            }
        }
    }

    /// Most recent `limit` messages, oldest first. `None` or 0 returns all.
    pub fn get(&self, app_id: i64, channel: LogChannel, limit: Option<usize>) -> Vec<String> {
        self.entries(app_id, channel, limit)
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }

    /// Like [`LogStore::get`] but keeps timestamps.
    pub fn entries(&self, app_id: i64, channel: LogChannel, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = {
            let map = read_or_recover(&self.buffers);
            match map.get(&(app_id, channel)) {
                Some(buffer) => Arc::clone(buffer),
                None => return Vec::new(),
            }
        };

        let entries = lock_or_recover(&buffer);
        let skip = match limit {
            Some(limit) if limit > 0 => entries.len().saturating_sub(limit),
            _ => 0,
        };
        entries.iter().skip(skip).cloned().collect()
    }

    /// Clear one channel, or every channel of the app when `channel` is `None`.
    /// Buffers are emptied in place so appenders holding one keep writing
    /// into the live channel.
    pub fn clear(&self, app_id: i64, channel: Option<LogChannel>) {
        let channels = match channel {
            Some(channel) => vec![channel],
            None => LogChannel::ALL.to_vec(),
        };
        let buffers: Vec<Buffer> = {
            let map = read_or_recover(&self.buffers);
            channels
                .iter()
                .filter_map(|channel| map.get(&(app_id, *channel)).cloned())
                .collect()
        };
        for buffer in buffers {
            lock_or_recover(&buffer).clear();
        }
    }

    /// Swap a channel's content for `blocks` in one step. Blocks are split
    /// into lines like [`LogStore::append_lines`]; readers see either the old
    /// content or the new, never a partial refill.
    pub fn replace<I, S>(&self, app_id: i64, channel: LogChannel, blocks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let mut fresh: VecDeque<LogEntry> = VecDeque::new();
        for block in blocks {
            for line in block.as_ref().lines() {
                let message = line.trim_end();
                if message.trim().is_empty() {
                    continue;
                }
                fresh.push_back(LogEntry {
                    timestamp: now,
                    message: message.to_string(),
                });
                if fresh.len() > self.max_entries {
                    fresh.pop_front();
                }
            }
        }

        if fresh.is_empty() {
            self.clear(app_id, Some(channel));
            return;
        }
        let buffer = self.buffer_or_create(app_id, channel);
        *lock_or_recover(&buffer) = fresh;
    }

    fn buffer_or_create(&self, app_id: i64, channel: LogChannel) -> Buffer {
        if let Some(buffer) = read_or_recover(&self.buffers).get(&(app_id, channel)) {
            return Arc::clone(buffer);
        }
        let mut map = write_or_recover(&self.buffers);
        Arc::clone(map.entry((app_id, channel)).or_default())
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_or_recover<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let store = LogStore::default();
        for i in 0..600 {
            store.append(1, LogChannel::Agent, &format!("line {i}"));
        }

        let logs = store.get(1, LogChannel::Agent, None);
        assert_eq!(logs.len(), 500);
        assert_eq!(logs.first().map(String::as_str), Some("line 100"));
        assert_eq!(logs.last().map(String::as_str), Some("line 599"));
        assert!(logs.windows(2).all(|w| {
            let a: usize = w[0].trim_start_matches("line ").parse().unwrap();
            let b: usize = w[1].trim_start_matches("line ").parse().unwrap();
            b == a + 1
        }));
    }

    #[test]
    fn limit_returns_tail_in_append_order() {
        let store = LogStore::default();
        for i in 1..=5 {
            store.append(7, LogChannel::DeployProvider, &format!("step {i}"));
        }

        assert_eq!(
            store.get(7, LogChannel::DeployProvider, Some(2)),
            vec!["step 4".to_string(), "step 5".to_string()]
        );
        assert_eq!(store.get(7, LogChannel::DeployProvider, Some(50)).len(), 5);
        assert_eq!(store.get(7, LogChannel::DeployProvider, Some(0)).len(), 5);
    }

    #[test]
    fn unknown_app_reads_empty_without_creating_storage() {
        let store = LogStore::default();
        assert!(store.get(99, LogChannel::Agent, Some(10)).is_empty());
        assert!(store.buffers.read().unwrap().is_empty());
    }

    #[test]
    fn trims_trailing_whitespace_and_drops_blank_lines() {
        let store = LogStore::default();
        store.append(1, LogChannel::Agent, "  indented stays  \n");
        store.append(1, LogChannel::Agent, "   \t ");
        store.append(1, LogChannel::Agent, "");

        assert_eq!(store.get(1, LogChannel::Agent, None), vec!["  indented stays"]);
    }

    #[test]
    fn append_lines_splits_and_skips_blanks() {
        let store = LogStore::default();
        store.append_lines(3, LogChannel::DeployProvider, "Cloning...\n\nInstalling\r\n  \nBuild done\n");

        assert_eq!(
            store.get(3, LogChannel::DeployProvider, None),
            vec!["Cloning...", "Installing", "Build done"]
        );
    }

    #[test]
    fn clear_one_channel_or_all() {
        let store = LogStore::default();
        store.append(1, LogChannel::Agent, "agent");
        store.append(1, LogChannel::DeployProvider, "deploy");
        store.append(2, LogChannel::Agent, "other app");

        store.clear(1, Some(LogChannel::Agent));
        assert!(store.get(1, LogChannel::Agent, None).is_empty());
        assert_eq!(store.get(1, LogChannel::DeployProvider, None), vec!["deploy"]);

        store.clear(1, None);
        assert!(store.get(1, LogChannel::DeployProvider, None).is_empty());
        assert_eq!(store.get(2, LogChannel::Agent, None), vec!["other app"]);
    }

    #[test]
    fn clearing_an_app_keeps_held_buffers_live() {
        let store = LogStore::default();
        store.append(1, LogChannel::Agent, "before");
        let held = store.buffer_or_create(1, LogChannel::Agent);

        store.clear(1, None);
        lock_or_recover(&held).push_back(LogEntry {
            timestamp: Utc::now(),
            message: "written through a held buffer".to_string(),
        });

        assert!(Arc::ptr_eq(&held, &store.buffer_or_create(1, LogChannel::Agent)));
        assert_eq!(
            store.get(1, LogChannel::Agent, None),
            vec!["written through a held buffer"]
        );
    }

    #[test]
    fn replace_swaps_content_in_one_step() {
        let store = LogStore::new(3);
        store.append(4, LogChannel::DeployProvider, "stale");
        let held = store.buffer_or_create(4, LogChannel::DeployProvider);

        store.replace(
            4,
            LogChannel::DeployProvider,
            ["Cloning", "Installing\n\nBuilding", "  ", "Uploading"],
        );

        assert!(Arc::ptr_eq(&held, &store.buffer_or_create(4, LogChannel::DeployProvider)));
        assert_eq!(
            store.get(4, LogChannel::DeployProvider, None),
            vec!["Installing", "Building", "Uploading"]
        );

        store.replace(4, LogChannel::DeployProvider, Vec::<String>::new());
        assert!(store.get(4, LogChannel::DeployProvider, None).is_empty());

        store.replace(9, LogChannel::Agent, ["", "   "]);
        assert!(!store.buffers.read().unwrap().contains_key(&(9, LogChannel::Agent)));
    }

    #[test]
    fn concurrent_appends_never_exceed_bound() {
        let store = Arc::new(LogStore::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.append(1, LogChannel::Agent, &format!("t{t}-{i}"));
                        assert!(store.get(1, LogChannel::Agent, None).len() <= 50);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(store.get(1, LogChannel::Agent, None).len(), 50);
    }

    #[test]
    fn channel_names_accept_wire_and_internal_aliases() {
        assert_eq!(LogChannel::parse("dedalus"), Some(LogChannel::Agent));
        assert_eq!(LogChannel::parse("deploy-provider"), Some(LogChannel::DeployProvider));
        assert_eq!(LogChannel::parse("datadog"), None);
        assert_eq!(LogChannel::DeployProvider.as_str(), "vercel");
    }
}
