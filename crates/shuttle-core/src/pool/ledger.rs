//! Task ledger: who is running, who finished, and how.
//!
//! Finished entries are kept for inspection and evicted oldest-first once
//! more than `retention` of them are held. Totals survive eviction.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{TaskId, TaskResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub label: Option<String>,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct TaskLedger {
    entries: HashMap<TaskId, LedgerEntry>,
    finished: VecDeque<TaskId>,
    retention: usize,
    counts: LedgerCounts,
}

impl TaskLedger {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retention,
            counts: LedgerCounts::default(),
        }
    }

    pub fn start(&mut self, id: TaskId, label: Option<String>) {
        self.entries.insert(
            id,
            LedgerEntry {
                label,
                status: TaskStatus::Running,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        self.counts.running += 1;
    }

    pub fn finish(&mut self, id: TaskId, result: &TaskResult) {
        let status = match result {
            Ok(()) => {
                self.counts.succeeded += 1;
                TaskStatus::Succeeded
            }
            Err(err) => {
                self.counts.failed += 1;
                TaskStatus::Failed(err.to_string())
            }
        };
        self.counts.running = self.counts.running.saturating_sub(1);

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.status = status;
            entry.finished_at = Some(Utc::now());
            self.finished.push_back(id);
        }

        // reclaim() が呼ばれない使い方でもメモリが青天井にならないように
        if self.finished.len() > self.retention.saturating_mul(2).max(1) {
            self.evict_finished();
        }
    }

    /// Drop finished entries beyond the retention bound. Returns how many
    /// were evicted.
    pub fn evict_finished(&mut self) -> usize {
        let mut evicted = 0;
        while self.finished.len() > self.retention {
            if let Some(id) = self.finished.pop_front() {
                self.entries.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn get(&self, id: &TaskId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn counts(&self) -> LedgerCounts {
        self.counts
    }

    /// Failures still held in the ledger, oldest first.
    pub fn recent_failures(&self) -> Vec<(TaskId, String)> {
        self.finished
            .iter()
            .filter_map(|id| match self.entries.get(id) {
                Some(LedgerEntry {
                    status: TaskStatus::Failed(reason),
                    ..
                }) => Some((*id, reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Running entries first, then finished ones oldest first.
    pub fn snapshot(&self) -> Vec<(TaskId, LedgerEntry)> {
        let mut out: Vec<(TaskId, LedgerEntry)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == TaskStatus::Running)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        out.sort_by_key(|(_, entry)| entry.started_at);
        out.extend(
            self.finished
                .iter()
                .filter_map(|id| self.entries.get(id).map(|entry| (*id, entry.clone()))),
        );
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
