//! Bounded alert event log with deterministic replay.
//!
//! Appends assign ids and UTC timestamps, mirror correlated events as
//! `PMCP[...]` log lines plus `mcp_log` fan-out entries, and optionally
//! append to a durable JSON-lines file which is replayed into the ring at
//! startup. Queries use an exclusive `since` cursor with tolerant timestamp
//! parsing and a total order (parsed timestamp, then event id) so paginated
//! replay is deterministic.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use pmcp_types::timestamp::{format_timestamp, parse_timestamp};
use pmcp_types::{new_event_id, AlertEvent, AlertFilter, EventType};

/// Default ring capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
struct StoredEvent {
    insert_seq: u64,
    parsed: Option<DateTime<Utc>>,
    event: AlertEvent,
}

struct LogInner {
    ring: VecDeque<StoredEvent>,
    next_seq: u64,
    durable: Option<std::fs::File>,
}

pub struct AlertLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

/// Render the correlation log line shared by the alert entry, the MCP log
/// and the `mcp_log` fan-out entry.
pub fn pmcp_line(event: &AlertEvent) -> String {
    format!(
        "PMCP[{}] | event_id={} | camera_id={} | rule_id={} | {}",
        event.event_type.as_upper(),
        event.event_id,
        event.camera_id,
        event.rule_id,
        event.message
    )
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LogInner {
                ring: VecDeque::with_capacity(capacity),
                next_seq: 0,
                durable: None,
            }),
        }
    }

    /// Attach a durable JSON-lines file, replaying its tail into the ring.
    pub fn with_durable_file(self, path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        // Replay before opening for append so we do not re-write history.
        let mut replayed: Vec<AlertEvent> = Vec::new();
        if let Ok(text) = std::fs::read_to_string(path) {
            for line in text.lines() {
                match serde_json::from_str::<AlertEvent>(line) {
                    Ok(event) => replayed.push(event),
                    Err(e) => warn!("skipping unreadable alert log line: {e}"),
                }
            }
        }
        let skip = replayed.len().saturating_sub(self.capacity);
        {
            let mut inner = self.inner.lock();
            for event in replayed.into_iter().skip(skip) {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                let parsed = parse_timestamp(&event.timestamp);
                inner.ring.push_back(StoredEvent {
                    insert_seq: seq,
                    parsed,
                    event,
                });
            }
        }

        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => self.inner.lock().durable = Some(file),
            Err(e) => warn!("durable alert log unavailable at {}: {e}", path.display()),
        }
        self
    }

    /// Append one event, assigning `event_id` and `timestamp` when absent.
    ///
    /// Correlated event types additionally produce the `PMCP[...]` log line
    /// and an `mcp_log` fan-out entry carrying the same event id.
    pub fn append(&self, mut event: AlertEvent) -> AlertEvent {
        if event.event_id.is_empty() {
            event.event_id = new_event_id();
        }
        if event.timestamp.is_empty() {
            event.timestamp = format_timestamp(&Utc::now());
        }

        let fanout = if event.event_type.is_correlated() {
            let line = pmcp_line(&event);
            info!(target: "pmcp::mcp", "{line}");
            let mut mirror = AlertEvent::new(EventType::McpLog, line.clone());
            // Correlation contract: the mirror carries the same event id.
            mirror.event_id = event.event_id.clone();
            mirror.camera_id = event.camera_id.clone();
            mirror.rule_id = event.rule_id.clone();
            mirror.timestamp = event.timestamp.clone();
            mirror.data = Some(line);
            Some(mirror)
        } else {
            None
        };

        let mut inner = self.inner.lock();
        Self::push_locked(&mut inner, self.capacity, event.clone());
        if let Some(mirror) = fanout {
            Self::push_locked(&mut inner, self.capacity, mirror);
        }
        event
    }

    fn push_locked(inner: &mut LogInner, capacity: usize, event: AlertEvent) {
        if let Some(file) = inner.durable.as_mut() {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(e) = writeln!(file, "{line}") {
                        warn!("durable alert append failed: {e}");
                    }
                }
                Err(e) => warn!("alert serialization failed: {e}"),
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let parsed = parse_timestamp(&event.timestamp);
        if inner.ring.len() == capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(StoredEvent {
            insert_seq: seq,
            parsed,
            event,
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ring.is_empty()
    }

    /// Replay query. See module docs for the ordering contract.
    pub fn query(&self, filter: &AlertFilter) -> Vec<AlertEvent> {
        let since = filter.since_cursor();
        let until = filter.until_cursor();
        let cursor_active = since.is_some() || until.is_some();
        let event_type = filter.event_type_filter();
        let camera = filter.camera_id_filter().filter(|s| !s.is_empty());

        let inner = self.inner.lock();
        let mut rows: Vec<&StoredEvent> = inner
            .ring
            .iter()
            .filter(|stored| {
                if let Some(want) = event_type {
                    if stored.event.event_type != want {
                        return false;
                    }
                }
                if let Some(want) = camera {
                    // Stored ids may carry stray whitespace; trim both sides.
                    if stored.event.camera_id.as_str().trim() != want {
                        return false;
                    }
                }
                match stored.parsed {
                    Some(ts) => {
                        if let Some(since) = since {
                            // Strictly exclusive cursor.
                            if ts <= since {
                                return false;
                            }
                        }
                        if let Some(until) = until {
                            if ts > until {
                                return false;
                            }
                        }
                        true
                    }
                    // Unparseable timestamps cannot participate in cursor
                    // pagination deterministically.
                    None => !cursor_active,
                }
            })
            .collect();

        rows.sort_by(|a, b| match (&a.parsed, &b.parsed) {
            (Some(ta), Some(tb)) => ta
                .cmp(tb)
                .then_with(|| a.event.event_id.cmp(&b.event.event_id)),
            // Unparseable entries keep a stable position after all parseable
            // ones, in insertion order.
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.insert_seq.cmp(&b.insert_seq),
        });

        rows.into_iter()
            .take(filter.effective_limit())
            .map(|stored| stored.event.clone())
            .collect()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmcp_types::CameraId;

    fn event_at(event_type: EventType, camera: &str, ts: &str) -> AlertEvent {
        let mut e = AlertEvent::new(event_type, "m");
        e.camera_id = CameraId::new(camera);
        e.timestamp = ts.to_string();
        e
    }

    #[test]
    fn append_assigns_id_and_timestamp() {
        let log = AlertLog::new(10);
        let stored = log.append(AlertEvent::new(EventType::McpLog, "hello"));
        assert!(stored.event_id.starts_with("evt_"));
        assert!(parse_timestamp(&stored.timestamp).is_some());
    }

    #[test]
    fn correlated_append_adds_fanout_with_same_id() {
        let log = AlertLog::new(10);
        let stored = log.append(event_at(EventType::ProviderError, "usb:0", ""));
        assert_eq!(log.len(), 2);

        let all = log.query(&AlertFilter::default());
        let mirror = all
            .iter()
            .find(|e| e.event_type == EventType::McpLog)
            .expect("fan-out entry");
        assert_eq!(mirror.event_id, stored.event_id);
        let data = mirror.data.as_deref().unwrap();
        assert!(data.starts_with(&format!(
            "PMCP[PROVIDER_ERROR] | event_id={} |",
            stored.event_id
        )));
    }

    #[test]
    fn ring_capacity_evicts_oldest() {
        let log = AlertLog::new(5);
        for i in 0..8 {
            log.append(event_at(
                EventType::McpLog,
                "c",
                &format!("2024-05-01T00:00:0{i}Z"),
            ));
        }
        assert_eq!(log.len(), 5);
        let rows = log.query(&AlertFilter::default());
        assert_eq!(rows[0].timestamp, "2024-05-01T00:00:03Z");
    }

    #[test]
    fn since_cursor_is_strictly_exclusive() {
        let log = AlertLog::new(10);
        for i in 0..5 {
            log.append(event_at(
                EventType::McpLog,
                "c",
                &format!("2024-05-01T00:00:0{i}Z"),
            ));
        }
        let rows = log.query(&AlertFilter {
            since: Some("2024-05-01T00:00:02Z".into()),
            ..Default::default()
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "2024-05-01T00:00:03Z");
    }

    #[test]
    fn z_and_offset_cursors_are_identical() {
        let log = AlertLog::new(10);
        for i in 0..4 {
            log.append(event_at(
                EventType::McpLog,
                "c",
                &format!("2024-05-01T00:00:0{i}Z"),
            ));
        }
        let a = log.query(&AlertFilter {
            since: Some("2024-05-01T00:00:01Z".into()),
            ..Default::default()
        });
        let b = log.query(&AlertFilter {
            since: Some("2024-05-01T00:00:01+00:00".into()),
            ..Default::default()
        });
        assert_eq!(a, b);
    }

    #[test]
    fn unparseable_since_behaves_as_absent() {
        let log = AlertLog::new(10);
        for i in 0..3 {
            log.append(event_at(
                EventType::McpLog,
                "c",
                &format!("2024-05-01T00:00:0{i}Z"),
            ));
        }
        let unfiltered = log.query(&AlertFilter::default());
        let invalid = log.query(&AlertFilter {
            since: Some("not-a-time".into()),
            ..Default::default()
        });
        assert_eq!(unfiltered, invalid);
    }

    #[test]
    fn filters_normalize_case_and_whitespace() {
        let log = AlertLog::new(10);
        log.append(event_at(EventType::ProviderError, "usb:0", "2024-05-01T00:00:00Z"));
        log.append(event_at(EventType::ProviderError, "other", "2024-05-01T00:00:01Z"));

        let strict = log.query(&AlertFilter {
            camera_id: Some("usb:0".into()),
            event_type: Some("provider_error".into()),
            ..Default::default()
        });
        let sloppy = log.query(&AlertFilter {
            camera_id: Some(" usb:0 ".into()),
            event_type: Some(" PROVIDER_ERROR ".into()),
            ..Default::default()
        });
        assert_eq!(strict, sloppy);
        assert_eq!(strict.len(), 1);
    }

    #[test]
    fn events_with_bad_timestamps_drop_out_of_cursor_queries() {
        let log = AlertLog::new(10);
        log.append(event_at(EventType::McpLog, "c", "garbage-stamp"));
        log.append(event_at(EventType::McpLog, "c", "2024-05-01T00:00:05Z"));

        let unfiltered = log.query(&AlertFilter::default());
        assert_eq!(unfiltered.len(), 2);
        // Unparseable entry holds a stable position after parseable ones.
        assert_eq!(unfiltered[1].timestamp, "garbage-stamp");

        let cursored = log.query(&AlertFilter {
            since: Some("2024-05-01T00:00:00Z".into()),
            ..Default::default()
        });
        assert_eq!(cursored.len(), 1);
        assert_eq!(cursored[0].timestamp, "2024-05-01T00:00:05Z");
    }

    #[test]
    fn pagination_concatenation_matches_single_query() {
        let log = AlertLog::new(200);
        for i in 0..100 {
            log.append(event_at(
                EventType::McpLog,
                "c",
                &format_timestamp(
                    &(Utc::now() + chrono::Duration::seconds(i)),
                ),
            ));
        }

        let all = log.query(&AlertFilter {
            limit: Some(1000),
            ..Default::default()
        });
        assert_eq!(all.len(), 100);

        let page1 = log.query(&AlertFilter {
            limit: Some(40),
            ..Default::default()
        });
        let page2 = log.query(&AlertFilter {
            since: Some(page1.last().unwrap().timestamp.clone()),
            limit: Some(40),
            ..Default::default()
        });
        let page3 = log.query(&AlertFilter {
            since: Some(page2.last().unwrap().timestamp.clone()),
            limit: Some(40),
            ..Default::default()
        });

        let mut joined = page1;
        joined.extend(page2);
        joined.extend(page3);
        assert_eq!(joined, all);
    }

    #[test]
    fn durable_file_replays_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");

        {
            let log = AlertLog::new(10).with_durable_file(&path);
            log.append(event_at(EventType::McpLog, "c", "2024-05-01T00:00:00Z"));
            log.append(event_at(EventType::McpLog, "c", "2024-05-01T00:00:01Z"));
        }

        let log2 = AlertLog::new(10).with_durable_file(&path);
        assert_eq!(log2.len(), 2);
        let rows = log2.query(&AlertFilter::default());
        assert_eq!(rows[1].timestamp, "2024-05-01T00:00:01Z");
    }
}
