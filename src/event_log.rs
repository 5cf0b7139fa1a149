//! Append-only CSV log of ingested clicks

use crate::error::{LogCorruption, Result};
use crate::types::event::{parse_timestamp, ClickEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fixed column layout of the log
pub const LOG_COLUMNS: [&str; 10] = [
    "timestamp",
    "device_type",
    "browser",
    "operating_system",
    "ad_position",
    "scroll_depth",
    "mouse_movement",
    "click_duration",
    "ad_id",
    "is_fraud",
];

/// Block size used when scanning back from the end of the log
const TAIL_BLOCK: u64 = 8 * 1024;

/// One persisted click
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub device_type: String,
    pub browser: String,
    pub operating_system: String,
    pub ad_position: String,
    pub scroll_depth: f64,
    pub mouse_movement: f64,
    pub click_duration: f64,
    pub ad_id: String,
    pub is_fraud: bool,
}

impl EventLogEntry {
    /// Text fields are flattened to one line: every record occupies exactly
    /// one physical line of the log.
    pub fn from_click(click: &ClickEvent, is_fraud: bool) -> Self {
        Self {
            timestamp: click.timestamp,
            device_type: single_line(&click.device_type),
            browser: single_line(&click.browser),
            operating_system: single_line(&click.operating_system),
            ad_position: single_line(&click.ad_position),
            scroll_depth: click.scroll_depth,
            mouse_movement: click.mouse_movement,
            click_duration: click.click_duration,
            ad_id: single_line(&click.ad_id),
            is_fraud,
        }
    }

    pub fn to_record(&self) -> StringRecord {
        StringRecord::from(vec![
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.device_type.clone(),
            self.browser.clone(),
            self.operating_system.clone(),
            self.ad_position.clone(),
            self.scroll_depth.to_string(),
            self.mouse_movement.to_string(),
            self.click_duration.to_string(),
            self.ad_id.clone(),
            if self.is_fraud { "1" } else { "0" }.to_string(),
        ])
    }

    /// Parse one log line (without its line terminator)
    pub fn parse_line(line: &str) -> std::result::Result<Self, LogCorruption> {
        let corrupt = |reason: String| LogCorruption {
            line: line.to_string(),
            reason,
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_bytes());
        let mut record = StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => return Err(corrupt("empty line".to_string())),
            Err(e) => return Err(corrupt(e.to_string())),
        }
        Self::from_record(&record).map_err(corrupt)
    }

    fn from_record(record: &StringRecord) -> std::result::Result<Self, String> {
        if record.len() != LOG_COLUMNS.len() {
            return Err(format!(
                "expected {} fields, found {}",
                LOG_COLUMNS.len(),
                record.len()
            ));
        }

        let timestamp = parse_timestamp(&record[0])
            .ok_or_else(|| format!("unparseable timestamp {:?}", &record[0]))?;
        let number = |i: usize| record[i].trim().parse::<f64>().unwrap_or(0.0);

        Ok(Self {
            timestamp,
            device_type: record[1].to_string(),
            browser: record[2].to_string(),
            operating_system: record[3].to_string(),
            ad_position: record[4].to_string(),
            scroll_depth: number(5),
            mouse_movement: number(6),
            click_duration: number(7),
            ad_id: record[8].to_string(),
            is_fraud: record[9].trim() == "1",
        })
    }
}

fn header_line() -> String {
    LOG_COLUMNS.join(",")
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Last `count` lines of the file, read backwards in blocks
fn read_tail_lines(file: &mut File, count: usize) -> std::io::Result<Vec<String>> {
    let mut start = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();

    // one break more than `count` marks where the oldest wanted line begins
    while start > 0 && buf.iter().filter(|&&b| b == b'\n').count() <= count {
        let step = TAIL_BLOCK.min(start);
        start -= step;
        let mut block = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut block)?;
        block.extend_from_slice(&buf);
        buf = block;
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        // partial line cut by the block boundary
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(count);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// The click log, opened for appending.
///
/// Keeps the last `capacity` raw lines in memory so velocity checks never
/// re-read the file. A single instance must own all writes to the file.
pub struct EventLog {
    path: PathBuf,
    file: File,
    tail: VecDeque<String>,
    capacity: usize,
}

impl EventLog {
    /// Open (creating with a header row if absent) and load the trailing lines
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let capacity = capacity.max(1);
        let mut tail = VecDeque::with_capacity(capacity + 1);
        let existing = path.exists() && std::fs::metadata(&path)?.len() > 0;

        if existing {
            let header = header_line();
            // the header and blank lines may take slots, so read one extra
            let lines = read_tail_lines(&mut File::open(&path)?, capacity + 1)?;
            tail.extend(
                lines
                    .into_iter()
                    .filter(|line| !line.trim().is_empty() && *line != header),
            );
            while tail.len() > capacity {
                tail.pop_front();
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !existing {
            file.write_all(format!("{}\n", header_line()).as_bytes())?;
            info!(path = %path.display(), "Created click log");
        }
        debug!(path = %path.display(), tail = tail.len(), "Click log opened");

        Ok(Self {
            path,
            file,
            tail,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent entries, oldest first
    pub fn tail(&self) -> impl Iterator<Item = &str> {
        self.tail.iter().map(String::as_str)
    }

    /// Append one entry as a single write
    pub fn append(&mut self, entry: &EventLogEntry) -> Result<()> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(&entry.to_record())?;
        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        self.file.write_all(&bytes)?;
        self.file.flush()?;

        let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
        self.tail.push_back(line);
        if self.tail.len() > self.capacity {
            self.tail.pop_front();
        }
        Ok(())
    }

    /// Every readable entry in the log; corrupt records are skipped
    pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<EventLogEntry>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path.as_ref())?;
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for record in reader.records() {
            let parsed = match record {
                Ok(record) => EventLogEntry::from_record(&record),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    debug!(reason = %reason, "Skipping click log record");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!(path = %path.as_ref().display(), skipped, "Click log contains corrupt lines");
        }
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn click_at(timestamp: &str) -> ClickEvent {
        ClickEvent {
            timestamp: parse_timestamp(timestamp).unwrap(),
            device_type: "Mobile".to_string(),
            browser: "Chrome".to_string(),
            operating_system: "Android".to_string(),
            ad_position: "top".to_string(),
            scroll_depth: 35.0,
            mouse_movement: 80.0,
            click_duration: 0.4,
            ad_id: "ad-7".to_string(),
        }
    }

    #[test]
    fn test_creates_log_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/live_clicks.csv");
        let mut log = EventLog::open(&path, 20).unwrap();
        assert_eq!(log.tail().count(), 0);

        log.append(&EventLogEntry::from_click(&click_at("2024-03-02T10:00:00Z"), false))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,device_type,browser,operating_system,ad_position,scroll_depth,mouse_movement,click_duration,ad_id,is_fraud");
        assert_eq!(lines[1], "2024-03-02T10:00:00.000Z,Mobile,Chrome,Android,top,35,80,0.4,ad-7,0");
    }

    #[test]
    fn test_reopen_keeps_only_trailing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.csv");
        {
            let mut log = EventLog::open(&path, 20).unwrap();
            for second in 0..30 {
                let ts = format!("2024-03-02T10:00:{second:02}Z");
                log.append(&EventLogEntry::from_click(&click_at(&ts), false)).unwrap();
            }
            assert_eq!(log.tail().count(), 20);
        }

        let log = EventLog::open(&path, 5).unwrap();
        let tail: Vec<&str> = log.tail().collect();
        assert_eq!(tail.len(), 5);
        assert!(tail[0].starts_with("2024-03-02T10:00:25"));
        assert!(tail[4].starts_with("2024-03-02T10:00:29"));
        // header written once
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("timestamp,").count(), 1);
    }

    #[test]
    fn test_line_breaks_in_fields_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.csv");
        {
            let mut log = EventLog::open(&path, 20).unwrap();
            let mut click = click_at("2024-03-02T10:00:00Z");
            click.browser = "Chrome\nbeta".to_string();
            log.append(&EventLogEntry::from_click(&click, false)).unwrap();
        }

        let log = EventLog::open(&path, 20).unwrap();
        let tail: Vec<&str> = log.tail().collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(EventLogEntry::parse_line(tail[0]).unwrap().browser, "Chrome beta");

        let entries = EventLog::read_all(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].browser, "Chrome beta");
    }

    #[test]
    fn test_read_all_keeps_quoted_multiline_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.csv");
        std::fs::write(
            &path,
            format!(
                "{}\n2024-03-02T10:00:00.000Z,Mobile,\"Chrome\nbeta\",Android,top,1,2,3,ad,0\n",
                header_line()
            ),
        )
        .unwrap();

        let entries = EventLog::read_all(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].browser, "Chrome\nbeta");
    }

    #[test]
    fn test_tail_read_spans_several_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.csv");
        {
            let mut log = EventLog::open(&path, 20).unwrap();
            for i in 0..400 {
                let ts = format!("2024-03-02T10:{:02}:{:02}Z", i / 60, i % 60);
                log.append(&EventLogEntry::from_click(&click_at(&ts), false)).unwrap();
            }
        }
        assert!(std::fs::metadata(&path).unwrap().len() > 2 * TAIL_BLOCK);

        let log = EventLog::open(&path, 20).unwrap();
        let tail: Vec<EventLogEntry> = log
            .tail()
            .map(|line| EventLogEntry::parse_line(line).unwrap())
            .collect();
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[0].timestamp, parse_timestamp("2024-03-02T10:06:20Z").unwrap());
        assert_eq!(tail[19].timestamp, parse_timestamp("2024-03-02T10:06:39Z").unwrap());
    }

    #[test]
    fn test_parse_line_rejects_corruption() {
        assert!(EventLogEntry::parse_line("2024-03-02T10:00:00Z,Mobile").is_err());
        let bad_ts = EventLogEntry::parse_line("yesterday,Mobile,Chrome,Android,top,1,2,3,ad,0")
            .unwrap_err();
        assert!(bad_ts.reason.contains("timestamp"));

        let entry =
            EventLogEntry::parse_line("2024-03-02 10:00:00,Mobile,Chrome,Android,top,1,2,3,ad,1")
                .unwrap();
        assert!(entry.is_fraud);
        assert_eq!(entry.click_duration, 3.0);
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.csv");
        let mut log = EventLog::open(&path, 20).unwrap();
        let mut click = click_at("2024-03-02T10:00:00Z");
        click.browser = "Chrome, mobile".to_string();
        log.append(&EventLogEntry::from_click(&click, true)).unwrap();

        let entries = EventLog::read_all(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].browser, "Chrome, mobile");
        assert!(entries[0].is_fraud);
    }
}
