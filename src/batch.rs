//! Chunked CSV upload reading and combined-table export

use crate::error::{Result, ScoringError};
use crate::models::aggregator::BatchReport;
use crate::types::event::{batch_required_columns, RawEvent, RowSchema};
use csv::{ByteRecord, ReaderBuilder, StringRecord, WriterBuilder};
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Consecutive parsed rows of an upload
#[derive(Debug, Clone, Default)]
pub struct EventChunk {
    /// Upload row index (0-based, header excluded) of each event
    pub indices: Vec<usize>,
    pub events: Vec<RawEvent>,
}

impl EventChunk {
    pub fn from_events(events: Vec<RawEvent>) -> Self {
        Self {
            indices: (0..events.len()).collect(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Streams an upload in bounded chunks.
///
/// Only one chunk is held in memory at a time. Rows that fail to parse are
/// skipped with a warning and remembered in [`BatchReader::dropped`].
pub struct BatchReader<R: Read> {
    reader: csv::Reader<R>,
    schema: RowSchema,
    chunk_size: usize,
    next_index: usize,
    dropped: Vec<usize>,
    record: ByteRecord,
    done: bool,
}

impl<R: Read> BatchReader<R> {
    /// Open an upload, rejecting it when batch-required columns are absent
    pub fn new(input: R, chunk_size: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(input);
        let schema = RowSchema::new(reader.headers()?.clone());

        let missing = schema.missing(batch_required_columns());
        if !missing.is_empty() {
            return Err(ScoringError::Validation { missing });
        }

        Ok(Self {
            reader,
            schema,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            dropped: Vec::new(),
            record: ByteRecord::new(),
            done: false,
        })
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Upload rows skipped so far
    pub fn dropped(&self) -> &[usize] {
        &self.dropped
    }

    pub fn into_dropped(self) -> Vec<usize> {
        self.dropped
    }

    fn read_chunk(&mut self) -> Result<Option<EventChunk>> {
        let mut chunk = EventChunk::default();
        while chunk.len() < self.chunk_size {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.done = true;
                break;
            }
            let index = self.next_index;
            self.next_index += 1;

            let parsed = StringRecord::from_byte_record(self.record.clone())
                .map_err(|e| ScoringError::InvalidField {
                    field: "row".to_string(),
                    reason: e.to_string(),
                })
                .and_then(|record| RawEvent::from_record(&self.schema, &record));

            match parsed {
                Ok(event) => {
                    chunk.indices.push(index);
                    chunk.events.push(event);
                }
                Err(e) => {
                    warn!(row = index, error = %e, "Dropping unparseable upload row");
                    self.dropped.push(index);
                }
            }
        }

        if chunk.is_empty() {
            return Ok(None);
        }
        debug!(rows = chunk.len(), first_row = chunk.indices[0], "Read upload chunk");
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<EventChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Write the combined table: every scored upload row with its original
/// columns, then `{model}_is_fraud` and `{model}_fraud_probability` for each
/// successful model.
///
/// The upload is re-read rather than held in memory; rows are copied as raw
/// bytes, so indices line up with [`BatchReader`] even across rows it
/// dropped for bad encoding. Returns the number of
/// rows written, or `None` when no model succeeded and nothing was exported.
pub fn export_combined<R: Read, W: Write>(
    upload: R,
    report: &BatchReport,
    output: W,
) -> Result<Option<usize>> {
    let models: Vec<_> = report.successful().collect();
    if models.is_empty() {
        warn!(batch_id = %report.batch_id, "No successful model, skipping export");
        return Ok(None);
    }

    let mut reader = ReaderBuilder::new().flexible(true).from_reader(upload);
    let mut writer = WriterBuilder::new().flexible(true).from_writer(output);

    let mut header = reader.byte_headers()?.clone();
    for (name, _) in &models {
        header.push_field(format!("{name}_is_fraud").as_bytes());
        header.push_field(format!("{name}_fraud_probability").as_bytes());
    }
    writer.write_byte_record(&header)?;

    let mut scored = report.row_indices.iter().copied().enumerate().peekable();
    let mut record = ByteRecord::new();
    let mut index = 0;
    let mut written = 0;
    while reader.read_byte_record(&mut record)? {
        let row_index = index;
        index += 1;
        let Some((position, _)) = scored.next_if(|(_, upload_row)| *upload_row == row_index) else {
            continue;
        };

        let mut out = record.clone();
        for (_, predictions) in &models {
            let flag: &[u8] = if predictions.is_fraud[position] { b"true" } else { b"false" };
            out.push_field(flag);
            out.push_field(predictions.fraud_probabilities[position].to_string().as_bytes());
        }
        writer.write_byte_record(&out)?;
        written += 1;
    }
    writer.flush()?;

    Ok(Some(written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelFailure;
    use crate::models::aggregator::ChunkScores;
    use crate::types::prediction::ModelPredictions;

    const HEADER: &str = "timestamp,device_type,browser,operating_system,ad_position,device_ip_reputation,scroll_depth,mouse_movement,keystrokes_detected,click_duration,bot_likelihood_score,VPN_usage,proxy_usage";

    fn upload(rows: &[&str]) -> String {
        let mut csv = format!("{HEADER}\n");
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv
    }

    const GOOD: &str = "2024-03-02 10:00:00,Mobile,Chrome,Android,top,Good,40,120,3,2.5,0.1,0,0";
    const BAD_TS: &str = "not-a-date,Mobile,Chrome,Android,top,Good,40,120,3,2.5,0.1,0,0";

    #[test]
    fn test_missing_columns_rejected() {
        let err = BatchReader::new("timestamp,browser\n2024-01-01,Chrome\n".as_bytes(), 10)
            .err()
            .unwrap();
        match err {
            ScoringError::Validation { missing } => {
                assert!(missing.contains(&"device_type".to_string()));
                assert!(!missing.contains(&"browser".to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_chunks_and_dropped_rows() {
        let csv = upload(&[GOOD, BAD_TS, GOOD, GOOD, "2024-03-02 10:00:05,Desktop"]);
        let mut reader = BatchReader::new(csv.as_bytes(), 2).unwrap();

        let chunks: Vec<EventChunk> = reader.by_ref().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].indices, vec![0, 2]);
        assert_eq!(chunks[1].indices, vec![3, 4]);
        // short rows keep their defaults
        assert_eq!(chunks[1].events[1].browser, "unknown");
        assert_eq!(reader.into_dropped(), vec![1]);
    }

    #[test]
    fn test_export_round_trip() {
        let csv = upload(&[GOOD, BAD_TS, GOOD]);
        let chunks: Vec<EventChunk> = BatchReader::new(csv.as_bytes(), 10)
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        let indices = chunks[0].indices.clone();

        let report = BatchReport::from_chunks(
            vec![ChunkScores {
                row_indices: indices,
                outcomes: vec![
                    ("xgboost".into(), Err(ModelFailure::failed("missing"))),
                    (
                        "random_forest".into(),
                        Ok(ModelPredictions::new(vec![0.75, 0.25], vec![true, false])),
                    ),
                ],
            }],
            vec![1],
            &["xgboost".to_string(), "random_forest".to_string()],
        );

        let mut out = Vec::new();
        let written = export_combined(csv.as_bytes(), &report, &mut out).unwrap();
        assert_eq!(written, Some(2));

        let mut exported = ReaderBuilder::new().from_reader(out.as_slice());
        let headers = exported.headers().unwrap().clone();
        assert_eq!(headers.len(), 15);
        assert_eq!(&headers[13], "random_forest_is_fraud");
        assert_eq!(&headers[14], "random_forest_fraud_probability");

        let rows: Vec<StringRecord> = exported.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][13], "true");
        assert_eq!(&rows[1][14], "0.25");

        // original columns survive untouched
        let original: Vec<&str> = GOOD.split(',').collect();
        for row in &rows {
            let prefix: Vec<&str> = row.iter().take(13).collect();
            assert_eq!(prefix, original);
        }
    }

    #[test]
    fn test_badly_encoded_row_is_dropped_not_fatal() {
        let mut csv = upload(&[GOOD]).into_bytes();
        csv.extend_from_slice(
            b"2024-03-02 10:00:01,Mobile,Saf\xe1ri,Android,top,Good,40,120,3,2.5,0.1,0,0\n",
        );
        csv.extend_from_slice(format!("{GOOD}\n").as_bytes());

        let mut reader = BatchReader::new(csv.as_slice(), 10).unwrap();
        let chunks: Vec<EventChunk> = reader.by_ref().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].indices, vec![0, 2]);
        assert_eq!(reader.into_dropped(), vec![1]);

        let report = BatchReport::from_chunks(
            vec![ChunkScores {
                row_indices: chunks[0].indices.clone(),
                outcomes: vec![(
                    "random_forest".into(),
                    Ok(ModelPredictions::new(vec![0.9, 0.1], vec![true, false])),
                )],
            }],
            vec![1],
            &["random_forest".to_string()],
        );
        let mut out = Vec::new();
        assert_eq!(export_combined(csv.as_slice(), &report, &mut out).unwrap(), Some(2));

        let rows: Vec<StringRecord> = ReaderBuilder::new()
            .from_reader(out.as_slice())
            .records()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][13], "true");
        assert_eq!(&rows[1][14], "0.1");
    }

    #[test]
    fn test_export_skipped_without_successful_model() {
        let report = BatchReport::from_chunks(
            vec![ChunkScores {
                row_indices: vec![0],
                outcomes: vec![("xgboost".into(), Err(ModelFailure::failed("boom")))],
            }],
            Vec::new(),
            &["xgboost".to_string()],
        );
        let csv = upload(&[GOOD]);
        let mut out = Vec::new();
        assert_eq!(export_combined(csv.as_bytes(), &report, &mut out).unwrap(), None);
        assert!(out.is_empty());
    }
}
