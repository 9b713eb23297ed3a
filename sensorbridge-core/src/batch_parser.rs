//! Decoding of the csv batches published by the devices.
//!
//! A batch is comma separated text with a header row. The header must name
//! `adc`, `channel`, `time_stamp` and `value`, in any order. Other columns are
//! ignored.
//!
//! Examples:
//!
//! adc,channel,time_stamp,value
//! 1,1,2024-01-01T00:00:00,100
//! 1,2,2024-01-01T00:00:01,200
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use likely_stable::unlikely;
use std::str::Lines;

use crate::error::IngestError;
use crate::reading::Reading;

pub const ADC_COLUMN: &str = "adc";
pub const CHANNEL_COLUMN: &str = "channel";
pub const TIMESTAMP_COLUMN: &str = "time_stamp";
pub const VALUE_COLUMN: &str = "value";

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Positions of the required columns in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    adc: usize,
    channel: usize,
    time_stamp: usize,
    value: usize,

    /// Fields a row needs to reach every required column.
    min_fields: usize,
}

impl ColumnLayout {
    /// Locate the required columns in a header line.
    pub fn from_header(header: &str) -> Result<Self, IngestError> {
        let names = split_fields(header).collect::<Vec<_>>();

        let find = |name: &str| names.iter().position(|x| *x == name);

        let mut missing = Vec::new();
        let mut get = |name: &'static str| match find(name) {
            Some(pos) => pos,
            None => {
                missing.push(name);
                0
            }
        };

        let adc = get(ADC_COLUMN);
        let channel = get(CHANNEL_COLUMN);
        let time_stamp = get(TIMESTAMP_COLUMN);
        let value = get(VALUE_COLUMN);

        if !missing.is_empty() {
            return Err(IngestError::malformed(
                Some(1),
                format!(
                    "header is missing required column(s): {}, header: `{}`",
                    missing.join(", "),
                    header
                ),
            ));
        }

        let min_fields = [adc, channel, time_stamp, value]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1;

        Ok(Self {
            adc,
            channel,
            time_stamp,
            value,
            min_fields,
        })
    }

    /// Parse one data row. `line_no` is 1-based and only used for errors.
    pub fn parse_row(&self, row: &str, line_no: usize) -> Result<Reading, IngestError> {
        let fields = split_fields(row).collect::<Vec<_>>();

        if unlikely(fields.len() < self.min_fields) {
            return Err(IngestError::malformed(
                Some(line_no),
                format!(
                    "expected at least {} fields, got {}",
                    self.min_fields,
                    fields.len()
                ),
            ));
        }

        let sensor_group = parse_id(fields[self.adc], ADC_COLUMN, line_no)?;
        let channel = parse_id(fields[self.channel], CHANNEL_COLUMN, line_no)?;

        let timestamp = parse_timestamp(fields[self.time_stamp]).ok_or_else(|| {
            IngestError::malformed(
                Some(line_no),
                format!("invalid {}: `{}`", TIMESTAMP_COLUMN, fields[self.time_stamp]),
            )
        })?;

        let raw_value = fields[self.value].parse::<i64>().map_err(|e| {
            IngestError::malformed(
                Some(line_no),
                format!("invalid {}: `{}`, error: {}", VALUE_COLUMN, fields[self.value], e),
            )
        })?;

        Ok(Reading::new(sensor_group, channel, timestamp, raw_value))
    }
}

/// Iterator over the readings of an in-memory payload.
///
/// The header is read when the reader is created, each call to `next` parses
/// one data row. Blank lines are skipped.
pub struct PayloadReader<'a> {
    lines: Lines<'a>,
    layout: ColumnLayout,
    line_no: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(payload).map_err(|e| {
            IngestError::malformed(None, format!("payload is not valid utf-8: {}", e))
        })?;

        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut lines = text.lines();
        let mut line_no = 0;

        let header = loop {
            match lines.next() {
                Some(line) => {
                    line_no += 1;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(IngestError::malformed(None, "empty payload, no header row")),
            }
        };

        let layout = ColumnLayout::from_header(header).map_err(|e| match e {
            IngestError::MalformedPayload { reason, .. } => {
                IngestError::malformed(Some(line_no), reason)
            }
            other => other,
        })?;

        Ok(Self {
            lines,
            layout,
            line_no,
        })
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }
}

impl<'a> Iterator for PayloadReader<'a> {
    type Item = Result<Reading, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(self.layout.parse_row(line, self.line_no));
        }
    }
}

/// Decode a whole payload. Rows keep their order.
///
/// A header without data rows gives an empty vector. Any bad row fails the
/// whole batch.
pub fn parse_batch(payload: &[u8]) -> Result<Vec<Reading>, IngestError> {
    PayloadReader::new(payload)?.collect()
}

/// Parse the date-time formats the devices are known to send.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_id(s: &str, column: &str, line_no: usize) -> Result<u32, IngestError> {
    s.parse::<u32>().map_err(|e| {
        IngestError::malformed(
            Some(line_no),
            format!("invalid {}: `{}`, error: {}", column, s, e),
        )
    })
}

fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(',').map(|s| {
        let s = s.trim();
        s.strip_prefix('"')
            .and_then(|x| x.strip_suffix('"'))
            .unwrap_or(s)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_batch() {
        let payload = b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,100\n1,2,2024-01-01T00:00:01,200\n";

        let readings = parse_batch(payload).unwrap();
        assert_eq!(readings.len(), 2);

        assert_eq!(
            readings[0],
            Reading::new(1, 1, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 100)
        );
        assert_eq!(
            readings[1],
            Reading::new(1, 2, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap(), 200)
        );
    }

    #[test]
    fn test_column_order_and_extra_columns() {
        let payload = b"value,idx,time_stamp,channel,adc\r\n-42,0,2024-03-05 10:11:12.250,3,7\r\n";

        let readings = parse_batch(payload).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].sensor_group, 7);
        assert_eq!(readings[0].channel, 3);
        assert_eq!(readings[0].raw_value, -42);
        assert_eq!(readings[0].timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_header_only() {
        assert!(parse_batch(b"adc,channel,time_stamp,value\n").unwrap().is_empty());
        assert!(parse_batch(b"adc,channel,time_stamp,value").unwrap().is_empty());
        assert!(parse_batch(b"adc,channel,time_stamp,value\n\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_empty_payload() {
        assert!(matches!(
            parse_batch(b""),
            Err(IngestError::MalformedPayload { line: None, .. })
        ));
        assert!(parse_batch(b"\n  \n").is_err());
    }

    #[test]
    fn test_missing_columns() {
        let err = parse_batch(b"adc,channel,time_stamp\n1,1,2024-01-01T00:00:00\n").unwrap_err();

        match err {
            IngestError::MalformedPayload { line, reason } => {
                assert_eq!(line, Some(1));
                assert!(reason.contains("missing required column(s): value,"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_rows() {
        let err = parse_batch(b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,100\n1,1,yesterday,5\n")
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload { line: Some(3), .. }));

        let err = parse_batch(b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,12.5\n").unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload { line: Some(2), .. }));

        let err = parse_batch(b"adc,channel,time_stamp,value\n1,1\n").unwrap_err();
        assert!(err.to_string().contains("expected at least 4 fields"));

        let err = parse_batch(b"adc,channel,time_stamp,value\nx,1,2024-01-01T00:00:00,1\n").unwrap_err();
        assert!(err.to_string().contains("invalid adc"));

        assert!(parse_batch(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();

        assert_eq!(parse_timestamp("2024-01-01T12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T12:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 14:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );

        let with_fraction = parse_timestamp("2024-01-01 12:30:00.123456").unwrap();
        assert_eq!(with_fraction.timestamp_subsec_micros(), 123456);

        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_reader_is_lazy() {
        let payload = b"adc,channel,time_stamp,value\n1,1,2024-01-01T00:00:00,1\nbroken\n";

        let mut reader = PayloadReader::new(payload).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
