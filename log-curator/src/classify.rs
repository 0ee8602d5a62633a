use std::fmt;
use std::io::{BufRead, Read};

use regex::Regex;

use crate::transform::{decode, LossyLines, TransformError};

const CURRENT_READING_PATTERN: &str = r"cur=\s*(-?\d+)\s*mA";

/// What kind of run an archive records, judged by the sign of the battery current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    /// Mostly discharging: the unit ran on battery in service
    Airfi,
    /// Mostly charging: the unit sat on a maintenance charger
    Maintenance,
    /// Equal counts, including no readings at all
    Inconclusive,
}

impl LogType {
    pub fn label(&self) -> &'static str {
        match self {
            LogType::Airfi => "airfi",
            LogType::Maintenance => "maintenance",
            LogType::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub log_type: LogType,
    pub negative: usize,
    pub positive: usize,
}

impl Classification {
    pub fn from_counts(negative: usize, positive: usize) -> Self {
        let log_type = match negative.cmp(&positive) {
            std::cmp::Ordering::Greater => LogType::Airfi,
            std::cmp::Ordering::Less => LogType::Maintenance,
            std::cmp::Ordering::Equal => LogType::Inconclusive,
        };
        Self {
            log_type,
            negative,
            positive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    current_reading: Regex,
    sample_size: usize,
}

impl Classifier {
    pub fn new(sample_size: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            current_reading: Regex::new(CURRENT_READING_PATTERN)?,
            sample_size,
        })
    }

    /// Counts the sign of the first `sample_size` current readings. Stops reading
    /// as soon as the sample is full.
    pub fn classify<R: BufRead>(&self, reader: R) -> Result<Classification, TransformError> {
        let mut negative = 0;
        let mut positive = 0;
        for line in LossyLines::new(reader) {
            if negative + positive >= self.sample_size {
                break;
            }
            let line = line?;
            if let Some(value) = self.current_reading.captures(&line).and_then(|c| c.get(1)) {
                if value.as_str().starts_with('-') {
                    negative += 1;
                } else {
                    positive += 1;
                }
            }
        }
        Ok(Classification::from_counts(negative, positive))
    }

    pub fn classify_compressed<R: Read>(
        &self,
        compressed: R,
    ) -> Result<Classification, TransformError> {
        self.classify(decode(compressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn readings(negative: usize, positive: usize) -> String {
        let mut lines = Vec::new();
        for i in 0..negative {
            lines.push(format!("STM32[BQ24620[status=1] cur=-{} mA", 100 + i));
        }
        for i in 0..positive {
            lines.push(format!("STM32[BQ24620[status=1] cur= {} mA", 100 + i));
        }
        lines.join("\n")
    }

    fn classify(data: String) -> Classification {
        Classifier::new(10).unwrap().classify(Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_tie_is_inconclusive() {
        let result = classify(readings(5, 5));
        assert_eq!(result.log_type, LogType::Inconclusive);
        assert_eq!((result.negative, result.positive), (5, 5));
    }

    #[test]
    fn test_majority_negative_is_airfi() {
        assert_eq!(classify(readings(6, 4)).log_type, LogType::Airfi);
        assert_eq!(classify(readings(7, 3)).log_type, LogType::Airfi);
    }

    #[test]
    fn test_majority_positive_is_maintenance() {
        assert_eq!(classify(readings(4, 6)).log_type, LogType::Maintenance);
    }

    #[test]
    fn test_only_first_sample_counts() {
        // 5/5 in the first ten, then a pile of negatives that must be ignored
        let mut data = readings(5, 5);
        data.push('\n');
        data.push_str(&readings(20, 0));
        let result = classify(data);
        assert_eq!(result.log_type, LogType::Inconclusive);
        assert_eq!(result.negative + result.positive, 10);
    }

    #[test]
    fn test_compressed_stream_is_only_read_up_to_the_sample() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        writeln!(encoder, "{}", readings(7, 3)).unwrap();
        for i in 0..200_000u64 {
            writeln!(encoder, "filler {} {}", i, i.wrapping_mul(2_654_435_761) % 1_000_003).unwrap();
        }
        let data = encoder.finish().unwrap();

        let mut stream = Cursor::new(data);
        let result = Classifier::new(10)
            .unwrap()
            .classify_compressed(&mut stream)
            .unwrap();

        assert_eq!(result.log_type, LogType::Airfi);
        assert!(stream.position() < stream.get_ref().len() as u64 / 4);
    }

    #[test]
    fn test_no_readings_is_inconclusive() {
        let result = classify("init: SWver 1\nnothing here\n".to_string());
        assert_eq!(result.log_type, LogType::Inconclusive);
        assert_eq!((result.negative, result.positive), (0, 0));
    }

    #[test]
    fn test_ignores_lines_without_unit() {
        let result = classify("cur=-5\ncur=-5 mV\ncur=7mA".to_string());
        assert_eq!(result.log_type, LogType::Maintenance);
        assert_eq!((result.negative, result.positive), (0, 1));
    }
}
