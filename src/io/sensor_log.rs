//! Text sensor log.
//!
//! One record per line, `#` starts a comment:
//!
//! ```text
//! imu  <t> <ax> <ay> <az> <gx> <gy> <gz>
//! fix  <t> <x> <y> <z>
//! gnss <t> <latitude> <longitude> <altitude>
//! ```
//!
//! `fix` positions are already in the local frame; `gnss` records are converted
//! with a [`FixConverter`] when the log is turned into events.

use memmap2::Mmap;
use nalgebra::Vector3;
use rayon::prelude::*;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::Path;

use super::{IoError, parse_field};
use crate::estimator::{AbsoluteFix, SensorEvent};
use crate::geodetic::{FixConverter, Llh};
use crate::imu::ImuSample;

/// Logs with more lines than this are parsed in parallel.
const PARALLEL_THRESHOLD: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorRecord {
    Imu(ImuSample),
    Fix(AbsoluteFix),
    Gnss { timestamp: f64, llh: Llh },
}

impl SensorRecord {
    pub fn timestamp(&self) -> f64 {
        match self {
            SensorRecord::Imu(sample) => sample.timestamp,
            SensorRecord::Fix(fix) => fix.timestamp,
            SensorRecord::Gnss { timestamp, .. } => *timestamp,
        }
    }
}

/// Records of a sensor log in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorLog {
    records: Vec<SensorRecord>,
}

impl SensorLog {
    pub fn new(records: Vec<SensorRecord>) -> Self {
        Self { records }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let content = std::str::from_utf8(&mmap).map_err(|e| IoError::Parse {
            line: 0,
            message: format!("Invalid UTF-8: {e}"),
        })?;

        Self::parse(content)
    }

    pub fn parse(content: &str) -> Result<Self, IoError> {
        let lines: Vec<&str> = content.lines().collect();

        let parsed: Vec<Option<SensorRecord>> = if lines.len() > PARALLEL_THRESHOLD {
            lines
                .par_iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<Result<_, _>>()?
        } else {
            lines
                .iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1))
                .collect::<Result<_, _>>()?
        };

        Ok(Self {
            records: parsed.into_iter().flatten().collect(),
        })
    }

    fn parse_line(line: &str, line_num: usize) -> Result<Option<SensorRecord>, IoError> {
        let line = match line.find('#') {
            Some(comment) => &line[..comment],
            None => line,
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(tag) = parts.first() else {
            return Ok(None);
        };

        let record = match *tag {
            "imu" => {
                Self::expect_fields(&parts, 8, line_num)?;
                let f = |i| parse_field(&parts, i, line_num);
                SensorRecord::Imu(ImuSample::new(
                    f(1)?,
                    Vector3::new(f(2)?, f(3)?, f(4)?),
                    Vector3::new(f(5)?, f(6)?, f(7)?),
                ))
            }
            "fix" => {
                Self::expect_fields(&parts, 5, line_num)?;
                let f = |i| parse_field(&parts, i, line_num);
                SensorRecord::Fix(AbsoluteFix::new(f(1)?, Vector3::new(f(2)?, f(3)?, f(4)?)))
            }
            "gnss" => {
                Self::expect_fields(&parts, 5, line_num)?;
                let f = |i| parse_field(&parts, i, line_num);
                SensorRecord::Gnss {
                    timestamp: f(1)?,
                    llh: Llh::new(f(2)?, f(3)?, f(4)?)?,
                }
            }
            other => {
                return Err(IoError::UnknownRecord {
                    line: line_num,
                    tag: other.to_string(),
                });
            }
        };
        Ok(Some(record))
    }

    fn expect_fields(parts: &[&str], count: usize, line_num: usize) -> Result<(), IoError> {
        match parts.len() {
            n if n < count => Err(IoError::MissingFields { line: line_num }),
            n if n > count => Err(IoError::Parse {
                line: line_num,
                message: format!("expected {count} fields, found {n}"),
            }),
            _ => Ok(()),
        }
    }

    /// Estimator events in file order; `gnss` records go through `converter`.
    pub fn events(&self, converter: Option<&FixConverter>) -> Result<Vec<SensorEvent>, IoError> {
        self.records
            .iter()
            .map(|record| match record {
                SensorRecord::Imu(sample) => Ok(SensorEvent::Imu(*sample)),
                SensorRecord::Fix(fix) => Ok(SensorEvent::Fix(*fix)),
                SensorRecord::Gnss { timestamp, llh } => {
                    let converter = converter.ok_or(IoError::MissingGeodeticReference {
                        timestamp: *timestamp,
                    })?;
                    Ok(SensorEvent::Fix(converter.convert(*timestamp, llh)?))
                }
            })
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IoError> {
        let mut content = String::new();
        for record in &self.records {
            // Writing into a String cannot fail.
            let _ = match record {
                SensorRecord::Imu(s) => writeln!(
                    content,
                    "imu {} {} {} {} {} {} {}",
                    s.timestamp,
                    s.linear_acceleration.x,
                    s.linear_acceleration.y,
                    s.linear_acceleration.z,
                    s.angular_velocity.x,
                    s.angular_velocity.y,
                    s.angular_velocity.z
                ),
                SensorRecord::Fix(fix) => writeln!(
                    content,
                    "fix {} {} {} {}",
                    fix.timestamp, fix.position.x, fix.position.y, fix.position.z
                ),
                SensorRecord::Gnss { timestamp, llh } => writeln!(
                    content,
                    "gnss {} {} {} {}",
                    timestamp, llh.latitude, llh.longitude, llh.altitude
                ),
            };
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn records(&self) -> &[SensorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn imu_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, SensorRecord::Imu(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodetic::FrameAlignment;

    const SAMPLE: &str = "\
# replay log
imu 0.005 0.1 0.0 0.0 0.0 0.0 0.01
imu 0.010 0.1 0.0 0.0 0.0 0.0 0.01   # trailing comment

fix 0.010 1.0 2.0 0.0
gnss 0.020 39.7917427 116.4986266 22.1
";

    #[test]
    fn test_parse_records() {
        let log = SensorLog::parse(SAMPLE).unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log.imu_count(), 2);
        assert!(matches!(log.records()[2], SensorRecord::Fix(fix) if fix.position.y == 2.0));
        assert_eq!(log.records()[3].timestamp(), 0.02);
        match log.records()[0] {
            SensorRecord::Imu(sample) => {
                assert_eq!(sample.linear_acceleration, Vector3::new(0.1, 0.0, 0.0));
                assert_eq!(sample.angular_velocity.z, 0.01);
            }
            ref other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors_report_lines() {
        assert!(matches!(
            SensorLog::parse("imu 0.1 0 0 0\n"),
            Err(IoError::MissingFields { line: 1 })
        ));
        assert!(matches!(
            SensorLog::parse("# header\nfix 0.1 a 0 0\n"),
            Err(IoError::InvalidNumber { line: 2, .. })
        ));
        assert!(matches!(
            SensorLog::parse("odom 0.1 0 0 0\n"),
            Err(IoError::UnknownRecord { line: 1, .. })
        ));
        assert!(matches!(
            SensorLog::parse("fix 0.1 0 0 0 0\n"),
            Err(IoError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            SensorLog::parse("gnss 0.1 95.0 0 0\n"),
            Err(IoError::Geodetic(_))
        ));
    }

    #[test]
    fn test_events_need_reference_for_gnss() {
        let log = SensorLog::parse(SAMPLE).unwrap();
        assert!(matches!(
            log.events(None),
            Err(IoError::MissingGeodeticReference { .. })
        ));

        let reference = Llh::new(39.7917427, 116.4986266, 22.1).unwrap();
        let converter = FixConverter::new(reference, FrameAlignment::from_degrees(211.8));
        let events = log.events(Some(&converter)).unwrap();
        assert_eq!(events.len(), 4);
        match events[3] {
            SensorEvent::Fix(fix) => assert!(fix.position.norm() < 1e-6),
            ref other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parallel_parse_preserves_order() {
        let mut content = String::new();
        for i in 1..=6000 {
            let _ = writeln!(content, "imu {} 0 0 0 0 0 0", i as f64 * 0.005);
        }
        let log = SensorLog::parse(&content).unwrap();
        assert_eq!(log.len(), 6000);
        assert!(
            log.records()
                .windows(2)
                .all(|w| w[0].timestamp() < w[1].timestamp())
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.log");
        let log = SensorLog::parse(SAMPLE).unwrap();
        log.save(&path).unwrap();

        let loaded = SensorLog::load(&path).unwrap();
        assert_eq!(loaded, log);
    }
}
