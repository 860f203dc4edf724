use memmap2::Mmap;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{IoError, parse_field};
use crate::estimator::EpochOutput;
use crate::manifold::{pose3::Pose3, so3::SO3};

/// One trajectory line: `timestamp x y z q_x q_y q_z q_w`.
#[derive(Debug, Clone, PartialEq)]
pub struct TumPose {
    pub timestamp: f64,
    pub pose: Pose3,
}

impl TumPose {
    pub fn new(timestamp: f64, pose: Pose3) -> Self {
        Self { timestamp, pose }
    }

    pub fn from_output(output: &EpochOutput) -> Self {
        Self::new(output.timestamp, output.snapshot.pose.clone())
    }
}

/// Streams solved epochs as TUM trajectory lines.
#[derive(Debug)]
pub struct TumWriter<W: Write> {
    writer: BufWriter<W>,
    written: usize,
}

impl TumWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> TumWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    pub fn write_pose(&mut self, pose: &TumPose) -> Result<(), IoError> {
        let t = pose.pose.translation();
        let [qx, qy, qz, qw] = pose.pose.rotation().coeffs();
        writeln!(
            self.writer,
            "{:.6} {:.6} {:.6} {:.6} {:.9} {:.9} {:.9} {:.9}",
            pose.timestamp, t.x, t.y, t.z, qx, qy, qz, qw
        )?;
        self.written += 1;
        Ok(())
    }

    pub fn write_epoch(&mut self, output: &EpochOutput) -> Result<(), IoError> {
        self.write_pose(&TumPose::from_output(output))
    }

    /// Number of lines written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, IoError> {
        self.writer
            .into_inner()
            .map_err(|e| IoError::Io(e.into_error()))
    }
}

/// Read a TUM trajectory back, e.g. for comparison against ground truth.
pub fn load_tum_trajectory<P: AsRef<Path>>(path: P) -> Result<Vec<TumPose>, IoError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let content = std::str::from_utf8(&mmap).map_err(|e| IoError::Parse {
        line: 0,
        message: format!("Invalid UTF-8: {e}"),
    })?;

    parse_tum_trajectory(content)
}

pub fn parse_tum_trajectory(content: &str) -> Result<Vec<TumPose>, IoError> {
    let mut poses = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(IoError::MissingFields { line: line_num });
        }
        let f = |i| parse_field(&parts, i, line_num);

        let translation = Vector3::new(f(1)?, f(2)?, f(3)?);
        let rotation = SO3::from_quaternion_coeffs(f(4)?, f(5)?, f(6)?, f(7)?).map_err(|e| {
            IoError::Parse {
                line: line_num,
                message: e.to_string(),
            }
        })?;
        poses.push(TumPose::new(f(0)?, Pose3::new(rotation, translation)));
    }
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_format() {
        let pose = Pose3::new(SO3::from_euler_angles(0.0, 0.0, 0.5), Vector3::new(1.0, -2.0, 0.25));
        let mut writer = TumWriter::new(Vec::new());
        writer.write_pose(&TumPose::new(1.5, pose)).unwrap();
        assert_eq!(writer.written(), 1);

        let bytes = writer.into_inner().unwrap();
        let line = String::from_utf8(bytes).unwrap();
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], "1.500000");
        assert_eq!(fields[1], "1.000000");
        assert_eq!(fields[2], "-2.000000");
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_written_trajectory_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectory.txt");

        let poses: Vec<TumPose> = (0..5)
            .map(|i| {
                let yaw = 0.1 * i as f64;
                TumPose::new(
                    i as f64,
                    Pose3::new(
                        SO3::from_euler_angles(0.0, 0.0, yaw),
                        Vector3::new(i as f64, 0.5 * i as f64, 0.0),
                    ),
                )
            })
            .collect();

        let mut writer = TumWriter::create(&path).unwrap();
        for pose in &poses {
            writer.write_pose(pose).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        let loaded = load_tum_trajectory(&path).unwrap();
        assert_eq!(loaded.len(), poses.len());
        for (a, b) in loaded.iter().zip(&poses) {
            assert!((a.timestamp - b.timestamp).abs() < 1e-9);
            assert!((a.pose.translation() - b.pose.translation()).norm() < 1e-5);
            assert!(a.pose.rotation().angle_to(b.pose.rotation()) < 1e-7);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_tum_trajectory("# t x y z\n1.0 0 0 0 0 0 0\n"),
            Err(IoError::MissingFields { line: 2 })
        ));
        assert!(matches!(
            parse_tum_trajectory("1.0 0 0 0 0 0 nan? 1\n"),
            Err(IoError::InvalidNumber { line: 1, .. })
        ));
        assert!(matches!(
            parse_tum_trajectory("1.0 0 0 0 0 0 0 1\n2.0 0 0 0 0 0 0 0\n"),
            Err(IoError::Parse { line: 2, .. })
        ));
    }
}
