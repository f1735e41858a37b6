//! Inertial sensor recording for offline sessions
//!
//! Three feeds arrive independently (device motion, raw gyroscope, raw
//! accelerometer), each on its own cadence, so their columns grow at
//! different rates. Export lines them up by index and truncates to the
//! shortest column; the recorder is empty again afterwards.

use crate::error::ProbeError;
use std::fmt::Write as _;
use std::path::Path;

/// Column header of the exported table
pub const CSV_HEADER: &str = "Time (s),\
Gyro X (rad/s),Gyro Y (rad/s),Gyro Z (rad/s),\
Acc X (g),Acc Y (g),Acc Z (g),\
Mag X (uT),Mag Y (uT),Mag Z (uT),\
Pitch (rad),Yaw (rad),Roll (rad),\
GyroRaw X (rad/s),GyroRaw Y (rad/s),GyroRaw Z (rad/s),\
AccRaw X (g),AccRaw Y (g),AccRaw Z (g)";

/// Default delivery interval requested from each sensor feed (100 Hz)
pub const DEFAULT_SENSOR_INTERVAL_MS: u64 = 10;

/// Sensor feed a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    DeviceMotion,
    RawGyro,
    RawAccelerometer,
}

/// Fused device-motion bundle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceMotion {
    /// Unbiased rotation rate (rad/s)
    pub rotation_rate: [f64; 3],
    /// Acceleration with gravity removed (g)
    pub user_acceleration: [f64; 3],
    /// Calibrated magnetic field (µT)
    pub magnetic_field: [f64; 3],
    /// Pitch, yaw, roll (rad)
    pub attitude: [f64; 3],
}

/// One reading from any of the three feeds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionReading {
    DeviceMotion(DeviceMotion),
    RawGyro([f64; 3]),
    RawAccelerometer([f64; 3]),
}

impl MotionReading {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::DeviceMotion(_) => SensorKind::DeviceMotion,
            Self::RawGyro(_) => SensorKind::RawGyro,
            Self::RawAccelerometer(_) => SensorKind::RawAccelerometer,
        }
    }
}

/// A reading with the sensor's monotonic timestamp in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedReading {
    pub timestamp: f64,
    pub reading: MotionReading,
}

/// One exported table row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Seconds since the first reading of the session
    pub time: f64,
    pub gyro: [f64; 3],
    pub acceleration: [f64; 3],
    pub magnetic_field: [f64; 3],
    pub attitude: [f64; 3],
    pub gyro_raw: [f64; 3],
    pub acceleration_raw: [f64; 3],
}

impl MotionSample {
    fn write_csv_row(&self, out: &mut String) {
        let _ = write!(out, "{}", self.time);
        for group in [
            &self.gyro,
            &self.acceleration,
            &self.magnetic_field,
            &self.attitude,
            &self.gyro_raw,
            &self.acceleration_raw,
        ] {
            for v in group {
                let _ = write!(out, ",{}", v);
            }
        }
        out.push('\n');
    }
}

/// In-memory accumulator for one session's sensor readings
#[derive(Debug, Default)]
pub struct MotionRecorder {
    origin: Option<f64>,
    device_motion: Vec<(f64, DeviceMotion)>,
    raw_gyro: Vec<[f64; 3]>,
    raw_accel: Vec<[f64; 3]>,
}

impl MotionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading; the first one of a session sets time zero
    pub fn record(&mut self, timed: TimedReading) {
        let origin = *self.origin.get_or_insert(timed.timestamp);
        match timed.reading {
            MotionReading::DeviceMotion(m) => self.device_motion.push((timed.timestamp - origin, m)),
            MotionReading::RawGyro(v) => self.raw_gyro.push(v),
            MotionReading::RawAccelerometer(v) => self.raw_accel.push(v),
        }
    }

    /// Column lengths: device motion, raw gyro, raw accelerometer
    pub fn column_lengths(&self) -> [usize; 3] {
        [self.device_motion.len(), self.raw_gyro.len(), self.raw_accel.len()]
    }

    /// Rows an export would produce now
    pub fn row_count(&self) -> usize {
        self.column_lengths().into_iter().min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_none()
    }

    /// Drop everything, including the time origin
    pub fn clear(&mut self) {
        self.origin = None;
        self.device_motion.clear();
        self.raw_gyro.clear();
        self.raw_accel.clear();
    }

    /// Take the aligned rows and clear the recorder
    pub fn export(&mut self) -> Vec<MotionSample> {
        let rows = (0..self.row_count())
            .map(|i| {
                let (time, m) = self.device_motion[i];
                MotionSample {
                    time,
                    gyro: m.rotation_rate,
                    acceleration: m.user_acceleration,
                    magnetic_field: m.magnetic_field,
                    attitude: m.attitude,
                    gyro_raw: self.raw_gyro[i],
                    acceleration_raw: self.raw_accel[i],
                }
            })
            .collect();
        self.clear();
        rows
    }

    /// Export as CSV text with [`CSV_HEADER`]
    pub fn export_csv(&mut self) -> (String, usize) {
        let rows = self.export();
        let mut out = String::with_capacity(CSV_HEADER.len() + 1 + rows.len() * 160);
        out.push_str(CSV_HEADER);
        out.push('\n');
        for row in &rows {
            row.write_csv_row(&mut out);
        }
        (out, rows.len())
    }

    /// Export to a CSV file, returning the row count
    ///
    /// The recorder is cleared even when the write fails.
    pub fn flush_to(&mut self, path: &Path) -> Result<usize, ProbeError> {
        let lengths = self.column_lengths();
        let (csv, rows) = self.export_csv();
        std::fs::write(path, csv).map_err(|e| ProbeError::file(path, e))?;
        tracing::info!(
            path = %path.display(),
            rows,
            device_motion = lengths[0],
            raw_gyro = lengths[1],
            raw_accel = lengths[2],
            "Motion table written"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(ts: f64, x: f64) -> TimedReading {
        TimedReading {
            timestamp: ts,
            reading: MotionReading::DeviceMotion(DeviceMotion {
                rotation_rate: [x, 0.0, 0.0],
                ..Default::default()
            }),
        }
    }

    fn gyro(ts: f64) -> TimedReading {
        TimedReading {
            timestamp: ts,
            reading: MotionReading::RawGyro([1.0, 2.0, 3.0]),
        }
    }

    fn accel(ts: f64) -> TimedReading {
        TimedReading {
            timestamp: ts,
            reading: MotionReading::RawAccelerometer([0.0, 0.0, -1.0]),
        }
    }

    #[test]
    fn test_header_has_nineteen_columns() {
        assert_eq!(CSV_HEADER.split(',').count(), 19);
        assert!(CSV_HEADER.starts_with("Time (s),Gyro X (rad/s)"));
        assert!(CSV_HEADER.ends_with("AccRaw Z (g)"));
    }

    #[test]
    fn test_first_reading_sets_origin() {
        let mut rec = MotionRecorder::new();
        rec.record(gyro(100.0));
        rec.record(motion(100.5, 0.1));
        rec.record(accel(100.6));
        let rows = rec.export();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, 0.5);
        assert_eq!(rows[0].gyro_raw, [1.0, 2.0, 3.0]);
        assert_eq!(rows[0].acceleration_raw, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_export_truncates_to_shortest_column() {
        let mut rec = MotionRecorder::new();
        for i in 0..10 {
            rec.record(motion(i as f64 * 0.01, i as f64));
        }
        for i in 0..8 {
            rec.record(gyro(i as f64 * 0.01));
        }
        for i in 0..9 {
            rec.record(accel(i as f64 * 0.01));
        }
        assert_eq!(rec.column_lengths(), [10, 8, 9]);

        let (csv, rows) = rec.export_csv();
        assert_eq!(rows, 8);
        assert_eq!(csv.lines().count(), 9);
        assert!(csv.lines().skip(1).all(|l| l.split(',').count() == 19));
        assert!(rec.is_empty());
        assert_eq!(rec.column_lengths(), [0, 0, 0]);
    }

    #[test]
    fn test_new_session_resets_origin() {
        let mut rec = MotionRecorder::new();
        rec.record(motion(5.0, 0.0));
        rec.clear();
        rec.record(motion(9.0, 0.0));
        rec.record(gyro(9.0));
        rec.record(accel(9.0));
        assert_eq!(rec.export()[0].time, 0.0);
    }

    #[test]
    fn test_flush_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.csv");
        let mut rec = MotionRecorder::new();
        rec.record(motion(0.0, 0.25));
        rec.record(gyro(0.0));
        rec.record(accel(0.0));

        assert_eq!(rec.flush_to(&path).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("0,0.25,0,0,0,0,0,0,0,0,0,0,0,1,2,3,0,0,-1")
        );
    }

    #[test]
    fn test_flush_failure_still_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.csv");
        let mut rec = MotionRecorder::new();
        rec.record(gyro(0.0));
        assert!(matches!(rec.flush_to(&path), Err(ProbeError::File { .. })));
        assert!(rec.is_empty());
    }
}
