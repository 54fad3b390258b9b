//! CSV trajectory files: one row per tracked frame.
//!
//! Columns: `frame_idx, tx, ty, tz, qx, qy, qz, qw, err`, where the pose is
//! the accumulated frame-to-world transform and `err` is the normalized
//! optimization error (negative when the estimate was rejected).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Writer};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::tracking::frame::StereoFrame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub frame_idx: u64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
    pub err: f64,
}

impl TrajectoryRow {
    pub fn from_frame(frame: &StereoFrame) -> Self {
        let t = &frame.t_fw.translation;
        let q = frame.t_fw.rotation.quaternion();
        Self {
            frame_idx: frame.frame_idx,
            tx: t.x,
            ty: t.y,
            tz: t.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
            err: frame.err_norm,
        }
    }

    pub fn pose(&self) -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(self.qw, self.qx, self.qy, self.qz)),
            translation: Vector3::new(self.tx, self.ty, self.tz),
        }
    }
}

/// Appends tracked frames to a CSV trajectory.
pub struct TrajectoryWriter<W: Write> {
    writer: Writer<W>,
    rows: usize,
}

impl TrajectoryWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let writer = Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { writer, rows: 0 })
    }
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: Writer::from_writer(inner),
            rows: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &StereoFrame) -> Result<()> {
        self.writer
            .serialize(TrajectoryRow::from_frame(frame))
            .with_context(|| format!("Failed to write trajectory row for frame {}", frame.frame_idx))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush trajectory")
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush trajectory: {}", e.error()))
    }
}

/// Load a trajectory written by [`TrajectoryWriter`].
pub fn read_trajectory<P: AsRef<Path>>(path: P) -> Result<Vec<TrajectoryRow>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        let row: TrajectoryRow = row.with_context(|| format!("Malformed trajectory row in {}", path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}
