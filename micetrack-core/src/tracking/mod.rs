//! tracking — whole-trajectory repair and head/tail resolution
//!
//! Runs after every frame has been measured.  The passes, in order:
//!
//! A. invalidate round (low elongation) blobs, compute the median body length
//!    and optionally drop size outliers
//! B. fill undefined positions by linear interpolation between defined records
//! C. flip directions for local continuity
//! D. central-difference velocities
//! E. flip whole runs of valid records whose direction opposes their motion
//! F. interpolate direction and radii across invalid records
//!
//! Gaps are expressed as index ranges `(tail, head)` where both ends are usable
//! and every index strictly between them is not.

use tracing::{debug, info};

use crate::error::{Result, TrackError};
use crate::record::{default_direction, EllipseRecord, Vec2};

// ── Tuning constants ─────────────────────────────────────────────────────────

/// Blobs rounder than this are too ambiguous to give an orientation.
pub const DEFAULT_MIN_ELONGATION: f64 = 1.3;

// ── Parameters ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructionParams {
    /// Records with `major / minor <= min_elongation` are invalidated.
    pub min_elongation: f64,
    /// Also invalidate records whose length is at least twice, or at most half,
    /// the median length.
    pub sound_size: bool,
}

impl ReconstructionParams {
    pub fn new(sound_size: bool) -> Self {
        Self {
            min_elongation: DEFAULT_MIN_ELONGATION,
            sound_size,
        }
    }

    pub fn with_min_elongation(mut self, min_elongation: f64) -> Self {
        self.min_elongation = min_elongation;
        self
    }
}

// ── Pass A ───────────────────────────────────────────────────────────────────

/// Element at sorted position `len / 2`; the upper median for even counts.
pub fn median_length(lengths: &[f64]) -> Option<f64> {
    let mut sorted = lengths.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.get(sorted.len() / 2).copied()
}

/// Invalidate undefined or insufficiently elongated records and return the
/// median length of the survivors (`None` if none survive).
pub fn filter_elongation(records: &mut [EllipseRecord], params: &ReconstructionParams) -> Option<f64> {
    let mut lengths = Vec::with_capacity(records.len());
    for record in records.iter_mut() {
        if record.has_nan() || record.elongation() <= params.min_elongation {
            record.invalidate();
            continue;
        }
        lengths.push(record.length());
    }

    let median = median_length(&lengths)?;

    if params.sound_size {
        let mut dropped = 0usize;
        for record in records.iter_mut().filter(|r| r.is_defined()) {
            let length = record.length();
            if length >= median * 2.0 || length <= median / 2.0 {
                record.invalidate();
                dropped += 1;
            }
        }
        debug!(dropped, median, "size outliers invalidated");
    }

    Some(median)
}

// ── Pass B ───────────────────────────────────────────────────────────────────

/// Fill every undefined record's geometry.  Leading and trailing runs copy
/// the nearest defined record; interior holes get an interpolated position,
/// the default direction and both radii set to `median / 2`.
pub fn fill_positions(records: &mut [EllipseRecord], median: f64) -> Result<()> {
    let first = records
        .iter()
        .position(EllipseRecord::is_defined)
        .ok_or(TrackError::NoDefinedRecord)?;
    let last = records
        .iter()
        .rposition(EllipseRecord::is_defined)
        .ok_or(TrackError::NoDefinedRecord)?;

    let (head_fill, tail_fill) = (records[first], records[last]);
    for record in &mut records[..first] {
        record.copy_geometry(&head_fill);
    }
    for record in &mut records[last + 1..] {
        record.copy_geometry(&tail_fill);
    }

    let mut tail = first;
    for head in first + 1..=last {
        if !records[head].is_defined() {
            continue;
        }
        if head - tail > 1 {
            fill_position_gap(records, tail, head, median);
        }
        tail = head;
    }
    Ok(())
}

fn fill_position_gap(records: &mut [EllipseRecord], tail: usize, head: usize, median: f64) {
    let (from, to) = (records[tail].position, records[head].position);
    let distance = (head - tail) as f64;
    for idx in tail + 1..head {
        let a = (idx - tail) as f64 / distance;
        let hole = &mut records[idx];
        hole.position = to * a + from * (1.0 - a);
        hole.direction = default_direction();
        hole.major = median / 2.0;
        hole.minor = median / 2.0;
    }
}

// ── Pass C ───────────────────────────────────────────────────────────────────

/// Make each direction agree with its predecessor's, or with the displacement
/// since the last defined position when the predecessor has no direction.
pub fn align_locally(records: &mut [EllipseRecord]) {
    let Some(first) = records.first() else {
        return;
    };
    let mut last_position = first.position;

    for next in 1..records.len() {
        if !records[next].is_defined() {
            continue;
        }
        let prev = records[next - 1];
        let record = &mut records[next];
        let reference = if prev.is_defined() {
            prev.direction
        } else {
            record.position - last_position
        };
        if record.direction.dot(&reference) < 0.0 {
            record.flip();
        }
        last_position = record.position;
    }
}

// ── Pass D ───────────────────────────────────────────────────────────────────

pub fn estimate_velocities(records: &mut [EllipseRecord]) {
    let n = records.len();
    match n {
        0 => {}
        1 => records[0].velocity = Vec2::zeros(),
        _ => {
            records[0].velocity = records[1].position - records[0].position;
            for idx in 1..n - 1 {
                records[idx].velocity = (records[idx + 1].position - records[idx - 1].position) / 2.0;
            }
            records[n - 1].velocity = records[n - 1].position - records[n - 2].position;
        }
    }
}

// ── Pass E ───────────────────────────────────────────────────────────────────

/// Judge every maximal run of valid records as a unit: if its directions
/// oppose its velocities on aggregate, flip them all.  Returns the number of
/// runs flipped.
pub fn align_segments(records: &mut [EllipseRecord]) -> usize {
    let mut flipped = 0;
    let mut start = 0;
    while start < records.len() {
        if !records[start].valid {
            start += 1;
            continue;
        }
        let end = records[start..]
            .iter()
            .position(|r| !r.valid)
            .map_or(records.len(), |offset| start + offset);

        let score: f64 = records[start..end]
            .iter()
            .map(|r| r.velocity.dot(&r.direction))
            .sum();
        if score < 0.0 {
            records[start..end].iter_mut().for_each(EllipseRecord::flip);
            flipped += 1;
        }
        start = end;
    }
    flipped
}

// ── Pass F ───────────────────────────────────────────────────────────────────

/// Give invalid records a direction and size taken from the surrounding valid
/// ones.  Leading and trailing runs copy their single valid neighbour.
pub fn fill_orientations(records: &mut [EllipseRecord]) -> Result<()> {
    let first = records
        .iter()
        .position(|r| r.valid)
        .ok_or(TrackError::NoValidRecord)?;
    let last = records
        .iter()
        .rposition(|r| r.valid)
        .ok_or(TrackError::NoValidRecord)?;

    let (head_fill, tail_fill) = (records[first], records[last]);
    for record in &mut records[..first] {
        copy_orientation(record, &head_fill);
    }
    for record in &mut records[last + 1..] {
        copy_orientation(record, &tail_fill);
    }

    let mut tail = first;
    for head in first + 1..=last {
        if !records[head].valid {
            continue;
        }
        if head - tail > 1 {
            fill_orientation_gap(records, tail, head);
        }
        tail = head;
    }
    Ok(())
}

fn copy_orientation(record: &mut EllipseRecord, from: &EllipseRecord) {
    record.direction = from.direction;
    record.major = from.major;
    record.minor = from.minor;
}

fn fill_orientation_gap(records: &mut [EllipseRecord], tail: usize, head: usize) {
    let (from, to) = (records[tail], records[head]);
    let distance = (head - tail) as f64;
    for idx in tail + 1..head {
        let a = (idx - tail) as f64 / distance;
        let b = 1.0 - a;
        let hole = &mut records[idx];
        let direction = to.direction * a + from.direction * b;
        hole.direction = if direction == Vec2::zeros() {
            default_direction()
        } else {
            direction / direction.norm()
        };
        hole.major = to.major * a + from.major * b;
        hole.minor = to.minor * a + from.minor * b;
    }
}

// ── Reconstructor ────────────────────────────────────────────────────────────

/// Repaired trajectory, one record per frame in frame order.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub records: Vec<EllipseRecord>,
    /// Median body length measured in pass A.
    pub median_length: f64,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.records.iter().filter(|r| r.valid).count()
    }
}

pub struct Reconstructor {
    params: ReconstructionParams,
}

impl Reconstructor {
    pub fn new(params: ReconstructionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReconstructionParams {
        &self.params
    }

    pub fn run(&self, mut records: Vec<EllipseRecord>) -> Result<Trajectory> {
        let median =
            filter_elongation(&mut records, &self.params).ok_or(TrackError::NoDefinedRecord)?;
        info!(median, "median body length");

        fill_positions(&mut records, median)?;
        align_locally(&mut records);
        estimate_velocities(&mut records);
        let flipped = align_segments(&mut records);
        fill_orientations(&mut records)?;

        let trajectory = Trajectory {
            records,
            median_length: median,
        };
        info!(
            frames = trajectory.len(),
            valid = trajectory.valid_count(),
            flipped_segments = flipped,
            "trajectory reconstructed"
        );
        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(x: f64, y: f64, dx: f64, dy: f64, major: f64, minor: f64) -> EllipseRecord {
        EllipseRecord::new(Vec2::new(x, y), Vec2::new(dx, dy), major, minor)
    }

    #[test]
    fn median_picks_middle_or_upper_element() {
        assert_eq!(median_length(&[5.0, 1.0, 4.0, 2.0, 3.0]), Some(3.0));
        assert_eq!(median_length(&[4.0, 1.0, 3.0, 2.0]), Some(3.0));
        assert_eq!(median_length(&[2.0, 2.0, 7.0]), Some(2.0));
        assert_eq!(median_length(&[]), None);
    }

    #[test]
    fn round_and_undefined_records_are_invalidated() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            rec(1.0, 0.0, 1.0, 0.0, 1.3, 1.0),
            EllipseRecord::undefined(),
            rec(2.0, 0.0, 1.0, 0.0, 6.0, 2.0),
        ];
        let median = filter_elongation(&mut records, &ReconstructionParams::new(false));
        // surviving lengths 8 and 12; index 1 of the sorted pair
        assert_eq!(median, Some(12.0));
        assert!(records[0].valid);
        assert!(!records[1].valid && records[1].has_nan());
        assert!(!records[2].valid);
        assert!(records[3].valid);
    }

    #[test]
    fn size_outliers_are_dropped_only_when_enabled() {
        let build = || {
            vec![
                rec(0.0, 0.0, 1.0, 0.0, 5.0, 1.0),
                rec(0.0, 0.0, 1.0, 0.0, 5.0, 1.0),
                rec(0.0, 0.0, 1.0, 0.0, 10.0, 1.0),
                rec(0.0, 0.0, 1.0, 0.0, 2.5, 1.0),
                rec(0.0, 0.0, 1.0, 0.0, 6.0, 1.0),
            ]
        };

        let mut records = build();
        filter_elongation(&mut records, &ReconstructionParams::new(false));
        assert!(records.iter().all(|r| r.valid));

        let mut records = build();
        let median = filter_elongation(&mut records, &ReconstructionParams::new(true));
        assert_eq!(median, Some(10.0));
        let valid: Vec<bool> = records.iter().map(|r| r.valid).collect();
        assert_eq!(valid, vec![true, true, false, false, true]);
    }

    #[test]
    fn interior_gap_is_interpolated() {
        let mut records = vec![
            rec(0.0, 0.0, 0.0, 1.0, 4.0, 1.0),
            EllipseRecord::undefined(),
            EllipseRecord::undefined(),
            EllipseRecord::undefined(),
            rec(8.0, 4.0, 0.0, 1.0, 4.0, 1.0),
        ];
        fill_positions(&mut records, 6.0).unwrap();

        for (idx, hole) in records[1..4].iter().enumerate() {
            let a = (idx + 1) as f64 / 4.0;
            assert_relative_eq!(hole.position.x, 8.0 * a);
            assert_relative_eq!(hole.position.y, 4.0 * a);
            assert!(hole.position.x > 0.0 && hole.position.x < 8.0);
            assert_eq!(hole.direction, Vec2::new(1.0, 0.0));
            assert_eq!(hole.major, 3.0);
            assert_eq!(hole.minor, 3.0);
            assert!(!hole.valid);
        }
    }

    #[test]
    fn boundary_runs_copy_nearest_defined_record() {
        let mut records = vec![
            EllipseRecord::undefined(),
            EllipseRecord::undefined(),
            rec(3.0, 3.0, 0.0, 1.0, 4.0, 2.0),
            rec(5.0, 3.0, 0.0, 1.0, 4.0, 2.0),
            EllipseRecord::undefined(),
        ];
        fill_positions(&mut records, 8.0).unwrap();
        assert_eq!(records[0].position, Vec2::new(3.0, 3.0));
        assert_eq!(records[1].direction, Vec2::new(0.0, 1.0));
        assert_eq!(records[4].position, Vec2::new(5.0, 3.0));
        assert!(records.iter().all(EllipseRecord::is_defined));
        assert!(!records[0].valid && !records[4].valid);
    }

    #[test]
    fn position_fill_is_idempotent() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            EllipseRecord::undefined(),
            rec(2.0, 2.0, 1.0, 0.0, 4.0, 1.0),
            EllipseRecord::undefined(),
        ];
        fill_positions(&mut records, 8.0).unwrap();
        let once = records.clone();
        fill_positions(&mut records, 8.0).unwrap();
        assert_eq!(records, once);
    }

    #[test]
    fn all_undefined_cannot_be_reconstructed() {
        let mut records = vec![EllipseRecord::undefined(); 4];
        assert!(matches!(
            fill_positions(&mut records, 1.0),
            Err(TrackError::NoDefinedRecord)
        ));
        assert!(matches!(
            fill_positions(&mut [], 1.0),
            Err(TrackError::NoDefinedRecord)
        ));

        let err = Reconstructor::new(ReconstructionParams::new(true))
            .run(vec![EllipseRecord::undefined(); 3])
            .unwrap_err();
        assert!(err.is_reconstruction_error());
    }

    #[test]
    fn local_alignment_follows_predecessor() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            rec(1.0, 0.0, -1.0, 0.0, 4.0, 1.0),
            rec(2.0, 0.0, 0.9, 0.1, 4.0, 1.0),
        ];
        align_locally(&mut records);
        assert_eq!(records[1].direction, Vec2::new(1.0, 0.0));
        assert_eq!(records[2].direction, Vec2::new(0.9, 0.1));
    }

    #[test]
    fn local_alignment_after_gap_uses_displacement() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            EllipseRecord::undefined(),
            rec(0.0, 5.0, 0.0, -1.0, 4.0, 1.0),
        ];
        align_locally(&mut records);
        // moved +y since the last defined position, so -y is backward
        assert_eq!(records[2].direction, Vec2::new(0.0, 1.0));
        assert!(records[1].has_nan());
    }

    #[test]
    fn velocities_use_central_differences() {
        let mut records: Vec<EllipseRecord> = [0.0, 1.0, 4.0, 9.0]
            .iter()
            .map(|&x| rec(x, 0.0, 1.0, 0.0, 4.0, 1.0))
            .collect();
        estimate_velocities(&mut records);
        let vx: Vec<f64> = records.iter().map(|r| r.velocity.x).collect();
        assert_eq!(vx, vec![1.0, 2.0, 4.0, 5.0]);

        let mut single = vec![rec(3.0, 3.0, 1.0, 0.0, 4.0, 1.0)];
        estimate_velocities(&mut single);
        assert_eq!(single[0].velocity, Vec2::zeros());
    }

    #[test]
    fn backward_segment_is_flipped_as_a_unit() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            EllipseRecord::undefined(),
            rec(1.0, 0.0, -1.0, 0.0, 4.0, 1.0),
            rec(2.0, 0.0, 1.0, 0.0, 4.0, 1.0),
            rec(3.0, 0.0, -1.0, 0.0, 4.0, 1.0),
            EllipseRecord::undefined(),
            rec(4.0, 0.0, -1.0, 0.0, 4.0, 1.0),
        ];
        for r in records.iter_mut() {
            r.velocity = Vec2::new(1.0, 0.0);
        }
        // run 2..5 scores -1 + 1 - 1 = -1
        let before = records.clone();
        let flipped = align_segments(&mut records);

        assert_eq!(records[2].direction, Vec2::new(1.0, 0.0));
        assert_eq!(records[3].direction, Vec2::new(-1.0, 0.0));
        assert_eq!(records[4].direction, Vec2::new(1.0, 0.0));
        assert_eq!(records[0].direction, before[0].direction);
        assert!(records[1].has_nan() && records[5].has_nan());
        // the final run reaches the end of the sequence and is judged too
        assert_eq!(records[6].direction, Vec2::new(1.0, 0.0));
        assert_eq!(flipped, 2);
    }

    #[test]
    fn orientation_gap_is_interpolated_and_normalised() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 2.0),
            rec(1.0, 0.0, 1.0, 0.0, 3.0, 3.0),
            rec(2.0, 0.0, 0.0, 1.0, 8.0, 4.0),
        ];
        records[1].valid = false;
        fill_orientations(&mut records).unwrap();

        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(records[1].direction.x, s, epsilon = 1e-12);
        assert_relative_eq!(records[1].direction.y, s, epsilon = 1e-12);
        assert_relative_eq!(records[1].major, 6.0);
        assert_relative_eq!(records[1].minor, 3.0);
        assert!(!records[1].valid);
    }

    #[test]
    fn opposite_neighbours_fall_back_to_default_direction() {
        let mut records = vec![
            rec(0.0, 0.0, 1.0, 0.0, 4.0, 2.0),
            rec(1.0, 0.0, 0.0, 1.0, 4.0, 2.0),
            rec(2.0, 0.0, -1.0, 0.0, 4.0, 2.0),
        ];
        records[1].valid = false;
        fill_orientations(&mut records).unwrap();
        assert_eq!(records[1].direction, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn orientation_fill_needs_a_valid_record() {
        let mut records = vec![rec(0.0, 0.0, 1.0, 0.0, 4.0, 2.0); 2];
        records.iter_mut().for_each(|r| r.valid = false);
        assert!(matches!(
            fill_orientations(&mut records),
            Err(TrackError::NoValidRecord)
        ));
    }

    #[test]
    fn full_reconstruction_leaves_no_nan() {
        let mut records = Vec::new();
        for i in 0..10 {
            let x = i as f64 * 2.0;
            // orientation sign flickers; the body always moves toward +x
            let dx = if i % 3 == 0 { -1.0 } else { 1.0 };
            records.push(rec(x, 5.0, dx, 0.0, 6.0, 2.0));
        }
        records[4] = EllipseRecord::undefined();
        records[5] = rec(10.0, 5.0, 1.0, 0.0, 2.0, 2.0); // round blob

        let trajectory = Reconstructor::new(ReconstructionParams::new(true))
            .run(records)
            .unwrap();

        assert_eq!(trajectory.len(), 10);
        assert_eq!(trajectory.median_length, 12.0);
        assert!(trajectory.records.iter().all(EllipseRecord::is_defined));
        assert!(!trajectory.records[4].valid && !trajectory.records[5].valid);
        for r in trajectory.records.iter().filter(|r| r.valid) {
            assert!(r.direction.x > 0.0, "{r:?}");
        }
        assert_relative_eq!(trajectory.records[4].position.x, 8.0, epsilon = 1e-9);
        assert_relative_eq!(trajectory.records[5].position.x, 10.0, epsilon = 1e-9);
    }
}
