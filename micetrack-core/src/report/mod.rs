//! report — CSV export of the reconstructed trajectory
//!
//! Layout: an optional echo of the invocation, one `bounds_lrtb` line carrying
//! the run parameters, the column header, then one row per frame.  Y values
//! are negated so the exported axis points up.

use std::io::Write;

use crate::detection::CropMargins;
use crate::error::Result;
use crate::record::EllipseRecord;

pub const COLUMNS: &str =
    "elongation,centerX,centerY,headX,headY,tailX,tailY,valid,majorRadius,minorRadius";

/// Parameters echoed ahead of the per-frame rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportHeader {
    /// Arguments of the invocation, written as `micetrack <command>`.
    pub command: Option<String>,
    pub crop: CropMargins,
    pub width: u32,
    pub height: u32,
    pub min_elongation: f64,
    pub threshold: u8,
}

impl ReportHeader {
    fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        if let Some(command) = &self.command {
            writeln!(sink, "micetrack {command}")?;
        }
        let (left, right, top, bottom) = self.crop.bounds(self.width, self.height);
        writeln!(
            sink,
            "bounds_lrtb,{left},{right},-{top},-{bottom},elongation,{},threshold,{}",
            self.min_elongation, self.threshold
        )?;
        writeln!(sink, "{COLUMNS}")?;
        Ok(())
    }
}

fn write_row<W: Write>(sink: &mut W, record: &EllipseRecord) -> Result<()> {
    let (p, head, tail) = (record.position, record.head(), record.tail());
    writeln!(
        sink,
        "{},{},{},{},{},{},{},{},{},{}",
        record.elongation(),
        p.x,
        -p.y,
        head.x,
        -head.y,
        tail.x,
        -tail.y,
        u8::from(record.valid),
        record.major,
        record.minor
    )?;
    Ok(())
}

/// Write the whole report; rows keep the order of `records`.
pub fn write_report<W: Write>(
    sink: &mut W,
    header: &ReportHeader,
    records: &[EllipseRecord],
) -> Result<()> {
    header.write_to(sink)?;
    for record in records {
        write_row(sink, record)?;
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Vec2;

    fn header(command: Option<&str>) -> ReportHeader {
        ReportHeader {
            command: command.map(str::to_owned),
            crop: CropMargins::new(10, 20, 5, 15),
            width: 320,
            height: 240,
            min_elongation: 1.3,
            threshold: 64,
        }
    }

    #[test]
    fn header_lines() {
        let mut out = Vec::new();
        write_report(&mut out, &header(Some("analyze mouse.avi")), &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "micetrack analyze mouse.avi",
                "bounds_lrtb,10,300,-5,-225,elongation,1.3,threshold,64",
                COLUMNS,
            ]
        );
    }

    #[test]
    fn rows_negate_y_and_flag_validity() {
        let valid = EllipseRecord::new(Vec2::new(10.0, 20.0), Vec2::new(0.0, 1.0), 4.0, 2.0);
        let mut invalid = valid;
        invalid.valid = false;

        let mut out = Vec::new();
        write_report(&mut out, &header(None), &[valid, invalid]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().skip(2).collect();
        assert_eq!(
            rows,
            vec!["2,10,-20,10,-24,10,-16,1,4,2", "2,10,-20,10,-24,10,-16,0,4,2"]
        );
    }
}
