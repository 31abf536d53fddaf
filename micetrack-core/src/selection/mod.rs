//! selection — which frames feed the background model
//!
//! Two policies: a contiguous index range, or a periodic duty cycle that keeps
//! `kept` frames out of every `kept + skipped`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FrameSelector {
    /// Accepts indices in `[lower, upper)`.
    Range { lower: u64, upper: u64 },
    /// Accepts indices where `index % (kept + skipped) < kept`.
    Ratio { kept: u64, skipped: u64 },
}

impl FrameSelector {
    pub fn range(lower: u64, upper: u64) -> Self {
        FrameSelector::Range { lower, upper }
    }

    pub fn ratio(kept: u64, skipped: u64) -> Self {
        FrameSelector::Ratio { kept, skipped }
    }

    /// Every frame of the video.
    pub fn all() -> Self {
        FrameSelector::Range {
            lower: 0,
            upper: u64::MAX,
        }
    }

    pub fn accept(&self, index: u64) -> bool {
        match *self {
            FrameSelector::Range { lower, upper } => index >= lower && index < upper,
            FrameSelector::Ratio { kept, skipped } => {
                let period = kept.saturating_add(skipped);
                period != 0 && index % period < kept
            }
        }
    }
}

impl Default for FrameSelector {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for FrameSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSelector::Range { lower, upper } => write!(f, "Range( {lower}, {upper} )"),
            FrameSelector::Ratio { kept, skipped } => write!(f, "Ratio( {kept}, {skipped} )"),
        }
    }
}

/// `N` is the first N frames, `A-B` a range, `A/B` (or `A:B`) keeps A frames
/// then skips B.
impl FromStr for FrameSelector {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |part: &str| {
            part.trim().parse::<u64>().map_err(|e| {
                TrackError::Config(format!("bad background frame count {part:?} in {s:?}: {e}"))
            })
        };

        if let Some((lower, upper)) = s.split_once('-') {
            return Ok(FrameSelector::range(parse(lower)?, parse(upper)?));
        }
        if let Some((kept, skipped)) = s.split_once(['/', ':']) {
            return Ok(FrameSelector::ratio(parse(kept)?, parse(skipped)?));
        }
        Ok(FrameSelector::range(0, parse(s)?))
    }
}
