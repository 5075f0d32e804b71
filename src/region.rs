use std::{fmt, str::FromStr};

/// Identity of a waveform region. The string form (`segment-region-3`,
/// `word-region-3-1`, `custom-region-17`) is only used at the overlay boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionId {
    Segment(usize),
    Word { segment: usize, word: usize },
    Custom(u64),
}

impl RegionId {
    pub fn is_segment(&self) -> bool {
        matches!(self, RegionId::Segment(_))
    }

    pub fn is_word(&self) -> bool {
        matches!(self, RegionId::Word { .. })
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, RegionId::Custom(_))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionId::Segment(index) => write!(f, "segment-region-{index}"),
            RegionId::Word { segment, word } => write!(f, "word-region-{segment}-{word}"),
            RegionId::Custom(serial) => write!(f, "custom-region-{serial}"),
        }
    }
}

impl FromStr for RegionId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = raw.strip_prefix("segment-region-") {
            return Ok(RegionId::Segment(rest.parse()?));
        }
        if let Some(rest) = raw.strip_prefix("word-region-") {
            let Some((segment, word)) = rest.split_once('-') else {
                anyhow::bail!("word region id missing word index: {raw}")
            };
            return Ok(RegionId::Word {
                segment: segment.parse()?,
                word: word.parse()?,
            });
        }
        if let Some(rest) = raw.strip_prefix("custom-region-") {
            return Ok(RegionId::Custom(rest.parse()?));
        }
        anyhow::bail!("unrecognized region id: {raw}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub start: f64,
    pub end: f64,
}

impl Region {
    pub fn new(id: RegionId, start: f64, end: f64) -> Self {
        Self { id, start, end }
    }

    pub fn is_within(&self, outer: &Region) -> bool {
        self.start >= outer.start && self.end <= outer.end
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    /// Clamps both edges into `outer`.
    pub fn clamped_to(&self, outer: &Region) -> Region {
        let start = self.start.clamp(outer.start, outer.end);
        let end = self.end.clamp(start, outer.end);
        Region { id: self.id, start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionOptions {
    pub color: String,
    pub drag: bool,
    pub resize: bool,
    pub label: Option<String>,
}

impl RegionOptions {
    /// Segment regions are never movable wholesale, only resizable while editing.
    pub fn segment(index: usize, duration: f64, color: &str, editing: bool) -> Self {
        Self {
            color: color.to_string(),
            drag: false,
            resize: editing,
            label: Some(format!("#{} ({:.2}s)", index + 1, duration)),
        }
    }

    pub fn custom(color: &str) -> Self {
        Self {
            color: color.to_string(),
            drag: false,
            resize: true,
            label: None,
        }
    }
}
