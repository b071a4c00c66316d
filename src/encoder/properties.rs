//! Typed encoder property tables
//!
//! Enumerated settings map to device values through [`PropertyTable`], an
//! enum-keyed map that is checked for completeness when a session is built.
//! A missing entry is a [`PropertyError::Unsupported`] at construction time
//! rather than a bad index later.

use std::collections::BTreeMap;
use std::fmt;

use super::error::PropertyError;
use crate::config::SessionConfig;

/// Enum-keyed lookup table
#[derive(Debug, Clone)]
pub struct PropertyTable<K: Ord, V> {
    property: &'static str,
    entries: BTreeMap<K, V>,
}

impl<K, V> PropertyTable<K, V>
where
    K: Ord + Copy + fmt::Debug,
    V: Clone,
{
    /// Build a table from `(key, value)` pairs; later pairs win
    pub fn from_entries(property: &'static str, entries: &[(K, V)]) -> Self {
        Self {
            property,
            entries: entries.iter().cloned().collect(),
        }
    }

    /// Check that every key in `required` has an entry
    pub fn validate(&self, required: &[K]) -> Result<(), PropertyError> {
        match required.iter().find(|k| !self.entries.contains_key(k)) {
            Some(missing) => Err(PropertyError::Unsupported {
                property: self.property,
                value: format!("{:?}", missing),
            }),
            None => Ok(()),
        }
    }

    /// Look up a value
    pub fn lookup(&self, key: K) -> Result<V, PropertyError> {
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| PropertyError::Unsupported {
                property: self.property,
                value: format!("{:?}", key),
            })
    }

    /// Property name used in errors
    pub fn property(&self) -> &'static str {
        self.property
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Number of consecutive B-frames between anchor frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BFramePattern {
    None,
    One,
    Two,
    Three,
}

impl BFramePattern {
    /// Every pattern, in order
    pub const ALL: [Self; 4] = [Self::None, Self::One, Self::Two, Self::Three];

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Some(Self::None),
            "one" | "1" => Some(Self::One),
            "two" | "2" => Some(Self::Two),
            "three" | "3" => Some(Self::Three),
            _ => None,
        }
    }

    /// B-frames per anchor
    pub fn b_frames(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

/// Quality preset for encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QualityPreset {
    /// Fastest encoding, lowest quality
    Speed,
    /// Balanced quality and performance (default)
    #[default]
    Balanced,
    /// Highest quality, slower encoding
    Quality,
}

impl QualityPreset {
    /// Every preset, in order
    pub const ALL: [Self; 3] = [Self::Speed, Self::Balanced, Self::Quality];

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "speed" | "fast" => Some(Self::Speed),
            "balanced" | "default" | "medium" => Some(Self::Balanced),
            "quality" | "slow" | "high" => Some(Self::Quality),
            _ => None,
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speed => write!(f, "speed"),
            Self::Balanced => write!(f, "balanced"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

/// Rate control values a preset maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateControlProfile {
    /// Target bitrate (kbps)
    pub bitrate_kbps: u32,
    /// Frames between intra frames
    pub gop_length: u32,
}

/// Decode delay, in frames, introduced by each B-frame pattern
///
/// One frame of look-ahead per consecutive B-frame: an anchor is emitted
/// only after the B-frames that precede it in presentation order have been
/// received.
pub fn lookahead_table() -> PropertyTable<BFramePattern, u32> {
    PropertyTable::from_entries(
        "b_frame_pattern",
        &[
            (BFramePattern::None, 0),
            (BFramePattern::One, 1),
            (BFramePattern::Two, 2),
            (BFramePattern::Three, 3),
        ],
    )
}

/// Rate control profile for each quality preset
pub fn rate_control_table() -> PropertyTable<QualityPreset, RateControlProfile> {
    PropertyTable::from_entries(
        "quality_preset",
        &[
            (
                QualityPreset::Speed,
                RateControlProfile {
                    bitrate_kbps: 3000,
                    gop_length: 60,
                },
            ),
            (
                QualityPreset::Balanced,
                RateControlProfile {
                    bitrate_kbps: 5000,
                    gop_length: 30,
                },
            ),
            (
                QualityPreset::Quality,
                RateControlProfile {
                    bitrate_kbps: 10000,
                    gop_length: 15,
                },
            ),
        ],
    )
}

/// Session properties after parsing and table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProperties {
    /// Parsed B-frame pattern
    pub b_frame_pattern: BFramePattern,
    /// Decode delay in frames
    pub lookahead: u32,
    /// Parsed quality preset
    pub quality_preset: QualityPreset,
    /// Rate control values for the preset
    pub rate_control: RateControlProfile,
}

impl ResolvedProperties {
    /// Parse and resolve the enumerated session settings
    ///
    /// Both tables are validated against every key before lookup.
    /// `decode_delay_frames` overrides the table's look-ahead when set.
    pub fn resolve(config: &SessionConfig) -> Result<Self, PropertyError> {
        let b_frame_pattern = BFramePattern::from_str(&config.b_frame_pattern).ok_or_else(|| {
            PropertyError::UnknownValue {
                property: "b_frame_pattern",
                value: config.b_frame_pattern.clone(),
                valid: "none, one, two, three".to_string(),
            }
        })?;
        let quality_preset = QualityPreset::from_str(&config.quality_preset).ok_or_else(|| {
            PropertyError::UnknownValue {
                property: "quality_preset",
                value: config.quality_preset.clone(),
                valid: "speed, balanced, quality".to_string(),
            }
        })?;

        let lookahead_table = lookahead_table();
        lookahead_table.validate(&BFramePattern::ALL)?;
        let rate_table = rate_control_table();
        rate_table.validate(&QualityPreset::ALL)?;

        let lookahead = match config.decode_delay_frames {
            Some(frames) => frames,
            None => lookahead_table.lookup(b_frame_pattern)?,
        };

        Ok(Self {
            b_frame_pattern,
            lookahead,
            quality_preset,
            rate_control: rate_table.lookup(quality_preset)?,
        })
    }
}
