//! Mask specifications
//!
//! A `MaskSpec` is an immutable policy describing how one matched byte
//! region is transformed. No variant ever changes the region's length.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MaskError, Result};

/// Half-open byte interval `[start, end)` within a matched region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(MaskError::validation(format!(
                "byte range start must be below end, got [{}, {})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Portion of this range that fits in a slice of `len` bytes
    pub fn clamp_to(&self, len: usize) -> Option<(usize, usize)> {
        let start = self.start.min(len);
        let end = self.end.min(len);
        (start < end).then_some((start, end))
    }
}

impl From<ByteRange> for (usize, usize) {
    fn from(r: ByteRange) -> Self {
        (r.start, r.end)
    }
}

/// Redaction policy for a matched region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaskSpec {
    /// Region stays byte-identical
    KeepAll,
    /// First `keep_bytes` bytes survive, the remainder is zeroed
    MaskAfter { keep_bytes: usize },
    /// Only the listed sub-ranges are zeroed
    MaskRange {
        #[serde(deserialize_with = "deserialize_ranges")]
        ranges: Vec<ByteRange>,
    },
}

fn deserialize_ranges<'de, D>(deserializer: D) -> std::result::Result<Vec<ByteRange>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ranges = Vec::<ByteRange>::deserialize(deserializer)?;
    validate_ranges(&ranges).map_err(serde::de::Error::custom)?;
    Ok(ranges)
}

fn validate_ranges(ranges: &[ByteRange]) -> Result<()> {
    if ranges.is_empty() {
        return Err(MaskError::validation("mask_range requires at least one range"));
    }
    for r in ranges {
        if r.is_empty() {
            return Err(MaskError::validation(format!(
                "mask_range entry [{}, {}) is empty or inverted",
                r.start, r.end
            )));
        }
    }
    for pair in ranges.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(MaskError::validation(format!(
                "mask_range entries must be increasing and disjoint: [{}, {}) then [{}, {})",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }
    Ok(())
}

impl MaskSpec {
    pub fn keep_all() -> Self {
        MaskSpec::KeepAll
    }

    pub fn mask_after(keep_bytes: usize) -> Self {
        MaskSpec::MaskAfter { keep_bytes }
    }

    /// Zero the given `(start, end)` sub-ranges of the region
    pub fn mask_range(ranges: &[(usize, usize)]) -> Result<Self> {
        let ranges = ranges
            .iter()
            .map(|&(start, end)| ByteRange::new(start, end))
            .collect::<Result<Vec<_>>>()?;
        validate_ranges(&ranges)?;
        Ok(MaskSpec::MaskRange { ranges })
    }

    /// Short variant name used in exports
    pub fn kind(&self) -> &'static str {
        match self {
            MaskSpec::KeepAll => "keep_all",
            MaskSpec::MaskAfter { .. } => "mask_after",
            MaskSpec::MaskRange { .. } => "mask_range",
        }
    }

    /// Variant parameters as a JSON object
    pub fn params(&self) -> serde_json::Value {
        match self {
            MaskSpec::KeepAll => serde_json::json!({}),
            MaskSpec::MaskAfter { keep_bytes } => serde_json::json!({ "keep_bytes": keep_bytes }),
            MaskSpec::MaskRange { ranges } => {
                let pairs: Vec<(usize, usize)> = ranges.iter().map(|&r| r.into()).collect();
                serde_json::json!({ "ranges": pairs })
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            MaskSpec::KeepAll => "keep all bytes".to_string(),
            MaskSpec::MaskAfter { keep_bytes: 0 } => "mask all bytes".to_string(),
            MaskSpec::MaskAfter { keep_bytes } => {
                format!("keep first {} bytes, mask the rest", keep_bytes)
            }
            MaskSpec::MaskRange { ranges } => {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|r| format!("[{}, {})", r.start, r.end))
                    .collect();
                format!("mask ranges {}", parts.join(", "))
            }
        }
    }

    /// Re-check parameters of a spec that may have been built literally
    pub fn validate(&self) -> Result<()> {
        match self {
            MaskSpec::KeepAll | MaskSpec::MaskAfter { .. } => Ok(()),
            MaskSpec::MaskRange { ranges } => validate_ranges(ranges),
        }
    }

    /// True when applying this spec can never change a byte
    pub fn is_identity(&self) -> bool {
        matches!(self, MaskSpec::KeepAll)
    }

    /// Whether two adjacent entries carrying these specs may be merged
    ///
    /// Only equal variants with equal parameters merge; `MaskRange`
    /// offsets are region-relative and never survive concatenation.
    pub fn can_merge_with(&self, other: &MaskSpec) -> bool {
        match (self, other) {
            (MaskSpec::KeepAll, MaskSpec::KeepAll) => true,
            (MaskSpec::MaskAfter { keep_bytes: a }, MaskSpec::MaskAfter { keep_bytes: b }) => {
                a == b
            }
            (MaskSpec::MaskRange { .. }, MaskSpec::MaskRange { .. }) => false,
            (MaskSpec::KeepAll, _) | (MaskSpec::MaskAfter { .. }, _) | (MaskSpec::MaskRange { .. }, _) => {
                false
            }
        }
    }

    /// Transformed copy of `data`
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_in_place(&mut out);
        out
    }

    /// Transform `data` in place
    pub fn apply_in_place(&self, data: &mut [u8]) {
        match self {
            MaskSpec::KeepAll => {}
            MaskSpec::MaskAfter { keep_bytes } => {
                if *keep_bytes < data.len() {
                    data[*keep_bytes..].fill(0);
                }
            }
            MaskSpec::MaskRange { ranges } => {
                for r in ranges {
                    if let Some((start, end)) = r.clamp_to(data.len()) {
                        data[start..end].fill(0);
                    }
                }
            }
        }
    }
}

impl fmt::Display for MaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &[u8] = b"0123456789abcdef";

    #[test]
    fn test_keep_all_is_identity() {
        assert_eq!(MaskSpec::keep_all().apply(DATA), DATA);
        assert_eq!(MaskSpec::keep_all().apply(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_mask_after() {
        assert_eq!(MaskSpec::mask_after(0).apply(DATA), vec![0u8; DATA.len()]);
        assert_eq!(MaskSpec::mask_after(DATA.len()).apply(DATA), DATA);
        assert_eq!(MaskSpec::mask_after(100).apply(DATA), DATA);

        let out = MaskSpec::mask_after(5).apply(DATA);
        assert_eq!(out.len(), DATA.len());
        assert_eq!(&out[..5], b"01234");
        assert!(out[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mask_range_touches_only_listed_bytes() {
        let spec = MaskSpec::mask_range(&[(2, 4), (10, 12)]).unwrap();
        let out = spec.apply(DATA);

        assert_eq!(out.len(), DATA.len());
        for (i, (&got, &orig)) in out.iter().zip(DATA).enumerate() {
            if (2..4).contains(&i) || (10..12).contains(&i) {
                assert_eq!(got, 0, "byte {} should be masked", i);
            } else {
                assert_eq!(got, orig, "byte {} should be preserved", i);
            }
        }
    }

    #[test]
    fn test_mask_range_clamped_to_slice() {
        let spec = MaskSpec::mask_range(&[(3, 50)]).unwrap();
        let out = spec.apply(b"abcdef");
        assert_eq!(out, b"abc\0\0\0");

        let spec = MaskSpec::mask_range(&[(10, 20)]).unwrap();
        assert_eq!(spec.apply(b"abcdef"), b"abcdef");
    }

    #[test]
    fn test_mask_range_validation() {
        assert!(MaskSpec::mask_range(&[]).is_err());
        assert!(MaskSpec::mask_range(&[(5, 5)]).is_err());
        assert!(MaskSpec::mask_range(&[(6, 2)]).is_err());
        assert!(MaskSpec::mask_range(&[(0, 5), (4, 8)]).is_err());
        assert!(MaskSpec::mask_range(&[(4, 8), (0, 2)]).is_err());
        assert!(MaskSpec::mask_range(&[(0, 4), (4, 8)]).is_ok());
    }

    #[test]
    fn test_merge_predicate() {
        let k = MaskSpec::keep_all();
        let a5 = MaskSpec::mask_after(5);
        let a10 = MaskSpec::mask_after(10);
        let r = MaskSpec::mask_range(&[(0, 1)]).unwrap();

        assert!(k.can_merge_with(&k));
        assert!(a5.can_merge_with(&MaskSpec::mask_after(5)));
        assert!(!a5.can_merge_with(&a10));
        assert!(!k.can_merge_with(&a5));
        assert!(!a5.can_merge_with(&k));
        assert!(!r.can_merge_with(&r.clone()));
    }

    #[test]
    fn test_serde_shape() {
        let spec: MaskSpec =
            serde_json::from_str(r#"{"type":"mask_after","keep_bytes":5}"#).unwrap();
        assert_eq!(spec, MaskSpec::mask_after(5));

        let spec: MaskSpec =
            serde_json::from_str(r#"{"type":"mask_range","ranges":[{"start":1,"end":3}]}"#)
                .unwrap();
        assert_eq!(spec, MaskSpec::mask_range(&[(1, 3)]).unwrap());

        assert!(serde_json::from_str::<MaskSpec>(r#"{"type":"mask_range","ranges":[]}"#).is_err());
        assert!(serde_json::from_str::<MaskSpec>(r#"{"type":"mask_after","keep_bytes":-1}"#).is_err());
    }

    #[test]
    fn test_description_and_params() {
        assert_eq!(MaskSpec::mask_after(5).kind(), "mask_after");
        assert_eq!(MaskSpec::mask_after(5).params()["keep_bytes"], 5);
        assert!(MaskSpec::keep_all().description().contains("keep"));
        assert!(MaskSpec::mask_range(&[(1, 2)]).unwrap().to_string().contains("[1, 2)"));
    }
}
