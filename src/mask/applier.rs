//! Mask applier
//!
//! Applies matched policies to one packet's TCP payload in place. Buffer
//! length never changes; checksums are the caller's concern.

use tracing::trace;

use super::entry::MaskMatch;

/// Outcome of masking one payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Matches whose spec was applied
    pub applied: usize,
    /// Bytes whose value changed
    pub bytes_changed: usize,
    /// Bytes restored by the preserve-headers pass
    pub bytes_restored: usize,
}

impl ApplyOutcome {
    pub fn modified(&self) -> bool {
        self.bytes_changed > 0
    }
}

/// Apply each match's spec to its sub-slice of `payload`
///
/// Preserved header ranges are copied from the original payload first and
/// written back after every spec has run, so protected bytes survive even
/// an aggressive policy.
pub fn apply_masks(payload: &mut [u8], matches: &[MaskMatch<'_>]) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    if matches.is_empty() || payload.is_empty() {
        return outcome;
    }

    let original = payload.to_vec();
    let len = payload.len();

    for m in matches {
        let start = m.start.min(len);
        let end = m.end.min(len);
        if start >= end {
            continue;
        }
        m.spec().apply_in_place(&mut payload[start..end]);
        outcome.applied += 1;
        trace!(
            "Applied {} to payload[{}..{}] ({})",
            m.spec().kind(),
            start,
            end,
            m.mask_type()
        );
    }

    // Write-protect pass
    for m in matches {
        for (start, end) in m.preserved_in_packet() {
            let start = start.min(len);
            let end = end.min(len);
            for i in start..end {
                if payload[i] != original[i] {
                    payload[i] = original[i];
                    outcome.bytes_restored += 1;
                }
            }
        }
    }

    outcome.bytes_changed = payload
        .iter()
        .zip(original.iter())
        .filter(|(a, b)| a != b)
        .count();
    outcome
}
