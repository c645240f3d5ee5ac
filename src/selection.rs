//! Frame selection.
//!
//! A [`SamplingPolicy`] describes which frames of a stream to keep;
//! [`compute_indices`] turns it into a [`FrameIndices`] set for a concrete
//! frame count and frame rate.

use std::slice::Iter;

use crate::error::FramecutError;

/// Specifies which frames to extract from a video.
///
/// # Example
///
/// ```
/// use framecut::{SamplingPolicy, compute_indices};
///
/// // One frame every two seconds of 30 fps video.
/// let indices = compute_indices(&SamplingPolicy::Interval(2.0), 301, 30.0).unwrap();
/// assert_eq!(indices.as_slice(), &[0, 60, 120, 180, 240, 300]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub enum SamplingPolicy {
    /// Keep one frame every `seconds` of video time.
    Interval(f64),
    /// Keep every frame.
    All,
}

/// Strictly increasing frame indices in `[0, frame_count)`.
///
/// Built by [`compute_indices`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameIndices {
    indices: Vec<u64>,
}

impl FrameIndices {
    /// Number of selected frames.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` if no frame is selected.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns `true` if `index` is selected.
    pub fn contains(&self, index: u64) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    /// The selected indices, in increasing order.
    pub fn as_slice(&self) -> &[u64] {
        &self.indices
    }

    /// Iterate over the selected indices in increasing order.
    pub fn iter(&self) -> Iter<'_, u64> {
        self.indices.iter()
    }

    /// The last selected index, if any.
    pub fn last(&self) -> Option<u64> {
        self.indices.last().copied()
    }
}

impl<'a> IntoIterator for &'a FrameIndices {
    type Item = &'a u64;
    type IntoIter = Iter<'a, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.indices.iter()
    }
}

/// Number of frames between two interval samples: `floor(fps * seconds)`,
/// never less than one.
pub fn interval_step(frames_per_second: f64, seconds: f64) -> u64 {
    ((frames_per_second * seconds).floor() as u64).max(1)
}

/// Turn a sampling policy into the set of frame indices to keep.
///
/// # Errors
///
/// - [`FramecutError::InvalidInterval`] if an interval is not a positive,
///   finite number of seconds.
/// - [`FramecutError::InvalidStreamParameters`] if an interval is requested
///   on a stream with no frames or a non-positive frame rate.
pub fn compute_indices(
    policy: &SamplingPolicy,
    frame_count: u64,
    frames_per_second: f64,
) -> Result<FrameIndices, FramecutError> {
    let indices = match *policy {
        SamplingPolicy::All => (0..frame_count).collect(),
        SamplingPolicy::Interval(seconds) => {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(FramecutError::InvalidInterval { seconds });
            }
            if frame_count == 0 || !frames_per_second.is_finite() || frames_per_second <= 0.0 {
                return Err(FramecutError::InvalidStreamParameters {
                    frame_count,
                    frames_per_second,
                });
            }
            let step = interval_step(frames_per_second, seconds);
            (0..frame_count).step_by(step as usize).collect()
        }
    };

    Ok(FrameIndices { indices })
}
