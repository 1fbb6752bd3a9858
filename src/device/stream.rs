//! Preview stream negotiation.
//!
//! The hardware advertises a fixed set of output resolutions. The preview
//! stream uses the smallest one that keeps the target aspect ratio and still
//! covers the display surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Creates a new resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count.
    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns true if this resolution has exactly the given aspect ratio.
    ///
    /// Uses the integer comparison `height == width * ah / aw`, so ratios are
    /// matched the way the sensor reports them, not after float rounding.
    pub fn matches_aspect(&self, aspect: AspectRatio) -> bool {
        if aspect.width == 0 {
            return false;
        }
        u64::from(self.height)
            == u64::from(self.width) * u64::from(aspect.height) / u64::from(aspect.width)
    }

    /// Returns true if both dimensions are at least those of `min`.
    pub fn covers(&self, min: Resolution) -> bool {
        self.width >= min.width && self.height >= min.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Target aspect ratio for the preview stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    /// Horizontal component.
    pub width: u32,
    /// Vertical component.
    pub height: u32,
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self {
            width: 4,
            height: 3,
        }
    }
}

/// The negotiated preview configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Resolution delivered to the preview surface and the buffer reader.
    pub resolution: Resolution,
    /// True when no advertised size satisfied the constraints.
    pub fallback: bool,
}

impl StreamConfig {
    /// Picks the preview resolution from the advertised set.
    ///
    /// Returns `None` only when nothing is advertised.
    pub fn negotiate(
        advertised: &[Resolution],
        min: Resolution,
        aspect: AspectRatio,
    ) -> Option<StreamConfig> {
        let first = *advertised.first()?;

        let best = advertised
            .iter()
            .filter(|r| r.matches_aspect(aspect) && r.covers(min))
            .min_by_key(|r| r.area());

        match best {
            Some(resolution) => Some(StreamConfig {
                resolution: *resolution,
                fallback: false,
            }),
            None => {
                tracing::warn!(
                    min = %min,
                    aspect_w = aspect.width,
                    aspect_h = aspect.height,
                    fallback = %first,
                    "No suitable preview size, using first advertised"
                );
                Some(StreamConfig {
                    resolution: first,
                    fallback: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sizes() -> Vec<Resolution> {
        vec![
            Resolution::new(4032, 3024),
            Resolution::new(1920, 1080),
            Resolution::new(1280, 960),
            Resolution::new(640, 480),
            Resolution::new(320, 240),
        ]
    }

    #[test]
    fn test_picks_smallest_covering_size() {
        let config = StreamConfig::negotiate(
            &sizes(),
            Resolution::new(600, 400),
            AspectRatio::default(),
        )
        .unwrap();
        assert_eq!(config.resolution, Resolution::new(640, 480));
        assert!(!config.fallback);
    }

    #[test]
    fn test_skips_wrong_aspect() {
        let config = StreamConfig::negotiate(
            &sizes(),
            Resolution::new(1300, 700),
            AspectRatio::default(),
        )
        .unwrap();
        // 1920x1080 covers the bound but is 16:9
        assert_eq!(config.resolution, Resolution::new(4032, 3024));
    }

    #[test]
    fn test_falls_back_to_first() {
        let config = StreamConfig::negotiate(
            &sizes(),
            Resolution::new(8000, 6000),
            AspectRatio::default(),
        )
        .unwrap();
        assert_eq!(config.resolution, Resolution::new(4032, 3024));
        assert!(config.fallback);
    }

    #[test]
    fn test_empty_advertised() {
        assert!(StreamConfig::negotiate(&[], Resolution::new(1, 1), AspectRatio::default())
            .is_none());
    }

    proptest! {
        #[test]
        fn negotiated_size_is_advertised(
            dims in prop::collection::vec((1u32..5000, 1u32..5000), 1..12),
            min_w in 0u32..5000,
            min_h in 0u32..5000,
        ) {
            let advertised: Vec<Resolution> =
                dims.iter().map(|&(w, h)| Resolution::new(w, h)).collect();
            let min = Resolution::new(min_w, min_h);
            let aspect = AspectRatio::default();
            let config = StreamConfig::negotiate(&advertised, min, aspect).unwrap();

            prop_assert!(advertised.contains(&config.resolution));
            if config.fallback {
                prop_assert_eq!(config.resolution, advertised[0]);
                prop_assert!(!advertised.iter().any(|r| r.matches_aspect(aspect) && r.covers(min)));
            } else {
                prop_assert!(config.resolution.covers(min));
                for r in advertised.iter().filter(|r| r.matches_aspect(aspect) && r.covers(min)) {
                    prop_assert!(config.resolution.area() <= r.area());
                }
            }
        }
    }
}
