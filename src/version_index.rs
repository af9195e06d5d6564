//! Effective-dated version windows
//!
//! Replaces any notion of a mutable "current active version" pointer: which
//! version is active at an instant is a pure function of this index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Version;

/// Errors raised when manipulating the effective version index
#[derive(Debug, Error)]
pub enum VersionIndexError {
    #[error("Window for {version} would overlap the window starting {existing_from}")]
    Overlap {
        version: Version,
        existing_from: DateTime<Utc>,
    },

    #[error("No open window for version {version}")]
    WindowNotFound { version: Version },

    #[error("Sunset {sunset_at} does not fall after window start {effective_from}")]
    InvalidSunset {
        sunset_at: DateTime<Utc>,
        effective_from: DateTime<Utc>,
    },
}

/// One effectiveness window; `effective_until` of `None` means still open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveWindow {
    pub version: Version,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
}

/// Ordered, non-overlapping effectiveness windows for one function
///
/// Invariant: at most one version is effective at any instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveVersionIndex {
    windows: Vec<EffectiveWindow>,
}

impl EffectiveVersionIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// All windows in effective-from order
    pub fn windows(&self) -> &[EffectiveWindow] {
        &self.windows
    }

    /// Open a window for `version` at `effective_from`
    ///
    /// Closes the currently open window (if any) at the same instant and
    /// returns the superseded version. Rejects windows that would overlap.
    pub fn activate(
        &mut self,
        version: Version,
        effective_from: DateTime<Utc>,
    ) -> Result<Option<Version>, VersionIndexError> {
        let mut superseded = None;

        if let Some(last) = self.windows.last_mut() {
            match last.effective_until {
                None => {
                    if effective_from <= last.effective_from {
                        return Err(VersionIndexError::Overlap {
                            version,
                            existing_from: last.effective_from,
                        });
                    }
                    last.effective_until = Some(effective_from);
                    superseded = Some(last.version.clone());
                }
                Some(until) => {
                    if effective_from < until {
                        return Err(VersionIndexError::Overlap {
                            version,
                            existing_from: last.effective_from,
                        });
                    }
                }
            }
        }

        self.windows.push(EffectiveWindow {
            version,
            effective_from,
            effective_until: None,
        });
        Ok(superseded)
    }

    /// Close the open window for `version` at `sunset_at`
    pub fn close(
        &mut self,
        version: &Version,
        sunset_at: DateTime<Utc>,
    ) -> Result<(), VersionIndexError> {
        let window = self
            .windows
            .iter_mut()
            .find(|w| &w.version == version && w.effective_until.is_none())
            .ok_or_else(|| VersionIndexError::WindowNotFound {
                version: version.clone(),
            })?;

        if sunset_at <= window.effective_from {
            return Err(VersionIndexError::InvalidSunset {
                sunset_at,
                effective_from: window.effective_from,
            });
        }

        window.effective_until = Some(sunset_at);
        Ok(())
    }

    /// The version effective at `as_of`, if any; a pure lookup
    pub fn resolve(&self, as_of: DateTime<Utc>) -> Option<&Version> {
        self.windows
            .iter()
            .rev()
            .find(|w| {
                w.effective_from <= as_of && w.effective_until.map_or(true, |until| as_of < until)
            })
            .map(|w| &w.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_activation_closes_previous_window() {
        let mut index = EffectiveVersionIndex::new();

        assert_eq!(index.activate(Version::new(1, 0, 0), day(1)).unwrap(), None);
        let superseded = index.activate(Version::new(1, 1, 0), day(10)).unwrap();
        assert_eq!(superseded, Some(Version::new(1, 0, 0)));

        assert_eq!(index.windows()[0].effective_until, Some(day(10)));
        assert_eq!(index.windows()[1].effective_until, None);
    }

    #[test]
    fn test_resolution_is_point_in_time() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(1)).unwrap();
        index.activate(Version::new(2, 0, 0), day(10)).unwrap();

        assert_eq!(index.resolve(day(5)), Some(&Version::new(1, 0, 0)));
        assert_eq!(index.resolve(day(10)), Some(&Version::new(2, 0, 0)));
        assert_eq!(index.resolve(day(20)), Some(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_nothing_effective_before_first_window() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(10)).unwrap();

        assert_eq!(index.resolve(day(5)), None);
    }

    #[test]
    fn test_overlapping_activation_is_rejected() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(10)).unwrap();

        let err = index.activate(Version::new(1, 1, 0), day(10)).unwrap_err();
        assert!(matches!(err, VersionIndexError::Overlap { .. }));
    }

    #[test]
    fn test_close_ends_effectiveness() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(1)).unwrap();
        index.close(&Version::new(1, 0, 0), day(15)).unwrap();

        assert_eq!(index.resolve(day(10)), Some(&Version::new(1, 0, 0)));
        assert_eq!(index.resolve(day(15)), None);
    }

    #[test]
    fn test_close_requires_open_window() {
        let mut index = EffectiveVersionIndex::new();
        let err = index.close(&Version::new(1, 0, 0), day(5)).unwrap_err();
        assert!(matches!(err, VersionIndexError::WindowNotFound { .. }));
    }

    #[test]
    fn test_sunset_must_follow_window_start() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(10)).unwrap();

        let err = index.close(&Version::new(1, 0, 0), day(10)).unwrap_err();
        assert!(matches!(err, VersionIndexError::InvalidSunset { .. }));
    }

    #[test]
    fn test_activation_after_closed_window_reopens() {
        let mut index = EffectiveVersionIndex::new();
        index.activate(Version::new(1, 0, 0), day(1)).unwrap();
        index.close(&Version::new(1, 0, 0), day(5)).unwrap();

        // Gap between day 5 and day 10 has no effective version
        index.activate(Version::new(2, 0, 0), day(10)).unwrap();
        assert_eq!(index.resolve(day(7)), None);
        assert_eq!(index.resolve(day(11)), Some(&Version::new(2, 0, 0)));
    }
}
