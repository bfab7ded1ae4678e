//! Transform augmentation
//!
//! Messages whose type name contains one of the configured fragments get
//! the pose of the robot base frame relative to the message's frame
//! attached. Lookup failures produce an explicit absence; they never hold
//! up delivery.

mod static_tree;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::TransformError;
use crate::record::Transform;

pub use static_tree::StaticTransforms;

/// Default type-name fragments that receive a transform
pub const DEFAULT_TRANSFORM_TYPES: [&str; 2] = ["OccupancyGrid", "PointCloud2"];

/// Source of frame-to-frame transforms
pub trait TransformProvider: Send + Sync {
    /// Pose of `target_frame` expressed in `source_frame`; `at = None`
    /// means the latest available transform
    fn lookup(
        &self,
        source_frame: &str,
        target_frame: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Transform, TransformError>;
}

/// Outcome of augmenting one delivery
#[derive(Debug)]
pub enum Augmentation {
    /// Type does not qualify; record carries no `_transform`
    NotApplicable,
    Resolved(Transform),
    /// Qualifying type, but the lookup failed
    Absent(TransformError),
}

impl Augmentation {
    /// Value to attach, or `None` when the record should not be touched
    pub fn into_field(self) -> Option<Option<Transform>> {
        match self {
            Augmentation::NotApplicable => None,
            Augmentation::Resolved(t) => Some(Some(t)),
            Augmentation::Absent(_) => Some(None),
        }
    }
}

pub struct TransformAugmenter {
    provider: Box<dyn TransformProvider>,
    type_fragments: Vec<String>,
    base_frame: String,
}

impl TransformAugmenter {
    pub fn new(provider: Box<dyn TransformProvider>, type_fragments: Vec<String>, base_frame: impl Into<String>) -> Self {
        Self {
            provider,
            type_fragments,
            base_frame: base_frame.into(),
        }
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }

    /// Substring match of the type name against the configured fragments
    pub fn applies_to(&self, type_name: &str) -> bool {
        self.type_fragments.iter().any(|f| type_name.contains(f.as_str()))
    }

    pub fn augment(&self, type_name: &str, frame_id: Option<&str>) -> Augmentation {
        if !self.applies_to(type_name) {
            return Augmentation::NotApplicable;
        }

        let Some(frame) = frame_id.filter(|f| !f.is_empty()) else {
            return Augmentation::Absent(TransformError::MissingFrame);
        };

        match self.provider.lookup(frame, &self.base_frame, None) {
            Ok(transform) => Augmentation::Resolved(transform),
            Err(e) => {
                debug!(%type_name, %frame, base_frame = %self.base_frame, error = %e, "TransformAugmenter::augment: lookup failed");
                Augmentation::Absent(e)
            }
        }
    }
}

#[cfg(test)]
pub mod mock {
    //! Transform provider with a fixed answer and a call counter

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct FixedTransform {
        pub answer: Option<Transform>,
        pub calls: AtomicUsize,
    }

    impl FixedTransform {
        pub fn ok(transform: Transform) -> Self {
            Self {
                answer: Some(transform),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                answer: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TransformProvider for FixedTransform {
        fn lookup(
            &self,
            source_frame: &str,
            target_frame: &str,
            _at: Option<DateTime<Utc>>,
        ) -> Result<Transform, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.ok_or_else(|| TransformError::NotFound {
                source_frame: source_frame.to_string(),
                target_frame: target_frame.to_string(),
            })
        }
    }
}
