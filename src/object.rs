//! Sub-objects: results attached to frame records and tracked in the object store.
//!
//! Every sub-object carries a unique id, a camera id back-reference (a copied key,
//! never an owning pointer), a nested list of children, a violator flag and a
//! creation timestamp. The variant payload lives in `ObjectKind`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::unix_now;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubObject {
    id: Uuid,
    pub camera_id: Option<String>,
    pub objects: Vec<SubObject>,
    pub violator: bool,
    created_at: f64,
    pub image_name: Option<String>,
    kind: ObjectKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectKind {
    Base,
    Classification(Classification),
    Detection(Detection),
}

impl SubObject {
    fn with_kind(kind: ObjectKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id: None,
            objects: Vec::new(),
            violator: false,
            created_at: unix_now(),
            image_name: None,
            kind,
        }
    }

    pub fn base() -> Self {
        Self::with_kind(ObjectKind::Base)
    }

    pub fn classification(score: f64, label: impl Into<String>) -> Result<Self> {
        Ok(Self::with_kind(ObjectKind::Classification(
            Classification::new(score, label)?,
        )))
    }

    pub fn detection(bbox: BBox, score: f64, label: Option<String>) -> Result<Self> {
        Ok(Self::with_kind(ObjectKind::Detection(Detection::new(
            bbox, score, label,
        )?)))
    }

    /// Override the creation time (seconds since epoch). Used when replaying
    /// captured results and when aging objects in tests.
    pub fn with_created_at(mut self, created_at: f64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Age in seconds relative to `now`.
    pub fn age_at(&self, now: f64) -> f64 {
        now - self.created_at
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ObjectKind::Base => "base_object",
            ObjectKind::Classification(_) => "classification",
            ObjectKind::Detection(_) => "detection",
        }
    }

    pub fn as_classification(&self) -> Option<&Classification> {
        match &self.kind {
            ObjectKind::Classification(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_detection(&self) -> Option<&Detection> {
        match &self.kind {
            ObjectKind::Detection(d) => Some(d),
            _ => None,
        }
    }
}

/// Classification result. Score and label are fixed at construction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "ClassificationRepr")]
pub struct Classification {
    score: f64,
    label: String,
}

#[derive(Deserialize)]
struct ClassificationRepr {
    score: f64,
    label: String,
}

impl TryFrom<ClassificationRepr> for Classification {
    type Error = PipelineError;

    fn try_from(repr: ClassificationRepr) -> Result<Self> {
        Classification::new(repr.score, repr.label)
    }
}

impl Classification {
    pub fn new(score: f64, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if !score.is_finite() {
            return Err(PipelineError::invalid_object(format!(
                "classification score must be finite, got {}",
                score
            )));
        }
        if label.is_empty() {
            return Err(PipelineError::invalid_object(
                "classification label must not be empty",
            ));
        }
        Ok(Self { score, label })
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Detection result: a box plus its score and an optional class label.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    score: f64,
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BBox, score: f64, label: Option<String>) -> Result<Self> {
        if !score.is_finite() {
            return Err(PipelineError::invalid_object(format!(
                "detection score must be finite, got {}",
                score
            )));
        }
        Ok(Self { bbox, score, label })
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

/// Integer bounding box defined by two corner points.
///
/// The corners are stored as given; `x1` is not guaranteed to be less than `x2`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_bounds(x0: i32, y0: i32, width: i32, height: i32) -> Self {
        Self::new(x0, y0, x0 + width, y0 + height)
    }

    /// Signed width.
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    /// Signed height.
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn cx(&self) -> i32 {
        self.x1 + self.width() / 2
    }

    pub fn cy(&self) -> i32 {
        self.y1 + self.height() / 2
    }

    /// Clamp all corners into an image of the given size.
    pub fn clamp(&self, image_width: u32, image_height: u32) -> Self {
        let max_x = (image_width as i32 - 1).max(0);
        let max_y = (image_height as i32 - 1).max(0);
        Self::new(
            self.x1.clamp(0, max_x),
            self.y1.clamp(0, max_y),
            self.x2.clamp(0, max_x),
            self.y2.clamp(0, max_y),
        )
    }

    /// Expand around the center by `sw` horizontally and `sh` vertically.
    pub fn expand(&self, sw: f64, sh: f64) -> Self {
        let width = self.width() as f64;
        let height = self.height() as f64;
        let dw = (sw * width - width) / 2.0;
        let dh = (sh * height - height) / 2.0;
        Self::new(
            (self.x1 as f64 - dw) as i32,
            (self.y1 as f64 - dh) as i32,
            (self.x2 as f64 + dw) as i32,
            (self.y2 as f64 + dh) as i32,
        )
    }
}

/// Classification results among `objects`, in order.
pub fn classifications(objects: &[SubObject]) -> impl Iterator<Item = &Classification> {
    objects.iter().filter_map(SubObject::as_classification)
}

/// Find a sub-object by id.
pub fn find_by_id(objects: &[SubObject], id: Uuid) -> Option<&SubObject> {
    objects.iter().find(|obj| obj.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_rejects_non_finite_scores() {
        assert!(Classification::new(f64::NAN, "cat").is_err());
        assert!(Classification::new(f64::INFINITY, "cat").is_err());
        assert!(Classification::new(0.5, "").is_err());
        let c = Classification::new(0.5, "cat").unwrap();
        assert_eq!(c.label(), "cat");
        assert_eq!(c.score(), 0.5);
    }

    #[test]
    fn classification_validates_on_deserialize() {
        let bad = r#"{"type":"classification","score":0.3,"label":""}"#;
        assert!(serde_json::from_str::<ObjectKind>(bad).is_err());
        let good = r#"{"type":"classification","score":0.3,"label":"dog"}"#;
        let kind: ObjectKind = serde_json::from_str(good).unwrap();
        assert!(matches!(kind, ObjectKind::Classification(_)));
    }

    #[test]
    fn sub_objects_get_distinct_ids() {
        let a = SubObject::base();
        let b = SubObject::base();
        assert_ne!(a.id(), b.id());
        assert!(a.objects.is_empty());
        assert!(!a.violator);
    }

    #[test]
    fn bbox_geometry() {
        let bbox = BBox::from_bounds(10, 20, 30, 40);
        assert_eq!(bbox.width(), 30);
        assert_eq!(bbox.height(), 40);
        assert_eq!(bbox.cx(), 25);
        assert_eq!(bbox.cy(), 40);

        let clamped = BBox::new(-5, -5, 700, 500).clamp(640, 480);
        assert_eq!(clamped, BBox::new(0, 0, 639, 479));

        let expanded = BBox::new(10, 10, 20, 20).expand(2.0, 2.0);
        assert_eq!(expanded, BBox::new(5, 5, 25, 25));
    }

    #[test]
    fn classifications_filter_by_variant() {
        let objects = vec![
            SubObject::base(),
            SubObject::classification(0.9, "person").unwrap(),
            SubObject::detection(BBox::new(0, 0, 1, 1), 0.4, None).unwrap(),
        ];
        let labels: Vec<&str> = classifications(&objects).map(|c| c.label()).collect();
        assert_eq!(labels, vec!["person"]);
    }
}
