//! Frame record: the canonical per-frame data passed through the pipeline.
//!
//! - `FrameRecord`: one per ingested frame, created by a provider, mutated by blocks.
//! - `Field`: explicit schema of addressable record fields plus `extra.<key>`.
//! - `FieldValue` / `FieldRef`: owned and borrowed values moved through bindings.
//!
//! Width and height stay `None` until an image is attached. The creation
//! timestamp is written once, at construction, and has no setter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::object::SubObject;
use crate::unix_now;

/// RGB pixel buffer used for every image slot.
pub type Image = image::RgbImage;

/// Size filter applied by downstream consumers of a record's objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeFilter {
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl SizeFilter {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        self.min_width.map_or(true, |w| width >= w)
            && self.min_height.map_or(true, |h| height >= h)
            && self.max_width.map_or(true, |w| width <= w)
            && self.max_height.map_or(true, |h| height <= h)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRecord {
    pub file_name: Option<String>,
    pub frame_index: Option<u64>,
    camera_id: Option<String>,
    pub camera_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(skip)]
    image: Option<Image>,
    #[serde(skip)]
    pub image_draw: Option<Image>,
    #[serde(skip)]
    pub image_draw_zone: Option<Image>,
    pub editable_config: Option<serde_json::Value>,
    timestamp: f64,
    objects: Vec<SubObject>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub size_filters: Vec<SizeFilter>,
}

impl Default for FrameRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRecord {
    pub fn new() -> Self {
        Self {
            file_name: None,
            frame_index: None,
            camera_id: None,
            camera_name: None,
            width: None,
            height: None,
            image: None,
            image_draw: None,
            image_draw_zone: None,
            editable_config: None,
            timestamp: unix_now(),
            objects: Vec::new(),
            extra: BTreeMap::new(),
            size_filters: Vec::new(),
        }
    }

    /// Attach the raw image and derive width, height and both draw copies from it.
    pub fn attach_image(&mut self, image: Image) {
        self.width = Some(image.width());
        self.height = Some(image.height());
        self.image_draw = Some(image.clone());
        self.image_draw_zone = Some(image.clone());
        self.image = Some(image);
    }

    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn camera_id(&self) -> Option<&str> {
        self.camera_id.as_deref()
    }

    /// Set the camera id and re-stamp already attached objects with it.
    pub fn set_camera_id(&mut self, camera_id: impl Into<String>) {
        let camera_id = camera_id.into();
        for obj in &mut self.objects {
            obj.camera_id = Some(camera_id.clone());
        }
        self.camera_id = Some(camera_id);
    }

    pub fn objects(&self) -> &[SubObject] {
        &self.objects
    }

    /// Mutable access to attached objects. Appending goes through `add_object`.
    pub fn objects_mut(&mut self) -> &mut [SubObject] {
        &mut self.objects
    }

    /// Append a sub-object; it inherits this record's camera id.
    pub fn add_object(&mut self, mut obj: SubObject) {
        obj.camera_id = self.camera_id.clone();
        self.objects.push(obj);
    }

    /// Borrow a field by name. Returns `None` for unset fields.
    pub fn get(&self, field: &Field) -> Option<FieldRef<'_>> {
        match field {
            Field::FileName => self.file_name.as_deref().map(FieldRef::Text),
            Field::FrameIndex => self.frame_index.map(FieldRef::Number),
            Field::CameraId => self.camera_id.as_deref().map(FieldRef::Text),
            Field::CameraName => self.camera_name.as_deref().map(FieldRef::Text),
            Field::Width => self.width.map(|w| FieldRef::Number(w as u64)),
            Field::Height => self.height.map(|h| FieldRef::Number(h as u64)),
            Field::Image => self.image.as_ref().map(FieldRef::Image),
            Field::ImageDraw => self.image_draw.as_ref().map(FieldRef::Image),
            Field::ImageDrawZone => self.image_draw_zone.as_ref().map(FieldRef::Image),
            Field::EditableConfig => self.editable_config.as_ref().map(FieldRef::Json),
            Field::Extra(key) => match self.extra.get(key) {
                Some(serde_json::Value::Null) | None => None,
                Some(value) => Some(FieldRef::Json(value)),
            },
        }
    }

    pub fn is_set(&self, field: &Field) -> bool {
        self.get(field).is_some()
    }

    /// Write a field. The value kind must match the field; width and height
    /// are derived from the attached image and cannot be written directly.
    pub fn set(&mut self, field: &Field, value: FieldValue) -> Result<()> {
        match (field, value) {
            (Field::FileName, FieldValue::Text(text)) => self.file_name = Some(text),
            (Field::FrameIndex, FieldValue::Number(n)) => self.frame_index = Some(n),
            (Field::CameraId, FieldValue::Text(text)) => self.set_camera_id(text),
            (Field::CameraName, FieldValue::Text(text)) => self.camera_name = Some(text),
            (Field::Image, FieldValue::Image(image)) => {
                self.width = Some(image.width());
                self.height = Some(image.height());
                self.image = Some(image);
            }
            (Field::ImageDraw, FieldValue::Image(image)) => self.image_draw = Some(image),
            (Field::ImageDrawZone, FieldValue::Image(image)) => self.image_draw_zone = Some(image),
            (Field::EditableConfig, FieldValue::Json(value)) => self.editable_config = Some(value),
            (Field::Extra(key), FieldValue::Json(value)) => {
                self.extra.insert(key.clone(), value);
            }
            (Field::Extra(key), FieldValue::Text(text)) => {
                self.extra
                    .insert(key.clone(), serde_json::Value::String(text));
            }
            (Field::Extra(key), FieldValue::Number(n)) => {
                self.extra.insert(key.clone(), serde_json::Value::from(n));
            }
            (field, _) => {
                return Err(PipelineError::FieldType {
                    field: field.to_string(),
                    expected: field.expected_kind(),
                })
            }
        }
        Ok(())
    }
}

/// Addressable record fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    FileName,
    FrameIndex,
    CameraId,
    CameraName,
    Width,
    Height,
    Image,
    ImageDraw,
    ImageDrawZone,
    EditableConfig,
    Extra(String),
}

const EXTRA_PREFIX: &str = "extra.";

impl Field {
    fn expected_kind(&self) -> &'static str {
        match self {
            Field::FileName | Field::CameraId | Field::CameraName => "text",
            Field::FrameIndex => "a number",
            Field::Width | Field::Height => "an attached image (read-only)",
            Field::Image | Field::ImageDraw | Field::ImageDrawZone => "an image",
            Field::EditableConfig => "a json value",
            Field::Extra(_) => "a json value, text or number",
        }
    }
}

impl FromStr for Field {
    type Err = PipelineError;

    fn from_str(name: &str) -> Result<Self> {
        let field = match name {
            "file_name" => Field::FileName,
            "frame_index" => Field::FrameIndex,
            "camera_id" => Field::CameraId,
            "camera_name" => Field::CameraName,
            "width" => Field::Width,
            "height" => Field::Height,
            "image" => Field::Image,
            "image_draw" => Field::ImageDraw,
            "image_draw_zone" => Field::ImageDrawZone,
            "editable_config" => Field::EditableConfig,
            other => match other.strip_prefix(EXTRA_PREFIX) {
                Some(key) if !key.is_empty() => Field::Extra(key.to_string()),
                _ => {
                    return Err(PipelineError::config(format!(
                        "unknown record field '{}'",
                        name
                    )))
                }
            },
        };
        Ok(field)
    }
}

impl TryFrom<String> for Field {
    type Error = PipelineError;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.to_string()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::FileName => "file_name",
            Field::FrameIndex => "frame_index",
            Field::CameraId => "camera_id",
            Field::CameraName => "camera_name",
            Field::Width => "width",
            Field::Height => "height",
            Field::Image => "image",
            Field::ImageDraw => "image_draw",
            Field::ImageDrawZone => "image_draw_zone",
            Field::EditableConfig => "editable_config",
            Field::Extra(key) => return write!(f, "{}{}", EXTRA_PREFIX, key),
        };
        f.write_str(name)
    }
}

/// Owned value written into a field.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Text(String),
    Number(u64),
    Image(Image),
    Json(serde_json::Value),
}

/// Borrowed view of a field.
#[derive(Clone, Copy, Debug)]
pub enum FieldRef<'a> {
    Text(&'a str),
    Number(u64),
    Image(&'a Image),
    Json(&'a serde_json::Value),
}

impl<'a> FieldRef<'a> {
    pub fn as_image(&self) -> Option<&'a Image> {
        match self {
            FieldRef::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&'a str> {
        match self {
            FieldRef::Text(text) => Some(text),
            FieldRef::Json(serde_json::Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn to_value(&self) -> FieldValue {
        match *self {
            FieldRef::Text(text) => FieldValue::Text(text.to_string()),
            FieldRef::Number(n) => FieldValue::Number(n),
            FieldRef::Image(image) => FieldValue::Image(image.clone()),
            FieldRef::Json(value) => FieldValue::Json(value.clone()),
        }
    }
}
