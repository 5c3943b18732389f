use crate::error::{PipelineError, Result};
use crate::frame::{Field, FieldValue, FrameRecord, Image};
use crate::object::classifications;
use crate::store::ObjectStore;

use super::{Block, BlockSettings, StageSpec};

/// Caption rendering parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptionStyle {
    pub font_size: f32,
    pub thickness: u32,
    pub color: [u8; 3],
    pub position: (u32, u32),
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_size: 1.0,
            thickness: 1,
            color: [0, 255, 0],
            position: (50, 50),
        }
    }
}

impl CaptionStyle {
    /// Height of one caption line in pixels.
    pub fn line_height(&self) -> u32 {
        (10.0 * self.font_size).ceil() as u32 + self.thickness
    }
}

/// Draws a caption onto an image in place.
pub trait Annotator: Send {
    fn annotate(&self, image: &mut Image, caption: &str, position: (u32, u32), style: &CaptionStyle);
}

/// Draws a filled marker whose width follows the caption length.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerAnnotator;

impl Annotator for MarkerAnnotator {
    fn annotate(&self, image: &mut Image, caption: &str, position: (u32, u32), style: &CaptionStyle) {
        let glyph = (6.0 * style.font_size).ceil() as u32 + style.thickness;
        let width = glyph.saturating_mul(caption.chars().count() as u32);
        let height = style.line_height();
        let (x0, y0) = position;
        let x1 = x0.saturating_add(width).min(image.width());
        let y1 = y0.saturating_add(height).min(image.height());
        let color = image::Rgb(style.color);
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Draws the label of every classification sub-object onto the draw image.
pub struct CaptionBlock {
    settings: BlockSettings,
    style: CaptionStyle,
    annotator: Box<dyn Annotator>,
}

impl CaptionBlock {
    pub fn new(settings: BlockSettings, style: CaptionStyle, annotator: Box<dyn Annotator>) -> Self {
        Self {
            settings,
            style,
            annotator,
        }
    }

    pub fn from_spec(spec: &StageSpec) -> Result<Self> {
        let mut style = CaptionStyle::default();
        if let Some(font_size) = spec.param::<f64>("font_size")? {
            style.font_size = font_size as f32;
        }
        if let Some(thickness) = spec.param::<u32>("thickness")? {
            style.thickness = thickness;
        }
        if let Some(color) = spec.param::<Vec<u8>>("color")? {
            style.color = <[u8; 3]>::try_from(color.as_slice())
                .map_err(|_| PipelineError::config("color must have exactly three components"))?;
        }
        if let Some([x, y]) = spec.param::<[u32; 2]>("position")? {
            style.position = (x, y);
        }
        Ok(Self::new(spec.settings(), style, Box::new(MarkerAnnotator)))
    }

    /// Rewriting is implied when the block draws over the image it read.
    fn in_place(&self) -> Option<bool> {
        let input = self.settings.binding.input.as_ref().unwrap_or(&Field::ImageDraw);
        match &self.settings.binding.output {
            None => Some(true),
            Some(output) if output == input => Some(true),
            Some(_) => None,
        }
    }
}

impl Block for CaptionBlock {
    fn name(&self) -> &'static str {
        "caption"
    }

    fn settings(&self) -> &BlockSettings {
        &self.settings
    }

    fn process(
        &mut self,
        mut batch: Vec<FrameRecord>,
        _store: &mut ObjectStore,
    ) -> Result<Vec<FrameRecord>> {
        let rewrite = self.in_place();
        for record in &mut batch {
            let labels: Vec<String> = classifications(record.objects())
                .map(|c| c.label().to_string())
                .collect();
            if labels.is_empty() {
                continue;
            }
            let Some(mut image) = self
                .settings
                .get_input(record, &Field::ImageDraw)
                .and_then(|value| value.as_image())
                .cloned()
            else {
                continue;
            };
            let (x, mut y) = self.style.position;
            for label in &labels {
                self.annotator.annotate(&mut image, label, (x, y), &self.style);
                y = y.saturating_add(self.style.line_height());
            }
            self.settings
                .set_output(FieldValue::Image(image), record, rewrite, &Field::ImageDraw)?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBinding;
    use crate::object::SubObject;

    fn labelled(width: u32, height: u32) -> FrameRecord {
        let mut record = FrameRecord::new();
        record.attach_image(Image::new(width, height));
        record.add_object(SubObject::classification(0.9, "cat").unwrap());
        record
    }

    #[test]
    fn marker_is_clipped_to_image() {
        let mut image = Image::new(20, 20);
        let style = CaptionStyle::default();
        MarkerAnnotator.annotate(&mut image, "long caption", (15, 15), &style);
        assert_eq!(image.get_pixel(19, 19), &image::Rgb(style.color));
        assert_eq!(image.get_pixel(14, 14), &image::Rgb([0, 0, 0]));
    }

    #[test]
    fn draws_captions_on_draw_copy_only() {
        let mut block = CaptionBlock::new(
            BlockSettings::default(),
            CaptionStyle {
                position: (1, 1),
                ..CaptionStyle::default()
            },
            Box::new(MarkerAnnotator),
        );
        let out = block
            .call(vec![labelled(64, 64), FrameRecord::new()], &mut ObjectStore::new())
            .unwrap();
        let draw = out[0].image_draw.as_ref().unwrap();
        assert_eq!(draw.get_pixel(2, 2), &image::Rgb([0, 255, 0]));
        assert_eq!(out[0].image().unwrap().get_pixel(2, 2), &image::Rgb([0, 0, 0]));
        assert!(out[1].image_draw.is_none());
    }

    #[test]
    fn separate_bound_output_follows_rewrite_rules() {
        let mut block = CaptionBlock::new(
            BlockSettings {
                turn_on: true,
                binding: BlockBinding {
                    input: None,
                    output: Some(Field::ImageDrawZone),
                    rewrite: None,
                },
            },
            CaptionStyle::default(),
            Box::new(MarkerAnnotator),
        );
        let err = block
            .call(vec![labelled(64, 64)], &mut ObjectStore::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateOutput { .. }));
    }

    #[test]
    fn style_comes_from_stage_params() {
        let table: toml::Table = toml::from_str(
            "module = \"caption\"\nfont_size = 2.0\nthickness = 3\ncolor = [255, 0, 0]\nposition = [5, 6]",
        )
        .unwrap();
        let spec = StageSpec::from_table("viz", &table).unwrap();
        let block = CaptionBlock::from_spec(&spec).unwrap();
        assert_eq!(block.style.font_size, 2.0);
        assert_eq!(block.style.thickness, 3);
        assert_eq!(block.style.color, [255, 0, 0]);
        assert_eq!(block.style.position, (5, 6));

        let table: toml::Table =
            toml::from_str("module = \"caption\"\ncolor = [255, 0]").unwrap();
        let spec = StageSpec::from_table("viz", &table).unwrap();
        assert!(CaptionBlock::from_spec(&spec).is_err());
    }
}
