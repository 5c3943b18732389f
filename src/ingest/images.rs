use std::path::{Path, PathBuf};

use super::{has_image_extension, Dataset, RawFrame, TransformChain};
use crate::error::{PipelineError, Result};

/// An indexed list of image files sharing a root directory.
pub struct ImageDataset {
    root: PathBuf,
    images: Vec<PathBuf>,
    cursor: usize,
    transforms: TransformChain,
}

impl ImageDataset {
    pub fn new(root: PathBuf, images: Vec<PathBuf>, transforms: TransformChain) -> Self {
        Self {
            root,
            images,
            cursor: 0,
            transforms,
        }
    }

    /// Every file under `root` (recursively) with a registered image extension.
    pub fn from_dir(root: &Path, transforms: TransformChain) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::missing(root));
        }
        let pattern = root.join("**").join("*");
        let pattern = pattern.to_str().ok_or_else(|| {
            PipelineError::config(format!("image directory {} is not valid UTF-8", root.display()))
        })?;
        let paths = glob::glob(pattern)
            .map_err(|e| PipelineError::config(format!("bad image pattern: {}", e)))?;
        let mut images: Vec<PathBuf> = paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        if images.is_empty() {
            return Err(PipelineError::missing(root));
        }
        images.sort();
        log::info!("found {} images under {}", images.len(), root.display());
        Ok(Self::new(root.to_path_buf(), images, transforms))
    }

    /// Images named one per line in `list`; relative entries resolve against `root`.
    pub fn from_list(list: &Path, root: &Path, transforms: TransformChain) -> Result<Self> {
        let raw = std::fs::read_to_string(list).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::missing(list),
            _ => PipelineError::Io(e),
        })?;
        let mut lines: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        lines.sort_unstable();
        let images = lines.into_iter().map(|line| root.join(line)).collect();
        Ok(Self::new(root.to_path_buf(), images, transforms))
    }

    /// A single image, rooted at its parent directory.
    pub fn single(path: &Path, transforms: TransformChain) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::missing(path));
        }
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(root, vec![path.to_path_buf()], transforms))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load and transform the image at `index`.
    pub fn get(&self, index: usize) -> Result<RawFrame> {
        let path = self.images.get(index).ok_or_else(|| {
            PipelineError::config(format!(
                "image index {} out of range ({} images)",
                index,
                self.images.len()
            ))
        })?;
        if !path.exists() {
            return Err(PipelineError::missing(path));
        }
        let image = image::open(path)?.to_rgb8();
        Ok(RawFrame {
            image: self.transforms.apply(image),
            path: Some(path.clone()),
        })
    }

    /// Path relative to the dataset root, falling back to the full path.
    pub fn file_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

impl Dataset for ImageDataset {
    fn len(&self) -> Option<usize> {
        Some(self.images.len())
    }

    fn width(&self) -> Option<u32> {
        None
    }

    fn height(&self) -> Option<u32> {
        None
    }

    fn fps(&self) -> Option<f64> {
        None
    }

    fn read(&mut self) -> Result<Option<RawFrame>> {
        if self.cursor >= self.images.len() {
            return Ok(None);
        }
        let frame = self.get(self.cursor)?;
        self.cursor += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Image;

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        Image::from_pixel(width, height, image::Rgb([1, 2, 3]))
            .save(path)
            .unwrap();
    }

    fn read_names(dataset: &mut ImageDataset) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(frame) = dataset.read().unwrap() {
            names.push(dataset.file_name(frame.path.as_deref().unwrap()));
        }
        names
    }

    #[test]
    fn directory_scan_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"), 4, 4);
        write_png(&dir.path().join("nested/a.png"), 4, 4);
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let mut dataset = ImageDataset::from_dir(dir.path(), TransformChain::default()).unwrap();
        assert_eq!(dataset.len(), Some(2));
        let frame = dataset.get(0).unwrap();
        assert_eq!(frame.image.get_pixel(0, 0), &image::Rgb([1, 2, 3]));

        let names = read_names(&mut dataset);
        assert_eq!(names, vec!["b.png".to_string(), Path::new("nested").join("a.png").to_string_lossy().into_owned()]);
    }

    #[test]
    fn empty_directory_is_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageDataset::from_dir(dir.path(), TransformChain::default())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::MissingSource { .. }));
    }

    #[test]
    fn list_is_sorted_and_rooted() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("z.png"), 2, 2);
        write_png(&dir.path().join("a.png"), 2, 2);
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "z.png\n\n  a.png \n").unwrap();

        let mut dataset =
            ImageDataset::from_list(&list, dir.path(), TransformChain::default()).unwrap();
        assert_eq!(read_names(&mut dataset), vec!["a.png", "z.png"]);
    }

    #[test]
    fn single_image_and_indexed_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        write_png(&path, 6, 3);
        let chain = TransformChain::new(None, None, Some(2.0)).unwrap();
        let dataset = ImageDataset::single(&path, chain).unwrap();
        assert_eq!(dataset.root(), dir.path());
        assert_eq!(dataset.get(0).unwrap().image.dimensions(), (12, 6));
        assert!(dataset.get(1).is_err());
    }
}
