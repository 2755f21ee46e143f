//! Template management and matching functionality

use super::error::{VisionError, VisionResult};
use super::region::Region;
use image::{DynamicImage, GrayImage, imageops};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Matching work above these sizes is skipped to keep a cycle responsive.
const MAX_TEMPLATE_PIXELS: u64 = 1_000_000;
const MAX_SEARCH_PIXELS: u64 = 5_000_000;

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub image: GrayImage,
    /// Where to look, in screen pixels; whole screen when `None`
    pub search_region: Option<Region>,
}

impl Template {
    /// Load a PNG. The name is the file stem without any `-[x,y,w,h]` suffix,
    /// which instead becomes the search region.
    pub fn load(path: &Path) -> VisionResult<Self> {
        let image = image::open(path)?.to_luma8();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        let search_region = Region::parse_from_filename(stem);
        let name = match stem.find('[') {
            Some(idx) => stem[..idx].trim_end_matches(['-', '_']).to_string(),
            None => stem.to_string(),
        };
        Ok(Self {
            name,
            image,
            search_region,
        })
    }
}

/// A template located on screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateHit {
    pub name: String,
    pub region: Region,
    pub score: f32,
}

impl TemplateHit {
    /// Get tap coordinates at the center of this match
    pub fn center(&self) -> (u32, u32) {
        self.region.center()
    }
}

/// Named templates plus the matching routine.
pub struct TemplateLibrary {
    templates: Vec<Template>,
    /// Screenshot and template are scaled by this factor before matching
    scale: f32,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TemplateLibrary {
    pub fn new(scale: f32) -> Self {
        Self {
            templates: Vec::new(),
            scale: if scale > 0.0 && scale <= 1.0 { scale } else { 1.0 },
        }
    }

    /// Scan directory for PNG template files and load them
    pub fn load_from_directory(directory: &Path, scale: f32) -> VisionResult<Self> {
        if !directory.is_dir() {
            return Err(VisionError::TemplateDirMissing {
                path: directory.to_path_buf(),
            });
        }
        let entries = std::fs::read_dir(directory).map_err(|source| VisionError::Io {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
            })
            .collect();
        // Sort for consistent ordering
        paths.sort();

        let mut library = Self::new(scale);
        for path in paths {
            match Template::load(&path) {
                Ok(template) => {
                    log::debug!("🧩 Loaded template '{}' from {}", template.name, path.display());
                    library.templates.push(template);
                }
                Err(e) => log::warn!("⚠️ Skipping template {}: {}", path.display(), e),
            }
        }
        log::info!("🧩 {} templates loaded from {}", library.len(), directory.display());
        Ok(library)
    }

    pub fn add(&mut self, template: Template) {
        self.templates.push(template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }

    /// Best match of every template that reaches `threshold`.
    pub fn match_all(&self, screenshot: &GrayImage, threshold: f32) -> Vec<TemplateHit> {
        self.templates
            .iter()
            .filter_map(|t| self.best_match(screenshot, t))
            .filter(|hit| hit.score >= threshold)
            .collect()
    }

    /// Best normalized cross-correlation position inside the template's search region.
    fn best_match(&self, screenshot: &GrayImage, template: &Template) -> Option<TemplateHit> {
        let region = template
            .search_region
            .unwrap_or_else(|| Region::full_screen(screenshot.width(), screenshot.height()))
            .clip_to_screen(screenshot.width(), screenshot.height())?;
        let search = imageops::crop_imm(screenshot, region.x, region.y, region.width, region.height)
            .to_image();

        let (search, needle) = if self.scale < 1.0 {
            (scale_gray(&search, self.scale), scale_gray(&template.image, self.scale))
        } else {
            (search, template.image.clone())
        };

        if needle.width() == 0
            || needle.height() == 0
            || needle.width() > search.width()
            || needle.height() > search.height()
        {
            log::debug!("⚠️ Template '{}' does not fit its search region", template.name);
            return None;
        }
        let template_pixels = needle.width() as u64 * needle.height() as u64;
        let search_pixels = search.width() as u64 * search.height() as u64;
        if template_pixels > MAX_TEMPLATE_PIXELS || search_pixels > MAX_SEARCH_PIXELS {
            log::debug!("⚠️ Skipping large template matching for '{}'", template.name);
            return None;
        }

        let result = match_template(&search, &needle, MatchTemplateMethod::CrossCorrelationNormalized);
        let extremes = find_extremes(&result);
        let score = extremes.max_value;
        if !score.is_finite() {
            return None;
        }
        let (mx, my) = extremes.max_value_location;
        let unscale = |v: u32| (v as f32 / self.scale).round() as u32;
        Some(TemplateHit {
            name: template.name.clone(),
            region: Region::new(
                region.x + unscale(mx),
                region.y + unscale(my),
                template.image.width(),
                template.image.height(),
            ),
            score,
        })
    }
}

fn scale_gray(image: &GrayImage, scale: f32) -> GrayImage {
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}

/// Cut `region` out of a screenshot and store it as `<dir>/<name>-[x,y,w,h].png`.
pub fn save_template(
    directory: &Path,
    name: &str,
    screenshot: &DynamicImage,
    region: Region,
) -> VisionResult<PathBuf> {
    let clipped = region
        .clip_to_screen(screenshot.width(), screenshot.height())
        .ok_or_else(|| VisionError::RegionOutside {
            region: region.to_string(),
            width: screenshot.width(),
            height: screenshot.height(),
        })?;
    std::fs::create_dir_all(directory).map_err(|source| VisionError::Io {
        path: directory.to_path_buf(),
        source,
    })?;
    let path = directory.join(format!("{name}-{clipped}.png"));
    screenshot
        .crop_imm(clipped.x, clipped.y, clipped.width, clipped.height)
        .save(&path)?;
    Ok(path)
}
