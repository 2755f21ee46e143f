//! Text recognition
//!
//! [`TextRecognizer`] is the seam the classifier talks to. The production
//! implementation shells out to the `tesseract` CLI and parses its TSV output
//! into line-level fragments with confidence and bounding boxes.

use super::error::{VisionError, VisionResult};
use super::image_ops::{self, PreprocessOptions};
use super::region::Region;
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("number pattern compiles"));

/// One recognized text fragment. `confidence` is in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
    /// Screen-space box, when the engine reports one
    pub bbox: Option<Region>,
}

impl RecognizedText {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: Region) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

#[allow(async_fn_in_trait)]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in `image`, or only inside `region` when given.
    /// Boxes are reported in full-image coordinates.
    async fn recognize(
        &self,
        image: &DynamicImage,
        region: Option<Region>,
    ) -> VisionResult<Vec<RecognizedText>>;

    /// First integer found in the recognized text.
    async fn recognize_number(
        &self,
        image: &DynamicImage,
        region: Option<Region>,
    ) -> VisionResult<Option<u64>> {
        let texts = self.recognize(image, region).await?;
        Ok(texts.iter().find_map(|t| first_number(&t.text)))
    }
}

/// First integer in `text`; thousands separators are ignored.
pub fn first_number(text: &str) -> Option<u64> {
    numbers(text).next()
}

/// Every integer in `text`, in order of appearance.
pub fn numbers(text: &str) -> impl Iterator<Item = u64> + '_ {
    NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<u64>().ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractOptions {
    pub program: String,
    pub language: String,
    /// Page segmentation mode (`--psm`)
    pub psm: u8,
    /// Engine mode (`--oem`)
    pub oem: u8,
    pub timeout_secs: u64,
    pub preprocess: PreprocessOptions,
}

impl Default for TesseractOptions {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            language: "chi_sim".to_string(),
            psm: 6,
            oem: 3,
            timeout_secs: 15,
            preprocess: PreprocessOptions::default(),
        }
    }
}

pub struct TesseractRecognizer {
    options: TesseractOptions,
}

impl TesseractRecognizer {
    pub fn new(options: TesseractOptions) -> Self {
        Self { options }
    }

    async fn run(&self, png: Vec<u8>) -> VisionResult<String> {
        let options = &self.options;
        let mut child = Command::new(&options.program)
            .args(["stdin", "stdout", "-l", &options.language])
            .args(["--oem", &options.oem.to_string(), "--psm", &options.psm.to_string()])
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VisionError::OcrSpawn {
                program: options.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|source| VisionError::OcrSpawn {
                    program: options.program.clone(),
                    source,
                })?;
        }

        let timeout = Duration::from_secs(options.timeout_secs);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| VisionError::OcrTimeout { duration: timeout })?
            .map_err(|source| VisionError::OcrSpawn {
                program: options.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(VisionError::OcrFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Group word rows of tesseract TSV into lines.
    ///
    /// Word boxes are divided by `scale` and shifted by `offset` so they end
    /// up in the coordinates of the original screenshot.
    pub fn parse_tsv(tsv: &str, offset: (u32, u32), scale: f32) -> Vec<RecognizedText> {
        struct Line {
            key: (u32, u32, u32, u32),
            text: String,
            confidences: Vec<f32>,
            bbox: Option<Region>,
        }

        let scale = if scale > 0.0 { scale } else { 1.0 };
        let mut lines: Vec<Line> = Vec::new();
        for row in tsv.lines().skip(1) {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                continue;
            }
            let word = cols[11].trim();
            let Ok(conf) = cols[10].trim().parse::<f32>() else {
                continue;
            };
            if word.is_empty() || conf < 0.0 {
                continue;
            }
            let nums: Vec<u32> = cols[1..10]
                .iter()
                .filter_map(|c| c.trim().parse::<u32>().ok())
                .collect();
            if nums.len() != 9 {
                continue;
            }
            let key = (nums[0], nums[1], nums[2], nums[3]);
            let unscale = |v: u32| (v as f32 / scale).round() as u32;
            let bbox = Region::new(unscale(nums[5]), unscale(nums[6]), unscale(nums[7]), unscale(nums[8]))
                .offset(offset.0, offset.1);

            match lines.last_mut() {
                Some(line) if line.key == key => {
                    if needs_space(&line.text, word) {
                        line.text.push(' ');
                    }
                    line.text.push_str(word);
                    line.confidences.push(conf);
                    line.bbox = Some(line.bbox.map_or(bbox, |b| b.union(&bbox)));
                }
                _ => lines.push(Line {
                    key,
                    text: word.to_string(),
                    confidences: vec![conf],
                    bbox: Some(bbox),
                }),
            }
        }

        lines
            .into_iter()
            .map(|line| {
                let mean = line.confidences.iter().sum::<f32>() / line.confidences.len() as f32;
                RecognizedText {
                    text: line.text,
                    confidence: (mean / 100.0).clamp(0.0, 1.0),
                    bbox: line.bbox,
                }
            })
            .collect()
    }
}

/// CJK words are written without separators; latin words and numbers keep one.
fn needs_space(previous: &str, next: &str) -> bool {
    let last = previous.chars().last();
    let first = next.chars().next();
    matches!((last, first), (Some(a), Some(b)) if a.is_ascii_alphanumeric() || b.is_ascii_alphanumeric())
}

impl TextRecognizer for TesseractRecognizer {
    async fn recognize(
        &self,
        image: &DynamicImage,
        region: Option<Region>,
    ) -> VisionResult<Vec<RecognizedText>> {
        let (source, offset) = match region {
            Some(r) => {
                let cropped = image_ops::crop(image, r).ok_or_else(|| VisionError::RegionOutside {
                    region: r.to_string(),
                    width: image.width(),
                    height: image.height(),
                })?;
                (cropped, (r.x, r.y))
            }
            None => (image.clone(), (0, 0)),
        };
        let prepared = image_ops::preprocess(&source, &self.options.preprocess);
        let mut png = Vec::new();
        prepared.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let tsv = self.run(png).await?;
        let texts = Self::parse_tsv(&tsv, offset, self.options.preprocess.scale);
        log::debug!("🔤 Recognized {} text fragments", texts.len());
        Ok(texts)
    }
}
