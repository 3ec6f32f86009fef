use crate::coords::NormalizedPoint;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs as async_fs;

/// An RGB capture of the environment's screen.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: u128,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        let captured_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { image, captured_at_ms }
    }

    /// Decodes PNG/JPEG bytes as returned by most capture endpoints.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("failed to decode screenshot")?;
        Ok(Self::new(img.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy whose longest side is at most `max_dim`, aspect preserved.
    /// Frames already within bounds are cloned unchanged.
    pub fn downscaled(&self, max_dim: u32) -> Frame {
        let (w, h) = (self.width(), self.height());
        if max_dim == 0 || (w <= max_dim && h <= max_dim) {
            return self.clone();
        }
        let (nw, nh) = if w >= h {
            (max_dim, ((u64::from(h) * u64::from(max_dim)) / u64::from(w)).max(1) as u32)
        } else {
            (((u64::from(w) * u64::from(max_dim)) / u64::from(h)).max(1) as u32, max_dim)
        };
        let image = image::imageops::resize(&self.image, nw, nh, FilterType::Lanczos3);
        Frame { image, captured_at_ms: self.captured_at_ms }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .context("failed to encode PNG")?;
        Ok(buf)
    }

    pub async fn save_png(&self, path: &Path) -> Result<()> {
        let png = self.encode_png()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            async_fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create_dir {}", dir.display()))?;
        }
        async_fs::write(path, &png)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

/// Reads an image file into a `data:` URI for multimodal chat payloads.
pub async fn image_to_data_uri(path: &Path) -> Result<String> {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    let bytes = async_fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    Ok(format!("data:{};base64,{}", mime, B64.encode(bytes)))
}

const MARKER_RADIUS: f64 = 10.0;
const MARKER_RING: f64 = 2.0;
const MARKER_FILL: Rgb<u8> = Rgb([255, 0, 0]);
const MARKER_OUTLINE: Rgb<u8> = Rgb([255, 255, 255]);

/// Copy of `frame` with the chosen point marked by a ringed red disc.
pub fn annotate(frame: &Frame, point: NormalizedPoint) -> RgbImage {
    let mut img = frame.image.clone();
    let (px, py) = point.to_pixel(img.width(), img.height());
    let (cx, cy) = (f64::from(px), f64::from(py));
    draw_disc(&mut img, cx, cy, MARKER_RADIUS, MARKER_OUTLINE);
    draw_disc(&mut img, cx, cy, MARKER_RADIUS - MARKER_RING, MARKER_FILL);
    img
}

pub async fn save_preview(frame: &Frame, point: NormalizedPoint, path: &Path) -> Result<()> {
    Frame { image: annotate(frame, point), captured_at_ms: frame.captured_at_ms }
        .save_png(path)
        .await
}

fn draw_disc(img: &mut RgbImage, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let max_x = img.width() as i64 - 1;
    let max_y = img.height() as i64 - 1;
    let min_x = ((cx - radius).floor() as i64).clamp(0, max_x);
    let hi_x = ((cx + radius).ceil() as i64).clamp(0, max_x);
    let min_y = ((cy - radius).floor() as i64).clamp(0, max_y);
    let hi_y = ((cy + radius).ceil() as i64).clamp(0, max_y);
    let r2 = radius * radius;
    for y in min_y..=hi_y {
        for x in min_x..=hi_x {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
