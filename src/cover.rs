//! Plain text covers.
//!
//! The title is split on `:`. The first part is wrapped at a fixed column
//! count and drawn large; the remaining parts are drawn smaller underneath.
//! The whole block is centred inside a bordered page, saved as a temporary
//! PNG and attached with the metadata executable. The temporary image is
//! removed when the guard drops, whether or not attaching succeeded.

use crate::config::BuildConfig;
use crate::invoker::run_with_timeout;
use crate::models::FailureReason;
use crate::utils::wrap_text;
use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

pub const COVER_WIDTH: u32 = 1200;
pub const COVER_HEIGHT: u32 = 1600;
const BORDER_INSET: u32 = 40;
const BORDER_WIDTH: u32 = 8;
const TITLE_COLUMNS: usize = 18;
const SUBTITLE_COLUMNS: usize = 30;
const TITLE_PX: f32 = 110.0;
const SUBTITLE_PX: f32 = 70.0;
const LINE_SPACING: f32 = 1.25;
const GAP_PX: u32 = 60;

const INK: Rgb<u8> = Rgb([0, 0, 0]);
const PAPER: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("cannot read cover font {path}: {source}")]
    Font {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid cover font: {0}")]
    InvalidFont(#[from] ab_glyph::InvalidFont),
    #[error("failed to encode cover: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to attach cover: {0}")]
    Attach(#[from] FailureReason),
}

/// One line of cover text with its size.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverLine {
    pub text: String,
    pub px: f32,
}

/// Break a title into cover lines: wrapped primary part, then secondary parts.
pub fn layout_lines(title: &str) -> Vec<CoverLine> {
    let mut parts = title.split(':').map(str::trim).filter(|p| !p.is_empty());
    let mut lines = Vec::new();
    if let Some(primary) = parts.next() {
        lines.extend(wrap_text(primary, TITLE_COLUMNS).into_iter().map(|text| CoverLine {
            text,
            px: TITLE_PX,
        }));
    }
    for part in parts {
        lines.extend(wrap_text(part, SUBTITLE_COLUMNS).into_iter().map(|text| CoverLine {
            text,
            px: SUBTITLE_PX,
        }));
    }
    lines
}

fn line_height(px: f32) -> u32 {
    (px * LINE_SPACING).round() as u32
}

/// Total height of the text block, including the gap after the primary lines.
fn block_height(lines: &[CoverLine]) -> u32 {
    let text: u32 = lines.iter().map(|l| line_height(l.px)).sum();
    let has_gap = lines.iter().any(|l| l.px == TITLE_PX) && lines.iter().any(|l| l.px != TITLE_PX);
    text + if has_gap { GAP_PX } else { 0 }
}

/// Rasterise the cover for `title`.
pub fn render(title: &str, font: &FontVec) -> RgbImage {
    let mut img = RgbImage::from_pixel(COVER_WIDTH, COVER_HEIGHT, PAPER);
    for i in 0..BORDER_WIDTH {
        let offset = BORDER_INSET + i;
        let rect = Rect::at(offset as i32, offset as i32)
            .of_size(COVER_WIDTH - 2 * offset, COVER_HEIGHT - 2 * offset);
        draw_hollow_rect_mut(&mut img, rect, INK);
    }

    let lines = layout_lines(title);
    let mut y = COVER_HEIGHT.saturating_sub(block_height(&lines)) / 2;
    let mut previous_px = None;
    for line in &lines {
        if previous_px == Some(TITLE_PX) && line.px != TITLE_PX {
            y += GAP_PX;
        }
        let scale = PxScale::from(line.px);
        let (width, _) = text_size(scale, font, &line.text);
        let x = COVER_WIDTH.saturating_sub(width) / 2;
        draw_text_mut(&mut img, INK, x as i32, y as i32, scale, font, &line.text);
        y += line_height(line.px);
        previous_px = Some(line.px);
    }
    img
}

/// Render a cover for `title` and attach it to the artifact at `path`.
#[instrument(level = "info", skip(config), fields(path = %path.display()))]
pub async fn generate_cover(config: &BuildConfig, path: &Path, title: &str) -> Result<(), CoverError> {
    let font_bytes = tokio::fs::read(&config.cover_font)
        .await
        .map_err(|source| CoverError::Font {
            path: config.cover_font.display().to_string(),
            source,
        })?;
    let font = FontVec::try_from_vec(font_bytes)?;
    let img = render(title, &font);

    let image_file = tempfile::Builder::new()
        .prefix("cover-")
        .suffix(".png")
        .tempfile()?;
    img.save_with_format(image_file.path(), ImageFormat::Png)?;

    let args = vec![
        path.display().to_string(),
        format!("--cover={}", image_file.path().display()),
    ];
    run_with_timeout(&config.tools.meta, &args, Duration::from_secs(120)).await?;
    info!("Attached generated cover");
    Ok(())
}
