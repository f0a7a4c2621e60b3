use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use qrcode::{Color as QrColor, EcLevel, QrCode};
use resvg::{tiny_skia, usvg};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::badges::decode_data_url;

pub const CARD_WIDTH: u32 = 1200;
const PADDING: u32 = 48;
const HEADER_HEIGHT: u32 = 180;
const ROW_HEIGHT: u32 = 150;
const ROW_GAP: u32 = 16;
const BADGE_SIZE: u32 = 80;
const SCORE_RADIUS: i64 = 38;
const QR_TARGET: u32 = 300;
const QR_MARGIN: u32 = 4;
const FOOTER_CAPTION: u32 = 60;

const BG_TOP: [u8; 3] = [0x02, 0x06, 0x17];
const BG_BOTTOM: [u8; 3] = [0x0f, 0x17, 0x2a];
const ROW_BG: Rgba<u8> = Rgba([0x1e, 0x29, 0x3b, 0xff]);
const HOME_SCORE: Rgba<u8> = Rgba([0x25, 0x63, 0xeb, 0xff]);
const AWAY_SCORE: Rgba<u8> = Rgba([0x7c, 0x3a, 0xed, 0xff]);
const WHITE: Rgba<u8> = Rgba([0xf8, 0xfa, 0xfc, 0xff]);
const MUTED: Rgba<u8> = Rgba([0x94, 0xa3, 0xb8, 0xff]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 0xff]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRow {
    pub home: String,
    pub away: String,
    pub home_badge: String,
    pub away_badge: String,
    pub home_score: String,
    pub away_score: String,
    pub kickoff_label: String,
    pub venue: String,
}

/// Everything drawn on the shareable graphic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportCard {
    pub title: String,
    pub subtitle: String,
    pub rows: Vec<CardRow>,
    pub qr_payload: String,
}

pub trait Rasterizer: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// Returns encoded PNG bytes.
    fn rasterize(&self, card: &ExportCard) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngRasterizer;

impl Rasterizer for PngRasterizer {
    fn rasterize(&self, card: &ExportCard) -> Result<Vec<u8>> {
        let qr = QrCode::with_error_correction_level(card.qr_payload.as_bytes(), EcLevel::M)
            .map_err(|err| anyhow::anyhow!("qr encode: {err}"))?;
        let qr_image = qr_to_image(&qr);

        let height = card_height(card.rows.len(), qr_image.height());
        let mut img = RgbaImage::new(CARD_WIDTH, height);
        paint_background(&mut img);

        draw_text(&mut img, PADDING as i64, PADDING as i64, &card.title, 6, WHITE);
        draw_text(&mut img, PADDING as i64, PADDING as i64 + 62, &card.subtitle, 3, MUTED);

        let mut y = HEADER_HEIGHT;
        for row in &card.rows {
            draw_row(&mut img, y, row);
            y += ROW_HEIGHT + ROW_GAP;
        }

        let qr_x = (CARD_WIDTH - qr_image.width()) / 2;
        let qr_y = y + 24;
        imageops::overlay(&mut img, &qr_image, qr_x as i64, qr_y as i64);
        let caption = "SCAN FOR PREDICTION DATA";
        let cx = (CARD_WIDTH as i64 - text_width(caption, 2) as i64) / 2;
        draw_text(&mut img, cx, (qr_y + qr_image.height() + 20) as i64, caption, 2, MUTED);

        encode_png(img)
    }
}

pub fn card_height(rows: usize, qr_height: u32) -> u32 {
    HEADER_HEIGHT + rows as u32 * (ROW_HEIGHT + ROW_GAP) + 24 + qr_height + FOOTER_CAPTION + PADDING
}

pub fn encode_png(img: RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("png encode failed")?;
    Ok(buf)
}

fn paint_background(img: &mut RgbaImage) {
    let h = img.height().max(1) as f32;
    for (_, y, px) in img.enumerate_pixels_mut() {
        let t = y as f32 / h;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        *px = Rgba([
            mix(BG_TOP[0], BG_BOTTOM[0]),
            mix(BG_TOP[1], BG_BOTTOM[1]),
            mix(BG_TOP[2], BG_BOTTOM[2]),
            0xff,
        ]);
    }
}

fn qr_to_image(code: &QrCode) -> RgbaImage {
    let modules = code.width() as u32;
    let total = modules + QR_MARGIN * 2;
    let scale = (QR_TARGET / total).max(2);
    let mut img = RgbaImage::from_pixel(total * scale, total * scale, WHITE);
    for (i, color) in code.to_colors().into_iter().enumerate() {
        if color != QrColor::Dark {
            continue;
        }
        let mx = i as u32 % modules + QR_MARGIN;
        let my = i as u32 / modules + QR_MARGIN;
        fill_rect(&mut img, (mx * scale) as i64, (my * scale) as i64, scale, scale, BLACK);
    }
    img
}

fn draw_row(img: &mut RgbaImage, top: u32, row: &CardRow) {
    let left = PADDING as i64;
    let right = (CARD_WIDTH - PADDING) as i64;
    fill_rect(img, left, top as i64, CARD_WIDTH - PADDING * 2, ROW_HEIGHT, ROW_BG);

    let badge_y = top as i64 + 20;
    draw_badge(img, left + 16, badge_y, &row.home, &row.home_badge);
    draw_badge(img, right - 16 - BADGE_SIZE as i64, badge_y, &row.away, &row.away_badge);

    let name_y = badge_y + (BADGE_SIZE as i64 - 21) / 2;
    let max_name = 300;
    let home = fit_text(&row.home, 3, max_name);
    draw_text(img, left + 32 + BADGE_SIZE as i64, name_y, &home, 3, WHITE);
    let away = fit_text(&row.away, 3, max_name);
    let away_x = right - 32 - BADGE_SIZE as i64 - text_width(&away, 3) as i64;
    draw_text(img, away_x, name_y, &away, 3, WHITE);

    let center = CARD_WIDTH as i64 / 2;
    let cy = badge_y + BADGE_SIZE as i64 / 2;
    draw_score(img, center - 70, cy, &row.home_score, HOME_SCORE);
    draw_score(img, center + 70, cy, &row.away_score, AWAY_SCORE);
    draw_text(img, center - 7, cy - 3, "-", 2, MUTED);

    let meta = if row.venue.is_empty() {
        row.kickoff_label.clone()
    } else {
        format!("{} - {}", row.kickoff_label, row.venue)
    };
    let meta = fit_text(&meta, 2, CARD_WIDTH - PADDING * 4);
    let mx = center - text_width(&meta, 2) as i64 / 2;
    draw_text(img, mx, top as i64 + ROW_HEIGHT as i64 - 30, &meta, 2, MUTED);
}

fn draw_score(img: &mut RgbaImage, cx: i64, cy: i64, score: &str, color: Rgba<u8>) {
    fill_circle(img, cx, cy, SCORE_RADIUS, color);
    let shown = if score.is_empty() { "0" } else { score };
    let w = text_width(shown, 5) as i64;
    draw_text(img, cx - w / 2, cy - 17, shown, 5, WHITE);
}

fn draw_badge(img: &mut RgbaImage, x: i64, y: i64, team: &str, data_url: &str) {
    if let Some(badge) = decode_badge(data_url) {
        imageops::overlay(img, &badge, x, y);
        return;
    }
    let [r, g, b] = placeholder_color(team);
    fill_circle(
        img,
        x + BADGE_SIZE as i64 / 2,
        y + BADGE_SIZE as i64 / 2,
        BADGE_SIZE as i64 / 2,
        Rgba([r, g, b, 0xff]),
    );
    let initials = initials(team);
    let w = text_width(&initials, 3) as i64;
    draw_text(
        img,
        x + (BADGE_SIZE as i64 - w) / 2,
        y + (BADGE_SIZE as i64 - 21) / 2,
        &initials,
        3,
        WHITE,
    );
}

/// Decodes a badge data URL into a `BADGE_SIZE` square. The embedded 1x1
/// placeholder and anything undecodable yield `None`.
fn decode_badge(data_url: &str) -> Option<RgbaImage> {
    let (mime, bytes) = decode_data_url(data_url)?;
    if mime == "image/svg+xml" {
        return rasterize_svg(&bytes, BADGE_SIZE);
    }
    let decoded = image::load_from_memory(&bytes).ok()?;
    if decoded.width() <= 1 && decoded.height() <= 1 {
        return None;
    }
    Some(
        decoded
            .resize_exact(BADGE_SIZE, BADGE_SIZE, FilterType::Triangle)
            .to_rgba8(),
    )
}

/// Renders an SVG crest centred in a `size` square, keeping its aspect ratio.
fn rasterize_svg(bytes: &[u8], size: u32) -> Option<RgbaImage> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default()).ok()?;
    let view = tree.size();
    if view.width() <= 1.0 && view.height() <= 1.0 {
        return None;
    }
    let scale = (size as f32 / view.width()).min(size as f32 / view.height());
    let dx = (size as f32 - view.width() * scale) / 2.0;
    let dy = (size as f32 - view.height() * scale) / 2.0;
    let mut pixmap = tiny_skia::Pixmap::new(size, size)?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_row(scale, 0.0, 0.0, scale, dx, dy),
        &mut pixmap.as_mut(),
    );
    let raw: Vec<u8> = pixmap
        .pixels()
        .iter()
        .flat_map(|px| {
            let c = px.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(size, size, raw)
}

/// Stable per-team colour, lifted so white initials stay readable.
pub fn placeholder_color(team: &str) -> [u8; 3] {
    let digest = Sha256::digest(team.trim().as_bytes());
    [
        64 + digest[0] / 2,
        64 + digest[1] / 2,
        64 + digest[2] / 2,
    ]
}

fn initials(team: &str) -> String {
    team.split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(3)
        .collect::<String>()
        .to_uppercase()
}

fn fill_rect(img: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: Rgba<u8>) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w as i64).min(img.width() as i64);
    let y1 = (y + h as i64).min(img.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            img.put_pixel(px as u32, py as u32, color);
        }
    }
}

fn fill_circle(img: &mut RgbaImage, cx: i64, cy: i64, r: i64, color: Rgba<u8>) {
    for py in (cy - r).max(0)..(cy + r).min(img.height() as i64) {
        for px in (cx - r).max(0)..(cx + r).min(img.width() as i64) {
            let (dx, dy) = (px - cx, py - cy);
            if dx * dx + dy * dy <= r * r {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 { 0 } else { n * 6 * scale - scale }
}

fn fit_text(text: &str, scale: u32, max_width: u32) -> String {
    if text_width(text, scale) <= max_width {
        return text.to_string();
    }
    let mut out: String = text.chars().collect();
    while !out.is_empty() && text_width(&format!("{out}.."), scale) > max_width {
        out.pop();
    }
    format!("{}..", out.trim_end())
}

fn draw_text(img: &mut RgbaImage, x: i64, y: i64, text: &str, scale: u32, color: Rgba<u8>) {
    let folded: String = text.nfd().filter(|c| !('\u{0300}'..='\u{036f}').contains(c)).collect();
    let mut cursor = x;
    for ch in folded.chars() {
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (ry, bits) in rows.iter().enumerate() {
                for rx in 0..5 {
                    if bits & (0x10 >> rx) != 0 {
                        fill_rect(
                            img,
                            cursor + (rx * scale) as i64,
                            y + (ry as u32 * scale) as i64,
                            scale,
                            scale,
                            color,
                        );
                    }
                }
            }
        }
        cursor += (6 * scale) as i64;
    }
}

/// 5x7 bitmap glyphs, one byte per row, high bit on the left.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '\'' => [0x0C, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '&' => [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badges::{FALLBACK_BADGE, encode_data_url};

    fn row(home: &str, away: &str, badge: &str) -> CardRow {
        CardRow {
            home: home.to_string(),
            away: away.to_string(),
            home_badge: badge.to_string(),
            away_badge: FALLBACK_BADGE.to_string(),
            home_score: "2".to_string(),
            away_score: String::new(),
            kickoff_label: "Sat 16 Aug 19:00 AST".to_string(),
            venue: "Emirates Stadium".to_string(),
        }
    }

    #[test]
    fn renders_png_sized_for_rows() {
        let card = ExportCard {
            title: "GW 1 PREDICTIONS".to_string(),
            subtitle: "Exported 2025-08-16 12:00".to_string(),
            rows: vec![
                row("Arsenal", "Chelsea", FALLBACK_BADGE),
                row("Brighton & Hove Albion", "Nottingham Forest", "not a data url"),
            ],
            qr_payload: r#"{"week":1,"matches":[]}"#.to_string(),
        };
        let png = PngRasterizer.rasterize(&card).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), CARD_WIDTH);
        assert!(decoded.height() > HEADER_HEIGHT + 2 * ROW_HEIGHT);
    }

    #[test]
    fn raster_badges_are_decoded() {
        let mut src = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        src.put_pixel(0, 0, Rgba([0, 255, 0, 255]));
        let png = encode_png(src).unwrap();
        let url = encode_data_url("image/png", &png);
        let badge = decode_badge(&url).unwrap();
        assert_eq!(badge.dimensions(), (BADGE_SIZE, BADGE_SIZE));
        assert!(decode_badge(FALLBACK_BADGE).is_none());
        assert!(decode_badge("data:image/png;base64,bm90IGFuIGltYWdl").is_none());
    }

    const RED_CREST: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="40" viewBox="0 0 40 40"><rect width="40" height="40" fill="#dc2626"/></svg>"##;

    #[test]
    fn svg_crests_are_rasterized() {
        let badge = decode_badge(&encode_data_url("image/svg+xml", RED_CREST)).unwrap();
        assert_eq!(badge.dimensions(), (BADGE_SIZE, BADGE_SIZE));
        let centre = badge.get_pixel(BADGE_SIZE / 2, BADGE_SIZE / 2);
        assert_eq!(centre.0, [0xdc, 0x26, 0x26, 0xff]);

        assert!(decode_badge(&encode_data_url("image/svg+xml", b"<svg")).is_none());
    }

    #[test]
    fn svg_crest_replaces_the_initials_tile() {
        let mut img = RgbaImage::from_pixel(BADGE_SIZE, BADGE_SIZE, BLACK);
        let url = encode_data_url("image/svg+xml", RED_CREST);
        draw_badge(&mut img, 0, 0, "Arsenal", &url);
        let [r, g, b] = placeholder_color("Arsenal");
        let top = img.get_pixel(BADGE_SIZE / 2, 8);
        assert_ne!(top.0, [r, g, b, 0xff]);
        assert_eq!(top.0, [0xdc, 0x26, 0x26, 0xff]);
    }

    #[test]
    fn placeholder_colour_is_stable_per_team() {
        assert_eq!(placeholder_color("Arsenal"), placeholder_color(" Arsenal "));
        assert_ne!(placeholder_color("Arsenal"), placeholder_color("Chelsea"));
        assert!(placeholder_color("Everton").iter().all(|c| *c >= 64));
    }

    #[test]
    fn long_names_are_shortened_to_fit() {
        let fitted = fit_text("Wolverhampton Wanderers Football Club", 3, 300);
        assert!(fitted.ends_with(".."));
        assert!(text_width(&fitted, 3) <= 300);
        assert_eq!(fit_text("Spurs", 3, 300), "Spurs");
    }

    #[test]
    fn oversized_payload_is_an_error() {
        let card = ExportCard {
            title: String::new(),
            subtitle: String::new(),
            rows: Vec::new(),
            qr_payload: "x".repeat(5000),
        };
        assert!(PngRasterizer.rasterize(&card).is_err());
    }
}
