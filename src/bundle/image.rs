//! Portrait extraction from AssetBundles.
//!
//! The character hub bundles ship each portrait as a color texture plus a
//! sibling `<name>[alpha]` mask. Extraction collects every image at portrait
//! size, recomposes the alpha channel, crops the transparent borders, and
//! writes the result into a per-character directory.

use image::RgbaImage;
use image::imageops::FilterType;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use super::container::{Bundle, BundleObject};
use crate::error::{Result, SynthError};

/// Fragment textures below this side length are ignored.
pub const MIN_IMAGE_SIZE: u32 = 512;

/// Padding kept around the content box when cropping transparent borders.
const CROP_PADDING: u32 = 4;

static SPLIT_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_\d+$").unwrap());
static AVG_NPC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^avg_(npc_\d+)").unwrap());
static AVG_CHAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^avg_char_\d+_([a-z]+\d*)").unwrap());
static AVG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:avg|avgnew)_\d+_([a-z]+\d*)").unwrap());
static CHAR_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^char_\d+_([a-z]+\d*)").unwrap());

/// Character directory name for an image bundle stem.
///
/// `avg_npc_023_2` → `npc_023`, `avgnew_112_siege_1` → `siege`,
/// `char_002_amiya_summer_2` → `amiya`.
pub fn image_folder_name(ab_stem: &str) -> String {
    let stem = SPLIT_NUMBER_RE.replace(ab_stem, "");

    if let Some(caps) = AVG_NPC_RE.captures(&stem) {
        return caps[1].to_owned();
    }
    for re in [&*AVG_CHAR_RE, &*AVG_NAME_RE, &*CHAR_NAME_RE] {
        if let Some(caps) = re.captures(&stem) {
            return caps[1].to_owned();
        }
    }
    stem.into_owned()
}

/// Crop transparent borders, keeping a small padding around the content box.
pub fn crop_transparent(image: &RgbaImage, padding: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    for (x, y, px) in image.enumerate_pixels() {
        if px.0[3] != 0 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x > max_x {
        // Fully transparent; nothing to crop to.
        return image.clone();
    }

    let left = min_x.saturating_sub(padding);
    let top = min_y.saturating_sub(padding);
    let right = (max_x + 1 + padding).min(width);
    let bottom = (max_y + 1 + padding).min(height);
    image::imageops::crop_imm(image, left, top, right - left, bottom - top).to_image()
}

/// Replace the image's alpha channel with the mask's luminance.
pub fn apply_alpha_mask(image: &RgbaImage, mask: &RgbaImage) -> RgbaImage {
    let mask = if mask.dimensions() != image.dimensions() {
        image::imageops::resize(mask, image.width(), image.height(), FilterType::Lanczos3)
    } else {
        mask.clone()
    };

    let mut out = image.clone();
    for (dst, src) in out.pixels_mut().zip(mask.pixels()) {
        let [r, g, b, _] = src.0;
        // Rec.601 luma; the masks are grayscale so this is effectively r.
        let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
        dst.0[3] = luma as u8;
    }
    out
}

/// Extract composited portraits from one bundle into
/// `<output_dir>/<character>/<name>.<ext>`.
///
/// Returns `(written, skipped)` paths; an output that already exists is
/// skipped rather than overwritten.
pub fn extract_images_from_bundle(
    ab_path: &Path,
    output_dir: &Path,
    output_format: &str,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let bundle = Bundle::open(ab_path)?;

    let stem = ab_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SynthError::InvalidInput(format!("bad bundle path {}", ab_path.display())))?;
    let char_dir = output_dir.join(image_folder_name(stem));
    std::fs::create_dir_all(&char_dir)?;

    // Pass 1: collect portrait-sized images by name. Sprites resolve through
    // their backing texture; fragments below the size floor are dropped.
    let mut textures_by_id: HashMap<i64, RgbaImage> = HashMap::new();
    let mut sprites = Vec::new();
    let mut images: BTreeMap<String, RgbaImage> = BTreeMap::new();

    for obj in bundle.objects()? {
        match obj {
            BundleObject::Texture(tex) => {
                textures_by_id.insert(tex.path_id, tex.image.clone());
                if tex.image.width() >= MIN_IMAGE_SIZE && tex.image.height() >= MIN_IMAGE_SIZE {
                    images.insert(tex.name, tex.image);
                }
            }
            BundleObject::Sprite(sprite) => sprites.push(sprite),
            BundleObject::Audio(_) => {}
        }
    }
    for sprite in sprites {
        let Some(texture) = textures_by_id.get(&sprite.texture_path_id) else {
            continue;
        };
        let (x, y, w, h) = sprite.rect;
        let (w, h) = (w as u32, h as u32);
        if w < MIN_IMAGE_SIZE || h < MIN_IMAGE_SIZE {
            continue;
        }
        // Sprite rects use a bottom-left origin; textures are already flipped
        // to top-down rows here.
        let top = texture.height().saturating_sub(y as u32 + h);
        let frame = image::imageops::crop_imm(texture, x as u32, top, w, h).to_image();
        images.entry(sprite.name).or_insert(frame);
    }

    // Pass 2: per logical image, composite the alpha mask, crop, save.
    let mut extracted = Vec::new();
    let mut skipped = Vec::new();
    let mut processed: HashSet<String> = HashSet::new();

    let names: Vec<String> = images.keys().cloned().collect();
    for name in names {
        if name.contains("[alpha]") || processed.contains(&name) {
            continue;
        }
        let Some(base) = images.get(&name) else {
            continue;
        };

        let composited = if let Some(mask) = images.get(&format!("{name}[alpha]")) {
            apply_alpha_mask(base, mask)
        } else if let Some(mask) = images.get(&format!("{name}#1[alpha]")) {
            // The base variant of some portraits has no mask of its own.
            apply_alpha_mask(base, mask)
        } else {
            base.clone()
        };
        let cropped = crop_transparent(&composited, CROP_PADDING);

        let out_path = char_dir.join(format!("{name}.{output_format}"));
        processed.insert(name);
        if out_path.exists() {
            skipped.push(out_path);
            continue;
        }
        cropped
            .save(&out_path)
            .map_err(|e| SynthError::Codec(format!("failed to save {}: {e}", out_path.display())))?;
        extracted.push(out_path);
    }

    Ok((extracted, skipped))
}

/// Extract every `.ab` file in a directory of portrait bundles.
pub fn extract_image_folder(
    source_dir: &Path,
    output_dir: &Path,
    output_format: &str,
) -> Result<super::audio::ExtractStats> {
    let mut stats = super::audio::ExtractStats::default();
    let mut ab_files: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "ab"))
        .collect();
    ab_files.sort();

    let total = ab_files.len();
    for (i, ab_path) in ab_files.iter().enumerate() {
        info!("[{}/{total}] processing {}", i + 1, ab_path.display());
        match extract_images_from_bundle(ab_path, output_dir, output_format) {
            Ok((extracted, _skipped)) => {
                stats.processed += 1;
                stats.extracted += extracted.len();
            }
            Err(e) => {
                warn!("failed to extract {}: {e}", ab_path.display());
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}
