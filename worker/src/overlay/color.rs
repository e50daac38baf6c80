//! Coloring rules and deterministic palette resolution
//!
//! Everything here is read-only per request: a [`ColorContext`] is built once
//! from the request's coloring settings and shared by reference with every
//! painter.

use serde::Deserialize;
use std::collections::HashSet;

use crate::labels::Label;

/// RGBA color, straight (not premultiplied) alpha
pub type Rgba = [u8; 4];

const FALLBACK_COLOR: Rgba = [255, 255, 255, 255];

/// Palette used when a request does not carry one
pub const DEFAULT_COLOR_POOL: &[&str] = &[
    "#ee0000", "#ee6600", "#993300", "#996633", "#999900", "#009900", "#003300", "#009999",
    "#000099", "#0066ff", "#6600ff", "#cc33cc", "#777799",
];

/// What a label's color is keyed on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorBy {
    #[default]
    Field,
    Value,
    Instance,
}

/// Request-wide coloring settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Coloring {
    pub by: ColorBy,
    pub pool: Vec<String>,
    /// Default heatmap color scale
    pub scale: Vec<[u8; 3]>,
    pub seed: i64,
    /// Segmentation colors indexed by mask value
    pub targets: Vec<String>,
}

impl Default for Coloring {
    fn default() -> Self {
        Self {
            by: ColorBy::Field,
            pool: DEFAULT_COLOR_POOL.iter().map(|c| c.to_string()).collect(),
            scale: Vec::new(),
            seed: 0,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValueColor {
    pub value: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaskTargetColor {
    pub int_target: u32,
    pub color: String,
}

/// Per-field color overrides
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomizeColor {
    pub path: String,
    pub field_color: Option<String>,
    pub color_by_attribute: Option<String>,
    pub value_colors: Vec<ValueColor>,
    pub mask_targets_colors: Vec<MaskTargetColor>,
}

/// Colors for highlighted label tags
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabelTagColors {
    pub field_color: Option<String>,
    pub value_colors: Vec<ValueColor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ColorscaleStop {
    /// Position in `[0, 1]`
    pub value: f64,
    pub color: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldColorscale {
    pub path: Option<String>,
    /// Explicit stops; takes precedence over `rgb`
    pub list: Vec<ColorscaleStop>,
    /// Evenly spaced colors
    pub rgb: Vec<[u8; 3]>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Colorscale {
    pub fields: Vec<FieldColorscale>,
    pub default: Option<FieldColorscale>,
}

/// Resolved coloring state for one request
#[derive(Debug, Clone, Default)]
pub struct ColorContext {
    pub coloring: Coloring,
    pub customize: Vec<CustomizeColor>,
    pub tag_colors: LabelTagColors,
    pub colorscale: Colorscale,
    pub selected_tags: HashSet<String>,
}

impl ColorContext {
    fn customization(&self, path: &str) -> Option<&CustomizeColor> {
        self.customize.iter().find(|custom| custom.path == path)
    }

    fn pool_color(&self, key: &str) -> Rgba {
        parse_hex(&resolve_color(&self.coloring.pool, self.coloring.seed, key)).unwrap_or(FALLBACK_COLOR)
    }

    /// Color of a field, honoring its custom field color
    pub fn field_color(&self, path: &str) -> Rgba {
        self.customization(path)
            .and_then(|custom| custom.field_color.as_deref())
            .and_then(parse_hex)
            .unwrap_or_else(|| self.pool_color(path))
    }

    /// Color of one label at `path`
    pub fn label_color(&self, path: &str, label: &Label) -> Rgba {
        if let Some(tag) = label.tags.iter().find(|tag| self.selected_tags.contains(*tag)) {
            return self.tag_color(tag);
        }

        let custom = self.customization(path);
        match self.coloring.by {
            ColorBy::Field => self.field_color(path),
            ColorBy::Value => {
                let attribute = custom
                    .and_then(|c| c.color_by_attribute.as_deref())
                    .unwrap_or("label");
                let Some(value) = label.attribute_string(attribute) else {
                    return self.field_color(path);
                };
                custom
                    .and_then(|c| find_value_color(&c.value_colors, &value))
                    .unwrap_or_else(|| self.pool_color(&value))
            }
            ColorBy::Instance => match label.instance_id() {
                Some(id) => self.pool_color(&id),
                None => self.field_color(path),
            },
        }
    }

    fn tag_color(&self, tag: &str) -> Rgba {
        find_value_color(&self.tag_colors.value_colors, tag)
            .or_else(|| self.tag_colors.field_color.as_deref().and_then(parse_hex))
            .unwrap_or_else(|| self.pool_color(tag))
    }

    /// Color of segmentation value `target` in the field at `path`
    pub fn mask_target_color(&self, path: &str, target: u32) -> Rgba {
        let custom = self.customization(path).and_then(|custom| {
            custom
                .mask_targets_colors
                .iter()
                .find(|t| t.int_target == target)
                .and_then(|t| parse_hex(&t.color))
        });
        if let Some(color) = custom {
            return color;
        }

        if self.coloring.by == ColorBy::Field {
            return self.field_color(path);
        }

        let targets = &self.coloring.targets;
        if !targets.is_empty() {
            let index = target as usize % targets.len();
            if let Some(color) = parse_hex(&targets[index]) {
                return color;
            }
        }
        self.pool_color(&target.to_string())
    }

    /// 256-entry lookup table for heatmaps at `path`, if any scale applies
    pub fn colorscale(&self, path: &str) -> Option<Vec<Rgba>> {
        let field = self
            .colorscale
            .fields
            .iter()
            .find(|scale| scale.path.as_deref() == Some(path))
            .or(self.colorscale.default.as_ref());

        let mut stops: Vec<(f64, Rgba)> = match field {
            Some(scale) if !scale.list.is_empty() => scale
                .list
                .iter()
                .filter_map(|stop| Some((stop.value.clamp(0.0, 1.0), parse_hex(&stop.color)?)))
                .collect(),
            Some(scale) if !scale.rgb.is_empty() => evenly_spaced(&scale.rgb),
            _ => evenly_spaced(&self.coloring.scale),
        };

        if stops.is_empty() {
            return None;
        }
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));
        Some((0..256).map(|i| interpolate(&stops, i as f64 / 255.0)).collect())
    }
}

fn find_value_color(colors: &[ValueColor], value: &str) -> Option<Rgba> {
    colors
        .iter()
        .find(|vc| vc.value == value)
        .and_then(|vc| parse_hex(&vc.color))
}

fn evenly_spaced(colors: &[[u8; 3]]) -> Vec<(f64, Rgba)> {
    let last = colors.len().saturating_sub(1).max(1) as f64;
    colors
        .iter()
        .enumerate()
        .map(|(i, [r, g, b])| (i as f64 / last, [*r, *g, *b, 255]))
        .collect()
}

/// Linear interpolation between sorted-by-position stops
fn interpolate(stops: &[(f64, Rgba)], t: f64) -> Rgba {
    let mut lower = stops[0];
    for &upper in stops {
        if upper.0 >= t {
            let span = upper.0 - lower.0;
            if span <= f64::EPSILON {
                return upper.1;
            }
            let f = (t - lower.0) / span;
            let mut out = [0u8; 4];
            for (c, o) in out.iter_mut().enumerate() {
                let a = lower.1[c] as f64;
                let b = upper.1[c] as f64;
                *o = (a + (b - a) * f).round() as u8;
            }
            return out;
        }
        lower = upper;
    }
    lower.1
}

/// Pick a color for `key` from `pool`, deterministically for a given `seed`.
///
/// An empty pool falls back to [`DEFAULT_COLOR_POOL`].
pub fn resolve_color(pool: &[String], seed: i64, key: &str) -> String {
    let hash = fnv1a(key.as_bytes()) ^ (seed as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    if pool.is_empty() {
        let index = (hash % DEFAULT_COLOR_POOL.len() as u64) as usize;
        return DEFAULT_COLOR_POOL[index].to_string();
    }
    pool[(hash % pool.len() as u64) as usize].clone()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`
pub fn parse_hex(color: &str) -> Option<Rgba> {
    let hex = color.trim().strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();

    match hex.len() {
        3 => {
            let mut out = [255u8; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        6 | 8 if hex.is_ascii() => {
            let r = channel(&hex[0..2])?;
            let g = channel(&hex[2..4])?;
            let b = channel(&hex[4..6])?;
            let a = if hex.len() == 8 { channel(&hex[6..8])? } else { 255 };
            Some([r, g, b, a])
        }
        _ => None,
    }
}
