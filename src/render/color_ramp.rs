//! Single-band color ramps.
//!
//! A [`ColorScale`] names a ramp (built-in scheme or custom hex colors) and the value range it is
//! stretched over. A [`ColorRampProvider`] turns it into an interpolator; [`BuiltinRamps`] is the
//! default provider.

use std::sync::Arc;

use super::{RendererMetadata, TileRenderer, color_tile};
use crate::error::{CogError, CogResult};
use crate::raster::DecodedTile;

pub type Rgb = [u8; 3];

/// Maps a scaled sample value to a color.
pub type Interpolator = Box<dyn Fn(f64) -> Rgb + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum RampColors {
    /// One of [`color_scheme_names`], matched case-insensitively.
    Named(String),
    Custom(Vec<Rgb>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    pub colors: RampColors,
    pub min: f64,
    pub max: f64,
    pub reverse: bool,
    pub continuous: bool,
}

impl ColorScale {
    #[must_use]
    pub fn named(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            colors: RampColors::Named(name.into()),
            min,
            max,
            reverse: false,
            continuous: false,
        }
    }

    #[must_use]
    pub fn custom(colors: Vec<Rgb>, min: f64, max: f64) -> Self {
        Self {
            colors: RampColors::Custom(colors),
            min,
            max,
            reverse: false,
            continuous: false,
        }
    }

    #[must_use]
    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    /// Parse `<scheme>,<min>,<max>[,<modifiers>]` or `["#hex",...],<min>,<max>[,<modifiers>]`.
    ///
    /// Modifiers may contain `-` (reverse) and `c` (continuous).
    pub fn parse(params: &str) -> CogResult<Self> {
        let params = params.trim();
        if params.is_empty() {
            return Err(CogError::Configuration("color parameters are not defined".into()));
        }

        let (colors, rest) = if params.starts_with('[') {
            let end = params
                .find(']')
                .ok_or_else(|| CogError::Configuration(format!("unterminated color list in {params:?}")))?;
            let hex: Vec<String> = serde_json::from_str(&params[..=end])
                .map_err(|e| CogError::Configuration(format!("invalid color list: {e}")))?;
            let colors = hex
                .iter()
                .map(|h| {
                    parse_hex_color(h).ok_or_else(|| CogError::Configuration(format!("invalid hex color {h:?}")))
                })
                .collect::<CogResult<Vec<_>>>()?;
            let rest = params[end + 1..].trim_start_matches(',');
            (RampColors::Custom(colors), rest)
        } else {
            let (name, rest) = params.split_once(',').unwrap_or((params, ""));
            (RampColors::Named(name.trim().to_string()), rest)
        };

        let mut parts = rest.split(',').map(str::trim);
        let min = parse_bound(parts.next(), "min")?;
        let max = parse_bound(parts.next(), "max")?;
        let modifiers = parts.next().unwrap_or("");

        Ok(Self {
            colors,
            min,
            max,
            reverse: modifiers.contains('-'),
            continuous: modifiers.contains('c'),
        })
    }
}

fn parse_bound(value: Option<&str>, name: &str) -> CogResult<f64> {
    let value = value.filter(|v| !v.is_empty()).ok_or_else(|| CogError::Configuration(format!("missing color scale {name}")))?;
    value
        .parse()
        .map_err(|_| CogError::Configuration(format!("invalid color scale {name}: {value:?}")))
}

/// Builds interpolators for color scales.
pub trait ColorRampProvider: Send + Sync {
    fn interpolator(&self, scale: &ColorScale) -> CogResult<Interpolator>;
}

const VIRIDIS: &[Rgb] = &[
    [68, 1, 84],
    [72, 40, 120],
    [62, 74, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [109, 205, 89],
    [180, 222, 44],
    [253, 231, 37],
];

const MAGMA: &[Rgb] = &[
    [0, 0, 4],
    [28, 16, 68],
    [79, 18, 123],
    [129, 37, 129],
    [181, 54, 122],
    [229, 80, 100],
    [251, 135, 97],
    [254, 194, 135],
    [252, 253, 191],
];

const GREYS: &[Rgb] = &[
    [255, 255, 255],
    [240, 240, 240],
    [217, 217, 217],
    [189, 189, 189],
    [150, 150, 150],
    [115, 115, 115],
    [82, 82, 82],
    [37, 37, 37],
    [0, 0, 0],
];

const BLUES: &[Rgb] = &[
    [247, 251, 255],
    [222, 235, 247],
    [198, 219, 239],
    [158, 202, 225],
    [107, 174, 214],
    [66, 146, 198],
    [33, 113, 181],
    [8, 81, 156],
    [8, 48, 107],
];

const REDS: &[Rgb] = &[
    [255, 245, 240],
    [254, 224, 210],
    [252, 187, 161],
    [252, 146, 114],
    [251, 106, 74],
    [239, 59, 44],
    [203, 24, 29],
    [165, 15, 21],
    [103, 0, 13],
];

const GREENS: &[Rgb] = &[
    [247, 252, 245],
    [229, 245, 224],
    [199, 233, 192],
    [161, 217, 155],
    [116, 196, 118],
    [65, 171, 93],
    [35, 139, 69],
    [0, 109, 44],
    [0, 68, 27],
];

const RDYLGN: &[Rgb] = &[
    [165, 0, 38],
    [215, 48, 39],
    [244, 109, 67],
    [253, 174, 97],
    [254, 224, 139],
    [255, 255, 191],
    [217, 239, 139],
    [166, 217, 106],
    [102, 189, 99],
    [26, 152, 80],
    [0, 104, 55],
];

const SPECTRAL: &[Rgb] = &[
    [158, 1, 66],
    [213, 62, 79],
    [244, 109, 67],
    [253, 174, 97],
    [254, 224, 139],
    [255, 255, 191],
    [230, 245, 152],
    [171, 221, 164],
    [102, 194, 165],
    [50, 136, 189],
    [94, 79, 162],
];

const TERRAIN: &[Rgb] = &[
    [51, 51, 153],
    [2, 152, 254],
    [1, 204, 102],
    [255, 255, 153],
    [128, 92, 84],
    [255, 255, 255],
];

const SCHEMES: &[(&str, &[Rgb])] = &[
    ("viridis", VIRIDIS),
    ("magma", MAGMA),
    ("greys", GREYS),
    ("blues", BLUES),
    ("reds", REDS),
    ("greens", GREENS),
    ("rdylgn", RDYLGN),
    ("spectral", SPECTRAL),
    ("terrain", TERRAIN),
];

/// Names accepted by [`RampColors::Named`].
#[must_use]
pub fn color_scheme_names() -> Vec<&'static str> {
    SCHEMES.iter().map(|(name, _)| *name).collect()
}

fn scheme(name: &str) -> Option<&'static [Rgb]> {
    let name = name.to_ascii_lowercase();
    SCHEMES.iter().find(|(n, _)| *n == name).map(|(_, stops)| *stops)
}

/// Parse `#rgb` or `#rrggbb`. The leading `#` is optional.
#[must_use]
pub fn parse_hex_color(s: &str) -> Option<Rgb> {
    let s = s.trim();
    let s = s.strip_prefix('#').unwrap_or(s);
    if !s.is_ascii() {
        return None;
    }
    match s.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (channel, digit) in rgb.iter_mut().zip(s.chars()) {
                let v = digit.to_digit(16)? as u8;
                *channel = v * 17;
            }
            Some(rgb)
        }
        6 => Some([
            u8::from_str_radix(&s[0..2], 16).ok()?,
            u8::from_str_radix(&s[2..4], 16).ok()?,
            u8::from_str_radix(&s[4..6], 16).ok()?,
        ]),
        _ => None,
    }
}

/// The built-in schemes plus custom color lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRamps;

impl ColorRampProvider for BuiltinRamps {
    fn interpolator(&self, scale: &ColorScale) -> CogResult<Interpolator> {
        let ColorScale {
            min,
            max,
            reverse,
            continuous,
            ..
        } = *scale;
        if !min.is_finite() || !max.is_finite() {
            return Err(CogError::Configuration(format!("color scale bounds must be finite, got {min}..{max}")));
        }
        if min > max {
            return Err(CogError::Configuration(format!("color scale min {min} is greater than max {max}")));
        }

        let mut colors = match &scale.colors {
            RampColors::Named(name) => scheme(name)
                .ok_or_else(|| CogError::Configuration(format!("{name:?} is not a supported color scheme")))?
                .to_vec(),
            RampColors::Custom(colors) => colors.clone(),
        };
        if colors.is_empty() {
            return Err(CogError::Configuration("color list is empty".into()));
        }
        if reverse {
            colors.reverse();
        }

        let position = move |value: f64| -> f64 {
            if max > min {
                ((value - min) / (max - min)).clamp(0.0, 1.0)
            } else if value > min {
                1.0
            } else {
                0.0
            }
        };

        if continuous {
            Ok(Box::new(move |value| interpolate_linear(&colors, position(value))))
        } else {
            Ok(Box::new(move |value| {
                let bucket = (position(value) * colors.len() as f64).floor() as usize;
                colors[bucket.min(colors.len() - 1)]
            }))
        }
    }
}

fn interpolate_linear(colors: &[Rgb], t: f64) -> Rgb {
    let last = colors.len() - 1;
    let x = t * last as f64;
    let i = (x.floor() as usize).min(last);
    if i == last {
        return colors[last];
    }
    let f = x - i as f64;
    let (a, b) = (colors[i], colors[i + 1]);
    let lerp = |c: usize| (f64::from(a[c]) + f * (f64::from(b[c]) - f64::from(a[c]))).round() as u8;
    [lerp(0), lerp(1), lerp(2)]
}

/// Maps band 0 through a color scale. No-data, non-finite and fill pixels stay transparent.
pub struct ColorRampRenderer {
    provider: Arc<dyn ColorRampProvider>,
    scale: ColorScale,
}

impl ColorRampRenderer {
    #[must_use]
    pub fn new(provider: Arc<dyn ColorRampProvider>, scale: ColorScale) -> Self {
        Self { provider, scale }
    }
}

impl TileRenderer for ColorRampRenderer {
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>> {
        let interpolate = self.provider.interpolator(&self.scale)?;
        let raster = &metadata.raster;

        color_tile(tile, metadata, |index, rgba| {
            if tile.is_fill(index) {
                return;
            }
            let px = raster.scaled(tile.value(0, index));
            if raster.is_missing(px) {
                return;
            }
            let [r, g, b] = interpolate(px);
            rgba.copy_from_slice(&[r, g, b, 255]);
        })
    }
}
