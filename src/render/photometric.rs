//! Photometric decoders following the TIFF `PhotometricInterpretation` tag.
//!
//! Single-band interpretations (grayscale and palette) see `offset + raw * scale`; multi-band
//! ones read samples as stored. A pixel is transparent when its samples equal the transparent
//! value (the no-data value, or `0` when unset).

use super::{RendererMetadata, TileRenderer, clamp_u8, color_tile};
use crate::error::{CogError, CogResult};
use crate::raster::DecodedTile;

/// TIFF photometric interpretation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Photometric {
    WhiteIsZero = 0,
    BlackIsZero = 1,
    Rgb = 2,
    Palette = 3,
    TransparencyMask = 4,
    Cmyk = 5,
    YCbCr = 6,
    CieLab = 8,
    IccLab = 9,
    ItuLab = 10,
}

impl Photometric {
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::WhiteIsZero,
            1 => Self::BlackIsZero,
            2 => Self::Rgb,
            3 => Self::Palette,
            4 => Self::TransparencyMask,
            5 => Self::Cmyk,
            6 => Self::YCbCr,
            8 => Self::CieLab,
            9 => Self::IccLab,
            10 => Self::ItuLab,
            _ => return None,
        })
    }
}

const DEFAULT_BITS_PER_SAMPLE: u16 = 8;

// CIE D65 reference white
const XN: f64 = 0.95047;
const YN: f64 = 1.0;
const ZN: f64 = 1.08883;

/// Renders tiles according to their photometric interpretation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhotometricRenderer;

impl TileRenderer for PhotometricRenderer {
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>> {
        let raster = &metadata.raster;
        let code = raster.photometric_interpretation;
        let photometric = code
            .and_then(Photometric::from_code)
            .ok_or(CogError::UnsupportedPhotometric(code))?;

        let bits = raster
            .bits_per_sample
            .as_ref()
            .and_then(|bits| bits.first().copied())
            .unwrap_or(DEFAULT_BITS_PER_SAMPLE);
        let max = 2f64.powi(i32::from(bits));
        let transparent = raster.no_data.unwrap_or(0.0);

        let decode: Box<dyn Fn(&[f64; 4]) -> [u8; 4]> = match photometric {
            Photometric::WhiteIsZero => Box::new(move |px| from_white_is_zero(px[0], max, transparent)),
            Photometric::BlackIsZero => Box::new(move |px| from_black_is_zero(px[0], max, transparent)),
            Photometric::Rgb => Box::new(move |&[r, g, b, _]: &[f64; 4]| from_rgb(&[r, g, b], transparent)),
            Photometric::Palette => {
                let color_map = raster.color_map.clone().ok_or(CogError::MissingColorMap)?;
                Box::new(move |px| from_palette(px[0], &color_map, transparent))
            }
            Photometric::Cmyk => Box::new(move |px| from_cmyk(px, transparent)),
            Photometric::YCbCr => Box::new(move |&[y, cb, cr, _]: &[f64; 4]| from_ycbcr(&[y, cb, cr], transparent)),
            Photometric::CieLab => Box::new(move |&[l, a, b, _]: &[f64; 4]| from_cie_lab(&[l, a, b], transparent)),
            other => return Err(CogError::UnsupportedPhotometric(Some(other as u16))),
        };

        let bands = match photometric {
            Photometric::WhiteIsZero | Photometric::BlackIsZero | Photometric::Palette => 1,
            Photometric::Cmyk => 4,
            _ => 3,
        };
        if tile.band_count() < bands {
            return Err(CogError::Format(format!(
                "{photometric:?} needs {bands} bands, tile has {}",
                tile.band_count()
            )));
        }

        let scaled = bands == 1;
        let mut px = [0.0; 4];
        color_tile(tile, metadata, |index, rgba| {
            if tile.is_fill(index) {
                return;
            }
            for (band, value) in px.iter_mut().take(bands).enumerate() {
                let raw = tile.value(band, index);
                *value = if scaled { raster.scaled(raw) } else { raw };
            }
            rgba.copy_from_slice(&decode(&px));
        })
    }
}

#[inline]
fn alpha(transparent: bool) -> u8 {
    if transparent { 0 } else { 255 }
}

#[must_use]
pub fn from_white_is_zero(value: f64, max: f64, transparent: f64) -> [u8; 4] {
    let v = clamp_u8(255.0 - value / max * 255.0);
    [v, v, v, alpha(value == transparent)]
}

#[must_use]
pub fn from_black_is_zero(value: f64, max: f64, transparent: f64) -> [u8; 4] {
    let v = clamp_u8(value / max * 255.0);
    [v, v, v, alpha(value == transparent)]
}

#[must_use]
pub fn from_rgb(&[r, g, b]: &[f64; 3], transparent: f64) -> [u8; 4] {
    [
        clamp_u8(r),
        clamp_u8(g),
        clamp_u8(b),
        alpha(r == transparent && g == transparent && b == transparent),
    ]
}

/// `color_map` is the flattened `[R..., G..., B...]` TIFF table of 16-bit entries.
#[must_use]
pub fn from_palette(index: f64, color_map: &[u16], transparent: f64) -> [u8; 4] {
    let green_offset = color_map.len() / 3;
    let blue_offset = green_offset * 2;
    let channel = |offset: usize| {
        let entry = (index >= 0.0 && index.is_finite())
            .then(|| color_map.get(index as usize + offset))
            .flatten();
        entry.map_or(0, |&v| clamp_u8(f64::from(v) / 65536.0 * 256.0))
    };
    [
        channel(0),
        channel(green_offset),
        channel(blue_offset),
        alpha(index == transparent),
    ]
}

#[must_use]
pub fn from_cmyk(&[c, m, y, k]: &[f64; 4], transparent: f64) -> [u8; 4] {
    let channel = |v: f64| clamp_u8(255.0 * ((255.0 - v) / 256.0) * ((255.0 - k) / 256.0));
    [
        channel(c),
        channel(m),
        channel(y),
        alpha(c == transparent && m == transparent && y == transparent && k == transparent),
    ]
}

#[must_use]
pub fn from_ycbcr(&[y, cb, cr]: &[f64; 3], transparent: f64) -> [u8; 4] {
    [
        clamp_u8(y + 1.402 * (cr - 128.0)),
        clamp_u8(y - 0.34414 * (cb - 128.0) - 0.71414 * (cr - 128.0)),
        clamp_u8(y + 1.772 * (cb - 128.0)),
        alpha(y == transparent && cb == transparent && cr == transparent),
    ]
}

/// CIE L*a*b* with `a*`/`b*` stored as signed bytes, D65 white, sRGB gamma.
#[must_use]
pub fn from_cie_lab(&[l, a, b]: &[f64; 3], transparent: f64) -> [u8; 4] {
    let a = signed_byte(a);
    let b = signed_byte(b);

    let fy = (l + 16.0) / 116.0;
    let fx = a / 500.0 + fy;
    let fz = fy - b / 200.0;

    let x = XN * lab_inverse(fx);
    let y = YN * lab_inverse(fy);
    let z = ZN * lab_inverse(fz);

    let r = x * 3.2406 + y * -1.5372 + z * -0.4986;
    let g = x * -0.9689 + y * 1.8758 + z * 0.0415;
    let bl = x * 0.0557 + y * -0.2040 + z * 1.0570;

    [
        clamp_u8(gamma(r).clamp(0.0, 1.0) * 255.0),
        clamp_u8(gamma(g).clamp(0.0, 1.0) * 255.0),
        clamp_u8(gamma(bl).clamp(0.0, 1.0) * 255.0),
        alpha(l == transparent && a == transparent && b == transparent),
    ]
}

#[inline]
fn signed_byte(value: f64) -> f64 {
    f64::from(value as i64 as u8 as i8)
}

#[inline]
fn lab_inverse(t: f64) -> f64 {
    let cube = t * t * t;
    if cube > 0.008856 {
        cube
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

#[inline]
fn gamma(linear: f64) -> f64 {
    if linear > 0.0031308 {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    } else {
        12.92 * linear
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::{raster_metadata, window};
    use crate::xyz_tile::TileIndex;
    use std::sync::Arc;

    fn metadata(photometric: Option<u16>, no_data: Option<f64>, color_map: Option<Vec<u16>>) -> RendererMetadata {
        let mut raster = raster_metadata(no_data, window(0, 0, 0));
        raster.photometric_interpretation = photometric;
        raster.color_map = color_map;
        RendererMetadata::new(Arc::new(raster), TileIndex::new(0, 0, 0), 2)
    }

    #[test]
    fn test_black_and_white_is_zero() {
        assert_eq!(from_black_is_zero(0.0, 256.0, -1.0), [0, 0, 0, 255]);
        assert_eq!(from_black_is_zero(128.0, 256.0, -1.0), [128, 128, 128, 255]);
        assert_eq!(from_white_is_zero(0.0, 256.0, -1.0), [255, 255, 255, 255]);
        assert_eq!(from_white_is_zero(5.0, 256.0, 5.0)[3], 0);
    }

    #[test]
    fn test_rgb_transparency_needs_all_bands() {
        assert_eq!(from_rgb(&[0.0, 135.0, 0.0], 0.0), [0, 135, 0, 255]);
        assert_eq!(from_rgb(&[0.0, 135.0, 0.0], 135.0)[3], 255);
        assert_eq!(from_rgb(&[135.0, 135.0, 135.0], 135.0)[3], 0);
    }

    #[test]
    fn test_palette_lookup() {
        // two entries: red and blue
        let color_map = [65535, 0, 0, 0, 0, 65535];
        assert_eq!(from_palette(0.0, &color_map, 9.0), [255, 0, 0, 255]);
        assert_eq!(from_palette(1.0, &color_map, 9.0), [0, 0, 255, 255]);
        assert_eq!(from_palette(1.0, &color_map, 1.0)[3], 0);
        assert_eq!(from_palette(7.0, &color_map, 9.0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_cmyk() {
        assert_eq!(from_cmyk(&[0.0, 0.0, 0.0, 0.0], 9.0), [253, 253, 253, 255]);
        assert_eq!(from_cmyk(&[255.0, 0.0, 255.0, 0.0], 9.0), [0, 253, 0, 255]);
        assert_eq!(from_cmyk(&[0.0, 0.0, 0.0, 0.0], 0.0)[3], 0);
    }

    #[test]
    fn test_ycbcr_gray() {
        assert_eq!(from_ycbcr(&[100.0, 128.0, 128.0], 0.0), [100, 100, 100, 255]);
        assert_eq!(from_ycbcr(&[0.0, 0.0, 0.0], 0.0)[3], 0);
    }

    #[test]
    fn test_cie_lab() {
        assert_eq!(from_cie_lab(&[100.0, 0.0, 0.0], -1.0), [255, 255, 255, 255]);
        assert_eq!(from_cie_lab(&[0.0, 0.0, 0.0], -1.0), [0, 0, 0, 255]);
        assert_eq!(signed_byte(255.0), -1.0);
        assert_eq!(signed_byte(128.0), -128.0);
        assert_eq!(signed_byte(127.0), 127.0);
    }

    #[test]
    fn test_render_rgb_tile() {
        let tile = DecodedTile::new(
            2,
            1,
            vec![vec![0.0, 10.0], vec![135.0, 20.0], vec![0.0, 30.0]],
            vec![false, false],
        )
        .unwrap();
        let rgba = PhotometricRenderer.render(&tile, &metadata(Some(2), None, None)).unwrap();
        assert_eq!(rgba, vec![0, 135, 0, 255, 10, 20, 30, 255]);
    }

    #[test]
    fn test_fill_pixels_are_transparent() {
        let tile = DecodedTile::new(2, 1, vec![vec![200.0, 200.0]], vec![false, true]).unwrap();
        let rgba = PhotometricRenderer.render(&tile, &metadata(Some(1), None, None)).unwrap();
        assert_eq!(rgba, vec![199, 199, 199, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_single_band_sees_scaled_values() {
        let tile = DecodedTile::from_bands(2, 1, vec![vec![10.0, 1.0]]).unwrap();

        let mut raster = raster_metadata(None, window(0, 0, 0));
        raster.photometric_interpretation = Some(1);
        raster.scale = 2.0;
        raster.offset = 8.0;
        let gray = RendererMetadata::new(Arc::new(raster.clone()), TileIndex::new(0, 0, 0), 2);
        let rgba = PhotometricRenderer.render(&tile, &gray).unwrap();
        // 28 / 256 * 255 and 10 / 256 * 255
        assert_eq!(rgba, vec![28, 28, 28, 255, 10, 10, 10, 255]);

        raster.photometric_interpretation = Some(3);
        raster.color_map = Some((0..36).map(|i| if i % 12 == 10 { 65535 } else { 0 }).collect());
        let palette = RendererMetadata::new(Arc::new(raster), TileIndex::new(0, 0, 0), 2);
        let rgba = PhotometricRenderer.render(&tile, &palette).unwrap();
        // raw 1 becomes index 10, red green and blue are all set there
        assert_eq!(&rgba[4..8], &[255, 255, 255, 255]);
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_multi_band_ignores_scale() {
        let tile = DecodedTile::from_bands(1, 1, vec![vec![10.0], vec![20.0], vec![30.0]]).unwrap();
        let mut raster = raster_metadata(None, window(0, 0, 0));
        raster.photometric_interpretation = Some(2);
        raster.scale = 2.0;
        let metadata = RendererMetadata::new(Arc::new(raster), TileIndex::new(0, 0, 0), 1);
        assert_eq!(PhotometricRenderer.render(&tile, &metadata).unwrap(), vec![10, 20, 30, 255]);
    }

    #[test]
    fn test_palette_without_color_map_fails() {
        let tile = DecodedTile::from_bands(1, 1, vec![vec![0.0]]).unwrap();
        let err = PhotometricRenderer.render(&tile, &metadata(Some(3), None, None)).unwrap_err();
        assert_eq!(err, CogError::MissingColorMap);
    }

    #[test]
    fn test_unsupported_photometric() {
        let tile = DecodedTile::from_bands(1, 1, vec![vec![0.0]]).unwrap();
        for code in [None, Some(4), Some(9), Some(32844)] {
            let err = PhotometricRenderer.render(&tile, &metadata(code, None, None)).unwrap_err();
            assert!(matches!(err, CogError::UnsupportedPhotometric(_)), "{code:?}");
        }
    }

    #[test]
    fn test_missing_bands_is_format_error() {
        let tile = DecodedTile::from_bands(1, 1, vec![vec![0.0]]).unwrap();
        let err = PhotometricRenderer.render(&tile, &metadata(Some(2), None, None)).unwrap_err();
        assert!(matches!(err, CogError::Format(_)));
    }
}
