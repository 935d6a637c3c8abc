//! Georeferenced multi-band rasters.
//!
//! A [`Raster`] owns one `f32` [`Band`] per sample plane together with the
//! affine [`GeoTransform`] that maps pixel corners to CRS coordinates and the
//! [`Crs`] those coordinates live in. Transform and CRS are fixed once the
//! raster is built.

use geo::AffineTransform;
use image::{DynamicImage, ImageBuffer, Luma};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{MaskError, Result};

/// A single plane of `f32` samples
pub type Band = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel detection probabilities in `[0, 1]`
pub type ProbabilityMask = Band;

/// GDAL-ordered affine transform from pixel corners to CRS coordinates.
///
/// `x = origin_x + col * pixel_width + row * row_rotation`
/// `y = origin_y + col * column_rotation + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            column_rotation: 0.0,
            pixel_height,
        }
    }

    /// Pixel coordinates are used as-is (y grows downwards)
    pub fn identity() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        let [origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height] =
            coefficients;
        Self {
            origin_x,
            pixel_width,
            row_rotation,
            origin_y,
            column_rotation,
            pixel_height,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.column_rotation,
            self.pixel_height,
        ]
    }

    /// Map a pixel-corner position to CRS coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.column_rotation + row * self.pixel_height,
        )
    }

    /// Area covered by one pixel, in squared CRS units
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.row_rotation * self.column_rotation).abs()
    }

    pub fn has_rotation(&self) -> bool {
        self.row_rotation != 0.0 || self.column_rotation != 0.0
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.column_rotation;
        det.is_finite() && det != 0.0
    }

    /// Transform of a window whose top-left pixel is `(col, row)`
    pub fn offset(&self, col: u32, row: u32) -> Self {
        let (origin_x, origin_y) = self.apply(col as f64, row as f64);
        Self {
            origin_x,
            origin_y,
            ..*self
        }
    }

    pub fn to_affine(&self) -> AffineTransform<f64> {
        AffineTransform::new(
            self.pixel_width,
            self.row_rotation,
            self.origin_x,
            self.column_rotation,
            self.pixel_height,
            self.origin_y,
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CrsKind {
    Projected,
    Geographic,
    #[default]
    Unknown,
}

/// Coordinate reference system, identified by EPSG code where known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Crs {
    pub epsg: Option<u32>,
    pub kind: CrsKind,
}

/// Geographic (lon/lat) EPSG codes commonly seen on imagery
const GEOGRAPHIC_EPSG: &[u32] = &[4326, 4269, 4258, 4283, 4612, 4617, 4979, 4167, 4674];

impl Crs {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn projected(epsg: u32) -> Self {
        Self {
            epsg: Some(epsg),
            kind: CrsKind::Projected,
        }
    }

    pub fn geographic(epsg: u32) -> Self {
        Self {
            epsg: Some(epsg),
            kind: CrsKind::Geographic,
        }
    }

    /// Infer the kind from a bare EPSG code
    pub fn from_epsg(epsg: u32) -> Self {
        if GEOGRAPHIC_EPSG.contains(&epsg) {
            Self::geographic(epsg)
        } else {
            Self::projected(epsg)
        }
    }

    pub fn is_geographic(&self) -> bool {
        self.kind == CrsKind::Geographic
    }

    /// OGC URN used in legacy GeoJSON `crs` members
    pub fn urn(&self) -> Option<String> {
        self.epsg.map(|code| format!("urn:ogc:def:crs:EPSG::{code}"))
    }

    /// Parse `EPSG:32610`, `urn:ogc:def:crs:EPSG::32610` and similar names
    pub fn parse_name(name: &str) -> Option<Self> {
        let code = name.rsplit(':').next()?.trim();
        let epsg = code.parse::<u32>().ok()?;
        if name.to_ascii_uppercase().contains("EPSG") {
            Some(Self::from_epsg(epsg))
        } else {
            None
        }
    }
}

/// Raster dimensions, the only thing mask assembly needs from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RasterExtent {
    pub width: u32,
    pub height: u32,
}

impl RasterExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone)]
pub struct Raster {
    bands: Vec<Band>,
    transform: GeoTransform,
    crs: Crs,
}

impl Raster {
    /// Build a raster, checking that every band has the same positive dimensions
    pub fn new(bands: Vec<Band>, transform: GeoTransform, crs: Crs) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| MaskError::invalid_config("raster needs at least one band"))?;
        let (width, height) = first.dimensions();
        if width == 0 || height == 0 {
            return Err(MaskError::invalid_config(format!(
                "raster dimensions must be positive, got {width}x{height}"
            )));
        }
        if let Some(index) = bands.iter().position(|b| b.dimensions() != (width, height)) {
            return Err(MaskError::invalid_config(format!(
                "band {index} is {:?}, expected {width}x{height}",
                bands[index].dimensions()
            )));
        }
        if !transform.is_invertible() {
            return Err(MaskError::invalid_config(format!(
                "geotransform {:?} is not invertible",
                transform.to_gdal()
            )));
        }
        Ok(Self {
            bands,
            transform,
            crs,
        })
    }

    pub fn single_band(band: Band, transform: GeoTransform, crs: Crs) -> Result<Self> {
        Self::new(vec![band], transform, crs)
    }

    /// Non-georeferenced image; samples are normalised to `[0, 1]` for integer sources
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let bands = if image.color().channel_count() <= 2 {
            vec![image.to_luma32f()]
        } else {
            let rgb = image.to_rgb32f();
            (0..3)
                .map(|channel| {
                    Band::from_fn(rgb.width(), rgb.height(), |x, y| {
                        Luma([rgb.get_pixel(x, y).0[channel]])
                    })
                })
                .collect()
        };
        Self::new(bands, GeoTransform::identity(), Crs::unknown())
    }

    pub fn width(&self) -> u32 {
        self.bands[0].width()
    }

    pub fn height(&self) -> u32 {
        self.bands[0].height()
    }

    pub fn extent(&self) -> RasterExtent {
        RasterExtent::new(self.width(), self.height())
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&self, index: usize) -> Option<&Band> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn pixel_area(&self) -> f64 {
        self.transform.pixel_area()
    }

    /// Copy a window out of every band, padding the part outside the raster with `fill`
    pub fn read_window(
        &self,
        col_off: u32,
        row_off: u32,
        width: u32,
        height: u32,
        fill: f32,
    ) -> Vec<Band> {
        let raster_width = self.width();
        let valid_width = raster_width.saturating_sub(col_off).min(width) as usize;
        let valid_height = self.height().saturating_sub(row_off).min(height) as usize;

        self.bands
            .iter()
            .map(|band| {
                let mut window = Band::from_pixel(width, height, Luma([fill]));
                let source = band.as_raw();
                let target: &mut [f32] = &mut window;
                for row in 0..valid_height {
                    let src_start =
                        (row_off as usize + row) * raster_width as usize + col_off as usize;
                    let dst_start = row * width as usize;
                    target[dst_start..dst_start + valid_width]
                        .copy_from_slice(&source[src_start..src_start + valid_width]);
                }
                window
            })
            .collect()
    }

    /// Corner-to-corner bounds in CRS units as `[min_x, min_y, max_x, max_y]`
    pub fn bounds(&self) -> [f64; 4] {
        let (w, h) = (self.width() as f64, self.height() as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];
        corners.iter().fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |[min_x, min_y, max_x, max_y], &(x, y)| {
                [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
            },
        )
    }

    pub fn info(&self) -> RasterInfo {
        RasterInfo {
            width: self.width(),
            height: self.height(),
            band_count: self.band_count(),
            transform: self.transform,
            crs: self.crs,
            pixel_area: self.pixel_area(),
            bounds: self.bounds(),
            bands: self.bands.iter().map(BandStatistics::from_band).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BandStatistics {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub valid_count: usize,
}

impl BandStatistics {
    pub fn from_band(band: &Band) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid_count = 0usize;
        for &value in band.as_raw() {
            if value.is_nan() {
                continue;
            }
            min = min.min(value);
            max = max.max(value);
            sum += value as f64;
            valid_count += 1;
        }
        let mean = if valid_count > 0 {
            sum / valid_count as f64
        } else {
            f64::NAN
        };
        Self {
            min,
            max,
            mean,
            valid_count,
        }
    }
}

/// Summary printed by `geomask info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub pixel_area: f64,
    pub bounds: [f64; 4],
    pub bands: Vec<BandStatistics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> Band {
        Band::from_fn(width, height, |x, y| Luma([(y * width + x) as f32]))
    }

    #[test]
    fn test_transform_maps_pixel_corners() {
        let transform = GeoTransform::north_up(500_000.0, 4_200_000.0, 0.5, -0.5);
        assert_eq!(transform.apply(0.0, 0.0), (500_000.0, 4_200_000.0));
        assert_eq!(transform.apply(10.0, 4.0), (500_005.0, 4_199_998.0));
        assert_eq!(transform.pixel_area(), 0.25);

        let shifted = transform.offset(10, 4);
        assert_eq!(shifted.apply(0.0, 0.0), (500_005.0, 4_199_998.0));
    }

    #[test]
    fn test_raster_rejects_mismatched_bands() {
        let result = Raster::new(
            vec![ramp(4, 4), ramp(4, 3)],
            GeoTransform::identity(),
            Crs::unknown(),
        );
        assert!(matches!(result, Err(MaskError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_raster_rejects_empty_and_singular() {
        assert!(Raster::new(vec![], GeoTransform::identity(), Crs::unknown()).is_err());
        let flat = GeoTransform::north_up(0.0, 0.0, 1.0, 0.0);
        assert!(Raster::single_band(ramp(2, 2), flat, Crs::unknown()).is_err());
    }

    #[test]
    fn test_read_window_pads_outside() {
        let raster = Raster::single_band(ramp(5, 4), GeoTransform::identity(), Crs::unknown())
            .expect("valid raster");
        let window = raster.read_window(3, 2, 4, 4, -1.0);
        let band = &window[0];
        assert_eq!(band.dimensions(), (4, 4));
        assert_eq!(band.get_pixel(0, 0).0[0], 13.0);
        assert_eq!(band.get_pixel(1, 1).0[0], 19.0);
        assert_eq!(band.get_pixel(2, 0).0[0], -1.0);
        assert_eq!(band.get_pixel(0, 2).0[0], -1.0);
    }

    #[test]
    fn test_crs_parsing() {
        assert_eq!(Crs::parse_name("EPSG:4326"), Some(Crs::geographic(4326)));
        assert_eq!(
            Crs::parse_name("urn:ogc:def:crs:EPSG::32610"),
            Some(Crs::projected(32610))
        );
        assert_eq!(Crs::parse_name("OGC:CRS84"), None);
        assert!(Crs::from_epsg(4326).is_geographic());
    }

    #[test]
    fn test_bounds_and_info() {
        let transform = GeoTransform::north_up(100.0, 200.0, 2.0, -2.0);
        let raster = Raster::single_band(ramp(3, 2), transform, Crs::projected(32610))
            .expect("valid raster");
        assert_eq!(raster.bounds(), [100.0, 196.0, 106.0, 200.0]);
        let info = raster.info();
        assert_eq!(info.bands[0].min, 0.0);
        assert_eq!(info.bands[0].max, 5.0);
        assert_eq!(info.bands[0].valid_count, 6);
    }
}
