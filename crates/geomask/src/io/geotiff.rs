//! GeoTIFF reading and writing on top of the `tiff` crate.
//!
//! Georeferencing is carried by ModelPixelScale + ModelTiepoint (north-up) or
//! ModelTransformation (rotated), and the CRS by the GeoKeyDirectory keys
//! GTModelType, GTRasterType, GeographicType and ProjectedCSType. Only
//! chunky (pixel-interleaved) images are supported. Integer samples are
//! kept as raw values.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use tiff::{
    decoder::{Decoder, DecodingResult},
    encoder::{TiffEncoder, colortype},
    tags::Tag,
};
use tracing::{debug, warn};

use crate::{
    error::{MaskError, Result},
    raster::{Band, Crs, CrsKind, GeoTransform, Raster},
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_POINT: u16 = 2;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Inline SHORT values of a GeoKeyDirectory, keyed by GeoKey id
#[derive(Debug, Default)]
struct GeoKeys {
    entries: Vec<(u16, u16)>,
}

impl GeoKeys {
    fn parse(directory: &[u16]) -> Self {
        let Some(&count) = directory.get(3) else {
            return Self::default();
        };
        let entries = directory[4..]
            .chunks_exact(4)
            .take(count as usize)
            // location 0 means the value is stored inline
            .filter(|entry| entry[1] == 0)
            .map(|entry| (entry[0], entry[3]))
            .collect();
        Self { entries }
    }

    fn get(&self, key: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|(id, _)| *id == key)
            .map(|(_, value)| *value)
    }

    fn crs(&self) -> Crs {
        let code = |key| self.get(key).filter(|&c| c != 0 && c != USER_DEFINED).map(u32::from);
        match self.get(GT_MODEL_TYPE) {
            Some(1) => Crs {
                epsg: code(PROJECTED_CS_TYPE),
                kind: CrsKind::Projected,
            },
            Some(2) => Crs {
                epsg: code(GEOGRAPHIC_TYPE),
                kind: CrsKind::Geographic,
            },
            _ => match (code(PROJECTED_CS_TYPE), code(GEOGRAPHIC_TYPE)) {
                (Some(epsg), _) => Crs::projected(epsg),
                (None, Some(epsg)) => Crs::geographic(epsg),
                (None, None) => Crs::unknown(),
            },
        }
    }

    fn directory(crs: &Crs) -> Vec<u16> {
        let mut keys: Vec<[u16; 4]> = Vec::new();
        match crs.kind {
            CrsKind::Projected => keys.push([GT_MODEL_TYPE, 0, 1, 1]),
            CrsKind::Geographic => keys.push([GT_MODEL_TYPE, 0, 1, 2]),
            CrsKind::Unknown => {}
        }
        keys.push([GT_RASTER_TYPE, 0, 1, 1]);
        if let Some(epsg) = crs.epsg {
            match u16::try_from(epsg) {
                Ok(code) if crs.kind == CrsKind::Geographic => {
                    keys.push([GEOGRAPHIC_TYPE, 0, 1, code])
                }
                Ok(code) => keys.push([PROJECTED_CS_TYPE, 0, 1, code]),
                Err(_) => warn!(epsg, "EPSG code does not fit a GeoKey, writing without it"),
            }
        }

        let mut directory = vec![1, 1, 0, keys.len() as u16];
        directory.extend(keys.into_iter().flatten());
        directory
    }
}

fn read_f64s<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Result<Option<Vec<f64>>> {
    Ok(decoder
        .find_tag(tag(code))?
        .map(|value| value.into_f64_vec())
        .transpose()?)
}

fn transform_from_tags(
    transformation: Option<Vec<f64>>,
    scale: Option<Vec<f64>>,
    tiepoint: Option<Vec<f64>>,
    pixel_is_point: bool,
) -> GeoTransform {
    let transform = match (transformation, scale, tiepoint) {
        (Some(m), _, _) if m.len() >= 8 => GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]),
        (_, Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (sx, sy) = (scale[0], scale[1]);
            GeoTransform::north_up(tie[3] - tie[0] * sx, tie[4] + tie[1] * sy, sx, -sy)
        }
        _ => return GeoTransform::identity(),
    };
    if pixel_is_point {
        // tie points refer to pixel centres
        let (x, y) = transform.apply(-0.5, -0.5);
        GeoTransform {
            origin_x: x,
            origin_y: y,
            ..transform
        }
    } else {
        transform
    }
}

fn samples_as_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|s| s as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(MaskError::UnsupportedRaster(
                "unsupported TIFF sample format".into(),
            ));
        }
    })
}

/// Read every band of a GeoTIFF with its transform and CRS
pub fn read_geotiff(path: impl AsRef<Path>) -> Result<Raster> {
    let path = path.as_ref();
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;

    let samples_per_pixel = decoder
        .find_tag(Tag::SamplesPerPixel)?
        .map(|value| value.into_u16())
        .transpose()?
        .unwrap_or(1) as usize;
    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)?
        .map(|value| value.into_u16())
        .transpose()?
        .unwrap_or(1);
    if planar != 1 && samples_per_pixel > 1 {
        return Err(MaskError::UnsupportedRaster(format!(
            "{} uses planar sample layout",
            path.display()
        )));
    }

    let geo_keys = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))?
        .map(|value| value.into_u16_vec())
        .transpose()?
        .map(|directory| GeoKeys::parse(&directory))
        .unwrap_or_default();
    let transform = transform_from_tags(
        read_f64s(&mut decoder, MODEL_TRANSFORMATION)?,
        read_f64s(&mut decoder, MODEL_PIXEL_SCALE)?,
        read_f64s(&mut decoder, MODEL_TIEPOINT)?,
        geo_keys.get(GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT),
    );
    let crs = geo_keys.crs();

    let samples = samples_as_f32(decoder.read_image()?)?;
    let pixels = width as usize * height as usize;
    if samples.len() < pixels * samples_per_pixel {
        return Err(MaskError::UnsupportedRaster(format!(
            "{} holds {} samples, expected {} for {width}x{height}x{samples_per_pixel}",
            path.display(),
            samples.len(),
            pixels * samples_per_pixel
        )));
    }
    let bands = (0..samples_per_pixel)
        .map(|band| {
            let data = (0..pixels)
                .map(|pixel| samples[pixel * samples_per_pixel + band])
                .collect();
            Band::from_raw(width, height, data).ok_or_else(|| {
                MaskError::UnsupportedRaster(format!("band {band} of {} is truncated", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        path = %path.display(),
        width,
        height,
        bands = bands.len(),
        crs = ?crs.epsg,
        "read GeoTIFF"
    );
    Raster::new(bands, transform, crs)
}

/// Write the first band of `raster` as a Float32 GeoTIFF carrying its transform and CRS
pub fn write_geotiff(path: impl AsRef<Path>, raster: &Raster) -> Result<()> {
    let path = path.as_ref();
    let band = &raster.bands()[0];
    let transform = raster.transform();

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(raster.width(), raster.height())?;
    if transform.has_rotation() {
        let matrix: [f64; 16] = [
            transform.pixel_width,
            transform.row_rotation,
            0.0,
            transform.origin_x,
            transform.column_rotation,
            transform.pixel_height,
            0.0,
            transform.origin_y,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ];
        image
            .encoder()
            .write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
    } else {
        let scale = [transform.pixel_width, -transform.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
        image.encoder().write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
        image.encoder().write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
    }
    let directory = GeoKeys::directory(raster.crs());
    image
        .encoder()
        .write_tag(tag(GEO_KEY_DIRECTORY), &directory[..])?;
    image.write_data(band.as_raw())?;

    debug!(path = %path.display(), width = raster.width(), height = raster.height(), "wrote GeoTIFF");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn ramp(width: u32, height: u32) -> Band {
        Band::from_fn(width, height, |x, y| Luma([(x + y * width) as f32 / 100.0]))
    }

    #[test]
    fn test_round_trip_north_up() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mask.tif");
        let transform = GeoTransform::north_up(500_000.0, 4_200_000.0, 0.3, -0.3);
        let raster = Raster::single_band(ramp(7, 5), transform, Crs::projected(32610))
            .expect("valid raster");

        write_geotiff(&path, &raster).expect("written");
        let read = read_geotiff(&path).expect("read back");
        assert_eq!(read.extent(), raster.extent());
        assert_eq!(read.transform(), raster.transform());
        assert_eq!(read.crs(), &Crs::projected(32610));
        assert_eq!(read.band(0), raster.band(0));
    }

    #[test]
    fn test_round_trip_rotated_geographic() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rotated.tif");
        let transform = GeoTransform::from_gdal([10.0, 0.001, 0.0002, 50.0, 0.0001, -0.001]);
        let raster = Raster::single_band(ramp(4, 3), transform, Crs::geographic(4326))
            .expect("valid raster");

        write_geotiff(&path, &raster).expect("written");
        let read = read_geotiff(&path).expect("read back");
        assert_eq!(read.transform(), &transform);
        assert!(read.crs().is_geographic());
        assert_eq!(read.crs().epsg, Some(4326));
    }

    #[test]
    fn test_reads_multiband_integer_tiff() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rgb.tif");
        {
            let mut encoder = TiffEncoder::new(BufWriter::new(File::create(&path).expect("create")))
                .expect("encoder");
            let data: Vec<u8> = (0..2 * 2 * 3).map(|v| v as u8 * 10).collect();
            encoder
                .write_image::<colortype::RGB8>(2, 2, &data)
                .expect("written");
        }
        let raster = read_geotiff(&path).expect("read");
        assert_eq!(raster.band_count(), 3);
        assert_eq!(raster.band(1).expect("green").get_pixel(1, 0).0[0], 40.0);
        assert_eq!(raster.transform(), &GeoTransform::identity());
        assert_eq!(raster.crs(), &Crs::unknown());
    }

    #[test]
    fn test_pixel_is_point_shifts_origin() {
        let transform = transform_from_tags(
            None,
            Some(vec![2.0, 2.0, 0.0]),
            Some(vec![0.0, 0.0, 0.0, 100.0, 200.0, 0.0]),
            true,
        );
        assert_eq!(transform.apply(0.0, 0.0), (99.0, 201.0));
    }

    #[test]
    fn test_geo_key_directory_round_trip() {
        let directory = GeoKeys::directory(&Crs::projected(32633));
        assert_eq!(directory[..4], [1, 1, 0, 3]);
        assert_eq!(GeoKeys::parse(&directory).crs(), Crs::projected(32633));
        let unknown = GeoKeys::directory(&Crs::unknown());
        assert_eq!(GeoKeys::parse(&unknown).crs(), Crs::unknown());
    }
}
