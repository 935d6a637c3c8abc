pub mod geojson;
pub mod geotiff;

pub use geotiff::{read_geotiff, write_geotiff};

use std::path::Path;

use crate::{error::Result, raster::Raster};

/// Load a raster from a local path: GeoTIFF by extension, anything else through `image`
pub fn load_raster(path: impl AsRef<Path>) -> Result<Raster> {
    let path = path.as_ref();
    let is_tiff = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));
    if is_tiff {
        read_geotiff(path)
    } else {
        let image = image::open(path)?;
        Raster::from_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Crs, GeoTransform};
    use image::{GrayImage, Luma};

    #[test]
    fn test_png_loads_without_georeference() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scores.png");
        let mut image = GrayImage::new(4, 3);
        image.put_pixel(2, 1, Luma([255]));
        image.save(&path).expect("png written");

        let raster = load_raster(&path).expect("png loads");
        assert_eq!(raster.band_count(), 1);
        assert_eq!(raster.transform(), &GeoTransform::identity());
        assert_eq!(raster.crs(), &Crs::unknown());
        assert_eq!(raster.band(0).expect("band").get_pixel(2, 1).0[0], 1.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_raster("does/not/exist.tif").is_err());
        assert!(load_raster("does/not/exist.png").is_err());
    }
}
