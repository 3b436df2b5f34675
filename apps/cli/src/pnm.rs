//! Netpbm output for delivered rasters.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use twsane_core::protocol::constants::{TWPT_BW, TWPT_GRAY, TWPT_PALETTE, TWPT_RGB};
use twsane_core::protocol::{Palette8, RasterImage};

/// Write `raster` as PBM (BW), PGM (Gray) or PPM (RGB, Palette), dropping
/// the row padding.
pub fn write(path: &Path, raster: &RasterImage, palette: Option<&Palette8>) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let (width, height) = (raster.width as usize, raster.height as usize);
    let stride = raster.bytes_per_row as usize;
    let rows = raster.data.chunks(stride.max(1)).take(height);

    match raster.pixel_type {
        TWPT_BW => {
            write!(out, "P4\n{width} {height}\n")?;
            // PBM has 1 = black, the raster 0 = black
            for row in rows {
                let bytes: Vec<u8> = row[..width.div_ceil(8)].iter().map(|b| !b).collect();
                out.write_all(&bytes)?;
            }
        }
        TWPT_GRAY => {
            write!(out, "P5\n{width} {height}\n255\n")?;
            for row in rows {
                out.write_all(&row[..width])?;
            }
        }
        TWPT_RGB => {
            write!(out, "P6\n{width} {height}\n255\n")?;
            for row in rows {
                out.write_all(&row[..width * 3])?;
            }
        }
        TWPT_PALETTE => {
            let palette = palette.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "palette image without palette")
            })?;
            write!(out, "P6\n{width} {height}\n255\n")?;
            for row in rows {
                for &index in &row[..width] {
                    let c = palette.colors[index as usize];
                    out.write_all(&[c.channel1, c.channel2, c.channel3])?;
                }
            }
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported pixel type {other}"),
            ));
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(pixel_type: u16, width: u32, stride: u32, data: Vec<u8>) -> RasterImage {
        RasterImage {
            width,
            height: (data.len() / stride as usize) as u32,
            bytes_per_row: stride,
            pixel_type,
            data,
            ..RasterImage::default()
        }
    }

    #[test]
    fn test_gray_padding_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.pgm");
        let data = vec![1, 2, 3, 0, 4, 5, 6, 0];
        write(&path, &raster(TWPT_GRAY, 3, 4, data), None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"P5\n3 2\n255\n\x01\x02\x03\x04\x05\x06");
    }

    #[test]
    fn test_lineart_is_inverted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bw.pbm");
        write(&path, &raster(TWPT_BW, 8, 4, vec![0xF0, 0, 0, 0]), None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"P4\n8 1\n\x0F");
    }

    #[test]
    fn test_palette_requires_palette() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pal.ppm");
        let image = raster(TWPT_PALETTE, 1, 4, vec![0, 0, 0, 0]);
        assert!(write(&path, &image, None).is_err());

        let mut palette = Palette8::default();
        palette.colors[0].channel1 = 255;
        write(&path, &image, Some(&palette)).unwrap();
        assert!(std::fs::read(&path).unwrap().ends_with(&[255, 0, 0]));
    }
}
