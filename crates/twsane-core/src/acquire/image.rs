//! Frame assembly and delivery.
//!
//! Raw backend passes are converted into one chunky raster with TWAIN
//! pixel conventions, then handed out whole (native transfer) or row by
//! row (memory transfer).

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::backend::{FrameFormat, Parameters};
use crate::error::TwainError;
use crate::protocol::constants::*;
use crate::protocol::{
    Element8, Fix32, ImageInfo, ImageMemXfer, Palette8, RasterImage, SetupMemXfer,
};

/// Pixel layout of the delivered raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// 1 bit, 0 = black.
    Bw,
    Gray,
    /// 8-bit index into the eight-colour palette.
    Palette,
    Rgb,
}

impl ImageKind {
    pub fn pixel_type(self) -> u16 {
        match self {
            ImageKind::Bw => TWPT_BW,
            ImageKind::Gray => TWPT_GRAY,
            ImageKind::Palette => TWPT_PALETTE,
            ImageKind::Rgb => TWPT_RGB,
        }
    }

    pub fn bits_per_pixel(self) -> usize {
        match self {
            ImageKind::Bw => 1,
            ImageKind::Gray | ImageKind::Palette => 8,
            ImageKind::Rgb => 24,
        }
    }

    fn row_alignment(self) -> usize {
        match self {
            ImageKind::Rgb => 12,
            _ => 4,
        }
    }

    fn samples_per_pixel(self) -> i16 {
        match self {
            ImageKind::Rgb => 3,
            _ => 1,
        }
    }
}

/// Everything read from the backend for one scan.
#[derive(Debug)]
pub struct RawScan {
    /// Parameters of the last frame.
    pub params: Parameters,
    /// Pass at which each frame format was captured.
    pub passes: HashMap<FrameFormat, usize>,
    /// Start of each pass in `data`.
    pub offsets: Vec<usize>,
    pub data: Vec<u8>,
}

impl RawScan {
    fn pass(&self, index: usize) -> &[u8] {
        let start = self.offsets.get(index).copied().unwrap_or(self.data.len());
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.data.len());
        &self.data[start.min(end)..end]
    }

    /// Line count, derived from the data when the backend did not know it.
    fn lines(&self) -> usize {
        match usize::try_from(self.params.lines) {
            Ok(lines) => lines,
            Err(_) => {
                let last = self.offsets.len().saturating_sub(1);
                self.pass(last).len() / self.params.bytes_per_line.max(1)
            }
        }
    }
}

/// Row source over the raw passes.
struct Planes<'a> {
    rows: [&'a [u8]; 3],
    /// Samples per pixel within each row source.
    stride: usize,
    bpl: usize,
    depth: u32,
}

impl Planes<'_> {
    fn row(&self, channel: usize, line: usize) -> &[u8] {
        let data = self.rows[channel];
        let start = (line * self.bpl).min(data.len());
        let end = (start + self.bpl).min(data.len());
        &data[start..end]
    }

    /// 8-bit sample of pixel `x` in `channel`.
    fn sample(&self, channel: usize, line: usize, x: usize) -> u8 {
        let row = self.row(channel, line);
        let i = x * self.stride + if self.stride == 3 { channel } else { 0 };
        match self.depth {
            16 => row
                .get(2 * i..2 * i + 2)
                .map_or(0, |b| (u16::from_ne_bytes([b[0], b[1]]) >> 8) as u8),
            _ => row.get(i).copied().unwrap_or(0),
        }
    }

    fn bit(&self, channel: usize, line: usize, x: usize) -> u8 {
        let i = x * self.stride + if self.stride == 3 { channel } else { 0 };
        self.row(channel, line)
            .get(i / 8)
            .map_or(0, |b| (b >> (7 - i % 8)) & 1)
    }
}

/// Clamp a size into a 32-bit record field.
fn dword(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// An acquired image waiting to be transferred.
#[derive(Debug)]
pub struct Image {
    kind: ImageKind,
    width: usize,
    lines: usize,
    stride: usize,
    x_resolution: Fix32,
    y_resolution: Fix32,
    depth: u32,
    data: Vec<u8>,
    lines_delivered: usize,
    /// Bytes of the current row already sent by a split transfer.
    row_offset: usize,
}

impl Image {
    /// Convert a raw scan. Resolutions are those in effect for the scan.
    pub fn assemble(
        raw: RawScan,
        x_resolution: Fix32,
        y_resolution: Fix32,
    ) -> Result<Self, TwainError> {
        let params = raw.params;
        let planar = params.format.is_plane();
        let kind = match (params.format, params.depth) {
            (FrameFormat::Gray, 1) => ImageKind::Bw,
            (FrameFormat::Gray, 8 | 16) => ImageKind::Gray,
            (_, 1) => ImageKind::Palette,
            (_, 8 | 16) => ImageKind::Rgb,
            (format, depth) => {
                return Err(TwainError::invalid(format!(
                    "unsupported frame {format:?} at depth {depth}"
                )));
            }
        };
        if planar && raw.passes.len() != 3 {
            return Err(TwainError::invalid(format!(
                "planar scan with {} colour passes",
                raw.passes.len()
            )));
        }

        let width = params.pixels_per_line;
        if width == 0 {
            return Err(TwainError::invalid("scan area has no width"));
        }
        let lines = raw.lines();
        let stride = (width * kind.bits_per_pixel())
            .div_ceil(8)
            .next_multiple_of(kind.row_alignment());

        let rows = if planar {
            let pass = |f: FrameFormat| raw.passes.get(&f).map_or(&[][..], |p| raw.pass(*p));
            [
                pass(FrameFormat::Red),
                pass(FrameFormat::Green),
                pass(FrameFormat::Blue),
            ]
        } else {
            let all = raw.pass(0);
            [all, all, all]
        };
        let planes = Planes {
            rows,
            stride: if params.format == FrameFormat::Rgb { 3 } else { 1 },
            bpl: params.bytes_per_line,
            depth: params.depth,
        };

        let mut data = Vec::new();
        data.try_reserve_exact(stride * lines)
            .map_err(|_| TwainError::ResourceExhaustion {
                requested: stride * lines,
            })?;
        data.resize(stride * lines, 0);

        for (line, out) in data.chunks_exact_mut(stride.max(1)).enumerate().take(lines) {
            match kind {
                ImageKind::Bw => {
                    for x in 0..width {
                        if planes.bit(0, line, x) == 0 {
                            out[x / 8] |= 0x80 >> (x % 8);
                        }
                    }
                }
                ImageKind::Gray => {
                    for (x, px) in out.iter_mut().take(width).enumerate() {
                        *px = planes.sample(0, line, x);
                    }
                }
                ImageKind::Palette => {
                    for (x, px) in out.iter_mut().take(width).enumerate() {
                        let r = planes.bit(0, line, x) ^ 1;
                        let g = planes.bit(1, line, x) ^ 1;
                        let b = planes.bit(2, line, x) ^ 1;
                        *px = (r << 2) | (g << 1) | b;
                    }
                }
                ImageKind::Rgb => {
                    for (x, px) in out.chunks_exact_mut(3).take(width).enumerate() {
                        for (c, v) in px.iter_mut().enumerate() {
                            *v = planes.sample(c, line, x);
                        }
                    }
                }
            }
        }

        debug!(
            kind = ?kind,
            width,
            lines,
            stride,
            passes = raw.offsets.len(),
            "Image assembled"
        );
        Ok(Self {
            kind,
            width,
            lines,
            stride,
            x_resolution,
            y_resolution,
            depth: params.depth,
            data,
            lines_delivered: 0,
            row_offset: 0,
        })
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn info(&self) -> ImageInfo {
        let mut bits_per_sample = [0i16; 8];
        let per_sample = if self.kind == ImageKind::Bw { 1 } else { 8 };
        for bits in bits_per_sample
            .iter_mut()
            .take(self.kind.samples_per_pixel() as usize)
        {
            *bits = per_sample;
        }
        ImageInfo {
            x_resolution: self.x_resolution,
            y_resolution: self.y_resolution,
            image_width: i32::try_from(self.width).unwrap_or(i32::MAX),
            image_length: i32::try_from(self.lines).unwrap_or(i32::MAX),
            samples_per_pixel: self.kind.samples_per_pixel(),
            bits_per_sample,
            bits_per_pixel: self.kind.bits_per_pixel() as i16,
            planar: false,
            pixel_type: self.kind.pixel_type() as i16,
            compression: TWCP_NONE,
        }
    }

    /// Width and height in inches.
    pub fn extent_inches(&self) -> (Fix32, Fix32) {
        let inches = |pixels: usize, dpi: Fix32| {
            let dpi = dpi.to_f64();
            if dpi > 0.0 {
                Fix32::from_f64(pixels as f64 / dpi)
            } else {
                Fix32::ZERO
            }
        };
        (
            inches(self.width, self.x_resolution),
            inches(self.lines, self.y_resolution),
        )
    }

    pub fn setup(&self) -> SetupMemXfer {
        let whole = dword(self.stride.saturating_mul(self.lines));
        SetupMemXfer {
            min_buf_size: dword(self.stride),
            max_buf_size: whole,
            preferred: whole,
        }
    }

    /// Restart memory transfer at the first row.
    pub fn rewind(&mut self) {
        self.lines_delivered = 0;
        self.row_offset = 0;
    }

    pub fn is_delivered(&self) -> bool {
        self.lines_delivered >= self.lines
    }

    /// Fill the host's buffer with the next rows.
    ///
    /// Whole rows are sent while they fit. A budget smaller than one row
    /// splits that row across calls, resuming at the first unsent byte.
    /// Returns `true` once the last byte has gone out.
    pub fn next_chunk(&mut self, xfer: &mut ImageMemXfer) -> Result<bool, TwainError> {
        if self.is_delivered() {
            return Err(TwainError::bad_protocol("image already transferred"));
        }
        let budget = xfer.memory.len();
        let remaining_in_row = self.stride - self.row_offset;
        let start = self.lines_delivered * self.stride + self.row_offset;

        let whole_rows = self.row_offset == 0 && budget >= self.stride;
        let (len, rows) = if whole_rows {
            let rows = (budget / self.stride).min(self.lines - self.lines_delivered);
            (rows * self.stride, rows)
        } else {
            (budget.min(remaining_in_row), 1)
        };
        if len == 0 {
            return Err(TwainError::invalid("memory transfer buffer is empty"));
        }

        xfer.memory[..len].copy_from_slice(&self.data[start..start + len]);
        xfer.compression = TWCP_NONE;
        xfer.bytes_per_row = dword(self.stride);
        xfer.columns = dword(self.width);
        xfer.rows = dword(rows);
        xfer.x_offset = 0;
        xfer.y_offset = dword(self.lines_delivered);
        xfer.bytes_written = dword(len);

        if whole_rows {
            self.lines_delivered += rows;
        } else {
            self.row_offset += len;
            if self.row_offset == self.stride {
                self.row_offset = 0;
                self.lines_delivered += 1;
            }
        }
        trace!(
            y_offset = xfer.y_offset,
            rows,
            bytes = len,
            "Memory transfer chunk"
        );
        Ok(self.is_delivered())
    }

    /// Hand over the whole raster. The image counts as delivered afterwards.
    pub fn take_raster(&mut self) -> RasterImage {
        self.lines_delivered = self.lines;
        self.row_offset = 0;
        RasterImage {
            width: dword(self.width),
            height: dword(self.lines),
            bytes_per_row: dword(self.stride),
            bits_per_pixel: self.kind.bits_per_pixel() as u16,
            pixel_type: self.kind.pixel_type(),
            x_resolution: self.x_resolution,
            y_resolution: self.y_resolution,
            data: std::mem::take(&mut self.data),
        }
    }

    /// Palette of a 1-bit colour image. Other images have none.
    pub fn palette(&self) -> Result<Palette8, TwainError> {
        if self.kind != ImageKind::Palette || self.depth != 1 {
            return Err(TwainError::bad_protocol("image has no palette"));
        }
        let mut palette = Palette8 {
            num_colors: 256,
            ..Default::default()
        };
        for (i, entry) in palette.colors.iter_mut().enumerate() {
            let level = |bit: usize| {
                if i < 8 && i & bit == 0 { 255 } else { 0 }
            };
            *entry = Element8 {
                index: i as u8,
                channel1: level(4),
                channel2: level(2),
                channel3: level(1),
            };
        }
        Ok(palette)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(format: FrameFormat, depth: u32, width: usize, lines: i32) -> Parameters {
        let samples = if format == FrameFormat::Rgb { 3 } else { 1 };
        Parameters {
            format,
            last_frame: true,
            bytes_per_line: (width * samples * depth as usize).div_ceil(8),
            pixels_per_line: width,
            lines,
            depth,
        }
    }

    fn single(params: Parameters, data: Vec<u8>) -> RawScan {
        RawScan {
            params,
            passes: HashMap::from([(params.format, 0)]),
            offsets: vec![0],
            data,
        }
    }

    fn dpi(v: i32) -> Fix32 {
        Fix32::from_int(v)
    }

    fn gray(width: usize, lines: usize) -> Image {
        let p = params(FrameFormat::Gray, 8, width, lines as i32);
        let data = (0..width * lines).map(|i| i as u8).collect();
        Image::assemble(single(p, data), dpi(100), dpi(100)).unwrap()
    }

    #[test]
    fn test_gray_rows_are_padded() {
        let image = gray(5, 3);
        assert_eq!(image.stride(), 8);
        assert_eq!(&image.data()[..8], &[0, 1, 2, 3, 4, 0, 0, 0]);
        assert_eq!(&image.data()[8..13], &[5, 6, 7, 8, 9]);
        let info = image.info();
        assert_eq!(info.pixel_type, TWPT_GRAY as i16);
        assert_eq!(info.bits_per_pixel, 8);
        assert_eq!(info.image_length, 3);
    }

    #[test]
    fn test_sixteen_bit_keeps_high_byte() {
        let p = params(FrameFormat::Gray, 16, 2, 1);
        let data = [0x1234u16, 0xabcd]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let image = Image::assemble(single(p, data), dpi(75), dpi(75)).unwrap();
        assert_eq!(&image.data()[..2], &[0x12, 0xab]);
    }

    #[test]
    fn test_lineart_is_inverted() {
        let p = params(FrameFormat::Gray, 1, 10, 1);
        let image = Image::assemble(single(p, vec![0b1010_0000, 0b1100_0000]), dpi(75), dpi(75)).unwrap();
        assert_eq!(image.kind(), ImageKind::Bw);
        assert_eq!(image.stride(), 4);
        assert_eq!(&image.data()[..2], &[0b0101_1111, 0b0000_0000]);
    }

    #[test]
    fn test_planar_passes_are_interleaved() {
        let mut p = params(FrameFormat::Blue, 8, 2, 2);
        p.last_frame = true;
        let raw = RawScan {
            params: p,
            passes: HashMap::from([
                (FrameFormat::Red, 0),
                (FrameFormat::Green, 1),
                (FrameFormat::Blue, 2),
            ]),
            offsets: vec![0, 4, 8],
            data: vec![10, 11, 12, 13, 20, 21, 22, 23, 30, 31, 32, 33],
        };
        let image = Image::assemble(raw, dpi(75), dpi(75)).unwrap();
        assert_eq!(image.kind(), ImageKind::Rgb);
        assert_eq!(image.stride(), 12);
        assert_eq!(&image.data()[..6], &[10, 20, 30, 11, 21, 31]);
        assert_eq!(&image.data()[12..18], &[12, 22, 32, 13, 23, 33]);
    }

    #[test]
    fn test_one_bit_colour_uses_palette() {
        let p = params(FrameFormat::Rgb, 1, 2, 1);
        // pixel 0 = (1,0,1), pixel 1 = (0,0,0)
        let image = Image::assemble(single(p, vec![0b1010_0000]), dpi(75), dpi(75)).unwrap();
        assert_eq!(image.kind(), ImageKind::Palette);
        assert_eq!(&image.data()[..2], &[0b010, 0b111]);

        let palette = image.palette().unwrap();
        assert_eq!(palette.num_colors, 256);
        assert_eq!(
            (palette.colors[0].channel1, palette.colors[0].channel2, palette.colors[0].channel3),
            (255, 255, 255)
        );
        assert_eq!(palette.colors[5].channel1, 0);
        assert_eq!(palette.colors[5].channel2, 255);
        assert_eq!(palette.colors[9].channel1, 0);
        assert!(gray(4, 1).palette().is_err());
    }

    #[test]
    fn test_unknown_length_from_data() {
        let p = params(FrameFormat::Gray, 8, 4, -1);
        let image = Image::assemble(single(p, vec![7; 4 * 9]), dpi(75), dpi(75)).unwrap();
        assert_eq!(image.lines(), 9);
    }

    #[test]
    fn test_chunks_are_exhaustive_and_ordered() {
        for budget in [8, 9, 24, 30, 1000] {
            let mut image = gray(5, 7);
            let mut next_line = 0;
            let mut received = Vec::new();
            loop {
                let mut xfer = ImageMemXfer::with_capacity(budget);
                let done = image.next_chunk(&mut xfer).unwrap();
                assert_eq!(xfer.y_offset, next_line);
                assert_eq!(xfer.bytes_written, xfer.rows * 8);
                next_line += xfer.rows;
                received.extend_from_slice(&xfer.memory[..xfer.bytes_written as usize]);
                if done {
                    break;
                }
            }
            assert_eq!(next_line, 7, "budget {budget}");
            assert_eq!(received, image.data());
        }
    }

    #[test]
    fn test_oversized_row_is_split() {
        let mut image = gray(10, 2);
        assert_eq!(image.stride(), 12);
        let mut received = Vec::new();
        let mut offsets = Vec::new();
        loop {
            let mut xfer = ImageMemXfer::with_capacity(5);
            let done = image.next_chunk(&mut xfer).unwrap();
            offsets.push((xfer.y_offset, xfer.bytes_written));
            received.extend_from_slice(&xfer.memory[..xfer.bytes_written as usize]);
            if done {
                break;
            }
        }
        assert_eq!(offsets, vec![(0, 5), (0, 5), (0, 2), (1, 5), (1, 5), (1, 2)]);
        assert_eq!(received, image.data());
        let mut xfer = ImageMemXfer::with_capacity(5);
        assert!(image.next_chunk(&mut xfer).is_err());

        image.rewind();
        let mut xfer = ImageMemXfer::with_capacity(100);
        assert!(image.next_chunk(&mut xfer).unwrap());
        assert_eq!(xfer.rows, 2);
    }

    #[test]
    fn test_zero_width_scan_is_rejected() {
        let p = params(FrameFormat::Gray, 8, 0, 5);
        let err = Image::assemble(single(p, Vec::new()), dpi(75), dpi(75)).unwrap_err();
        assert!(matches!(err, TwainError::InvalidValue(_)));
    }

    #[test]
    fn test_record_sizes_saturate() {
        assert_eq!(dword(12), 12);
        assert_eq!(dword(usize::MAX), u32::MAX);
    }

    #[test]
    fn test_native_raster() {
        let mut image = gray(6, 2);
        let raster = image.take_raster();
        assert_eq!((raster.width, raster.height, raster.bytes_per_row), (6, 2, 8));
        assert_eq!(raster.pixel_type, TWPT_GRAY);
        assert_eq!(raster.data.len(), 16);
        assert!(image.is_delivered());
    }

    #[test]
    fn test_setup_reports_stride() {
        let image = gray(10, 4);
        let setup = image.setup();
        assert_eq!(setup.min_buf_size, 12);
        assert_eq!(setup.max_buf_size, 48);
        assert_eq!(setup.preferred, 48);
        let (w, h) = image.extent_inches();
        assert_eq!(w, Fix32::from_f64(0.1));
        assert_eq!(h, Fix32::from_f64(0.04));
    }
}
