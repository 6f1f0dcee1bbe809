// THEORY:
// `YuvFrame` is the owned container for one planar YUV 4:2:0 image: a full
// resolution Y plane followed by quarter-size U and V planes. `YuvGeometry` holds
// the dimension rules on their own so code that works on borrowed buffers (the
// detector, the overlay) validates exactly the way owned frames do.

use crate::core_modules::blob_stats::Coord;
use crate::error::{BlobError, BlobResult};

/// Largest even dimension whose exclusive run ends still fit in a `Coord`.
pub const MAX_DIMENSION: usize = (Coord::MAX - 1) as usize;

/// Validated dimensions of a 4:2:0 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YuvGeometry {
    cols: usize,
    rows: usize,
}

impl YuvGeometry {
    pub fn new(cols: usize, rows: usize) -> BlobResult<Self> {
        if cols == 0 || rows == 0 {
            return Err(BlobError::geometry(cols, rows, "dimensions must be non-zero"));
        }
        if cols % 2 != 0 || rows % 2 != 0 {
            return Err(BlobError::geometry(cols, rows, "4:2:0 subsampling needs even dimensions"));
        }
        if cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(BlobError::geometry(cols, rows, "dimensions exceed 16-bit coordinates"));
        }
        Ok(Self { cols, rows })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of luma samples.
    pub fn pixels(&self) -> usize {
        self.cols * self.rows
    }

    pub fn chroma_cols(&self) -> usize {
        self.cols / 2
    }

    pub fn chroma_rows(&self) -> usize {
        self.rows / 2
    }

    /// Number of samples in each chroma plane.
    pub fn chroma_pixels(&self) -> usize {
        self.chroma_cols() * self.chroma_rows()
    }

    /// Bytes in one packed frame: Y, then U, then V.
    pub fn frame_bytes(&self) -> usize {
        self.pixels() + 2 * self.chroma_pixels()
    }

    pub fn check_buffer(&self, len: usize) -> BlobResult<()> {
        if len < self.frame_bytes() {
            return Err(BlobError::BufferTooSmall {
                required: self.frame_bytes(),
                actual: len,
            });
        }
        Ok(())
    }

    /// Splits a packed buffer into its Y, U and V planes. Trailing bytes are ignored.
    pub fn split_planes<'a>(&self, yuv: &'a [u8]) -> BlobResult<(&'a [u8], &'a [u8], &'a [u8])> {
        self.check_buffer(yuv.len())?;
        let (y, rest) = yuv.split_at(self.pixels());
        let (u, rest) = rest.split_at(self.chroma_pixels());
        Ok((y, u, &rest[..self.chroma_pixels()]))
    }

    pub fn split_planes_mut<'a>(
        &self,
        yuv: &'a mut [u8],
    ) -> BlobResult<(&'a mut [u8], &'a mut [u8], &'a mut [u8])> {
        self.check_buffer(yuv.len())?;
        let (y, rest) = yuv.split_at_mut(self.pixels());
        let (u, rest) = rest.split_at_mut(self.chroma_pixels());
        let chroma = self.chroma_pixels();
        Ok((y, u, &mut rest[..chroma]))
    }
}

/// An owned planar YUV 4:2:0 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvFrame {
    geometry: YuvGeometry,
    data: Vec<u8>,
}

impl YuvFrame {
    /// A black frame with neutral chroma.
    pub fn new(cols: usize, rows: usize) -> BlobResult<Self> {
        let geometry = YuvGeometry::new(cols, rows)?;
        let mut data = vec![0u8; geometry.frame_bytes()];
        data[geometry.pixels()..].fill(128);
        Ok(Self { geometry, data })
    }

    /// Wraps a packed buffer, dropping any bytes past the end of the frame.
    pub fn from_bytes(cols: usize, rows: usize, mut data: Vec<u8>) -> BlobResult<Self> {
        let geometry = YuvGeometry::new(cols, rows)?;
        geometry.check_buffer(data.len())?;
        data.truncate(geometry.frame_bytes());
        Ok(Self { geometry, data })
    }

    /// A U/V calibration chart for tuning color thresholds. The top-left
    /// `side x side` square (`side` being the shorter dimension) holds `luma`,
    /// with U rising from 0 to 255 left to right and V falling from 255 to 0
    /// top to bottom. Everything outside the square is black with neutral chroma.
    pub fn color_space_pattern(cols: usize, rows: usize, luma: u8) -> BlobResult<Self> {
        let mut frame = Self::new(cols, rows)?;
        let side = cols.min(rows);
        frame.fill_luma_rect(0, 0, side - 1, side - 1, luma);

        // 256 steps across the square, rounded to the nearest level.
        let level = |luma_offset: usize| ((luma_offset * 256 + side / 2) / side).min(255) as u8;
        let chroma_cols = frame.geometry.chroma_cols();
        let (_, u, v) = frame.planes_mut();
        for cy in 0..side / 2 {
            let v_value = level(side - 2 * cy);
            let row = cy * chroma_cols;
            for cx in 0..side / 2 {
                u[row + cx] = level(2 * cx);
                v[row + cx] = v_value;
            }
        }
        Ok(frame)
    }

    pub fn geometry(&self) -> YuvGeometry {
        self.geometry
    }

    pub fn cols(&self) -> usize {
        self.geometry.cols
    }

    pub fn rows(&self) -> usize {
        self.geometry.rows
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let (y, rest) = self.data.split_at(self.geometry.pixels());
        let (u, v) = rest.split_at(self.geometry.chroma_pixels());
        (y, u, v)
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, rest) = self.data.split_at_mut(self.geometry.pixels());
        let (u, v) = rest.split_at_mut(self.geometry.chroma_pixels());
        (y, u, v)
    }

    /// Paints every pixel with one `[y, u, v]` color.
    pub fn fill(&mut self, yuv: [u8; 3]) {
        let (y, u, v) = self.planes_mut();
        y.fill(yuv[0]);
        u.fill(yuv[1]);
        v.fill(yuv[2]);
    }

    /// Paints the inclusive rectangle `(x0, y0)..=(x1, y1)`, clipped to the frame.
    /// Every chroma block the rectangle touches takes the new chroma, so rectangles
    /// that start or end on odd coordinates bleed color into their neighbors.
    pub fn fill_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize, yuv: [u8; 3]) {
        let Some((x0, y0, x1, y1)) = self.clip(x0, y0, x1, y1) else {
            return;
        };
        self.fill_luma_rect(x0, y0, x1, y1, yuv[0]);
        let chroma_cols = self.geometry.chroma_cols();
        let (_, u, v) = self.planes_mut();
        for cy in y0 / 2..=y1 / 2 {
            let span = cy * chroma_cols + x0 / 2..=cy * chroma_cols + x1 / 2;
            u[span.clone()].fill(yuv[1]);
            v[span].fill(yuv[2]);
        }
    }

    /// Paints luma only over the inclusive rectangle, clipped to the frame.
    pub fn fill_luma_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize, luma: u8) {
        let Some((x0, y0, x1, y1)) = self.clip(x0, y0, x1, y1) else {
            return;
        };
        let cols = self.geometry.cols;
        let (y, _, _) = self.planes_mut();
        for row in y0..=y1 {
            y[row * cols + x0..=row * cols + x1].fill(luma);
        }
    }

    pub fn set_luma(&mut self, x: usize, y: usize, luma: u8) {
        if x < self.cols() && y < self.rows() {
            let cols = self.cols();
            self.data[y * cols + x] = luma;
        }
    }

    /// The `[y, u, v]` sample at a pixel, or `None` outside the frame.
    pub fn get_pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.cols() || y >= self.rows() {
            return None;
        }
        let (luma, u, v) = self.planes();
        let chroma = (y / 2) * self.geometry.chroma_cols() + x / 2;
        Some([luma[y * self.cols() + x], u[chroma], v[chroma]])
    }

    fn clip(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> Option<(usize, usize, usize, usize)> {
        if x0 > x1 || y0 > y1 || x0 >= self.cols() || y0 >= self.rows() {
            return None;
        }
        Some((x0, y0, x1.min(self.cols() - 1), y1.min(self.rows() - 1)))
    }
}
