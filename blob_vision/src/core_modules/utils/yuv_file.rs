// THEORY:
// Helpers for getting frames into and out of the detector outside a live camera
// feed. Raw frames travel in `.yuv` files: a fixed 25-byte text header
// (`#!YUV420 <cols>,<rows>\n`, each number right-aligned in seven columns)
// followed by any number of packed 4:2:0 frames. Everything else goes through the
// `image` crate via BT.601 integer conversions.

use crate::core_modules::yuv_frame::{YuvFrame, YuvGeometry};
use crate::error::{BlobError, BlobResult};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

pub const HEADER_BYTES: usize = 25;
const MAGIC: &str = "#!YUV420";

pub fn format_header(geometry: YuvGeometry) -> String {
    format!("{MAGIC} {:7},{:7}\n", geometry.cols(), geometry.rows())
}

pub fn parse_header(header: &[u8]) -> BlobResult<YuvGeometry> {
    let text = std::str::from_utf8(header).map_err(|_| BlobError::header("header is not ASCII"))?;
    let dims = text
        .strip_prefix(MAGIC)
        .ok_or_else(|| BlobError::header(format!("missing {MAGIC} magic")))?;
    let (cols, rows) = dims
        .trim()
        .split_once(',')
        .ok_or_else(|| BlobError::header("expected `<cols>,<rows>`"))?;
    let parse = |field: &str| {
        field
            .trim()
            .parse::<usize>()
            .map_err(|_| BlobError::header(format!("`{}` is not a dimension", field.trim())))
    };
    YuvGeometry::new(parse(cols)?, parse(rows)?)
}

/// Streams frames out of a `.yuv` source.
pub struct YuvFileReader<R> {
    reader: R,
    geometry: YuvGeometry,
}

impl YuvFileReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> BlobResult<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> YuvFileReader<R> {
    /// Reads and validates the header.
    pub fn new(mut reader: R) -> BlobResult<Self> {
        let mut header = [0u8; HEADER_BYTES];
        reader.read_exact(&mut header).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => BlobError::header("file is shorter than the header"),
            _ => BlobError::Io(err),
        })?;
        let geometry = parse_header(&header)?;
        Ok(Self { reader, geometry })
    }

    pub fn geometry(&self) -> YuvGeometry {
        self.geometry
    }

    /// Reads the next frame into `frame`, which must share this file's geometry.
    /// Returns `false` at a clean end of file.
    pub fn read_next_into(&mut self, frame: &mut YuvFrame) -> BlobResult<bool> {
        if frame.geometry() != self.geometry {
            return Err(BlobError::geometry(
                frame.cols(),
                frame.rows(),
                "frame does not match the file geometry",
            ));
        }
        let buffer = frame.data_mut();
        let mut filled = 0;
        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        match filled {
            0 => Ok(false),
            n if n == buffer.len() => Ok(true),
            actual => Err(BlobError::BufferTooSmall {
                required: buffer.len(),
                actual,
            }),
        }
    }

    pub fn read_next(&mut self) -> BlobResult<Option<YuvFrame>> {
        let mut frame = YuvFrame::new(self.geometry.cols(), self.geometry.rows())?;
        Ok(self.read_next_into(&mut frame)?.then_some(frame))
    }
}

impl<R: Read> Iterator for YuvFileReader<R> {
    type Item = BlobResult<YuvFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Reads the first frame of a `.yuv` file.
pub fn read_yuv_file(path: impl AsRef<Path>) -> BlobResult<YuvFrame> {
    let mut reader = YuvFileReader::open(path)?;
    let required = reader.geometry().frame_bytes();
    reader
        .read_next()?
        .ok_or(BlobError::BufferTooSmall { required, actual: 0 })
}

/// Writes a header followed by each frame. All frames must share one geometry.
pub fn write_yuv<'a, W: Write>(
    mut writer: W,
    frames: impl IntoIterator<Item = &'a YuvFrame>,
) -> BlobResult<()> {
    let mut geometry = None;
    for frame in frames {
        match geometry {
            None => {
                writer.write_all(format_header(frame.geometry()).as_bytes())?;
                geometry = Some(frame.geometry());
            }
            Some(expected) if expected != frame.geometry() => {
                return Err(BlobError::geometry(
                    frame.cols(),
                    frame.rows(),
                    "all frames in a .yuv file share one geometry",
                ));
            }
            Some(_) => {}
        }
        writer.write_all(frame.data())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_yuv_file(path: impl AsRef<Path>, frame: &YuvFrame) -> BlobResult<()> {
    write_yuv(BufWriter::new(File::create(path)?), [frame])
}

/// Converts an RGB image to 4:2:0. An odd trailing row or column is dropped.
pub fn rgb_to_yuv420(image: &RgbImage) -> BlobResult<YuvFrame> {
    let cols = (image.width() & !1) as usize;
    let rows = (image.height() & !1) as usize;
    let mut frame = YuvFrame::new(cols, rows)?;
    let chroma_cols = frame.geometry().chroma_cols();
    let (y_plane, u_plane, v_plane) = frame.planes_mut();

    for cy in 0..rows / 2 {
        for cx in 0..chroma_cols {
            let (mut u_sum, mut v_sum) = (0i32, 0i32);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                let [r, g, b] = image.get_pixel(x as u32, y as u32).0.map(i32::from);
                y_plane[y * cols + x] = clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
                u_sum += ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                v_sum += ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
            }
            u_plane[cy * chroma_cols + cx] = clamp_u8((u_sum + 2) / 4);
            v_plane[cy * chroma_cols + cx] = clamp_u8((v_sum + 2) / 4);
        }
    }
    Ok(frame)
}

pub fn yuv420_to_rgb(frame: &YuvFrame) -> RgbImage {
    let (cols, rows) = (frame.cols(), frame.rows());
    let chroma_cols = frame.geometry().chroma_cols();
    let (y_plane, u_plane, v_plane) = frame.planes();
    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let chroma = (y / 2) * chroma_cols + x / 2;
        let c = i32::from(y_plane[y * cols + x]) - 16;
        let d = i32::from(u_plane[chroma]) - 128;
        let e = i32::from(v_plane[chroma]) - 128;
        image::Rgb([
            clamp_u8((298 * c + 409 * e + 128) >> 8),
            clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
            clamp_u8((298 * c + 516 * d + 128) >> 8),
        ])
    })
}

/// Loads any image format the `image` crate understands as a 4:2:0 frame.
pub fn load_image(path: impl AsRef<Path>) -> BlobResult<YuvFrame> {
    rgb_to_yuv420(&image::open(path)?.to_rgb8())
}

pub fn save_png(frame: &YuvFrame, path: impl AsRef<Path>) -> BlobResult<()> {
    let rgb = yuv420_to_rgb(frame);
    let output = BufWriter::new(File::create(path)?);
    let encoder = PngEncoder::new(output);
    encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
    Ok(())
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_is_exactly_25_bytes() {
        let geometry = YuvGeometry::new(640, 480).expect("valid");
        let header = format_header(geometry);
        assert_eq!(header.len(), HEADER_BYTES);
        assert_eq!(header, "#!YUV420     640,    480\n");
        assert_eq!(parse_header(header.as_bytes()).expect("round trip"), geometry);
    }

    #[test]
    fn bad_headers_are_rejected() {
        assert!(parse_header(b"#!YUV422     640,    480\n").is_err());
        assert!(parse_header(b"#!YUV420     64x,    480\n").is_err());
        assert!(parse_header(b"#!YUV420     641,    480\n").is_err());
        assert!(matches!(
            YuvFileReader::new(Cursor::new(b"#!YUV".to_vec())),
            Err(BlobError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn reader_streams_every_frame() {
        let mut first = YuvFrame::new(4, 2).expect("valid");
        first.fill([1, 2, 3]);
        let mut second = YuvFrame::new(4, 2).expect("valid");
        second.fill([4, 5, 6]);

        let mut bytes = Vec::new();
        write_yuv(&mut bytes, [&first, &second]).expect("in-memory write");
        assert_eq!(bytes.len(), HEADER_BYTES + 2 * 12);

        let reader = YuvFileReader::new(Cursor::new(bytes)).expect("valid header");
        let frames: Vec<_> = reader.collect::<BlobResult<_>>().expect("whole frames");
        assert_eq!(frames, vec![first, second]);
    }

    #[test]
    fn truncated_frames_are_errors() {
        let frame = YuvFrame::new(4, 2).expect("valid");
        let mut bytes = Vec::new();
        write_yuv(&mut bytes, [&frame]).expect("in-memory write");
        bytes.truncate(bytes.len() - 3);

        let mut reader = YuvFileReader::new(Cursor::new(bytes)).expect("valid header");
        assert!(matches!(
            reader.read_next(),
            Err(BlobError::BufferTooSmall { required: 12, actual: 9 })
        ));
    }

    #[test]
    fn gray_survives_the_color_round_trip() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([128, 128, 128]));
        let frame = rgb_to_yuv420(&image).expect("even dimensions");
        assert_eq!(frame.get_pixel(1, 1), Some([126, 128, 128]));
        let back = yuv420_to_rgb(&frame);
        assert_eq!(back.get_pixel(3, 3).0, [128, 128, 128]);
    }

    #[test]
    fn odd_edges_are_cropped() {
        let image = RgbImage::from_pixel(5, 3, image::Rgb([255, 0, 0]));
        let frame = rgb_to_yuv420(&image).expect("cropped to 4x2");
        assert_eq!((frame.cols(), frame.rows()), (4, 2));
        let [_, u, v] = frame.get_pixel(0, 0).expect("inside");
        assert!(v > 200 && u < 128, "red has high V and low U");
    }
}
