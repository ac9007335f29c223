//! A synthetic in-memory container used by the integration tests.
//!
//! Implements the [`Container`] contract over hand-built directories, so
//! every read path can be driven without real files. Pixel data is stored
//! the way the contract describes it: strips and tiles post-decompression
//! in native byte order, RGBA fallback data as a whole top-down image
//! (tiles are served bottom-up, as the contract requires).

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tiff_roll::container::{Container, DecodeHint, WarningHandler};
use tiff_roll::tags::Tag;
use tiff_roll::{DecodeError, TiffError, TiffFormatError, TiffResult};

/// One synthetic directory.
#[derive(Clone, Default)]
pub struct TestDir {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub photometric: u16,
    pub compression: u16,
    pub sample_format: Option<u16>,
    pub planar: Option<u16>,
    pub orientation: Option<u16>,
    pub inkset: Option<u16>,
    pub rows_per_strip: Option<u32>,
    pub tile: Option<(u32, u32)>,
    pub colormap: Option<Vec<u16>>,
    pub extra_samples: Option<Vec<u16>>,
    pub subsampling: Option<(u16, u16)>,
    /// (xres, yres, unit tag value)
    pub resolution: Option<(f64, f64, u16)>,
    pub description: Option<String>,
    pub icc: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
    pub iptc: Option<Vec<u8>>,
    pub photoshop: Option<Vec<u8>>,
    pub jpeg_tables: Option<Vec<u8>>,
    pub stonits: Option<f64>,
    pub subifds: Vec<TestDir>,

    /// Decompressed strip payloads; plane-major for planar directories.
    pub strips: Vec<Vec<u8>>,
    /// Row payloads for scanline-wise reading.
    pub scanlines: Vec<Vec<u8>>,
    /// Decompressed tile payloads, row-major over the tile grid.
    pub tiles: Vec<Vec<u8>>,
    /// Compressed tile payloads served by read_raw_tile.
    pub raw_tiles: Vec<Vec<u8>>,
    /// Whole-image RGBA, top-down, for the fallback decoder.
    pub rgba: Option<Vec<u8>>,

    pub scanline_size: usize,
    pub strip_size: usize,
    pub number_of_strips: u32,
    pub tile_size: usize,
    pub tile_row_size: usize,
}

impl TestDir {
    pub fn new(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        photometric: u16,
    ) -> Self {
        TestDir {
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            photometric,
            compression: 1,
            ..TestDir::default()
        }
    }

    /// Bytes in one chunky scanline.
    pub fn chunky_scanline(&self) -> usize {
        (self.width as usize * usize::from(self.samples_per_pixel)
            * usize::from(self.bits_per_sample))
        .div_ceil(8)
    }

    /// Lay the whole image out as strips of `rows_per_strip` rows.
    pub fn with_strips(mut self, rows_per_strip: u32, image: &[u8]) -> Self {
        let scanline = self.chunky_scanline();
        assert_eq!(image.len(), scanline * self.height as usize);

        self.rows_per_strip = Some(rows_per_strip);
        self.scanline_size = scanline;
        self.strip_size = scanline * rows_per_strip as usize;
        self.strips = image
            .chunks(self.strip_size)
            .map(|strip| strip.to_vec())
            .collect();
        self.number_of_strips = self.strips.len() as u32;
        self
    }

    /// Plane-major strips for a planar-separate directory.
    pub fn with_planar_strips(mut self, rows_per_strip: u32, planes: &[Vec<u8>]) -> Self {
        assert_eq!(planes.len(), usize::from(self.samples_per_pixel));

        let scanline = (self.width as usize * usize::from(self.bits_per_sample)).div_ceil(8);
        self.planar = Some(2);
        self.rows_per_strip = Some(rows_per_strip);
        self.scanline_size = scanline;
        self.strip_size = scanline * rows_per_strip as usize;

        for plane in planes {
            assert_eq!(plane.len(), scanline * self.height as usize);
            for strip in plane.chunks(self.strip_size) {
                self.strips.push(strip.to_vec());
            }
        }

        self.number_of_strips = self.strips.len() as u32;
        self
    }

    /// Lay the image out as one strip per scanline-wise read: tall strips,
    /// row payloads served through read_scanline.
    pub fn with_scanlines(mut self, image: &[u8]) -> Self {
        let scanline = self.chunky_scanline();
        assert_eq!(image.len(), scanline * self.height as usize);

        self.rows_per_strip = Some(self.height.max(129));
        self.scanline_size = scanline;
        self.strip_size = scanline * self.height as usize;
        self.scanlines = image.chunks(scanline).map(|row| row.to_vec()).collect();
        self.number_of_strips = 1;
        self
    }

    /// Cut the whole image into padded tiles of the given size.
    pub fn with_tiles(mut self, tile_width: u32, tile_height: u32, image: &[u8]) -> Self {
        let pel = usize::from(self.samples_per_pixel) * usize::from(self.bits_per_sample) / 8;
        let scanline = self.width as usize * pel;
        assert_eq!(image.len(), scanline * self.height as usize);

        self.tile = Some((tile_width, tile_height));
        self.tile_row_size = tile_width as usize * pel;
        self.tile_size = self.tile_row_size * tile_height as usize;

        let across = self.width.div_ceil(tile_width);
        let down = self.height.div_ceil(tile_height);

        for ty in 0..down {
            for tx in 0..across {
                let mut tile = vec![0u8; self.tile_size];
                for row in 0..tile_height {
                    let y = ty * tile_height + row;
                    if y >= self.height {
                        break;
                    }
                    let left = (tx * tile_width) as usize * pel;
                    let avail = scanline - left;
                    let take = avail.min(self.tile_row_size);
                    let src = &image[y as usize * scanline + left..][..take];
                    tile[row as usize * self.tile_row_size..][..take].copy_from_slice(src);
                }
                self.tiles.push(tile);
            }
        }

        self
    }

    fn tiles_across(&self) -> u32 {
        let (tile_width, _) = self.tile.expect("tiled directory");
        self.width.div_ceil(tile_width)
    }
}

/// The synthetic container.
pub struct TestContainer {
    pub dirs: Vec<TestDir>,
    current: Option<usize>,
    current_sub: Option<usize>,
    hint: Option<DecodeHint>,
    handler: Option<WarningHandler>,
    /// A warning emitted on every strip or tile read, for escalation tests.
    pub warn_on_read: Option<String>,
    pub closed: Arc<AtomicUsize>,
    pub minimised: Arc<AtomicBool>,
}

impl TestContainer {
    pub fn new(dirs: Vec<TestDir>) -> Self {
        TestContainer {
            dirs,
            current: None,
            current_sub: None,
            hint: None,
            handler: None,
            warn_on_read: None,
            closed: Arc::new(AtomicUsize::new(0)),
            minimised: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn single(dir: TestDir) -> Self {
        TestContainer::new(vec![dir])
    }

    fn dir(&self) -> &TestDir {
        let dir = &self.dirs[self.current.expect("no directory selected")];
        match self.current_sub {
            Some(sub) => &dir.subifds[sub],
            None => dir,
        }
    }

    fn warn_if_configured(&self) {
        if let (Some(message), Some(handler)) = (&self.warn_on_read, &self.handler) {
            handler(message.as_str());
        }
    }

    fn read_failed() -> TiffError {
        TiffError::DecodeError(DecodeError::ReadFailed)
    }
}

impl Container for TestContainer {
    fn set_directory(&mut self, index: u32) -> TiffResult<()> {
        if (index as usize) < self.dirs.len() {
            self.current = Some(index as usize);
            self.current_sub = None;
            self.hint = None;
            Ok(())
        } else {
            Err(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound,
            ))
        }
    }

    fn set_sub_directory(&mut self, offset: u64) -> TiffResult<()> {
        let dir = &self.dirs[self.current.expect("no directory selected")];
        if (offset as usize) < dir.subifds.len() {
            self.current_sub = Some(offset as usize);
            Ok(())
        } else {
            Err(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound,
            ))
        }
    }

    fn is_tiled(&mut self) -> bool {
        self.dir().tile.is_some()
    }

    fn set_decode_hint(&mut self, hint: DecodeHint) {
        self.hint = Some(hint);
    }

    fn set_warning_handler(&mut self, handler: WarningHandler) {
        self.handler = Some(handler);
    }

    fn field_u16(&mut self, tag: Tag) -> TiffResult<Option<u16>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::SamplesPerPixel => Some(dir.samples_per_pixel),
            Tag::BitsPerSample => Some(dir.bits_per_sample),
            Tag::PhotometricInterpretation => Some(dir.photometric),
            Tag::Compression => Some(dir.compression),
            Tag::SampleFormat => dir.sample_format,
            Tag::PlanarConfiguration => dir.planar,
            Tag::Orientation => dir.orientation,
            Tag::InkSet => dir.inkset,
            Tag::ResolutionUnit => dir.resolution.map(|(_, _, unit)| unit),
            _ => None,
        })
    }

    fn field_u32(&mut self, tag: Tag) -> TiffResult<Option<u32>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::ImageWidth => Some(dir.width),
            Tag::ImageLength => Some(dir.height),
            Tag::RowsPerStrip => dir.rows_per_strip,
            Tag::TileWidth => dir.tile.map(|(w, _)| w),
            Tag::TileLength => dir.tile.map(|(_, h)| h),
            _ => None,
        })
    }

    fn field_f64(&mut self, tag: Tag) -> TiffResult<Option<f64>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::XResolution => dir.resolution.map(|(x, _, _)| x),
            Tag::YResolution => dir.resolution.map(|(_, y, _)| y),
            Tag::StoNits => dir.stonits,
            _ => None,
        })
    }

    fn field_u16_vec(&mut self, tag: Tag) -> TiffResult<Option<Vec<u16>>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::ColorMap => dir.colormap.clone(),
            Tag::ExtraSamples => dir.extra_samples.clone(),
            Tag::YCbCrSubsampling => dir.subsampling.map(|(h, v)| vec![h, v]),
            _ => None,
        })
    }

    fn field_u64_vec(&mut self, tag: Tag) -> TiffResult<Option<Vec<u64>>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::SubIfd if !dir.subifds.is_empty() => {
                Some((0..dir.subifds.len() as u64).collect())
            }
            _ => None,
        })
    }

    fn field_ascii(&mut self, tag: Tag) -> TiffResult<Option<String>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::ImageDescription => dir.description.clone(),
            _ => None,
        })
    }

    fn field_blob(&mut self, tag: Tag) -> TiffResult<Option<Vec<u8>>> {
        let dir = self.dir();
        Ok(match tag {
            Tag::IccProfile => dir.icc.clone(),
            Tag::XmpPacket => dir.xmp.clone(),
            Tag::RichTiffIptc => dir.iptc.clone(),
            Tag::Photoshop => dir.photoshop.clone(),
            Tag::JpegTables => dir.jpeg_tables.clone(),
            _ => None,
        })
    }

    fn scanline_size(&mut self) -> TiffResult<usize> {
        Ok(self.dir().scanline_size)
    }

    fn strip_size(&mut self) -> TiffResult<usize> {
        Ok(self.dir().strip_size)
    }

    fn number_of_strips(&mut self) -> TiffResult<u32> {
        Ok(self.dir().number_of_strips)
    }

    fn tile_size(&mut self) -> TiffResult<usize> {
        Ok(self.dir().tile_size)
    }

    fn tile_row_size(&mut self) -> TiffResult<usize> {
        Ok(self.dir().tile_row_size)
    }

    fn compute_tile(&mut self, x: u32, y: u32) -> TiffResult<u32> {
        let dir = self.dir();
        let (tile_width, tile_height) = dir.tile.expect("tiled directory");
        Ok((y / tile_height) * dir.tiles_across() + x / tile_width)
    }

    fn read_encoded_strip(&mut self, strip: u32, buf: &mut [u8]) -> TiffResult<usize> {
        self.warn_if_configured();
        let data = self
            .dir()
            .strips
            .get(strip as usize)
            .ok_or_else(Self::read_failed)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> TiffResult<()> {
        self.warn_if_configured();
        let data = self
            .dir()
            .scanlines
            .get(row as usize)
            .ok_or_else(Self::read_failed)?;
        buf[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_tile(&mut self, x: u32, y: u32, buf: &mut [u8]) -> TiffResult<()> {
        self.warn_if_configured();
        let index = self.compute_tile(x, y)? as usize;
        let data = self.dir().tiles.get(index).ok_or_else(Self::read_failed)?;
        buf[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_raw_tile(&mut self, tile: u32, buf: &mut [u8]) -> TiffResult<usize> {
        let data = self
            .dir()
            .raw_tiles
            .get(tile as usize)
            .ok_or_else(Self::read_failed)?;
        if data.len() > buf.len() {
            return Err(Self::read_failed());
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn rgba_supported(&mut self) -> bool {
        self.dir().rgba.is_some()
    }

    fn read_rgba_strip(&mut self, row: u32, rows: u32, buf: &mut [u8]) -> TiffResult<()> {
        let dir = self.dir();
        let rgba = dir.rgba.as_ref().ok_or_else(Self::read_failed)?;
        let stride = dir.width as usize * 4;
        let len = rows as usize * stride;
        buf[..len].copy_from_slice(&rgba[row as usize * stride..][..len]);
        Ok(())
    }

    fn read_rgba_tile(&mut self, x: u32, y: u32, buf: &mut [u8]) -> TiffResult<()> {
        let dir = self.dir();
        let rgba = dir.rgba.as_ref().ok_or_else(Self::read_failed)?;
        let (tile_width, tile_height) = dir.tile.expect("tiled directory");
        let stride = dir.width as usize * 4;
        let row_size = tile_width as usize * 4;

        // Delivered bottom-up, as the fallback decoder does.
        for row in 0..tile_height {
            let out = &mut buf[(tile_height - 1 - row) as usize * row_size..][..row_size];
            out.fill(0);

            let src_y = y + row;
            if src_y >= dir.height {
                continue;
            }

            let left = x as usize * 4;
            let take = (stride - left).min(row_size);
            out[..take].copy_from_slice(&rgba[src_y as usize * stride + left..][..take]);
        }

        Ok(())
    }

    fn minimise(&mut self) {
        self.minimised.store(true, Ordering::Relaxed);
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}
