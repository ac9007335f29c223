//! Per-directory header interpretation.
//!
//! One [`Header`] is read per TIFF directory. For multipage reads many of
//! them are read and compared, so everything the read strategy depends on is
//! collected here in one pass.

use tracing::{debug, warn};

use crate::container::{Container, DecodeHint};
use crate::error::{TiffFormatError, TiffResult, TiffUnsupportedError};
use crate::tags::{
    CompressionMethod, ExtraSamples, InkSet, PhotometricInterpretation, PlanarConfiguration,
    SampleFormat, Tag,
};

/// Arbitrary sanity cap on image dimensions.
const MAX_COORD: u32 = 10_000_000;

/// Fuzzed TIFFs can give crazy values for tile or strip sizes. Cap at 100mb.
const MAX_CHUNK_BYTES: usize = 100 * 1000 * 1000;

/// Strips taller than this are read through the scanline API instead of
/// decompressing the whole strip to memory.
const MAX_STRIP_READ_HEIGHT: u32 = 128;

/// What we read from a TIFF directory to set the read strategy. For multipage
/// read we need to read and compare lots of these, so it is broken out as a
/// separate thing from the reader state.
#[derive(Clone, Debug)]
pub(crate) struct Header {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub photometric: PhotometricInterpretation,
    pub inkset: InkSet,
    pub sample_format: SampleFormat,
    pub separate: bool,
    pub orientation: u8,

    /// The band carrying premultiplied alpha, if any.
    pub alpha_band: Option<u16>,
    pub compression: CompressionMethod,

    pub tiled: bool,

    /// Fields for tiled directories, as reported by the container.
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_size: usize,
    pub tile_row_size: usize,

    /// Fields for stripped directories, as reported by the container.
    pub rows_per_strip: u32,
    pub strip_size: usize,
    pub scanline_size: usize,
    pub number_of_strips: u32,

    /// Strips are too large to read in a single lump; use the scanline API.
    pub read_scanlinewise: bool,

    /// Strip read geometry: the number of rows read at once (whole strip or
    /// one) and the size of the buffer read into.
    pub read_height: u32,
    pub read_size: usize,

    /// Scale factor to get absolute cd/m2 from XYZ.
    pub stonits: f64,

    pub subifd_count: u32,

    pub image_description: Option<String>,

    /// Compression is decompressed by this crate rather than the container.
    pub we_decompress: bool,

    /// Decode through the container's generalized RGBA path.
    pub read_as_rgba: bool,
}

impl Header {
    /// Whether this page can be stacked onto `base` in a multipage read.
    pub fn congruent(&self, base: &Header) -> bool {
        if self.width != base.width
            || self.height != base.height
            || self.samples_per_pixel != base.samples_per_pixel
            || self.bits_per_sample != base.bits_per_sample
            || self.photometric != base.photometric
            || self.sample_format != base.sample_format
            || self.compression != base.compression
            || self.separate != base.separate
            || self.tiled != base.tiled
            || self.orientation != base.orientation
        {
            return false;
        }

        if self.tiled {
            self.tile_width == base.tile_width && self.tile_height == base.tile_height
        } else {
            self.read_height == base.read_height
                && self.read_size == base.read_size
                && self.number_of_strips == base.number_of_strips
        }
    }

    /// The decode-format hint for this directory, re-applied on every
    /// directory switch since switching resets it.
    pub fn decode_hint(&self) -> Option<DecodeHint> {
        if self.compression == CompressionMethod::Jpeg
            || self.compression == CompressionMethod::OldJpeg
        {
            // Ask for YCbCr->RGB for jpg data.
            Some(DecodeHint::JpegRgb)
        } else if self.photometric == PhotometricInterpretation::LogLuv {
            // Ask for SGI LOGLUV as 3xfloat.
            Some(DecodeHint::SgiLogFloat)
        } else {
            None
        }
    }
}

fn required_u32<C: Container>(container: &mut C, tag: Tag) -> TiffResult<u32> {
    container
        .field_u32(tag)?
        .ok_or_else(|| TiffFormatError::RequiredTagNotFound(tag).into())
}

fn defaulted_u16<C: Container>(container: &mut C, tag: Tag, default: u16) -> TiffResult<u16> {
    Ok(container.field_u16(tag)?.unwrap_or(default))
}

fn sample_format<C: Container>(container: &mut C) -> TiffResult<SampleFormat> {
    let raw = defaulted_u16(container, Tag::SampleFormat, 1)?;
    let mut format = SampleFormat::from_u16_exhaustive(raw);

    // Some images have this set to void, bizarre.
    if format == SampleFormat::Void {
        format = SampleFormat::Uint;
    }

    Ok(format)
}

fn orientation<C: Container>(container: &mut C) -> TiffResult<u8> {
    // Can have mad values.
    let raw = defaulted_u16(container, Tag::Orientation, 1)?;
    Ok(raw.clamp(1, 8) as u8)
}

/// Compression schemes this crate decompresses itself, outside the container
/// lock, so tiles decode in parallel.
fn we_decompress(compression: CompressionMethod) -> bool {
    match compression {
        #[cfg(feature = "jpeg")]
        CompressionMethod::Jpeg => true,
        CompressionMethod::Jp2kYcc | CompressionMethod::Jp2kRgb | CompressionMethod::Jp2kLossy => {
            cfg!(feature = "jp2k")
        }
        _ => false,
    }
}

fn max_tile_dimension(width: u32, height: u32) -> u32 {
    let round_up = |value: u32, to: u32| value.div_ceil(to) * to;
    8192.max(round_up(2 * width.max(height), 256))
}

/// Pick between whole-strip and scanline-wise reading.
///
/// Decompressing an entire strip is fast but needs a lot of memory when the
/// strip is tall; above the threshold fall back to one scanline at a time.
/// Scanline reading cannot work for separate planes, for subsampled YCbCr
/// (the scanline size is not well-defined there) or through the RGBA path.
fn strip_read_geometry(header: &Header) -> (bool, u32, usize) {
    if header.rows_per_strip > MAX_STRIP_READ_HEIGHT
        && !header.separate
        && header.photometric != PhotometricInterpretation::YCbCr
        && !header.read_as_rgba
    {
        (true, 1, header.scanline_size)
    } else {
        (false, header.rows_per_strip, header.strip_size)
    }
}

/// Load one directory's tags into a [`Header`], applying defaults and the
/// sanity-check caps, and classifying the directory as tiled or stripped.
pub(crate) fn read_header<C: Container>(container: &mut C) -> TiffResult<Header> {
    let width = required_u32(container, Tag::ImageWidth)?;
    let height = required_u32(container, Tag::ImageLength)?;
    let samples_per_pixel = defaulted_u16(container, Tag::SamplesPerPixel, 1)?;
    let bits_per_sample = defaulted_u16(container, Tag::BitsPerSample, 1)?;
    let photometric_raw = container
        .field_u16(Tag::PhotometricInterpretation)?
        .ok_or(TiffFormatError::RequiredTagNotFound(
            Tag::PhotometricInterpretation,
        ))?;
    let photometric = PhotometricInterpretation::from_u16(photometric_raw)
        .ok_or(TiffUnsupportedError::UnknownInterpretation(photometric_raw))?;
    let inkset = InkSet::from_u16_exhaustive(defaulted_u16(container, Tag::InkSet, 1)?);

    let mut read_as_rgba = false;

    // Directory shapes the container's RGBA fallback can decode at all.
    let can_read_as_rgba = matches!(samples_per_pixel, 1 | 3 | 4)
        && matches!(bits_per_sample, 1 | 2 | 4 | 8 | 16)
        && container.rgba_supported();

    let compression =
        CompressionMethod::from_u16_exhaustive(defaulted_u16(container, Tag::Compression, 1)?);

    // Old-style JPEG decodes only through the RGBA path.
    if compression == CompressionMethod::OldJpeg {
        if !can_read_as_rgba {
            return Err(TiffUnsupportedError::RgbaFallbackUnavailable.into());
        }

        read_as_rgba = true;
    }

    let we_decompress = we_decompress(compression);

    // Must be applied before any scanline or strip size query, since the
    // hint changes those values.
    if compression == CompressionMethod::Jpeg || compression == CompressionMethod::OldJpeg {
        container.set_decode_hint(DecodeHint::JpegRgb);
    } else if photometric == PhotometricInterpretation::LogLuv {
        container.set_decode_hint(DecodeHint::SgiLogFloat);
    }

    // Chroma-subsampled YCbCr without a JPEG decompressor cannot be unpacked
    // natively; route through the RGBA path when the shape permits.
    if !read_as_rgba
        && compression != CompressionMethod::Jpeg
        && photometric == PhotometricInterpretation::YCbCr
    {
        let subsampling = container.field_u16_vec(Tag::YCbCrSubsampling)?;
        let (hsub, vsub) = match subsampling.as_deref() {
            Some([h, v, ..]) => (*h, *v),
            _ => (2, 2),
        };

        if hsub != 1 || vsub != 1 {
            if !can_read_as_rgba {
                return Err(TiffUnsupportedError::SubsampledChroma.into());
            }

            read_as_rgba = true;
        }
    }

    if photometric == PhotometricInterpretation::LogLuv
        && compression != CompressionMethod::SgiLog
        && compression != CompressionMethod::SgiLog24
    {
        return Err(TiffUnsupportedError::NonSgiLogLuv(compression).into());
    }

    // For logluv, the calibration factor to get to absolute luminance.
    let stonits = container.field_f64(Tag::StoNits)?.unwrap_or(1.0);

    if width == 0 || width >= MAX_COORD || height == 0 || height >= MAX_COORD {
        return Err(TiffFormatError::InvalidDimensions(width, height).into());
    }

    if samples_per_pixel == 0 || samples_per_pixel > 10_000 {
        return Err(TiffFormatError::SamplesPerPixelOutOfRange(samples_per_pixel).into());
    }

    let sample_format = sample_format(container)?;

    let bits_ok = match bits_per_sample {
        1..=32 => true,
        64 => matches!(
            sample_format,
            SampleFormat::IEEEFP | SampleFormat::ComplexIEEEFP
        ),
        128 => sample_format == SampleFormat::ComplexIEEEFP,
        _ => false,
    };
    if !bits_ok {
        return Err(TiffFormatError::BitsPerSampleOutOfRange(bits_per_sample).into());
    }

    let orientation = orientation(container)?;

    let separate = container.field_u16(Tag::PlanarConfiguration)?
        == Some(PlanarConfiguration::Planar.to_u16());

    let subifd_count = container
        .field_u64_vec(Tag::SubIfd)?
        .map_or(0, |offsets| offsets.len() as u32);

    let image_description = container.field_ascii(Tag::ImageDescription)?;

    let tiled = container.is_tiled();

    let mut header = Header {
        width,
        height,
        samples_per_pixel,
        bits_per_sample,
        photometric,
        inkset,
        sample_format,
        separate,
        orientation,
        alpha_band: None,
        compression,
        tiled,
        tile_width: 0,
        tile_height: 0,
        tile_size: 0,
        tile_row_size: 0,
        rows_per_strip: 0,
        strip_size: 0,
        scanline_size: 0,
        number_of_strips: 0,
        read_scanlinewise: false,
        read_height: 0,
        read_size: 0,
        stonits,
        subifd_count,
        image_description,
        we_decompress,
        read_as_rgba,
    };

    // The RGBA fallback always delivers the same layout; rewrite the header
    // so every downstream observer sees it.
    if read_as_rgba {
        header.we_decompress = false;
        header.photometric = PhotometricInterpretation::RGB;
        header.samples_per_pixel = 4;
        header.bits_per_sample = 8;
        header.sample_format = SampleFormat::Uint;
        header.separate = false;
    }

    debug!(
        width,
        height,
        samples_per_pixel = header.samples_per_pixel,
        bits_per_sample = header.bits_per_sample,
        ?photometric,
        ?compression,
        tiled,
        read_as_rgba,
        we_decompress = header.we_decompress,
        "header read"
    );

    if tiled {
        let tile_width = required_u32(container, Tag::TileWidth)?;
        let tile_height = required_u32(container, Tag::TileLength)?;

        let max_dimension = max_tile_dimension(width, height);
        if tile_width == 0
            || tile_width > max_dimension
            || tile_width % 16 != 0
            || tile_height == 0
            || tile_height > max_dimension
            || tile_height % 16 != 0
        {
            return Err(TiffFormatError::TileGeometryOutOfRange {
                tile_width,
                tile_height,
            }
            .into());
        }

        let (tile_size, tile_row_size) = if header.read_as_rgba {
            let row = tile_width as usize * 4;
            (row * tile_height as usize, row)
        } else {
            (container.tile_size()?, container.tile_row_size()?)
        };

        if tile_size == 0
            || tile_size > MAX_CHUNK_BYTES
            || tile_row_size == 0
            || tile_row_size > MAX_CHUNK_BYTES
        {
            return Err(TiffFormatError::ChunkSizeOutOfRange {
                size: tile_size as u64,
            }
            .into());
        }

        header.tile_width = tile_width;
        header.tile_height = tile_height;
        header.tile_size = tile_size;
        header.tile_row_size = tile_row_size;
    } else {
        // rows_per_strip defaults to "infinite", meaning the whole image;
        // clip down to the height, and it must not be zero.
        let rows_per_strip = container
            .field_u32(Tag::RowsPerStrip)?
            .unwrap_or(u32::MAX)
            .clamp(1, height);

        let number_of_strips = container.number_of_strips()?;

        let (scanline_size, strip_size) = if header.read_as_rgba {
            let scanline = width as usize * 4;
            (scanline, scanline * rows_per_strip as usize)
        } else {
            (container.scanline_size()?, container.strip_size()?)
        };

        if strip_size == 0 || strip_size > MAX_CHUNK_BYTES || scanline_size == 0 {
            return Err(TiffFormatError::ChunkSizeOutOfRange {
                size: strip_size as u64,
            }
            .into());
        }

        header.rows_per_strip = rows_per_strip;
        header.number_of_strips = number_of_strips;
        header.scanline_size = scanline_size;
        header.strip_size = strip_size;

        let (read_scanlinewise, read_height, read_size) = strip_read_geometry(&header);
        header.read_scanlinewise = read_scanlinewise;
        header.read_height = read_height;
        header.read_size = read_size;
    }

    // There should be exactly one band marked as associated alpha. Note
    // which one it is so consumers can unpremultiply the right channel.
    if let Some(extra) = container.field_u16_vec(Tag::ExtraSamples)? {
        let extra_count = (extra.len() as u16).min(header.samples_per_pixel);
        for (i, value) in extra.iter().take(usize::from(extra_count)).enumerate() {
            if ExtraSamples::from_u16_exhaustive(*value) == ExtraSamples::AssociatedAlpha {
                if header.alpha_band.is_some() {
                    warn!("more than one alpha -- ignoring");
                    continue;
                }

                header.alpha_band =
                    Some(header.samples_per_pixel - extra_count + i as u16);
            }
        }
    }

    Ok(header)
}
