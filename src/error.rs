use std::error::Error;
use std::fmt;
use std::io;

use crate::tags::{CompressionMethod, PhotometricInterpretation, SampleFormat, Tag};

/// Tiff error kinds.
#[derive(Debug)]
pub enum TiffError {
    /// The image is not formatted properly.
    FormatError(TiffFormatError),

    /// The decoder does not support features required by the image.
    UnsupportedError(TiffUnsupportedError),

    /// The image does not support the requested operation.
    UsageError(UsageError),

    /// The container or one of the tile decompressors returned failure.
    DecodeError(DecodeError),

    /// An I/O Error occurred while decoding the image.
    IoError(io::Error),

    /// The limits of the decoder were exceeded.
    LimitsExceeded,

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    IntSizeError,
}

/// The image is not formatted properly.
///
/// This indicates that the writer producing the image might behave incorrectly or that the input
/// file has been corrupted.
///
/// The list of variants may grow to incorporate errors of future features. Matching against this
/// exhaustively is not covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TiffFormatError {
    ImageFileDirectoryNotFound,
    RequiredTagNotFound(Tag),
    InvalidDimensions(u32, u32),
    SamplesPerPixelOutOfRange(u16),
    BitsPerSampleOutOfRange(u16),
    TileGeometryOutOfRange {
        tile_width: u32,
        tile_height: u32,
    },
    ChunkSizeOutOfRange {
        size: u64,
    },
    BadColormap,
    PageMismatch {
        page: u32,
        base_page: u32,
    },
    UnknownResolutionUnit(u16),
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffFormatError::*;
        match *self {
            ImageFileDirectoryNotFound => write!(fmt, "Image file directory not found."),
            RequiredTagNotFound(ref tag) => write!(fmt, "Required tag `{:?}` not found.", tag),
            InvalidDimensions(width, height) => {
                write!(fmt, "Width/height out of range: {}x{}.", width, height)
            }
            SamplesPerPixelOutOfRange(samples) => {
                write!(fmt, "Samples per pixel out of range: {}.", samples)
            }
            BitsPerSampleOutOfRange(bits) => {
                write!(fmt, "Bits per sample out of range: {}.", bits)
            }
            TileGeometryOutOfRange {
                tile_width,
                tile_height,
            } => {
                write!(
                    fmt,
                    "Tile size out of range: {}x{}.",
                    tile_width, tile_height
                )
            }
            ChunkSizeOutOfRange { size } => {
                write!(fmt, "Tile or strip byte size out of range: {}.", size)
            }
            BadColormap => write!(fmt, "Palette image with a bad colormap."),
            PageMismatch { page, base_page } => {
                write!(fmt, "Page {} differs from page {}.", page, base_page)
            }
            UnknownResolutionUnit(unit) => write!(fmt, "Unknown resolution unit {}.", unit),
        }
    }
}

/// The decoder does not support features required by the image.
///
/// This only captures known failures for which the standard either does not require support or an
/// implementation has been planned but not yet completed. Some variants may become unused over
/// time and will then get deprecated before being removed.
///
/// The list of variants may grow. Matching against this exhaustively is not covered by interface
/// stability guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TiffUnsupportedError {
    /// The image is using an unknown photometric interpretation.
    UnknownInterpretation(u16),
    /// No kernel covers this combination of bit depth and sample format.
    UnsupportedImageType {
        bits_per_sample: u16,
        sample_format: SampleFormat,
    },
    /// Samples are not a whole number of bytes.
    FractionalSamples(u16),
    /// The interpretation needs more samples per pixel than the directory carries.
    TooFewSamples {
        photometric: PhotometricInterpretation,
        samples: u16,
    },
    /// The interpretation only works with an exact sample count.
    WrongSampleCount {
        photometric: PhotometricInterpretation,
        expected: u16,
        samples: u16,
    },
    UnsupportedPaletteBits(u16),
    /// Chroma-subsampled YCbCr without JPEG compression and no RGBA fallback.
    SubsampledChroma,
    /// LogLuv data with a compression other than SGILOG or SGILOG24.
    NonSgiLogLuv(CompressionMethod),
    TiledPlanarConfiguration,
    ComplexSamples,
    /// The shape does not permit the container's RGBA fallback either.
    RgbaFallbackUnavailable,
    /// In copy mode the container line or tile layout must equal the output layout.
    LayoutMismatch,
}

impl fmt::Display for TiffUnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffUnsupportedError::*;
        match *self {
            UnknownInterpretation(value) => {
                write!(
                    fmt,
                    "The image is using the unknown photometric interpretation {}.",
                    value
                )
            }
            UnsupportedImageType {
                bits_per_sample,
                sample_format,
            } => write!(
                fmt,
                "{} bits per sample with sample format {:?} is unsupported",
                bits_per_sample, sample_format
            ),
            FractionalSamples(bits) => {
                write!(fmt, "Samples of {} bits are not a whole number of bytes.", bits)
            }
            TooFewSamples {
                photometric,
                samples,
            } => write!(
                fmt,
                "{:?} with {} samples per pixel is unsupported.",
                photometric, samples
            ),
            WrongSampleCount {
                photometric,
                expected,
                samples,
            } => write!(
                fmt,
                "{:?} requires exactly {} samples per pixel, got {}.",
                photometric, expected, samples
            ),
            UnsupportedPaletteBits(bits) => {
                write!(fmt, "{} bits per sample palette image not supported.", bits)
            }
            SubsampledChroma => write!(fmt, "Subsampled images not supported."),
            NonSgiLogLuv(method) => {
                write!(fmt, "LogLuv with compression {:?} is not SGI-compressed.", method)
            }
            TiledPlanarConfiguration => write!(fmt, "Tiled separate planes not supported."),
            ComplexSamples => write!(fmt, "Complex samples not supported here."),
            RgbaFallbackUnavailable => {
                write!(fmt, "Image shape not expressible, and RGBA fallback unavailable.")
            }
            LayoutMismatch => write!(
                fmt,
                "Container buffer layout does not match the output layout."
            ),
        }
    }
}

/// User attempted to use the decoder in a way that is incompatible with a specific image.
///
/// For example: requesting strips out of order, or a subifd beyond the declared count.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UsageError {
    OutOfOrderRead { requested: u32, position: u32 },
    PageOutOfRange(u32),
    PageCountOutOfRange(u32),
    SubifdOutOfRange { requested: u32, count: u32 },
    RegionOutOfBounds,
    UnalignedRegion { left: u32, tile_width: u32 },
    NotFullWidth { left: u32, width: u32 },
    InsufficientOutputBufferSize { needed: usize, provided: usize },
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            OutOfOrderRead {
                requested,
                position,
            } => {
                write!(
                    fmt,
                    "Out of order read: at line {}, but line {} requested.",
                    position, requested
                )
            }
            PageOutOfRange(page) => write!(fmt, "Bad page number {}.", page),
            PageCountOutOfRange(n) => write!(fmt, "Bad number of pages {}.", n),
            SubifdOutOfRange { requested, count } => {
                write!(
                    fmt,
                    "Subifd {} out of range, only 0-{} available.",
                    requested,
                    count.saturating_sub(1)
                )
            }
            RegionOutOfBounds => write!(fmt, "Requested region lies outside the image."),
            UnalignedRegion { left, tile_width } => {
                write!(
                    fmt,
                    "Region left edge {} not aligned to the tile grid of width {}.",
                    left, tile_width
                )
            }
            NotFullWidth { left, width } => {
                write!(
                    fmt,
                    "Strip regions must span the full image width, got left {} width {}.",
                    left, width
                )
            }
            InsufficientOutputBufferSize { needed, provided } => {
                write!(
                    fmt,
                    "Output buffer needs {} bytes, only {} provided.",
                    needed, provided
                )
            }
        }
    }
}

/// The container or one of the tile decompressors failed to produce pixels.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DecodeError {
    /// A raw read through the container returned no data.
    ReadFailed,
    /// The encoded data ended before the declared pixel extent.
    Truncated { actual: usize, required: usize },
    /// Decompressing one tile failed.
    TileDecode { x: u32, y: u32 },
    /// A warning was escalated to an error by the failure policy.
    EscalatedWarning,
    /// The JPEG decoder rejected a tile; the message is rendered when the
    /// error is raised, since decoder errors are neither clonable nor
    /// comparable.
    #[cfg(feature = "jpeg")]
    Jpeg(String),
    #[cfg(feature = "jp2k")]
    Jp2k(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::DecodeError::*;
        match *self {
            ReadFailed => write!(fmt, "Read error."),
            Truncated { actual, required } => {
                write!(
                    fmt,
                    "Encoded data truncated: got {} bytes, expected {}.",
                    actual, required
                )
            }
            TileDecode { x, y } => write!(fmt, "Decompress error tile {} x {}.", x, y),
            EscalatedWarning => write!(fmt, "A warning was escalated to an error."),
            #[cfg(feature = "jpeg")]
            Jpeg(ref error) => write!(fmt, "JPEG decoder: {}", error),
            #[cfg(feature = "jp2k")]
            Jp2k(ref error) => write!(fmt, "JPEG-2000 decoder: {}", error),
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            TiffError::FormatError(ref e) => write!(fmt, "Format error: {}", e),
            TiffError::UnsupportedError(ref f) => write!(
                fmt,
                "The Decoder does not support the \
                 image format `{}`",
                f
            ),
            TiffError::UsageError(ref e) => write!(fmt, "Usage error: {}", e),
            TiffError::DecodeError(ref e) => write!(fmt, "Decode error: {}", e),
            TiffError::IoError(ref e) => e.fmt(fmt),
            TiffError::LimitsExceeded => write!(fmt, "The Decoder limits are exceeded"),
            TiffError::IntSizeError => write!(fmt, "Platform or format size limits exceeded"),
        }
    }
}

impl Error for TiffError {
    fn description(&self) -> &str {
        match *self {
            TiffError::FormatError(..) => "Format error",
            TiffError::UnsupportedError(..) => "Unsupported error",
            TiffError::UsageError(..) => "Invalid usage",
            TiffError::DecodeError(..) => "Decode error",
            TiffError::IoError(..) => "IO error",
            TiffError::LimitsExceeded => "Decoder limits exceeded",
            TiffError::IntSizeError => "Platform or format size limits exceeded",
        }
    }

    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            TiffError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(err: io::Error) -> TiffError {
        TiffError::IoError(err)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(err: TiffFormatError) -> TiffError {
        TiffError::FormatError(err)
    }
}

impl From<TiffUnsupportedError> for TiffError {
    fn from(err: TiffUnsupportedError) -> TiffError {
        TiffError::UnsupportedError(err)
    }
}

impl From<UsageError> for TiffError {
    fn from(err: UsageError) -> TiffError {
        TiffError::UsageError(err)
    }
}

impl From<DecodeError> for TiffError {
    fn from(err: DecodeError) -> TiffError {
        TiffError::DecodeError(err)
    }
}

impl From<std::num::TryFromIntError> for TiffError {
    fn from(_err: std::num::TryFromIntError) -> TiffError {
        TiffError::IntSizeError
    }
}

#[cfg(feature = "jpeg")]
impl From<jpeg::Error> for TiffError {
    fn from(error: jpeg::Error) -> Self {
        TiffError::DecodeError(DecodeError::Jpeg(error.to_string()))
    }
}

/// Result of an image decoding process
pub type TiffResult<T> = Result<T, TiffError>;
