//! The contract of the TIFF container this crate decodes through.
//!
//! The structural half of TIFF reading — walking the directory chain, storing
//! tag entries, decompressing the baseline codecs (LZW, Deflate, PackBits,
//! CCITT, SGILOG) and the generalized RGBA fallback decoder — lives behind the
//! [`Container`] trait. The reader in this crate drives it: it interprets the
//! tagged metadata, selects an unpacking pipeline and pulls encoded strips and
//! tiles through these methods.
//!
//! Sizes reported by [`Container::scanline_size`] and friends must reflect the
//! active [`DecodeHint`]: after [`DecodeHint::JpegRgb`] a YCbCr JPEG scanline
//! is three RGB bytes per pixel, after [`DecodeHint::SgiLogFloat`] a LogLuv
//! scanline is three `f32` per pixel.

use crate::error::TiffResult;
use crate::tags::Tag;

/// How the container should present decoded pixels.
///
/// Re-applied by the reader every time the current directory changes, since a
/// directory switch resets the decoding state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeHint {
    /// Expand JPEG-compressed YCbCr to RGB while decoding.
    JpegRgb,
    /// Deliver SGI log luminance data as 3 x f32 XYZ.
    SgiLogFloat,
}

/// Warning sink installed by the reader.
///
/// This is the explicit-state replacement for the C warning-handler/user-data
/// pair: the reader owns the escalation policy, the container only reports.
pub type WarningHandler = Box<dyn Fn(&str) + Send + Sync>;

/// A TIFF container positioned on one directory at a time.
///
/// All pixel reads operate on the current directory. Buffer arguments must be
/// large enough for the geometry the size accessors report; implementations
/// may zero-fill short reads after reporting the produced byte count.
pub trait Container {
    /// Select the directory (page) with the given index.
    ///
    /// Fails with `ImageFileDirectoryNotFound` when the chain ends before the
    /// index; the reader walks indices from zero to count pages.
    fn set_directory(&mut self, index: u32) -> TiffResult<()>;

    /// Descend into a sub-image of the current directory, identified by the
    /// offset taken from the `SubIfd` tag value.
    fn set_sub_directory(&mut self, offset: u64) -> TiffResult<()>;

    /// Whether the current directory stores tiles rather than strips.
    fn is_tiled(&mut self) -> bool;

    fn set_decode_hint(&mut self, hint: DecodeHint);

    fn set_warning_handler(&mut self, handler: WarningHandler);

    // Tag access for the current directory. `Ok(None)` means the tag is
    // absent; defaults are the reader's concern.

    fn field_u16(&mut self, tag: Tag) -> TiffResult<Option<u16>>;

    fn field_u32(&mut self, tag: Tag) -> TiffResult<Option<u32>>;

    fn field_f64(&mut self, tag: Tag) -> TiffResult<Option<f64>>;

    fn field_u16_vec(&mut self, tag: Tag) -> TiffResult<Option<Vec<u16>>>;

    fn field_u64_vec(&mut self, tag: Tag) -> TiffResult<Option<Vec<u64>>>;

    fn field_ascii(&mut self, tag: Tag) -> TiffResult<Option<String>>;

    fn field_blob(&mut self, tag: Tag) -> TiffResult<Option<Vec<u8>>>;

    // Geometry of the current directory, in bytes except where noted.

    fn scanline_size(&mut self) -> TiffResult<usize>;

    fn strip_size(&mut self) -> TiffResult<usize>;

    fn number_of_strips(&mut self) -> TiffResult<u32>;

    fn tile_size(&mut self) -> TiffResult<usize>;

    fn tile_row_size(&mut self) -> TiffResult<usize>;

    /// The index of the tile containing the pixel at (x, y).
    fn compute_tile(&mut self, x: u32, y: u32) -> TiffResult<u32>;

    // Pixel input.

    /// Read and decompress one strip. Returns the number of bytes produced.
    fn read_encoded_strip(&mut self, strip: u32, buf: &mut [u8]) -> TiffResult<usize>;

    /// Read and decompress a single row. Only meaningful for non-planar,
    /// non-subsampled directories.
    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> TiffResult<()>;

    /// Read and decompress the tile whose top-left corner is (x, y).
    fn read_tile(&mut self, x: u32, y: u32, buf: &mut [u8]) -> TiffResult<()>;

    /// Read the undecoded bytes of a tile. Returns the compressed length.
    fn read_raw_tile(&mut self, tile: u32, buf: &mut [u8]) -> TiffResult<usize>;

    // The generalized RGBA fallback decoder.

    /// Whether the fallback can decode the current directory at all.
    fn rgba_supported(&mut self) -> bool;

    /// Decode `rows` rows starting at `row` into 4-byte RGBA, top-down.
    fn read_rgba_strip(&mut self, row: u32, rows: u32, buf: &mut [u8]) -> TiffResult<()>;

    /// Decode the tile at (x, y) into 4-byte RGBA. Rows arrive bottom-up;
    /// the caller flips them.
    fn read_rgba_tile(&mut self, x: u32, y: u32, buf: &mut [u8]) -> TiffResult<()>;

    /// Cooperative hint: release the file descriptor while keeping the
    /// logical position.
    fn minimise(&mut self);

    /// Close the container. May be called more than once.
    fn close(&mut self);
}
