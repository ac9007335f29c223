//! In-memory decode of a single JPEG-compressed tile.
//!
//! TIFF stores the quantization and Huffman tables once, in the JPEGTables
//! tag, as an abbreviated JPEG stream; each tile is then an abbreviated
//! image stream. The two are spliced into one baseline stream before
//! decoding. The colorspace is not recorded in the tile either, so it is
//! forced from the enclosing directory's photometric tag.

use std::io::Cursor;

use jpeg::ColorTransform;

use crate::decoder::header::Header;
use crate::error::{DecodeError, TiffResult};
use crate::tags::PhotometricInterpretation;

/// Join the shared table stream and one tile's image stream.
///
/// The tables end with EOI and the tile data begins with SOI; drop both
/// markers and concatenate. Tables are optional.
pub(crate) fn splice_tables(tables: Option<&[u8]>, data: &[u8]) -> Vec<u8> {
    match tables {
        Some(tables) if tables.len() > 4 && data.len() > 2 => {
            let mut stream = Vec::with_capacity(tables.len() + data.len() - 4);
            stream.extend_from_slice(&tables[..tables.len() - 2]);
            stream.extend_from_slice(&data[2..]);
            stream
        }
        _ => data.to_vec(),
    }
}

fn transform_for(photometric: PhotometricInterpretation) -> (ColorTransform, usize) {
    match photometric {
        PhotometricInterpretation::Separated => (ColorTransform::CMYK, 4),
        PhotometricInterpretation::YCbCr => (ColorTransform::YCbCr, 3),
        // RGB-compressed CIELAB is a possibility, amazingly
        PhotometricInterpretation::RGB | PhotometricInterpretation::CIELab => {
            (ColorTransform::RGB, 3)
        }
        PhotometricInterpretation::WhiteIsZero | PhotometricInterpretation::BlackIsZero => {
            (ColorTransform::Grayscale, 1)
        }
        _ => (ColorTransform::None, 1),
    }
}

/// Decompress one tile of JPEG coefficients into `out`, which is laid out
/// with `tile_row_size` bytes per row.
pub(crate) fn decompress_tile(
    tables: Option<&[u8]>,
    data: &[u8],
    header: &Header,
    out: &mut [u8],
) -> TiffResult<()> {
    let stream = splice_tables(tables, data);

    let mut decoder = jpeg::Decoder::new(Cursor::new(stream));

    // This isn't stored in the tile -- force it from the enclosing TIFF.
    let (transform, bytes_per_pixel) = transform_for(header.photometric);
    decoder.set_color_transform(transform);

    let pixels = decoder.decode()?;
    let info = decoder.info().ok_or(DecodeError::ReadFailed)?;

    let output_width = usize::from(info.width);
    let output_height = usize::from(info.height);
    let bytes_per_scanline = output_width * bytes_per_pixel;

    // Double-check tile dimensions.
    if output_width > header.tile_width as usize
        || output_height > header.tile_height as usize
        || bytes_per_scanline > header.tile_row_size
        || pixels.len() < output_height * bytes_per_scanline
    {
        return Err(DecodeError::ReadFailed.into());
    }

    for y in 0..output_height {
        out[y * header.tile_row_size..][..bytes_per_scanline]
            .copy_from_slice(&pixels[y * bytes_per_scanline..][..bytes_per_scanline]);
    }

    Ok(())
}
