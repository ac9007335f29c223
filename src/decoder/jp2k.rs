//! Black-box decode of a JPEG-2000-compressed tile.
//!
//! Aperio and Leica TIFFs store each tile as a JPEG-2000 codestream, raw or
//! wrapped in a JP2 box. OpenJPEG does the heavy lifting; this module only
//! checks the result against the tile geometry and lays the rows out.

use crate::decoder::header::Header;
use crate::error::{DecodeError, TiffResult};

/// The JP2 signature box wrapping some codestreams. Raw codestreams start
/// with an SOC marker instead.
const JP2_SIGNATURE: [u8; 8] = [0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20];

fn codec_for(data: &[u8]) -> jp2k::Codec {
    if data.starts_with(&JP2_SIGNATURE) {
        jp2k::Codec::jp2()
    } else {
        jp2k::Codec::j2k()
    }
}

/// Decompress one tile's codestream into `out`, laid out with
/// `tile_row_size` bytes per row.
pub(crate) fn decompress_tile(data: &[u8], header: &Header, out: &mut [u8]) -> TiffResult<()> {
    let stream = jp2k::Stream::from_bytes(data)
        .map_err(|err| DecodeError::Jp2k(format!("{:?}", err)))?;

    let jp2k::ImageBuffer {
        buffer,
        width,
        height,
        num_bands,
        precision,
    } = stream
        .decode(codec_for(data), jp2k::DecodeParams::default())
        .map_err(|err| DecodeError::Jp2k(format!("{:?}", err)))?;

    if precision != u32::from(header.bits_per_sample)
        || num_bands != usize::from(header.samples_per_pixel)
    {
        return Err(DecodeError::Jp2k(format!(
            "tile is {} x {} bits, directory says {} x {} bits",
            num_bands, precision, header.samples_per_pixel, header.bits_per_sample
        ))
        .into());
    }

    let bytes_per_scanline = width as usize * num_bands;

    if width > header.tile_width
        || height > header.tile_height
        || bytes_per_scanline > header.tile_row_size
        || buffer.len() < height as usize * bytes_per_scanline
    {
        return Err(DecodeError::ReadFailed.into());
    }

    for y in 0..height as usize {
        out[y * header.tile_row_size..][..bytes_per_scanline]
            .copy_from_slice(&buffer[y * bytes_per_scanline..][..bytes_per_scanline]);
    }

    Ok(())
}
