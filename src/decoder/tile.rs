//! Random-access tile-wise reading.
//!
//! Many workers may pull regions at once. One mutex serializes directory
//! switching and all container reads; for compression schemes we decompress
//! ourselves, only the raw byte fetch happens under the lock and the
//! decompressor runs outside it, so JPEG and JPEG-2000 tiles decode in
//! parallel.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crate::container::Container;
use crate::decoder::header::Header;
use crate::decoder::pipeline::Pipeline;
use crate::decoder::{
    check_output_len, checked_buffer, escalated, memcpy_layout_ok, region_in_bounds, Limits,
    Opened, ReadState,
};
use crate::descriptor::ImageDescriptor;
use crate::error::{DecodeError, TiffResult, TiffUnsupportedError, UsageError};
use crate::rect::Rect;
#[cfg(feature = "jpeg")]
use crate::tags::CompressionMethod;

/// Per-worker scratch for tile reads.
///
/// Workers create one each so tiles can be unpacked in parallel; the
/// compressed-bytes buffer exists only when this crate does the
/// decompression itself.
pub struct TileScratch {
    tile: Vec<u8>,
    compressed: Option<Vec<u8>>,
}

/// A tiled image serving random-access regions.
pub struct TiledImage<C: Container> {
    /// Directory cursor and container, under the one lock.
    locked: Mutex<ReadState<C>>,
    header: Header,
    pipeline: Pipeline,
    descriptor: ImageDescriptor,

    /// Shared quantization and Huffman tables for JPEG tiles.
    #[cfg(feature = "jpeg")]
    jpeg_tables: Option<Vec<u8>>,

    failed: Arc<AtomicBool>,
    limits: Limits,

    /// First container page of the read.
    page: u32,
    /// Pages stacked below it.
    n: u32,
    rotation: u8,
}

impl<C: Container> TiledImage<C> {
    #[cfg_attr(not(feature = "jpeg"), allow(unused_mut))]
    pub(crate) fn new(
        mut opened: Opened<C>,
        pipeline: Pipeline,
        descriptor: ImageDescriptor,
        limits: Limits,
    ) -> TiffResult<Self> {
        // Double check: in copy mode the container tile size must exactly
        // match the output tile size.
        if !memcpy_layout_ok(&opened.header, &pipeline) {
            return Err(TiffUnsupportedError::LayoutMismatch.into());
        }

        // The table stream is shared by every tile of the read, so fetch it
        // once here rather than under the read lock.
        #[cfg(feature = "jpeg")]
        let jpeg_tables = if opened.header.we_decompress
            && opened.header.compression == CompressionMethod::Jpeg
        {
            opened.state.set_page(opened.page)?;
            opened.state.container.field_blob(crate::tags::Tag::JpegTables)?
        } else {
            None
        };

        let header = opened.header;
        let rotation = if opened.autorotate { header.orientation } else { 1 };

        Ok(TiledImage {
            locked: Mutex::new(opened.state),
            header,
            pipeline,
            descriptor,
            #[cfg(feature = "jpeg")]
            jpeg_tables,
            failed: opened.failed,
            limits,
            page: opened.page,
            n: opened.n,
            rotation,
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    pub fn stored_width(&self) -> u32 {
        self.header.width
    }

    pub fn stored_height(&self) -> u32 {
        self.header.height * self.n
    }

    pub fn tile_width(&self) -> u32 {
        self.header.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.header.tile_height
    }

    /// Allocate the scratch buffers one worker needs.
    pub fn new_scratch(&self) -> TiffResult<TileScratch> {
        let tile = checked_buffer(self.header.tile_size, self.limits.decoding_buffer_size)?;

        // When decompressing ourselves we need room for the largest
        // compressed tile of any page. Twice the uncompressed size is much
        // simpler than searching every page's byte counts.
        let compressed = if self.header.we_decompress {
            Some(checked_buffer(
                2 * self.header.tile_size,
                self.limits.intermediate_buffer_size,
            )?)
        } else {
            None
        };

        Ok(TileScratch { tile, compressed })
    }

    /// Read one region into `out`, row-major with `rect.width * pel_size`
    /// bytes per row.
    ///
    /// The region's left edge must lie on the tile grid. Concurrent calls
    /// from different workers are fine; each worker passes its own scratch.
    pub fn read_region(
        &self,
        scratch: &mut TileScratch,
        rect: Rect,
        out: &mut [u8],
    ) -> TiffResult<()> {
        let page_width = self.header.width;
        let page_height = self.header.height;
        let tile_width = self.header.tile_width;
        let tile_height = self.header.tile_height;

        region_in_bounds(&rect, page_width, self.stored_height())?;

        if rect.left % tile_width != 0 {
            return Err(UsageError::UnalignedRegion {
                left: rect.left,
                tile_width,
            }
            .into());
        }

        let pel_size = self.pipeline.out_pel_size();
        let out_stride = rect.width as usize * pel_size;
        check_output_len(out.len(), rect.height as usize * out_stride)?;

        let page_no = rect.top / page_height;
        let page_y = rect.top % page_height;

        // Special case: the region is exactly one tile and pixels need no
        // conversion, so the container can read straight into the output.
        //
        // Off the first page, pages must be a multiple of the tile size or
        // we'd miss alignment.
        if (page_no == 0 || page_height % tile_height == 0)
            && rect.top % tile_height == 0
            && rect.width == tile_width
            && rect.height == tile_height
            && rect.left + tile_width <= page_width
            && page_y + tile_height <= page_height
            && self.pipeline.memcpy
        {
            return self.read_tile(scratch, out, self.page + page_no, rect.left, page_y);
        }

        self.read_region_unaligned(scratch, rect, out, out_stride)
    }

    /// Loop over the region, painting in tiles from the file.
    fn read_region_unaligned(
        &self,
        scratch: &mut TileScratch,
        rect: Rect,
        out: &mut [u8],
        out_stride: usize,
    ) -> TiffResult<()> {
        let page_width = self.header.width;
        let page_height = self.header.height;
        let tile_width = self.header.tile_width;
        let tile_height = self.header.tile_height;
        let tile_row_size = self.header.tile_row_size;
        let pel_size = self.pipeline.out_pel_size();

        let mut y = 0;
        while y < rect.height {
            let mut hit_height = 0;

            let mut x = 0;
            while x < rect.width {
                // page_no is within this roll image, not the container page
                // number; the start page is added for that.
                let page_no = (rect.top + y) / page_height;
                let page_y = (rect.top + y) % page_height;

                // Top-left corner of the tile that (x, y) falls in.
                let tile_left = ((rect.left + x) / tile_width) * tile_width;
                let tile_top = (page_y / tile_height) * tile_height;

                let mut tile = std::mem::take(&mut scratch.tile);
                let result = self.read_tile(
                    scratch,
                    &mut tile,
                    self.page + page_no,
                    tile_left,
                    tile_top,
                );
                scratch.tile = tile;
                result?;

                // The edge tiles stick out past the page.
                let tile_rect = Rect::new(tile_left, tile_top, tile_width, tile_height)
                    .intersection(&Rect::new(0, 0, page_width, page_height));

                // To roll coordinates, then clip by the region.
                let tile_rect = Rect {
                    top: tile_rect.top + page_no * page_height,
                    ..tile_rect
                };
                let hit = tile_rect.intersection(&rect);
                debug_assert!(!hit.is_empty());

                // The left edge is tile-aligned, so hits start at the
                // tile's first pixel.
                debug_assert_eq!(hit.left, tile_rect.left);

                // Unpack just the section of the tile we need.
                for z in 0..hit.height as usize {
                    let row = (hit.top - tile_rect.top) as usize + z;
                    let src = &scratch.tile[row * tile_row_size..];
                    let out_offset = ((y as usize + z) * out_stride)
                        + (hit.left - rect.left) as usize * pel_size;
                    self.pipeline.unpacker.unpack(
                        &mut out[out_offset..],
                        src,
                        hit.width as usize,
                    );
                }

                x += hit.width;
                hit_height = hit.height;
            }

            // The same for every tile in the row we've just done.
            y += hit_height;
        }

        Ok(())
    }

    /// Select a page and read one tile. Page switch and container read
    /// happen as a single locked call, since the switch changes the
    /// container's current directory.
    fn read_tile(
        &self,
        scratch: &mut TileScratch,
        dst: &mut [u8],
        page: u32,
        x: u32,
        y: u32,
    ) -> TiffResult<()> {
        if self.header.we_decompress {
            let compressed = scratch
                .compressed
                .as_deref_mut()
                .expect("self-decompressed reads allocate a compressed scratch");

            // Compressed bytes load under the lock, to this worker's
            // scratch.
            let size = {
                let mut state = self.locked.lock().expect("tile reader lock poisoned");
                state.set_page(page)?;
                let tile_no = state.container.compute_tile(x, y)?;
                state.container.read_raw_tile(tile_no, compressed)?
            };

            if size == 0 || size > compressed.len() {
                return Err(DecodeError::ReadFailed.into());
            }

            // Decompress outside the lock, so we get parallelism.
            self.decompress_tile(&compressed[..size], dst, x, y)?;
        } else {
            let mut state = self.locked.lock().expect("tile reader lock poisoned");
            state.set_page(page)?;

            if self.header.read_as_rgba {
                state.container.read_rgba_tile(x, y, dst)?;
                // The fallback decodes tiles upside down; flip them.
                flip_rows(
                    &mut dst[..self.header.tile_size],
                    self.header.tile_row_size,
                );
            } else {
                state.container.read_tile(x, y, dst)?;
            }
        }

        // Stop processing due to an escalated warning.
        escalated(&self.failed)?;

        Ok(())
    }

    #[cfg_attr(
        not(any(feature = "jpeg", feature = "jp2k")),
        allow(unused_variables)
    )]
    fn decompress_tile(&self, data: &[u8], out: &mut [u8], x: u32, y: u32) -> TiffResult<()> {
        match self.header.compression {
            #[cfg(feature = "jpeg")]
            CompressionMethod::Jpeg => {
                crate::decoder::jpeg::decompress_tile(
                    self.jpeg_tables.as_deref(),
                    data,
                    &self.header,
                    out,
                )
            }
            #[cfg(feature = "jp2k")]
            crate::tags::CompressionMethod::Jp2kYcc
            | crate::tags::CompressionMethod::Jp2kRgb
            | crate::tags::CompressionMethod::Jp2kLossy => {
                crate::decoder::jp2k::decompress_tile(data, &self.header, out)
            }
            _ => unreachable!("compression was validated at header read"),
        }
        .map_err(|error| {
            tracing::warn!(x, y, %error, "tile decompression failed");
            DecodeError::TileDecode { x, y }.into()
        })
    }
}

impl<C: Container> Drop for TiledImage<C> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.locked.lock() {
            state.container.close();
        }
    }
}

/// Reverse the row order of a buffer of `row_size`-byte rows, in place.
fn flip_rows(buf: &mut [u8], row_size: usize) {
    let rows = buf.len() / row_size;

    for y in 0..rows / 2 {
        let (front, back) = buf.split_at_mut((rows - 1 - y) * row_size);
        front[y * row_size..][..row_size].swap_with_slice(&mut back[..row_size]);
    }
}
