//! Sequential strip-wise reading.
//!
//! We could potentially read strips in any order, but that would give
//! catastrophic performance for operations like 90 degree rotate on a large
//! image, so only sequential read is offered: the running `y_pos` watermark
//! rejects anything else. A single consumer drives this path, so no lock is
//! held.

use tracing::warn;

use crate::container::Container;
use crate::decoder::header::Header;
use crate::decoder::pipeline::Pipeline;
use crate::decoder::{
    check_output_len, checked_buffer, escalated, memcpy_layout_ok, region_in_bounds, Limits,
    Opened, ReadState,
};
use crate::decoder::FailOn;
use crate::descriptor::ImageDescriptor;
use crate::error::{DecodeError, TiffResult, TiffUnsupportedError, UsageError};
use crate::rect::Rect;

/// A stripped image being pulled strictly top to bottom.
pub struct StrippedImage<C: Container> {
    state: ReadState<C>,
    header: Header,
    pipeline: Pipeline,
    descriptor: ImageDescriptor,

    /// Holds one strip of a single image plane.
    plane_buf: Option<Vec<u8>>,

    /// Holds a plane-assembled strip: samples_per_pixel plane strips
    /// interleaved.
    contig_buf: Option<Vec<u8>>,

    /// The y we are reading at, to verify the read is sequential.
    y_pos: u32,

    failed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    fail_on: FailOn,
    limits: Limits,

    /// First container page of the read.
    page: u32,
    /// Pages stacked below it.
    n: u32,
    rotation: u8,
}

impl<C: Container> StrippedImage<C> {
    pub(crate) fn new(
        opened: Opened<C>,
        pipeline: Pipeline,
        descriptor: ImageDescriptor,
        limits: Limits,
    ) -> TiffResult<Self> {
        let header = opened.header.clone();

        // Double check: in copy mode the container line size must exactly
        // match the output line size.
        if !memcpy_layout_ok(&header, &pipeline) {
            return Err(TiffUnsupportedError::LayoutMismatch.into());
        }

        // With separate image planes we must read each plane strip to its
        // own buffer, then interleave.
        let plane_buf = if header.separate {
            Some(checked_buffer(
                header.read_size,
                limits.decoding_buffer_size,
            )?)
        } else {
            None
        };

        // If pixels need repacking we read whole strips to a buffer first.
        // Multi-page reads need one too, since output tiles may straddle
        // strip boundaries.
        let contig_buf = if !pipeline.memcpy || opened.n > 1 {
            let mut size = header.read_size;
            if header.separate {
                size = size
                    .checked_mul(usize::from(header.samples_per_pixel))
                    .ok_or(crate::error::TiffError::LimitsExceeded)?;
            }

            Some(checked_buffer(size, limits.decoding_buffer_size)?)
        } else {
            None
        };

        let rotation = if opened.autorotate { header.orientation } else { 1 };

        Ok(StrippedImage {
            state: opened.state,
            header,
            pipeline,
            descriptor,
            plane_buf,
            contig_buf,
            y_pos: 0,
            failed: opened.failed,
            fail_on: opened.fail_on,
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

    /// The y position the next region must start at.
    pub fn y_pos(&self) -> u32 {
        self.y_pos
    }

    pub fn minimise(&mut self) {
        self.state.container.minimise();
    }

    /// Pull the next region of the stream into `out`.
    ///
    /// The region must span the full stored width and start exactly at the
    /// current read position; `out` is filled row-major with
    /// `width * pel_size` bytes per row.
    pub fn read_region(&mut self, rect: Rect, out: &mut [u8]) -> TiffResult<()> {
        let width = self.header.width;
        let total_height = self.stored_height();

        region_in_bounds(&rect, width, total_height)?;

        if rect.left != 0 || rect.width != width {
            return Err(UsageError::NotFullWidth {
                left: rect.left,
                width: rect.width,
            }
            .into());
        }

        if rect.top != self.y_pos {
            return Err(UsageError::OutOfOrderRead {
                requested: rect.top,
                position: self.y_pos,
            }
            .into());
        }

        let pel_size = self.pipeline.out_pel_size();
        let out_stride = rect.width as usize * pel_size;
        check_output_len(out.len(), rect.height as usize * out_stride)?;

        let page_height = self.header.height;
        let read_height = self.header.read_height;
        let image = Rect::new(0, 0, width, total_height);

        let mut y = 0;
        while y < rect.height {
            let page_no = (rect.top + y) / page_height;
            let y_page = (rect.top + y) % page_height;
            let strip_no = y_page / read_height;

            let page = Rect::new(0, page_no * page_height, width, page_height);
            let strip = Rect::new(0, page.top + strip_no * read_height, width, read_height);

            // The final strip of a page is smaller.
            let strip = strip.intersection(&image).intersection(&page);
            let hit = strip.intersection(&rect);
            debug_assert!(!hit.is_empty());

            // Read directly into the output if we can. Otherwise we must
            // read to a temp buffer, then repack into the output.
            if self.pipeline.memcpy && hit.top == strip.top && hit.height == strip.height {
                let out_offset = y as usize * out_stride;
                let out_len = strip.height as usize * out_stride;
                strip_read_interleaved(
                    &mut self.state,
                    &self.header,
                    self.fail_on,
                    self.page + page_no,
                    strip_no,
                    strip.height,
                    self.plane_buf.as_deref_mut(),
                    &mut out[out_offset..][..out_len],
                )?;
            } else {
                // Usually allocated up front; a partial-strip request in
                // copy mode is the one case that still needs it.
                if self.contig_buf.is_none() {
                    let mut size = self.header.read_size;
                    if self.header.separate {
                        size = size
                            .checked_mul(usize::from(self.header.samples_per_pixel))
                            .ok_or(crate::error::TiffError::LimitsExceeded)?;
                    }
                    self.contig_buf =
                        Some(checked_buffer(size, self.limits.decoding_buffer_size)?);
                }

                let contig = self
                    .contig_buf
                    .as_deref_mut()
                    .expect("repacking strips implies a contig buffer");

                // Read and interleave the entire strip.
                strip_read_interleaved(
                    &mut self.state,
                    &self.header,
                    self.fail_on,
                    self.page + page_no,
                    strip_no,
                    strip.height,
                    self.plane_buf.as_deref_mut(),
                    contig,
                )?;

                // Repack the overlapping rows into the output layout.
                let src_stride = if self.header.separate {
                    self.header.scanline_size * usize::from(self.header.samples_per_pixel)
                } else {
                    self.header.scanline_size
                };

                let skip = (hit.top - strip.top) as usize * src_stride;
                for z in 0..hit.height as usize {
                    let src = &contig[skip + z * src_stride..];
                    let dst = &mut out[(y as usize + z) * out_stride..];
                    self.pipeline.unpacker.unpack(dst, src, width as usize);
                }
            }

            // Stop processing due to an escalated warning.
            escalated(&self.failed)?;

            y += hit.height;
            self.y_pos += hit.height;
        }

        Ok(())
    }
}

impl<C: Container> Drop for StrippedImage<C> {
    fn drop(&mut self) {
        self.state.container.close();
    }
}

/// Read one strip worth of pixels, resolving planar separation.
///
/// Selects the page first; with separate planes each per-plane strip is
/// read to the plane buffer and byte-interleaved into `buf`, otherwise one
/// container read fills `buf` directly.
#[allow(clippy::too_many_arguments)]
fn strip_read_interleaved<C: Container>(
    state: &mut ReadState<C>,
    header: &Header,
    fail_on: FailOn,
    page: u32,
    strip_no: u32,
    strip_height: u32,
    plane_buf: Option<&mut [u8]>,
    buf: &mut [u8],
) -> TiffResult<()> {
    state.set_page(page)?;

    if header.read_as_rgba {
        let row_offset = strip_no * header.rows_per_strip;
        let rows = header.rows_per_strip.min(header.height - row_offset);
        state.container.read_rgba_strip(row_offset, rows, buf)?;
    } else if header.separate {
        let samples_per_pixel = usize::from(header.samples_per_pixel);
        let strips_per_plane = 1 + (header.height - 1) / header.read_height;
        let pels_per_strip = header.width as usize * strip_height as usize;
        let bytes_per_sample = usize::from(header.bits_per_sample) / 8;
        let expected = pels_per_strip * bytes_per_sample;

        let plane_buf = plane_buf.expect("separate planes imply a plane buffer");

        for i in 0..samples_per_pixel {
            strip_read(
                state,
                header,
                fail_on,
                strips_per_plane * i as u32 + strip_no,
                expected,
                plane_buf,
            )?;

            for j in 0..pels_per_strip {
                let src = &plane_buf[j * bytes_per_sample..][..bytes_per_sample];
                let dst = &mut buf[(j * samples_per_pixel + i) * bytes_per_sample..]
                    [..bytes_per_sample];
                dst.copy_from_slice(src);
            }
        }
    } else {
        let expected = header.scanline_size * strip_height as usize;
        strip_read(state, header, fail_on, strip_no, expected, buf)?;
    }

    Ok(())
}

/// One container read: a whole encoded strip, or a single scanline when the
/// strips are too tall to buffer.
fn strip_read<C: Container>(
    state: &mut ReadState<C>,
    header: &Header,
    fail_on: FailOn,
    strip: u32,
    expected: usize,
    buf: &mut [u8],
) -> TiffResult<()> {
    if header.read_scanlinewise {
        // Strip numbers are row numbers here, read_height is one.
        state
            .container
            .read_scanline(strip, &mut buf[..header.scanline_size])?;
        return Ok(());
    }

    let actual = state.container.read_encoded_strip(strip, buf)?;

    if actual < expected {
        if fail_on >= FailOn::Truncated {
            return Err(DecodeError::Truncated {
                actual,
                required: expected,
            }
            .into());
        }

        warn!(strip, actual, expected, "strip truncated, padding with zeros");
        buf[actual..expected].fill(0);
    }

    Ok(())
}
