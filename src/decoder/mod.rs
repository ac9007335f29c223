//! The read machinery: directory selection, multipage verification, and the
//! two pull-based image flavours.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::container::{Container, DecodeHint};
use crate::descriptor::ImageDescriptor;
use crate::error::{
    DecodeError, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, UsageError,
};
use crate::rect::Rect;
use crate::tags::{PhotometricInterpretation, ResolutionUnit, SampleFormat, Tag};

pub(crate) mod header;
#[cfg(feature = "jpeg")]
pub(crate) mod jpeg;
#[cfg(feature = "jp2k")]
pub(crate) mod jp2k;
pub(crate) mod kernels;
pub(crate) mod pipeline;
mod strip;
mod tile;

pub use strip::StrippedImage;
pub use tile::{TileScratch, TiledImage};

use header::Header;
use kernels::PaletteLut;
use pipeline::Pipeline;

/// Largest page index or page count accepted from the caller.
const MAX_PAGES: u32 = 1_000_000;

/// Decoding limits
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Limits {
    /// The maximum size of any single decode buffer in bytes, the default
    /// is 256MiB. Strip, plane and tile scratches are all checked against
    /// this.
    pub decoding_buffer_size: usize,
    /// Maximum size for intermediate buffers, like the compressed-bytes
    /// scratch used for self-decompressed tiles.
    pub intermediate_buffer_size: usize,
}

impl Limits {
    /// A configuration that does not impose any limits.
    ///
    /// Note that this configuration is likely to crash on excessively large
    /// images since, naturally, the machine running the program does not
    /// have infinite memory.
    pub fn unlimited() -> Limits {
        Limits {
            decoding_buffer_size: usize::MAX,
            intermediate_buffer_size: usize::MAX,
        }
    }
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            decoding_buffer_size: 256 * 1024 * 1024,
            intermediate_buffer_size: 128 * 1024 * 1024,
        }
    }
}

pub(crate) fn checked_buffer(size: usize, limit: usize) -> TiffResult<Vec<u8>> {
    if size > limit {
        Err(TiffError::LimitsExceeded)
    } else {
        Ok(vec![0; size])
    }
}

/// When to give up on a damaged image.
///
/// Each level includes the ones before it: `Warning` also fails on errors
/// and truncation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum FailOn {
    /// Never fail for recoverable damage.
    #[default]
    None,
    /// Fail when the encoded data ends early.
    Truncated,
    /// Fail on read errors.
    Error,
    /// Fail even on warnings.
    Warning,
}

/// How many pages to stack into the output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageCount {
    Count(u32),
    /// All pages from the start page to the end of the file.
    All,
}

impl Default for PageCount {
    fn default() -> Self {
        PageCount::Count(1)
    }
}

/// Parameters of one decode.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ReadOptions {
    /// First directory to read.
    pub page: u32,
    /// Number of directories to stack below it.
    pub n: PageCount,
    /// Consume the orientation tag here instead of leaving it for a
    /// downstream rotation stage.
    pub autorotate: bool,
    /// Descend into this sub-image of every selected directory.
    pub subifd: Option<u32>,
    pub fail_on: FailOn,
    /// Lift the decode buffer caps for trusted input.
    pub unlimited: bool,
}

impl ReadOptions {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_pages(mut self, n: PageCount) -> Self {
        self.n = n;
        self
    }

    pub fn with_autorotate(mut self, autorotate: bool) -> Self {
        self.autorotate = autorotate;
        self
    }

    pub fn with_subifd(mut self, subifd: Option<u32>) -> Self {
        self.subifd = subifd;
        self
    }

    pub fn with_fail_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = fail_on;
        self
    }

    pub fn with_unlimited(mut self, unlimited: bool) -> Self {
        self.unlimited = unlimited;
        self
    }

    fn validate(&self) -> TiffResult<()> {
        if self.page > MAX_PAGES {
            return Err(UsageError::PageOutOfRange(self.page).into());
        }

        if let PageCount::Count(n) = self.n {
            if n == 0 || n > MAX_PAGES {
                return Err(UsageError::PageCountOutOfRange(n).into());
            }
        }

        Ok(())
    }
}

/// The container plus the directory cursor shared by both read paths.
///
/// Switching directory and reading through the container are the only
/// operations that touch this, and on the tiled path they happen as single
/// calls under one lock around the whole struct.
pub(crate) struct ReadState<C> {
    pub container: C,
    pub current_page: Option<u32>,
    subifd: Option<u32>,
    hint: Option<DecodeHint>,
}

impl<C: Container> ReadState<C> {
    /// Select a directory (and subifd) if it is not already current.
    pub fn set_page(&mut self, page: u32) -> TiffResult<()> {
        if self.current_page == Some(page) {
            return Ok(());
        }

        debug!(page, subifd = ?self.subifd, "selecting page");

        self.container.set_directory(page)?;

        if let Some(subifd) = self.subifd {
            let offsets = self
                .container
                .field_u64_vec(Tag::SubIfd)?
                .ok_or(TiffFormatError::RequiredTagNotFound(Tag::SubIfd))?;
            let count = offsets.len() as u32;

            let offset =
                offsets
                    .get(subifd as usize)
                    .copied()
                    .ok_or(UsageError::SubifdOutOfRange {
                        requested: subifd,
                        count,
                    })?;

            self.container.set_sub_directory(offset)?;
        }

        self.current_page = Some(page);

        // The decode format gets unset when directories change. Make sure
        // it is set again.
        if let Some(hint) = self.hint {
            self.container.set_decode_hint(hint);
        }

        Ok(())
    }

    /// Count directories by walking from index 0 until none remain.
    fn n_pages(&mut self) -> u32 {
        let mut n = 0;
        while self.container.set_directory(n).is_ok() {
            n += 1;
        }

        // Make sure the next set_page() will select the directory again.
        self.current_page = None;

        debug!(n, "counted pages");

        n
    }
}

/// Everything read and verified before any pixels move.
pub(crate) struct Opened<C> {
    pub state: ReadState<C>,
    pub header: Header,
    /// Pages stacked into the output.
    pub n: u32,
    pub n_pages: u32,
    pub failed: Arc<AtomicBool>,
    pub fail_on: FailOn,
    pub page: u32,
    pub autorotate: bool,
}

fn open<C: Container>(mut container: C, options: &ReadOptions) -> TiffResult<Opened<C>> {
    options.validate()?;

    // The warning handler receives its state explicitly; escalation to the
    // sticky failed flag happens here, and every warning is logged.
    let failed = Arc::new(AtomicBool::new(false));
    let escalate = options.fail_on >= FailOn::Warning;
    let flag = Arc::clone(&failed);
    container.set_warning_handler(Box::new(move |message| {
        if escalate {
            flag.store(true, Ordering::Relaxed);
        }
        warn!("{}", message);
    }));

    let mut state = ReadState {
        container,
        current_page: None,
        subifd: options.subifd,
        hint: None,
    };

    // Count pages before reading the first header: scanning a damaged file
    // can disturb directory state in strange ways.
    let n_pages = state.n_pages();

    if options.page >= n_pages {
        return Err(UsageError::PageOutOfRange(options.page).into());
    }

    state.set_page(options.page)?;
    let header = header::read_header(&mut state.container)?;

    let n = match options.n {
        PageCount::All => n_pages - options.page,
        PageCount::Count(n) => n,
    };

    if options.page + n > n_pages {
        return Err(UsageError::PageOutOfRange(options.page + n - 1).into());
    }

    // If we're to read many pages, verify that they are all identical.
    if n > 1 {
        for i in 1..n {
            let page = options.page + i;
            debug!(page, "verifying header");

            state.set_page(page)?;
            let other = header::read_header(&mut state.container)?;

            if !other.congruent(&header) {
                return Err(TiffFormatError::PageMismatch {
                    page,
                    base_page: options.page,
                }
                .into());
            }
        }

        // Make sure the next set_page() will reread the directory.
        state.current_page = None;
    }

    state.hint = header.decode_hint();

    Ok(Opened {
        state,
        header,
        n,
        n_pages,
        failed,
        fail_on: options.fail_on,
        page: options.page,
        autorotate: options.autorotate,
    })
}

/// Fetch and build the palette LUT when the pipeline will need one.
fn build_palette<C: Container>(opened: &mut Opened<C>) -> TiffResult<Option<PaletteLut>> {
    if opened.header.photometric != PhotometricInterpretation::RGBPalette {
        return Ok(None);
    }

    opened.state.set_page(opened.page)?;
    let colormap = opened
        .state
        .container
        .field_u16_vec(Tag::ColorMap)?
        .ok_or(TiffFormatError::BadColormap)?;

    let len = 1usize << opened.header.bits_per_sample;
    if colormap.len() < 3 * len {
        return Err(TiffFormatError::BadColormap.into());
    }

    let (red, rest) = colormap.split_at(len);
    let (green, blue) = rest.split_at(len);

    Ok(Some(PaletteLut::build(
        red,
        green,
        blue,
        opened.header.bits_per_sample,
    )?))
}

/// Resolution converted to pixels per millimetre, with the unit string kept
/// as metadata.
fn resolution<C: Container>(
    state: &mut ReadState<C>,
) -> TiffResult<(f32, f32, Option<&'static str>)> {
    let x = state.container.field_f64(Tag::XResolution)?;
    let y = state.container.field_f64(Tag::YResolution)?;

    let (Some(x), Some(y)) = (x, y) else {
        // We used to warn about missing res data, but it happens so often
        // and is so harmless, why bother.
        return Ok((1.0, 1.0, None));
    };

    let unit = state.container.field_u16(Tag::ResolutionUnit)?.unwrap_or(2);

    match ResolutionUnit::from_u16(unit) {
        Some(ResolutionUnit::None) => Ok((x as f32, y as f32, None)),
        Some(ResolutionUnit::Inch) => {
            // In pixels-per-inch ... convert to mm.
            Ok((x as f32 / 25.4, y as f32 / 25.4, Some("in")))
        }
        Some(ResolutionUnit::Centimeter) => {
            // In pixels-per-centimetre ... convert to mm.
            Ok((x as f32 / 10.0, y as f32 / 10.0, Some("cm")))
        }
        None => Err(TiffFormatError::UnknownResolutionUnit(unit).into()),
    }
}

fn build_descriptor<C: Container>(
    opened: &mut Opened<C>,
    pipeline: &Pipeline,
) -> TiffResult<ImageDescriptor> {
    opened.state.set_page(opened.page)?;

    let container = &mut opened.state.container;
    let icc_profile = container.field_blob(Tag::IccProfile)?;
    let xmp = container.field_blob(Tag::XmpPacket)?;
    let iptc = container.field_blob(Tag::RichTiffIptc)?;
    let photoshop = container.field_blob(Tag::Photoshop)?;

    let (xres, yres, resolution_unit) = resolution(&mut opened.state)?;

    let header = &opened.header;

    let mut width = header.width;
    let mut height = header
        .height
        .checked_mul(opened.n)
        .ok_or(TiffError::IntSizeError)?;

    let mut orientation = header.orientation;
    if opened.autorotate {
        if orientation >= 5 {
            std::mem::swap(&mut width, &mut height);
        }
        orientation = 1;
    }

    let stonits = (header.photometric == PhotometricInterpretation::LogLuv)
        .then_some(header.stonits);

    Ok(ImageDescriptor {
        width,
        height,
        bands: pipeline.bands,
        format: pipeline.format,
        interpretation: pipeline.interpretation,
        coding: pipeline.coding,
        orientation,
        alpha_band: header.alpha_band,
        xres,
        yres,
        resolution_unit,
        n_pages: opened.n_pages,
        n_subifds: header.subifd_count,
        page_height: (opened.n > 1).then_some(header.height),
        bits_per_sample: header.bits_per_sample,
        stonits,
        icc_profile,
        xmp,
        iptc,
        photoshop,
        image_description: header.image_description.clone(),
    })
}

/// Attempt to read the first directory; true when the source is a
/// recognizable TIFF.
pub fn probe<C: Container>(container: &mut C) -> bool {
    container.set_directory(0).is_ok()
}

/// As [`probe`], but additionally report whether the first directory is
/// tiled.
pub fn probe_tiled<C: Container>(container: &mut C) -> bool {
    container.set_directory(0).is_ok() && container.is_tiled()
}

/// Read all metadata for a decode without touching pixels, then minimise
/// the source.
pub fn read_header<C: Container>(
    container: C,
    options: &ReadOptions,
) -> TiffResult<ImageDescriptor> {
    let mut opened = open(container, options)?;
    let palette = build_palette(&mut opened)?;
    let pipeline = pipeline::select_pipeline(&opened.header, palette)?;
    let descriptor = build_descriptor(&mut opened, &pipeline)?;

    // This handle never streams pixels; shut the input down early.
    opened.state.container.minimise();
    opened.state.container.close();

    Ok(descriptor)
}

/// Open a full decode, dispatching to the tile-wise or strip-wise reader
/// based on the header.
pub fn read<C: Container>(container: C, options: &ReadOptions) -> TiffResult<Image<C>> {
    let mut opened = open(container, options)?;
    let palette = build_palette(&mut opened)?;
    let pipeline = pipeline::select_pipeline(&opened.header, palette)?;
    let descriptor = build_descriptor(&mut opened, &pipeline)?;

    // Seeking stays possible for the whole decode, so the source is never
    // fully decoded here; just ask it to let go of its descriptor until the
    // first region is pulled.
    opened.state.container.minimise();

    let limits = if options.unlimited {
        Limits::unlimited()
    } else {
        Limits::default()
    };

    if opened.header.tiled {
        // No sample images for tiled + separate, ban it for now.
        if opened.header.separate {
            return Err(TiffUnsupportedError::TiledPlanarConfiguration.into());
        }

        Ok(Image::Tiled(TiledImage::new(
            opened, pipeline, descriptor, limits,
        )?))
    } else {
        Ok(Image::Stripped(StrippedImage::new(
            opened, pipeline, descriptor, limits,
        )?))
    }
}

/// A streamable decoded image.
///
/// Regions are always addressed in stored (unrotated) coordinates, whose
/// extent [`Image::stored_width`] and [`Image::stored_height`] report. The
/// descriptor describes the stream after the rotation reported by
/// [`Image::rotation`] has been applied by a downstream stage.
pub enum Image<C: Container> {
    /// Random-access tiles, readable from many workers at once.
    Tiled(TiledImage<C>),
    /// Strictly sequential strips, single consumer.
    Stripped(StrippedImage<C>),
}

impl<C: Container> Image<C> {
    pub fn descriptor(&self) -> &ImageDescriptor {
        match self {
            Image::Tiled(image) => image.descriptor(),
            Image::Stripped(image) => image.descriptor(),
        }
    }

    /// The orientation a downstream rotation stage still has to apply;
    /// 1 when nothing is pending.
    pub fn rotation(&self) -> u8 {
        match self {
            Image::Tiled(image) => image.rotation(),
            Image::Stripped(image) => image.rotation(),
        }
    }

    /// Width of the stored pixel stream.
    pub fn stored_width(&self) -> u32 {
        match self {
            Image::Tiled(image) => image.stored_width(),
            Image::Stripped(image) => image.stored_width(),
        }
    }

    /// Height of the stored pixel stream, all pages stacked.
    pub fn stored_height(&self) -> u32 {
        match self {
            Image::Tiled(image) => image.stored_height(),
            Image::Stripped(image) => image.stored_height(),
        }
    }

    /// Ask the source to release its descriptor. Tiled decodes can proceed
    /// from arbitrary threads, so the hint is ignored for them.
    pub fn minimise(&mut self) {
        match self {
            Image::Tiled(_) => {}
            Image::Stripped(image) => image.minimise(),
        }
    }

    /// Close the container. Dropping the image does the same, exactly once.
    pub fn finish(self) {
        drop(self);
    }
}

pub(crate) fn region_in_bounds(rect: &Rect, width: u32, height: u32) -> TiffResult<()> {
    if rect.is_empty() || rect.right() > width || rect.bottom() > height {
        return Err(UsageError::RegionOutOfBounds.into());
    }

    Ok(())
}

pub(crate) fn check_output_len(len: usize, needed: usize) -> TiffResult<()> {
    if len < needed {
        return Err(UsageError::InsufficientOutputBufferSize {
            needed,
            provided: len,
        }
        .into());
    }

    Ok(())
}

pub(crate) fn escalated(failed: &AtomicBool) -> TiffResult<()> {
    if failed.load(Ordering::Relaxed) {
        return Err(DecodeError::EscalatedWarning.into());
    }

    Ok(())
}

/// In copy mode the container layout must exactly match the output layout,
/// since reads go straight into output regions.
pub(crate) fn memcpy_layout_ok(header: &Header, pipeline: &Pipeline) -> bool {
    if !pipeline.memcpy {
        return true;
    }

    if header.tiled {
        let tile_bytes =
            pipeline.out_pel_size() * header.tile_width as usize * header.tile_height as usize;
        header.tile_size == tile_bytes
    } else {
        // Lines are smaller in plane-separated mode.
        let mut line_size = if header.separate {
            pipeline.format.byte_size() * header.width as usize
        } else {
            pipeline.out_pel_size() * header.width as usize
        };

        if header.bits_per_sample == 16 && header.sample_format == SampleFormat::IEEEFP {
            line_size /= 2;
        }

        header.scanline_size == line_size
    }
}
