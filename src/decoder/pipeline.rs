//! Route a directory to the kernel that unpacks it.
//!
//! The decision matrix over (photometric x bits x sample format x samples)
//! lives here, together with the derivation of the output descriptor shape.
//! First match wins; anything not expressible falls out as unsupported.

use crate::decoder::header::Header;
use crate::decoder::kernels::{Kernel, PaletteLut, Unpacker};
use crate::descriptor::{Coding, ElementFormat, Interpretation};
use crate::error::{TiffResult, TiffUnsupportedError};
use crate::tags::{InkSet, PhotometricInterpretation, SampleFormat};

/// A selected kernel plus the shape of the output it produces.
#[derive(Clone, Debug)]
pub(crate) struct Pipeline {
    pub unpacker: Unpacker,
    pub bands: u16,
    pub format: ElementFormat,
    pub interpretation: Interpretation,
    pub coding: Coding,
    /// The kernel is just a memcpy, so reads may go directly into the
    /// output region.
    pub memcpy: bool,
}

impl Pipeline {
    pub fn out_pel_size(&self) -> usize {
        usize::from(self.bands) * self.format.byte_size()
    }
}

/// The canonical (bits, sample format) to element type table.
pub(crate) fn guess_format(
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> TiffResult<ElementFormat> {
    let format = match (bits_per_sample, sample_format) {
        (1..=8, SampleFormat::Int) => Some(ElementFormat::I8),
        (1..=8, SampleFormat::Uint) => Some(ElementFormat::U8),
        (16, SampleFormat::Int) => Some(ElementFormat::I16),
        (16, SampleFormat::Uint) => Some(ElementFormat::U16),
        // Half precision is expanded while unpacking.
        (16, SampleFormat::IEEEFP) => Some(ElementFormat::F32),
        (32, SampleFormat::Int) => Some(ElementFormat::I32),
        (32, SampleFormat::Uint) => Some(ElementFormat::U32),
        (32, SampleFormat::IEEEFP) => Some(ElementFormat::F32),
        (64, SampleFormat::IEEEFP) => Some(ElementFormat::F64),
        (64, SampleFormat::ComplexIEEEFP) => Some(ElementFormat::C64),
        (128, SampleFormat::ComplexIEEEFP) => Some(ElementFormat::C128),
        _ => None,
    };

    format.ok_or_else(|| {
        TiffUnsupportedError::UnsupportedImageType {
            bits_per_sample,
            sample_format,
        }
        .into()
    })
}

fn check_min_samples(header: &Header, samples: u16) -> TiffResult<()> {
    if header.samples_per_pixel < samples {
        return Err(TiffUnsupportedError::TooFewSamples {
            photometric: header.photometric,
            samples: header.samples_per_pixel,
        }
        .into());
    }

    Ok(())
}

/// Require an exact sample count, not a minimum.
fn check_samples(header: &Header, samples: u16) -> TiffResult<()> {
    if header.samples_per_pixel != samples {
        return Err(TiffUnsupportedError::WrongSampleCount {
            photometric: header.photometric,
            expected: samples,
            samples: header.samples_per_pixel,
        }
        .into());
    }

    Ok(())
}

/// Only allow samples which are whole bytes in size.
fn check_non_fractional(header: &Header) -> TiffResult<()> {
    if header.bits_per_sample % 8 != 0 || header.bits_per_sample == 0 {
        return Err(TiffUnsupportedError::FractionalSamples(header.bits_per_sample).into());
    }

    Ok(())
}

fn unpacker(header: &Header, kernel: Kernel, format: ElementFormat, bands: u16) -> Unpacker {
    Unpacker {
        kernel,
        samples_per_pixel: usize::from(header.samples_per_pixel),
        bits_per_sample: header.bits_per_sample,
        invert: false,
        format,
        out_pel_size: usize::from(bands) * format.byte_size(),
        palette: None,
    }
}

/// Pick the output path for a validated header.
///
/// `palette` carries the colormap LUT and must be present iff the
/// photometric interpretation is palette; the caller builds it so the
/// mono-collapse flag can shape the output band count here.
pub(crate) fn select_pipeline(
    header: &Header,
    palette: Option<PaletteLut>,
) -> TiffResult<Pipeline> {
    let samples_per_pixel = header.samples_per_pixel;

    if header.read_as_rgba {
        // The fallback delivers RGBA areas of exactly the output shape.
        let unpacker = unpacker(header, Kernel::Rgba, ElementFormat::U8, 4);
        return Ok(Pipeline {
            unpacker,
            bands: 4,
            format: ElementFormat::U8,
            interpretation: Interpretation::SRgb,
            coding: Coding::None,
            memcpy: true,
        });
    }

    if header.photometric == PhotometricInterpretation::CIELab {
        if header.bits_per_sample == 8 && samples_per_pixel > 3 {
            check_min_samples(header, 4)?;
            let unpacker = unpacker(header, Kernel::LabWithAlpha, ElementFormat::I16, samples_per_pixel);
            return Ok(Pipeline {
                unpacker,
                bands: samples_per_pixel,
                format: ElementFormat::I16,
                interpretation: Interpretation::LabS,
                coding: Coding::None,
                memcpy: false,
            });
        }

        if header.bits_per_sample == 8 {
            check_min_samples(header, 3)?;
            let unpacker = unpacker(header, Kernel::LabPack, ElementFormat::U8, 4);
            return Ok(Pipeline {
                unpacker,
                bands: 4,
                format: ElementFormat::U8,
                interpretation: Interpretation::Lab,
                coding: Coding::LabQ,
                memcpy: false,
            });
        }

        if header.bits_per_sample == 16 {
            check_min_samples(header, 3)?;
            let unpacker = unpacker(header, Kernel::Labs, ElementFormat::I16, samples_per_pixel);
            return Ok(Pipeline {
                unpacker,
                bands: samples_per_pixel,
                format: ElementFormat::I16,
                interpretation: Interpretation::LabS,
                coding: Coding::None,
                memcpy: false,
            });
        }

        // Other LAB depths (32-bit float and friends) copy straight through.
    }

    if header.photometric == PhotometricInterpretation::LogLuv {
        check_min_samples(header, 3)?;
        let unpacker = unpacker(header, Kernel::LogLuv, ElementFormat::F32, samples_per_pixel);
        return Ok(Pipeline {
            unpacker,
            bands: samples_per_pixel,
            format: ElementFormat::F32,
            interpretation: Interpretation::Xyz,
            coding: Coding::None,
            memcpy: false,
        });
    }

    if matches!(
        header.photometric,
        PhotometricInterpretation::WhiteIsZero | PhotometricInterpretation::BlackIsZero
    ) {
        if matches!(header.bits_per_sample, 1 | 2 | 4) {
            check_samples(header, 1)?;
            let mut unpacker = unpacker(header, Kernel::Expand, ElementFormat::U8, 1);
            unpacker.invert = header.photometric == PhotometricInterpretation::WhiteIsZero;
            return Ok(Pipeline {
                unpacker,
                bands: 1,
                format: ElementFormat::U8,
                interpretation: Interpretation::BW,
                coding: Coding::None,
                memcpy: false,
            });
        }

        check_min_samples(header, 1)?;
        check_non_fractional(header)?;
        let format = guess_format(header.bits_per_sample, header.sample_format)?;
        if format.is_complex() {
            return Err(TiffUnsupportedError::ComplexSamples.into());
        }

        let mut unpacker = unpacker(header, Kernel::Greyscale, format, samples_per_pixel);
        // Swapping black and white doesn't make sense for the signed formats.
        unpacker.invert = header.photometric == PhotometricInterpretation::WhiteIsZero
            && format.is_unsigned_int();

        return Ok(Pipeline {
            unpacker,
            bands: samples_per_pixel,
            format,
            interpretation: if header.bits_per_sample == 16 {
                Interpretation::Grey16
            } else {
                Interpretation::BW
            },
            coding: Coding::None,
            memcpy: false,
        });
    }

    if header.photometric == PhotometricInterpretation::RGBPalette {
        if !matches!(header.bits_per_sample, 1 | 2 | 4 | 8 | 16) {
            return Err(TiffUnsupportedError::UnsupportedPaletteBits(header.bits_per_sample).into());
        }
        check_min_samples(header, 1)?;

        // The caller fetched the colormap; its absence was already a
        // BadColormap failure there.
        let palette = palette.expect("palette LUT built for palette images");

        let format = if header.bits_per_sample <= 8 {
            ElementFormat::U8
        } else {
            ElementFormat::U16
        };

        // There's a TIFF extension, INDEXED, that is the preferred way to
        // encode mono palette images, but few applications support it. So we
        // just search the colormap.
        let (bands, interpretation) = if palette.mono {
            (
                samples_per_pixel,
                if header.bits_per_sample <= 8 {
                    Interpretation::BW
                } else {
                    Interpretation::Grey16
                },
            )
        } else {
            (
                samples_per_pixel + 2,
                if header.bits_per_sample <= 8 {
                    Interpretation::SRgb
                } else {
                    Interpretation::Rgb16
                },
            )
        };

        let kernel = match header.bits_per_sample {
            1 | 2 | 4 => Kernel::PaletteBits,
            8 => Kernel::Palette8,
            _ => Kernel::Palette16,
        };

        let mut unpacker = unpacker(header, kernel, format, bands);
        unpacker.palette = Some(palette);

        return Ok(Pipeline {
            unpacker,
            bands,
            format,
            interpretation,
            coding: Coding::None,
            memcpy: false,
        });
    }

    // A regular multiband image where we can copy pixels straight from the
    // container buffer.
    check_non_fractional(header)?;
    let format = guess_format(header.bits_per_sample, header.sample_format)?;

    let interpretation = if samples_per_pixel >= 3
        && matches!(
            header.photometric,
            PhotometricInterpretation::RGB | PhotometricInterpretation::YCbCr
        ) {
        if format == ElementFormat::U16 {
            Interpretation::Rgb16
        } else if !format.is_int() {
            // Most float images use 0 - 1 for black - white. Photoshop uses
            // 0 - 1 and no gamma.
            Interpretation::ScRgb
        } else {
            Interpretation::SRgb
        }
    } else if samples_per_pixel >= 3 && header.photometric == PhotometricInterpretation::CIELab {
        Interpretation::Lab
    } else if header.photometric == PhotometricInterpretation::Separated
        && samples_per_pixel >= 4
        && header.inkset == InkSet::CMYK
    {
        Interpretation::Cmyk
    } else {
        Interpretation::Multiband
    };

    let half_input =
        header.bits_per_sample == 16 && header.sample_format == SampleFormat::IEEEFP;

    let kernel = if half_input { Kernel::CopyF16 } else { Kernel::Copy };
    let unpacker = unpacker(header, kernel, format, samples_per_pixel);

    Ok(Pipeline {
        unpacker,
        bands: samples_per_pixel,
        format,
        interpretation,
        coding: Coding::None,
        // YCbCr is expanded to RGB by the container, which needs a slightly
        // larger read buffer for edge pixels, so those reads cannot go
        // directly to the output region.
        memcpy: !half_input && header.photometric != PhotometricInterpretation::YCbCr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::CompressionMethod;

    fn header(
        photometric: PhotometricInterpretation,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        sample_format: SampleFormat,
    ) -> Header {
        Header {
            width: 16,
            height: 16,
            samples_per_pixel,
            bits_per_sample,
            photometric,
            inkset: InkSet::CMYK,
            sample_format,
            separate: false,
            orientation: 1,
            alpha_band: None,
            compression: CompressionMethod::None,
            tiled: false,
            tile_width: 0,
            tile_height: 0,
            tile_size: 0,
            tile_row_size: 0,
            rows_per_strip: 16,
            strip_size: 0,
            scanline_size: 0,
            number_of_strips: 1,
            read_scanlinewise: false,
            read_height: 16,
            read_size: 0,
            stonits: 1.0,
            subifd_count: 0,
            image_description: None,
            we_decompress: false,
            read_as_rgba: false,
        }
    }

    #[test]
    fn rgba_fallback_wins() {
        let mut h = header(PhotometricInterpretation::RGB, 4, 8, SampleFormat::Uint);
        h.read_as_rgba = true;
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Rgba);
        assert_eq!(pipeline.bands, 4);
        assert!(pipeline.memcpy);
    }

    #[test]
    fn lab_routes_by_depth_and_alpha() {
        let h = header(PhotometricInterpretation::CIELab, 3, 8, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::LabPack);
        assert_eq!(pipeline.coding, Coding::LabQ);
        assert_eq!((pipeline.bands, pipeline.format), (4, ElementFormat::U8));

        let h = header(PhotometricInterpretation::CIELab, 4, 8, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::LabWithAlpha);
        assert_eq!((pipeline.bands, pipeline.format), (4, ElementFormat::I16));
        assert_eq!(pipeline.interpretation, Interpretation::LabS);

        let h = header(PhotometricInterpretation::CIELab, 3, 16, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Labs);

        // Float LAB copies straight through and keeps the Lab tag.
        let h = header(PhotometricInterpretation::CIELab, 3, 32, SampleFormat::IEEEFP);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Copy);
        assert_eq!(pipeline.interpretation, Interpretation::Lab);
    }

    #[test]
    fn logluv_outputs_xyz_floats() {
        let mut h = header(PhotometricInterpretation::LogLuv, 3, 16, SampleFormat::Int);
        h.compression = CompressionMethod::SgiLog;
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::LogLuv);
        assert_eq!(pipeline.format, ElementFormat::F32);
        assert_eq!(pipeline.interpretation, Interpretation::Xyz);
    }

    #[test]
    fn low_bit_mono_expands() {
        for bits in [1, 2, 4] {
            let h = header(
                PhotometricInterpretation::WhiteIsZero,
                1,
                bits,
                SampleFormat::Uint,
            );
            let pipeline = select_pipeline(&h, None).unwrap();
            assert_eq!(pipeline.unpacker.kernel, Kernel::Expand);
            assert!(pipeline.unpacker.invert);
            assert_eq!((pipeline.bands, pipeline.format), (1, ElementFormat::U8));
        }
    }

    #[test]
    fn greyscale_formats_and_inversion() {
        let h = header(PhotometricInterpretation::BlackIsZero, 1, 16, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Greyscale);
        assert_eq!(pipeline.format, ElementFormat::U16);
        assert_eq!(pipeline.interpretation, Interpretation::Grey16);
        assert!(!pipeline.unpacker.invert);

        let h = header(PhotometricInterpretation::WhiteIsZero, 1, 8, SampleFormat::Uint);
        assert!(select_pipeline(&h, None).unwrap().unpacker.invert);

        // No inversion for floats, even min-is-white.
        let h = header(PhotometricInterpretation::WhiteIsZero, 1, 32, SampleFormat::IEEEFP);
        assert!(!select_pipeline(&h, None).unwrap().unpacker.invert);

        let h = header(
            PhotometricInterpretation::BlackIsZero,
            1,
            64,
            SampleFormat::ComplexIEEEFP,
        );
        assert!(select_pipeline(&h, None).is_err());
    }

    fn mono_palette(bits: u16) -> PaletteLut {
        let len = 1usize << bits;
        let map: Vec<u16> = (0..len).map(|i| (i * 7) as u16).collect();
        PaletteLut::build(&map, &map, &map, bits).unwrap()
    }

    #[test]
    fn palette_mono_emits_one_band() {
        let h = header(PhotometricInterpretation::RGBPalette, 1, 8, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, Some(mono_palette(8))).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Palette8);
        assert_eq!(pipeline.bands, 1);
        assert_eq!(pipeline.interpretation, Interpretation::BW);
    }

    #[test]
    fn palette_colour_adds_two_bands() {
        let len = 1usize << 4;
        let red: Vec<u16> = (0..len).map(|i| (i * 17 * 257) as u16).collect();
        let green: Vec<u16> = (0..len).map(|_| 0).collect();
        let blue = green.clone();
        let lut = PaletteLut::build(&red, &green, &blue, 4).unwrap();

        let h = header(PhotometricInterpretation::RGBPalette, 1, 4, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, Some(lut)).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::PaletteBits);
        assert_eq!(pipeline.bands, 3);
        assert_eq!(pipeline.interpretation, Interpretation::SRgb);
    }

    #[test]
    fn palette_rejects_odd_depths() {
        let h = header(PhotometricInterpretation::RGBPalette, 1, 12, SampleFormat::Uint);
        assert!(select_pipeline(&h, Some(mono_palette(8))).is_err());
    }

    #[test]
    fn copy_interpretations() {
        let h = header(PhotometricInterpretation::RGB, 3, 16, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Copy);
        assert_eq!(pipeline.interpretation, Interpretation::Rgb16);
        assert!(pipeline.memcpy);

        let h = header(PhotometricInterpretation::RGB, 3, 32, SampleFormat::IEEEFP);
        assert_eq!(
            select_pipeline(&h, None).unwrap().interpretation,
            Interpretation::ScRgb
        );

        let h = header(PhotometricInterpretation::Separated, 4, 8, SampleFormat::Uint);
        assert_eq!(
            select_pipeline(&h, None).unwrap().interpretation,
            Interpretation::Cmyk
        );

        let h = header(PhotometricInterpretation::Separated, 2, 8, SampleFormat::Uint);
        assert_eq!(
            select_pipeline(&h, None).unwrap().interpretation,
            Interpretation::Multiband
        );
    }

    #[test]
    fn ycbcr_copy_is_not_memcpy() {
        let h = header(PhotometricInterpretation::YCbCr, 3, 8, SampleFormat::Uint);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::Copy);
        assert_eq!(pipeline.interpretation, Interpretation::SRgb);
        assert!(!pipeline.memcpy);
    }

    #[test]
    fn half_float_copy_expands() {
        let h = header(PhotometricInterpretation::RGB, 3, 16, SampleFormat::IEEEFP);
        let pipeline = select_pipeline(&h, None).unwrap();
        assert_eq!(pipeline.unpacker.kernel, Kernel::CopyF16);
        assert_eq!(pipeline.format, ElementFormat::F32);
        assert!(!pipeline.memcpy);
        assert_eq!(pipeline.interpretation, Interpretation::ScRgb);
    }

    #[test]
    fn fractional_depths_are_rejected() {
        let h = header(PhotometricInterpretation::RGB, 3, 12, SampleFormat::Uint);
        assert!(select_pipeline(&h, None).is_err());
    }

    #[test]
    fn guess_format_table() {
        assert_eq!(
            guess_format(8, SampleFormat::Int).unwrap(),
            ElementFormat::I8
        );
        assert_eq!(
            guess_format(5, SampleFormat::Uint).unwrap(),
            ElementFormat::U8
        );
        assert_eq!(
            guess_format(16, SampleFormat::IEEEFP).unwrap(),
            ElementFormat::F32
        );
        assert_eq!(
            guess_format(32, SampleFormat::Uint).unwrap(),
            ElementFormat::U32
        );
        assert_eq!(
            guess_format(64, SampleFormat::IEEEFP).unwrap(),
            ElementFormat::F64
        );
        assert_eq!(
            guess_format(64, SampleFormat::ComplexIEEEFP).unwrap(),
            ElementFormat::C64
        );
        assert_eq!(
            guess_format(128, SampleFormat::ComplexIEEEFP).unwrap(),
            ElementFormat::C128
        );
        assert!(guess_format(64, SampleFormat::Uint).is_err());
        assert!(guess_format(128, SampleFormat::IEEEFP).is_err());
        assert!(guess_format(24, SampleFormat::Uint).is_err());
    }
}
