//! Per-scanline pixel transforms.
//!
//! Each kernel turns one row of raw container bytes into the canonical
//! output layout. The kernel is chosen once per decode by the pipeline
//! selector and then invoked per tile or strip row. Sources arrive in native
//! byte order; destinations are written in native byte order too.

use half::f16;
use tracing::warn;

use crate::descriptor::ElementFormat;
use crate::error::{TiffFormatError, TiffResult};

/// D65 whitepoint, normalized to Y = 1. The container delivers LogLuv as
/// illuminant-free 0-1 XYZ; scaling by these gives absolute XYZ.
const D65_X0: f32 = 0.9504;
const D65_Y0: f32 = 1.0;
const D65_Z0: f32 = 1.0888;

/// Convert IEEE 754-2008 16-bit float to 32-bit float.
#[inline]
pub(crate) fn half_to_float(h: u16) -> f32 {
    f16::from_bits(h).to_f32()
}

/// LUTs mapping palette indexes to RGB, in both widths, plus the mono
/// collapse flag.
#[derive(Clone, Debug)]
pub(crate) struct PaletteLut {
    pub red8: Vec<u8>,
    pub green8: Vec<u8>,
    pub blue8: Vec<u8>,

    pub red16: Vec<u16>,
    pub green16: Vec<u16>,
    pub blue16: Vec<u16>,

    /// All maps equal, so we write mono.
    pub mono: bool,
}

impl PaletteLut {
    /// Build the lookup tables from the raw colormap tag value.
    ///
    /// The colormap is specified as 16-bit per channel, but old writers
    /// emitted 8-bit values in the low byte. If no entry uses its high byte,
    /// assume such a map and take the low bytes instead.
    pub fn build(red: &[u16], green: &[u16], blue: &[u16], bits_per_sample: u16) -> TiffResult<Self> {
        let len = 1usize << bits_per_sample;

        if red.len() < len || green.len() < len || blue.len() < len {
            return Err(TiffFormatError::BadColormap.into());
        }

        let (red, green, blue) = (&red[..len], &green[..len], &blue[..len]);

        let sixteen_bit = red
            .iter()
            .chain(green)
            .chain(blue)
            .any(|&entry| entry >> 8 != 0);

        let narrow = |entries: &[u16]| -> Vec<u8> {
            if sixteen_bit {
                entries.iter().map(|&entry| (entry >> 8) as u8).collect()
            } else {
                entries.iter().map(|&entry| (entry & 0xff) as u8).collect()
            }
        };

        if !sixteen_bit {
            warn!("assuming 8-bit palette");
        }

        let mono = red
            .iter()
            .zip(green)
            .zip(blue)
            .all(|((&r, &g), &b)| r == g && g == b);

        Ok(PaletteLut {
            red8: narrow(red),
            green8: narrow(green),
            blue8: narrow(blue),
            red16: red.to_vec(),
            green16: green.to_vec(),
            blue16: blue.to_vec(),
            mono,
        })
    }
}

/// The closed set of unpacking kernels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Kernel {
    /// 8-bit CIELAB to packed (L, a, b, 0) bytes.
    LabPack,
    /// 8-bit CIELAB with alpha to signed 16-bit LabS.
    LabWithAlpha,
    /// 16-bit CIELAB to signed 16-bit LabS.
    Labs,
    /// Container-decoded XYZ scaled to the D65 whitepoint.
    LogLuv,
    /// 1, 2 or 4 bit mono expanded to whole bytes.
    Expand,
    /// Whole-byte greyscale, inverting min-is-white first bands.
    Greyscale,
    /// Palette lookup for sub-byte indexes.
    PaletteBits,
    /// Palette lookup for 8-bit indexes.
    Palette8,
    /// Palette lookup for 16-bit indexes.
    Palette16,
    /// Source layout equals output layout.
    Copy,
    /// Half-precision floats expanded to f32 across all bands.
    CopyF16,
    /// 4-byte RGBA delivered by the container fallback.
    Rgba,
}

/// A selected kernel bundled with the header-derived state it runs on.
#[derive(Clone, Debug)]
pub(crate) struct Unpacker {
    pub kernel: Kernel,
    pub samples_per_pixel: usize,
    pub bits_per_sample: u16,
    /// Min-is-white data whose first band is inverted on unpack.
    pub invert: bool,
    pub format: ElementFormat,
    /// Bytes per output pixel.
    pub out_pel_size: usize,
    pub palette: Option<PaletteLut>,
}

impl Unpacker {
    /// Unpack `n` pixels from `src` into `dst`.
    ///
    /// `dst` must hold `n * out_pel_size` bytes; `src` must hold the raw
    /// bytes of at least `n` source pixels.
    pub fn unpack(&self, dst: &mut [u8], src: &[u8], n: usize) {
        match self.kernel {
            Kernel::LabPack => self.lab_pack(dst, src, n),
            Kernel::LabWithAlpha => self.lab_with_alpha(dst, src, n),
            Kernel::Labs => self.labs(dst, src, n),
            Kernel::LogLuv => self.logluv(dst, src, n),
            Kernel::Expand => self.expand_bits(dst, src, n),
            Kernel::Greyscale => self.greyscale(dst, src, n),
            Kernel::PaletteBits => self.palette_bits(dst, src, n),
            Kernel::Palette8 => self.palette8(dst, src, n),
            Kernel::Palette16 => self.palette16(dst, src, n),
            Kernel::Copy | Kernel::Rgba => {
                let len = n * self.out_pel_size;
                dst[..len].copy_from_slice(&src[..len]);
            }
            Kernel::CopyF16 => self.copy_f16(dst, src, n),
        }
    }

    fn lab_pack(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let spp = self.samples_per_pixel;

        for x in 0..n {
            let p = &src[x * spp..];
            let q = &mut dst[x * 4..];

            q[0] = p[0];
            q[1] = p[1];
            q[2] = p[2];
            q[3] = 0;
        }
    }

    fn lab_with_alpha(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let spp = self.samples_per_pixel;

        for x in 0..n {
            let p = &src[x * spp..];
            let q = &mut dst[x * spp * 2..];

            // Unsigned scale for L, shift into the high byte for a and b.
            let l = (u32::from(p[0]) * 32767 / 255) as i16;
            q[0..2].copy_from_slice(&l.to_ne_bytes());
            let a = ((u16::from(p[1])) << 8) as i16;
            q[2..4].copy_from_slice(&a.to_ne_bytes());
            let b = ((u16::from(p[2])) << 8) as i16;
            q[4..6].copy_from_slice(&b.to_ne_bytes());

            for i in 3..spp {
                let v = ((u16::from(p[i]) << 8) | u16::from(p[i])) as i16;
                q[i * 2..][..2].copy_from_slice(&v.to_ne_bytes());
            }
        }
    }

    fn labs(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let spp = self.samples_per_pixel;

        for x in 0..n {
            let p = &src[x * spp * 2..];
            let q = &mut dst[x * spp * 2..];

            // We use signed int16 for L.
            let l = u16::from_ne_bytes([p[0], p[1]]) >> 1;
            q[0..2].copy_from_slice(&(l as i16).to_ne_bytes());

            for i in 1..spp {
                q[i * 2..][..2].copy_from_slice(&p[i * 2..][..2]);
            }
        }
    }

    fn logluv(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let spp = self.samples_per_pixel;

        for x in 0..n {
            let p = &src[x * spp * 4..];
            let q = &mut dst[x * spp * 4..];

            let coefficients = [D65_X0, D65_Y0, D65_Z0];
            for (i, coefficient) in coefficients.iter().enumerate() {
                let v = f32::from_ne_bytes(p[i * 4..][..4].try_into().unwrap());
                q[i * 4..][..4].copy_from_slice(&(coefficient * v).to_ne_bytes());
            }

            for i in 3..spp {
                q[i * 4..][..4].copy_from_slice(&p[i * 4..][..4]);
            }
        }
    }

    fn expand_bits(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let bits_per_sample = self.bits_per_sample;
        // Flip the bits for min-is-white.
        let mask = if self.invert { 0xff } else { 0x00 };
        let load = 8 / bits_per_sample as usize - 1;

        let mut p = src.iter();
        let mut bits: u8 = 0;

        for x in 0..n {
            if (x & load) == 0 {
                bits = p.next().copied().unwrap_or(0) ^ mask;
            }

            dst[x] = match bits_per_sample {
                // Expand the top bit down the byte with a sign-extending
                // shift.
                1 => (((bits & 0x80) as i8) >> 7) as u8,
                2 => {
                    let two = bits >> 6;
                    let four = two | (two << 2);
                    four | (four << 4)
                }
                _ => (bits & 0xf0) | (bits >> 4),
            };

            bits <<= bits_per_sample;
        }
    }

    fn greyscale(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let spp = self.samples_per_pixel;

        // 16-bit float input expands to f32 across every band.
        if self.bits_per_sample == 16 && self.format == ElementFormat::F32 {
            for i in 0..n * spp {
                let h = u16::from_ne_bytes(src[i * 2..][..2].try_into().unwrap());
                dst[i * 4..][..4].copy_from_slice(&half_to_float(h).to_ne_bytes());
            }
            return;
        }

        if !self.invert {
            // Nothing to swap, all bands pass through unchanged.
            let len = n * self.out_pel_size;
            dst[..len].copy_from_slice(&src[..len]);
            return;
        }

        macro_rules! grey_loop {
            ($ty:ty, $max:expr) => {{
                let es = std::mem::size_of::<$ty>();
                for x in 0..n {
                    let p = &src[x * spp * es..];
                    let q = &mut dst[x * spp * es..];

                    let v = <$ty>::from_ne_bytes(p[..es].try_into().unwrap());
                    q[..es].copy_from_slice(&($max - v).to_ne_bytes());

                    for i in 1..spp {
                        q[i * es..][..es].copy_from_slice(&p[i * es..][..es]);
                    }
                }
            }};
        }

        // Swapping black and white doesn't make sense for the signed and
        // float formats, so these are the only cases.
        match self.format {
            ElementFormat::U8 => grey_loop!(u8, u8::MAX),
            ElementFormat::U16 => grey_loop!(u16, u16::MAX),
            ElementFormat::U32 => grey_loop!(u32, u32::MAX),
            _ => {
                let len = n * self.out_pel_size;
                dst[..len].copy_from_slice(&src[..len]);
            }
        }
    }

    fn palette_bits(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let lut = self.palette.as_ref().unwrap();
        let spp = self.samples_per_pixel;
        let bits_per_sample = self.bits_per_sample;

        let mut p = src.iter();
        let mut bit = 0i32;
        let mut data: u8 = 0;
        let mut q = 0usize;

        for x in 0..n * spp {
            if bit <= 0 {
                data = p.next().copied().unwrap_or(0);
                bit = 8;
            }

            let i = usize::from(data >> (8 - bits_per_sample));
            data <<= bits_per_sample;
            bit -= i32::from(bits_per_sample);

            // The first band goes through the LUT, subsequent bands are
            // left-justified and copied.
            if x % spp == 0 {
                if lut.mono {
                    dst[q] = lut.red8[i];
                    q += 1;
                } else {
                    dst[q] = lut.red8[i];
                    dst[q + 1] = lut.green8[i];
                    dst[q + 2] = lut.blue8[i];
                    q += 3;
                }
            } else {
                dst[q] = (i << (8 - bits_per_sample)) as u8;
                q += 1;
            }
        }
    }

    fn palette8(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let lut = self.palette.as_ref().unwrap();
        let spp = self.samples_per_pixel;
        let out_bands = if lut.mono { spp } else { spp + 2 };

        for x in 0..n {
            let p = &src[x * spp..];
            let q = &mut dst[x * out_bands..];

            let i = usize::from(p[0]);
            let mut o = if lut.mono {
                q[0] = lut.red8[i];
                1
            } else {
                q[0] = lut.red8[i];
                q[1] = lut.green8[i];
                q[2] = lut.blue8[i];
                3
            };

            for s in 1..spp {
                q[o] = p[s];
                o += 1;
            }
        }
    }

    fn palette16(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let lut = self.palette.as_ref().unwrap();
        let spp = self.samples_per_pixel;
        let out_bands = if lut.mono { spp } else { spp + 2 };

        for x in 0..n {
            let p = &src[x * spp * 2..];
            let q = &mut dst[x * out_bands * 2..];

            let i = usize::from(u16::from_ne_bytes([p[0], p[1]]));
            let mut o = if lut.mono {
                q[0..2].copy_from_slice(&lut.red16[i].to_ne_bytes());
                1
            } else {
                q[0..2].copy_from_slice(&lut.red16[i].to_ne_bytes());
                q[2..4].copy_from_slice(&lut.green16[i].to_ne_bytes());
                q[4..6].copy_from_slice(&lut.blue16[i].to_ne_bytes());
                3
            };

            for s in 1..spp {
                q[o * 2..][..2].copy_from_slice(&p[s * 2..][..2]);
                o += 1;
            }
        }
    }

    fn copy_f16(&self, dst: &mut [u8], src: &[u8], n: usize) {
        let mut elements = n * self.samples_per_pixel;
        if self.format.is_complex() {
            elements *= 2;
        }

        for i in 0..elements {
            let h = u16::from_ne_bytes(src[i * 2..][..2].try_into().unwrap());
            dst[i * 4..][..4].copy_from_slice(&half_to_float(h).to_ne_bytes());
        }
    }
}
