//! The uniform output image description produced by header interpretation.

/// Storage type of one output element (one band of one pixel).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[non_exhaustive]
pub enum ElementFormat {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
    /// Complex, two f32 per element.
    C64,
    /// Complex, two f64 per element.
    C128,
}

impl ElementFormat {
    pub fn byte_size(self) -> usize {
        match self {
            ElementFormat::U8 | ElementFormat::I8 => 1,
            ElementFormat::U16 | ElementFormat::I16 => 2,
            ElementFormat::U32 | ElementFormat::I32 | ElementFormat::F32 => 4,
            ElementFormat::F64 | ElementFormat::C64 => 8,
            ElementFormat::C128 => 16,
        }
    }

    /// Whether this is one of the unsigned integer formats. Black/white
    /// inversion only makes sense for these.
    pub fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            ElementFormat::U8 | ElementFormat::U16 | ElementFormat::U32
        )
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            ElementFormat::U8
                | ElementFormat::I8
                | ElementFormat::U16
                | ElementFormat::I16
                | ElementFormat::U32
                | ElementFormat::I32
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementFormat::C64 | ElementFormat::C128)
    }
}

/// What the output bands mean.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[non_exhaustive]
pub enum Interpretation {
    /// Single-band black and white, 8 bits.
    BW,
    /// Single-band greyscale, 16 bits.
    Grey16,
    /// CIE L*a*b*.
    Lab,
    /// Signed 16-bit L*a*b*.
    LabS,
    /// Absolute CIE XYZ, as decoded from LogLuv.
    Xyz,
    SRgb,
    /// Linear-light RGB in floats, the Photoshop convention.
    ScRgb,
    Rgb16,
    Cmyk,
    /// No particular colour meaning.
    Multiband,
}

/// Pixel coding of the output stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Coding {
    /// Plain band-interleaved elements.
    None,
    /// Packed (L, a, b, pad) bytes per pixel.
    LabQ,
}

/// One metadata item attached to the output image.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum MetaItem<'a> {
    Int(i64),
    Double(f64),
    Str(&'a str),
    Blob(&'a [u8]),
}

/// Everything a consumer needs to allocate for and interpret the pixel
/// stream: geometry, element layout, colorimetry and the metadata carried
/// over from the container.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ImageDescriptor {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels of the whole output, all requested pages stacked.
    pub height: u32,
    pub bands: u16,
    pub format: ElementFormat,
    pub interpretation: Interpretation,
    pub coding: Coding,
    /// EXIF-style orientation, 1-8. Already consumed (reset to 1) when the
    /// read was opened with autorotate.
    pub orientation: u8,
    /// Index of the band holding premultiplied alpha, if any.
    pub alpha_band: Option<u16>,
    /// Horizontal resolution in pixels per millimetre.
    pub xres: f32,
    /// Vertical resolution in pixels per millimetre.
    pub yres: f32,
    pub resolution_unit: Option<&'static str>,
    /// Directories in the container, not the count read.
    pub n_pages: u32,
    pub n_subifds: u32,
    /// Height of a single page; present when more than one page was stacked.
    pub page_height: Option<u32>,
    pub bits_per_sample: u16,
    /// Calibration factor to absolute cd/m2, LogLuv only.
    pub stonits: Option<f64>,
    pub icc_profile: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
    pub iptc: Option<Vec<u8>>,
    pub photoshop: Option<Vec<u8>>,
    pub image_description: Option<String>,
}

impl ImageDescriptor {
    /// Bytes per output pixel.
    pub fn pel_size(&self) -> usize {
        usize::from(self.bands) * self.format.byte_size()
    }

    /// String-keyed view of the attached metadata.
    ///
    /// The IPTC block appears twice: once under its canonical name and once
    /// under the historical `ipct-data` misspelling kept for compatibility.
    pub fn items(&self) -> Vec<(&'static str, MetaItem<'_>)> {
        let mut items = Vec::new();

        items.push(("orientation", MetaItem::Int(i64::from(self.orientation))));
        items.push((
            "bits-per-sample",
            MetaItem::Int(i64::from(self.bits_per_sample)),
        ));
        items.push(("n-pages", MetaItem::Int(i64::from(self.n_pages))));
        if self.n_subifds > 0 {
            items.push(("n-subifds", MetaItem::Int(i64::from(self.n_subifds))));
        }
        if let Some(page_height) = self.page_height {
            items.push(("page-height", MetaItem::Int(i64::from(page_height))));
        }
        if let Some(stonits) = self.stonits {
            items.push(("stonits", MetaItem::Double(stonits)));
        }
        if let Some(unit) = self.resolution_unit {
            items.push(("resolution-unit", MetaItem::Str(unit)));
        }
        if let Some(ref blob) = self.icc_profile {
            items.push(("icc-profile-data", MetaItem::Blob(blob)));
        }
        if let Some(ref blob) = self.xmp {
            items.push(("xmp-data", MetaItem::Blob(blob)));
        }
        if let Some(ref blob) = self.iptc {
            items.push(("iptc-data", MetaItem::Blob(blob)));
            items.push(("ipct-data", MetaItem::Blob(blob)));
        }
        if let Some(ref blob) = self.photoshop {
            items.push(("photoshop-data", MetaItem::Blob(blob)));
        }
        if let Some(ref text) = self.image_description {
            items.push(("image-description", MetaItem::Str(text)));
        }

        items
    }
}
