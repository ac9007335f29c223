macro_rules! tags {
    {
        // Permit arbitrary meta items, which include documentation.
        $( #[$enum_attr:meta] )*
        $vis:vis enum $name:ident($ty:tt) $(unknown(#[$unknown_meta:meta] $unknown_doc:ident))* {
            // Each of the `Name = Val,` permitting documentation.
            $($(#[$ident_attr:meta])* $tag:ident = $val:expr,)*
        }
    } => {
        $( #[$enum_attr] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $($(#[$ident_attr])* $tag,)*
            $(
                #[$unknown_meta]
                Unknown($ty),
            )*
        }

        impl $name {
            #[inline(always)]
            fn __from_inner_type(n: $ty) -> Result<Self, $ty> {
                match n {
                    $( $val => Ok($name::$tag), )*
                    n => Err(n),
                }
            }

            #[inline(always)]
            fn __to_inner_type(&self) -> $ty {
                match *self {
                    $( $name::$tag => $val, )*
                    $( $name::Unknown($unknown_doc) => { $unknown_doc }, )*
                }
            }
        }

        tags!($name, $ty, $($unknown_doc)*);
    };
    // For u16 tags, provide direct inherent primitive conversion methods.
    ($name:tt, u16, $($unknown_doc:ident)*) => {
        impl $name {
            #[inline(always)]
            pub fn from_u16(val: u16) -> Option<Self> {
                Self::__from_inner_type(val).ok()
            }

            $(
            #[inline(always)]
            pub fn from_u16_exhaustive($unknown_doc: u16) -> Self {
                Self::__from_inner_type($unknown_doc).unwrap_or_else(|_| $name::Unknown($unknown_doc))
            }
            )*

            #[inline(always)]
            pub fn to_u16(&self) -> u16 {
                Self::__to_inner_type(self)
            }
        }
    };
    // For other tag types, do nothing for now. With concat_idents one could
    // provide inherent conversion methods for all types.
    ($name:tt, $ty:tt, $($unknown_doc:literal)*) => {};
}

// Note: These tags appear in the order they are mentioned in the TIFF reference
tags! {
/// TIFF tags the reader queries through the container.
pub enum Tag(u16) unknown(
    /// A private or extension tag
    unknown
) {
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    ImageDescription = 270,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    ResolutionUnit = 296,
    // palette-color images (PhotometricInterpretation 3)
    ColorMap = 320,
    TileWidth = 322,
    TileLength = 323,
    SubIfd = 330,
    InkSet = 332,
    ExtraSamples = 338,
    // Data Sample Format
    SampleFormat = 339,
    JpegTables = 347,
    YCbCrSubsampling = 530,
    // <https://www.adobe.io/open/standards/XMP.html>
    XmpPacket = 700,
    // <https://iptc.org/standards/iim/>
    RichTiffIptc = 33723,
    // Photoshop image resource blocks
    Photoshop = 34377,
    // <https://www.color.org/technotes/ICC-Technote-ProfileEmbedding.pdf>
    IccProfile = 34675,
    // Candela per square metre for one unit of SGI log luminance
    StoNits = 37439,
}
}

tags! {
/// See [TIFF compression tags](https://www.awaresystems.be/imaging/tiff/tifftags/compression.html)
/// for reference.
pub enum CompressionMethod(u16) unknown(
    /// A custom compression method
    unknown
) {
    None = 1,
    Huffman = 2,
    Fax3 = 3,
    Fax4 = 4,
    LZW = 5,
    // "Old-style" JPEG, decodable only through the RGBA fallback
    OldJpeg = 6,
    Jpeg = 7,
    Deflate = 8,
    OldDeflate = 0x80B2,
    PackBits = 0x8005,
    SgiLog = 34676,
    SgiLog24 = 34677,

    // Aperio and Leica JPEG-2000 codestreams
    Jp2kYcc = 33003,
    Jp2kRgb = 33005,
    Jp2kLossy = 34712,
}
}

tags! {
pub enum PhotometricInterpretation(u16) {
    WhiteIsZero = 0,
    BlackIsZero = 1,
    RGB = 2,
    RGBPalette = 3,
    TransparencyMask = 4,
    Separated = 5,
    YCbCr = 6,
    CIELab = 8,
    LogL = 32844,
    LogLuv = 32845,
}
}

tags! {
pub enum PlanarConfiguration(u16) {
    Chunky = 1,
    Planar = 2,
}
}

tags! {
/// Type to represent resolution units
pub enum ResolutionUnit(u16) {
    None = 1,
    Inch = 2,
    Centimeter = 3,
}
}

tags! {
pub enum SampleFormat(u16) unknown(
    /// An unknown extension sample format
    unknown
) {
    Uint = 1,
    Int = 2,
    IEEEFP = 3,
    Void = 4,
    ComplexInt = 5,
    ComplexIEEEFP = 6,
}
}

tags! {
/// Meaning of samples beyond the ones the photometric interpretation implies.
pub enum ExtraSamples(u16) unknown(
    /// An extension value
    unknown
) {
    Unspecified = 0,
    AssociatedAlpha = 1,
    UnassociatedAlpha = 2,
}
}

tags! {
pub enum InkSet(u16) unknown(
    /// A vendor ink set
    unknown
) {
    CMYK = 1,
    MultiInk = 2,
}
}
