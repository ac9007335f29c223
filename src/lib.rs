//! Streaming decode of TIFF directories into a uniform pixel stream.
//!
//! TIFF (Tagged Image File Format) stores one or more images as tagged
//! directories holding strips or tiles of encoded pixels. This crate
//! interprets those directories, routes each through one of a small set of
//! unpacking kernels, and serves the result as a pull-based stream: tiled
//! images hand out random-access regions to any number of workers, stripped
//! images hand out strictly sequential full-width bands. Requested page
//! ranges with identical geometry are stacked into one tall image.
//!
//! The structural container work (directory walking, tag storage, baseline
//! codecs, the RGBA fallback) lives behind the [`Container`] trait; JPEG and
//! JPEG-2000 tiles are decoded here, in parallel, outside the container
//! lock.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification

pub mod container;
pub mod decoder;
mod descriptor;
mod error;
mod rect;
pub mod tags;

pub use self::container::{Container, DecodeHint, WarningHandler};
pub use self::decoder::{
    probe, probe_tiled, read, read_header, FailOn, Image, Limits, PageCount, ReadOptions,
    StrippedImage, TileScratch, TiledImage,
};
pub use self::descriptor::{
    Coding, ElementFormat, ImageDescriptor, Interpretation, MetaItem,
};
pub use self::error::{
    DecodeError, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, UsageError,
};
pub use self::rect::Rect;
