//! Multi-page verification and page/subifd selection.

mod common;

use common::{TestContainer, TestDir};
use tiff_roll::{
    read, read_header, Image, PageCount, ReadOptions, Rect, TiffError, TiffFormatError,
    UsageError,
};

const BLACK_IS_ZERO: u16 = 1;
const RGB: u16 = 2;

fn grey_page(width: u32, height: u32, value: u8) -> TestDir {
    let data = vec![value; (width * height) as usize];
    TestDir::new(width, height, 1, 8, BLACK_IS_ZERO).with_strips(height, &data)
}

#[test]
fn all_pages_resolves_the_remainder() {
    let pages = vec![grey_page(2, 2, 1), grey_page(2, 2, 2), grey_page(2, 2, 3)];
    let options = ReadOptions::default()
        .with_page(1)
        .with_pages(PageCount::All);

    let descriptor = read_header(TestContainer::new(pages), &options).unwrap();
    assert_eq!(descriptor.height, 4);
    assert_eq!(descriptor.n_pages, 3);
    assert_eq!(descriptor.page_height, Some(2));
}

#[test]
fn page_beyond_the_chain_is_rejected() {
    let options = ReadOptions::default().with_page(3);
    let result = read_header(TestContainer::new(vec![grey_page(2, 2, 0)]), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::UsageError(UsageError::PageOutOfRange(3)))
    ));

    let options = ReadOptions::default().with_pages(PageCount::Count(2));
    let result = read_header(TestContainer::new(vec![grey_page(2, 2, 0)]), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::UsageError(UsageError::PageOutOfRange(1)))
    ));
}

#[test]
fn mismatched_pages_fail_verification() {
    // Differ by size.
    let pages = vec![grey_page(2, 2, 0), grey_page(2, 3, 0)];
    let options = ReadOptions::default().with_pages(PageCount::Count(2));
    let result = read_header(TestContainer::new(pages), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::FormatError(TiffFormatError::PageMismatch {
            page: 1,
            base_page: 0,
        }))
    ));

    // Differ by photometric interpretation.
    let rgb = {
        let data = vec![0u8; 2 * 2 * 3];
        TestDir::new(2, 2, 3, 8, RGB).with_strips(2, &data)
    };
    let pages = vec![grey_page(2, 2, 0), rgb];
    let result = read_header(TestContainer::new(pages), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::FormatError(TiffFormatError::PageMismatch { .. }))
    ));

    // Differ by strip geometry only.
    let tall_strips = {
        let data = vec![0u8; 2 * 2];
        TestDir::new(2, 2, 1, 8, BLACK_IS_ZERO).with_strips(1, &data)
    };
    let pages = vec![grey_page(2, 2, 0), tall_strips];
    let result = read_header(TestContainer::new(pages), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::FormatError(TiffFormatError::PageMismatch { .. }))
    ));
}

#[test]
fn page_range_starts_mid_chain() {
    let pages = vec![grey_page(1, 1, 5), grey_page(1, 1, 6), grey_page(1, 1, 7)];
    let options = ReadOptions::default()
        .with_page(1)
        .with_pages(PageCount::Count(2));

    let mut image = match read(TestContainer::new(pages), &options).unwrap() {
        Image::Stripped(image) => image,
        Image::Tiled(_) => panic!("expected a stripped image"),
    };

    let mut out = vec![0u8; 2];
    image.read_region(Rect::new(0, 0, 1, 2), &mut out).unwrap();
    assert_eq!(out, vec![6, 7]);
}

#[test]
fn subifd_selects_the_sub_image() {
    let mut main = grey_page(4, 4, 1);
    main.subifds = vec![grey_page(2, 2, 9)];

    let options = ReadOptions::default().with_subifd(Some(0));
    let mut image = match read(TestContainer::single(main.clone()), &options).unwrap() {
        Image::Stripped(image) => image,
        Image::Tiled(_) => panic!("expected a stripped image"),
    };

    assert_eq!(image.descriptor().width, 2);
    let mut out = vec![0u8; 4];
    image.read_region(Rect::new(0, 0, 2, 2), &mut out).unwrap();
    assert_eq!(out, vec![9, 9, 9, 9]);

    // The main directory advertises its sub-image count.
    let descriptor =
        read_header(TestContainer::single(main.clone()), &ReadOptions::default()).unwrap();
    assert_eq!(descriptor.n_subifds, 1);

    let options = ReadOptions::default().with_subifd(Some(3));
    let result = read_header(TestContainer::single(main), &options);
    assert!(matches!(
        result.err(),
        Some(TiffError::UsageError(UsageError::SubifdOutOfRange {
            requested: 3,
            count: 1,
        }))
    ));
}
