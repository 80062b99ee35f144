use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use staffsplit_domain_image::{preprocess, segment, InvalidImageError, RawImage};
use staffsplit_ports::settings::{PreprocessSettings, SegmentationSettings};
use std::io::Cursor;

fn encode_page(background: u8, ink: u8, staff_tops: &[u32]) -> Vec<u8> {
    let mut image = GrayImage::from_pixel(160, 300, Luma([background]));
    for &top in staff_tops {
        for line in 0..5 {
            let row = top + line * 12;
            for y in row..row + 2 {
                for x in 0..160 {
                    image.put_pixel(x, y, Luma([ink]));
                }
            }
        }
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode");
    buf.into_inner()
}

#[test]
fn garbage_bytes_are_invalid() {
    let err = RawImage::decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, InvalidImageError::Decode(_)));
    let err = RawImage::decode(&[]).unwrap_err();
    assert!(matches!(err, InvalidImageError::Decode(_)));
}

#[test]
fn zero_area_image_is_invalid() {
    let raw = RawImage::from_dynamic(DynamicImage::new_luma8(0, 0));
    let err = preprocess(raw, &PreprocessSettings::default()).unwrap_err();
    assert!(matches!(err, InvalidImageError::Empty { width: 0, height: 0 }));
}

#[test]
fn output_is_binary_with_dark_lines() {
    let data = encode_page(190, 70, &[40]);
    let raw = RawImage::decode(&data).expect("decode");
    assert_eq!((raw.width(), raw.height()), (160, 300));
    let binary = preprocess(raw, &PreprocessSettings::default()).expect("preprocess");

    assert!(binary.as_gray().pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    assert!(binary.is_ink(80, 40));
    assert!(!binary.is_ink(80, 5));
}

#[test]
fn dark_background_is_inverted_to_white_paper() {
    let data = encode_page(20, 230, &[40]);
    let raw = RawImage::decode(&data).expect("decode");
    let binary = preprocess(raw, &PreprocessSettings::default()).expect("preprocess");
    assert!(!binary.is_ink(80, 5));
    assert!(binary.is_ink(80, 40));
}

#[test]
fn preprocessing_is_deterministic() {
    let data = encode_page(200, 40, &[30, 160]);
    let first = preprocess(RawImage::decode(&data).expect("decode"), &PreprocessSettings::default())
        .expect("preprocess");
    let second = preprocess(RawImage::decode(&data).expect("decode"), &PreprocessSettings::default())
        .expect("preprocess");
    assert_eq!(first, second);
}

#[test]
fn preprocessed_page_segments_into_staves() {
    let data = encode_page(200, 40, &[30, 160]);
    let binary = preprocess(RawImage::decode(&data).expect("decode"), &PreprocessSettings::default())
        .expect("preprocess");
    let strips = segment(&binary, &SegmentationSettings::default()).expect("segment");
    assert_eq!(strips.len(), 2);
    assert!(strips[0].top < strips[1].top);
}
