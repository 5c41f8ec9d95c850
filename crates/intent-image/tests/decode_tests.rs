use image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder};
use intent_image::{
    ImageError, decode_base64, decode_image, encode_base64_png, encode_png, solid_color,
    validate_base64,
};

fn png_bytes(raw: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Vec<u8> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(raw, width, height, color)
        .unwrap();
    buffer
}

#[test]
fn test_decode_grayscale_becomes_rgb() {
    let raw: Vec<u8> = (0..12).map(|v| v * 20).collect();
    let decoded = decode_image(&png_bytes(&raw, 4, 3, ExtendedColorType::L8)).unwrap();

    assert_eq!(decoded.width(), 4);
    assert_eq!(decoded.height(), 3);
    assert_eq!(decoded.channels(), 3);
    // gray value replicated into all three channels
    assert_eq!(decoded.pixel(1, 0), Some([20, 20, 20]));
}

#[test]
fn test_decode_gray_alpha_becomes_rgb() {
    let raw = vec![100, 0, 200, 255];
    let decoded = decode_image(&png_bytes(&raw, 2, 1, ExtendedColorType::La8)).unwrap();
    assert_eq!(decoded.as_tensor().shape, vec![1, 2, 3]);
    assert_eq!(decoded.pixel(0, 0), Some([100, 100, 100]));
}

#[test]
fn test_decode_rgba_drops_alpha() {
    let img = image::RgbaImage::from_fn(2, 2, |x, y| image::Rgba([x as u8 * 10, y as u8 * 10, 7, 3]));
    let decoded = decode_image(&png_bytes(img.as_raw(), 2, 2, ExtendedColorType::Rgba8)).unwrap();
    assert_eq!(decoded.channels(), 3);
    assert_eq!(decoded.pixel(1, 1), Some([10, 10, 7]));
}

#[test]
fn test_decode_16bit_rgb_becomes_8bit() {
    let img = image::ImageBuffer::<image::Rgb<u16>, _>::from_pixel(2, 2, image::Rgb([65535u16, 0, 0]));
    let mut cursor = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb16(img)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .unwrap();

    let decoded = decode_image(&cursor.into_inner()).unwrap();
    assert_eq!(decoded.pixel(0, 0), Some([255, 0, 0]));
}

#[test]
fn test_base64_roundtrip_preserves_dimensions() {
    let original = solid_color(256, 128, [255, 0, 0]).unwrap();
    let encoded = encode_base64_png(&original).unwrap();

    let plain = decode_base64(&encoded).unwrap();
    assert_eq!(plain, original);

    let with_uri = decode_base64(&format!("data:image/png;base64,{encoded}")).unwrap();
    assert_eq!(with_uri.width(), 256);
    assert_eq!(with_uri.height(), 128);
    assert_eq!(with_uri.channels(), 3);
}

#[test]
fn test_truncated_bytes_fail_with_decode_error() {
    let bytes = encode_png(&solid_color(32, 32, [0, 255, 0]).unwrap()).unwrap();
    let truncated = &bytes[..bytes.len() / 3];
    assert!(matches!(decode_image(truncated), Err(ImageError::Decode(_))));
}

#[test]
fn test_invalid_base64_fails_with_decode_error() {
    let err = decode_base64("data:image/png;base64,@@not-base64@@").unwrap_err();
    assert!(matches!(err, ImageError::Decode(_)));
    assert!(err.to_string().starts_with("decode error"));
}

#[test]
fn test_non_image_bytes_fail() {
    assert!(matches!(
        decode_image(b"definitely not an image"),
        Err(ImageError::Decode(_))
    ));
}

#[test]
fn test_validate_base64() {
    let encoded = encode_base64_png(&solid_color(3, 2, [1, 2, 3]).unwrap()).unwrap();
    assert!(validate_base64(&encoded));
    assert!(validate_base64(&format!("data:image/png;base64,{encoded}")));
    assert!(!validate_base64("not base64!"));
    assert!(!validate_base64(&encoded[..encoded.len() / 2]));
    // valid base64, but not an image
    assert!(!validate_base64("aGVsbG8gd29ybGQ="));
    assert!(!validate_base64(""));
}
