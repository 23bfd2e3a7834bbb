use image::{RgbaImage, imageops};

/// Append a `square_size` wide wrap strip to a wall picture: the left
/// half-square of the picture followed by its right half-square.
///
/// Pictures narrower than half a square are returned with a transparent strip.
pub fn pad_wall(picture: &RgbaImage, square_size: u32) -> RgbaImage {
    let (width, height) = picture.dimensions();
    let half = square_size / 2;
    let mut out = RgbaImage::new(width + square_size, height);
    imageops::replace(&mut out, picture, 0, 0);

    if width >= half && half > 0 {
        let left = imageops::crop_imm(picture, 0, 0, half, height).to_image();
        let right = imageops::crop_imm(picture, width - half, 0, half, height).to_image();
        imageops::replace(&mut out, &left, i64::from(width), 0);
        imageops::replace(&mut out, &right, i64::from(width + half), 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Each column is filled with its own x as the red channel.
    fn striped(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| Rgba([x as u8, 0, 0, 255]))
    }

    #[test]
    fn strip_holds_left_then_right_half_square() {
        let padded = pad_wall(&striped(32, 4), 16);
        assert_eq!(padded.dimensions(), (48, 4));
        // Picture content untouched.
        assert_eq!(padded.get_pixel(31, 0)[0], 31);
        // Left half-square: columns 0..8.
        assert_eq!(padded.get_pixel(32, 2)[0], 0);
        assert_eq!(padded.get_pixel(39, 2)[0], 7);
        // Right half-square: columns 24..32.
        assert_eq!(padded.get_pixel(40, 3)[0], 24);
        assert_eq!(padded.get_pixel(47, 3)[0], 31);
    }

    #[test]
    fn tiny_picture_gets_blank_strip() {
        let padded = pad_wall(&striped(4, 2), 16);
        assert_eq!(padded.dimensions(), (20, 2));
        assert_eq!(padded.get_pixel(10, 1)[3], 0);
    }
}
