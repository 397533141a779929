//! Frame type and pixel operations — YUYV conversion, mirroring,
//! aspect-preserving resize.

/// An interleaved 8-bit RGB frame, origin top-left.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// RGB pixel data (`width * height * 3` bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({}x{})", self.width, self.height)
    }
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self { data: vec![0; (width * height * 3) as usize], width, height }
    }

    /// Wrap raw RGB pixels. Returns `None` on a length mismatch.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }
        Some(Self { data, width, height })
    }

    fn px(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Flip left-right in place.
    pub fn mirror_horizontal(&mut self) {
        let w = self.width as usize;
        for row in self.data.chunks_exact_mut(w * 3) {
            for x in 0..w / 2 {
                let (a, b) = (x * 3, (w - 1 - x) * 3);
                for c in 0..3 {
                    row.swap(a + c, b + c);
                }
            }
        }
    }

    /// Scale to the given width, preserving aspect ratio, with bilinear
    /// filtering. Height never rounds below one pixel.
    pub fn resize_to_width(&self, target_width: u32) -> Frame {
        if target_width == self.width || self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let scale = target_width as f32 / self.width as f32;
        let target_height = ((self.height as f32 * scale).round() as u32).max(1);
        self.resize(target_width, target_height)
    }

    fn resize(&self, dst_w: u32, dst_h: u32) -> Frame {
        let (sw, sh) = (self.width as usize, self.height as usize);
        let (dw, dh) = (dst_w as usize, dst_h as usize);
        let scale_x = sw as f32 / dw as f32;
        let scale_y = sh as f32 / dh as f32;

        let mut out = Frame::new(dst_w, dst_h);
        for y in 0..dh {
            let src_y = (y as f32 + 0.5) * scale_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, sh as i32 - 1) as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..dw {
                let src_x = (x as f32 + 0.5) * scale_x - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, sw as i32 - 1) as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let tl = self.px(x0, y0);
                let tr = self.px(x1, y0);
                let bl = self.px(x0, y1);
                let br = self.px(x1, y1);

                let i = (y * dw + x) * 3;
                for c in 0..3 {
                    let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
                    let bot = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
                    out.data[i + c] =
                        (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; U and V are
/// shared by the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (quad[1] as i32 - 128, quad[3] as i32 - 128);
        for &y in &[quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(((c + 409 * v + 128) >> 8).clamp(0, 255) as u8);
            rgb.push(((c - 100 * u - 208 * v + 128) >> 8).clamp(0, 255) as u8);
            rgb.push(((c + 516 * u + 128) >> 8).clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}
