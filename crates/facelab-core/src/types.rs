use serde::{Deserialize, Serialize};

/// Single-channel 8-bit intensity image, row-major, origin top-left.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrayImage {
    /// Pixel data (`width * height` bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for GrayImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrayImage({}x{})", self.width, self.height)
    }
}

impl GrayImage {
    /// Wrap raw intensity pixels. Returns `None` if the buffer does not
    /// match `width * height`.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self { data, width, height })
    }

    /// Convert interleaved 8-bit RGB pixels to intensity (BT.601 luma).
    pub fn from_rgb(rgb: &[u8], width: u32, height: u32) -> Option<Self> {
        let pixels = (width as usize) * (height as usize);
        if rgb.len() < pixels * 3 {
            return None;
        }
        let data = rgb
            .chunks_exact(3)
            .take(pixels)
            .map(|px| {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((77 * r + 150 * g + 29 * b) >> 8) as u8
            })
            .collect();
        Some(Self { data, width, height })
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// Extract the region covered by `rect`, clamped to the image bounds.
    /// A rect entirely outside the image yields a 1x1 black crop.
    pub fn crop(&self, rect: BoundingBox) -> GrayImage {
        let x0 = rect.x.min(self.width.saturating_sub(1));
        let y0 = rect.y.min(self.height.saturating_sub(1));
        let x1 = (rect.x + rect.width).min(self.width).max(x0 + 1);
        let y1 = (rect.y + rect.height).min(self.height).max(y0 + 1);

        let (w, h) = (x1 - x0, y1 - y0);
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in y0..y1 {
            let row = (y * self.width) as usize;
            data.extend_from_slice(&self.data[row + x0 as usize..row + x1 as usize]);
        }
        GrayImage { data, width: w, height: h }
    }

    /// Resize to an exact target size with bilinear interpolation.
    pub fn resize(&self, width: u32, height: u32) -> GrayImage {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let data = resize_bilinear(
            &self.data,
            self.width as usize,
            self.height as usize,
            width as usize,
            height as usize,
        );
        GrayImage { data, width, height }
    }

    /// Pixels as f32 in reading order, for classifier math.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data.iter().map(|&p| p as f32).collect()
    }
}

/// Bilinear resample of a single-channel buffer.
pub(crate) fn resize_bilinear(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return vec![0; dst_w * dst_h];
    }
    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    let mut dst = vec![0u8; dst_w * dst_h];
    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * src_w + x0] as f32;
            let tr = src[y0 * src_w + x1] as f32;
            let bl = src[y1 * src_w + x0] as f32;
            let br = src[y1 * src_w + x1] as f32;

            let top = tl * (1.0 - fx) + tr * fx;
            let bot = bl * (1.0 - fx) + br * fx;
            dst[y * dst_w + x] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    dst
}

/// Axis-aligned face box, in the pixel coordinate space of the frame it
/// was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Predictor output: a dense label index plus a provider-scale distance.
/// Lower distance means a closer match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: usize,
    pub distance: f64,
}
