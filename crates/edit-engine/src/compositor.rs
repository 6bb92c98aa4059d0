//! Frame compositor: crops, scales and rotates decoded pictures onto the
//! encoder's input surface.
//!
//! Each frame is drawn as one full-viewport quad. The quad samples the
//! external texture (the latest decoded picture) through the texture's
//! transform matrix, restricted to the crop viewport, with bilinear
//! filtering. The result is stamped with the frame's presentation time and
//! swapped to the encoder.
//!
//! Rendering state is tied to the thread that created it: [`RenderContext`]
//! is neither `Send` nor `Sync`, and neither is anything holding it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{CropRegion, NormalizedRect, VideoFrame, RGBA_BYTES};

use crate::codec::EncoderSurface;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Column-major 4×4 matrix mapping display texture coordinates onto coded
/// texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform([f64; 16]);

impl TextureTransform {
    pub const IDENTITY: TextureTransform = TextureTransform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Transform for a picture that is displayed rotated clockwise by
    /// `degrees` (0, 90, 180 or 270; anything else is treated as 0).
    pub fn for_rotation(degrees: u32) -> Self {
        let (m0, m4, m12, m1, m5, m13) = match degrees % 360 {
            90 => (0.0, 1.0, 0.0, -1.0, 0.0, 1.0),
            180 => (-1.0, 0.0, 1.0, 0.0, -1.0, 1.0),
            270 => (0.0, -1.0, 1.0, 1.0, 0.0, 0.0),
            _ => return Self::IDENTITY,
        };
        let mut m = Self::IDENTITY.0;
        m[0] = m0;
        m[1] = m1;
        m[4] = m4;
        m[5] = m5;
        m[12] = m12;
        m[13] = m13;
        Self(m)
    }

    /// Transform the point `(s, t, 0, 1)`.
    pub fn apply(&self, s: f64, t: f64) -> (f64, f64) {
        let m = &self.0;
        (m[0] * s + m[4] * t + m[12], m[1] * s + m[5] * t + m[13])
    }

    pub fn as_array(&self) -> &[f64; 16] {
        &self.0
    }
}

impl Default for TextureTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rendering context. Created and released on the worker thread.
#[derive(Debug)]
pub struct RenderContext {
    id: u64,
    released: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl RenderContext {
    pub fn create() -> EditResult<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, "Render context created");
        Ok(Self {
            id,
            released: false,
            _thread_bound: PhantomData,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fails once the context has been released.
    pub fn make_current(&self) -> EditResult<()> {
        if self.released {
            return Err(EditError::codec(format!(
                "render context {} used after release",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            tracing::debug!(context = self.id, "Render context released");
        }
    }
}

/// Drawable bound to the encoder's input surface.
pub struct WindowSurface {
    target: Option<Box<dyn EncoderSurface>>,
    back_buffer: VideoFrame,
    presentation_time_us: i64,
}

impl WindowSurface {
    pub fn new(target: Box<dyn EncoderSurface>, width: u32, height: u32) -> Self {
        Self {
            target: Some(target),
            back_buffer: VideoFrame::blank(width, height),
            presentation_time_us: 0,
        }
    }

    pub fn back_buffer_mut(&mut self) -> &mut VideoFrame {
        &mut self.back_buffer
    }

    pub fn set_presentation_time(&mut self, pts_us: i64) {
        self.presentation_time_us = pts_us;
    }

    /// Hand the back buffer to the encoder.
    pub fn swap_buffers(&mut self) -> EditResult<()> {
        let target = self
            .target
            .as_mut()
            .ok_or_else(|| EditError::codec("window surface used after release"))?;
        target.submit_frame(&self.back_buffer, self.presentation_time_us)
    }

    pub fn is_released(&self) -> bool {
        self.target.is_none()
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if let Some(mut target) = self.target.take() {
            target.release();
        }
    }
}

/// Texture holding the most recent decoded picture.
#[derive(Debug)]
pub struct ExternalTexture {
    image: Option<VideoFrame>,
    transform: TextureTransform,
    timestamp_us: i64,
    released: bool,
}

impl ExternalTexture {
    pub fn new(transform: TextureTransform) -> Self {
        Self {
            image: None,
            transform,
            timestamp_us: 0,
            released: false,
        }
    }

    /// Latch a new picture into the texture.
    pub fn update_tex_image(&mut self, image: VideoFrame, timestamp_us: i64) -> EditResult<()> {
        if self.released {
            return Err(EditError::codec("texture updated after release"));
        }
        if image.is_empty() {
            return Err(EditError::codec("decoder produced an empty picture"));
        }
        self.image = Some(image);
        self.timestamp_us = timestamp_us;
        Ok(())
    }

    pub fn transform_matrix(&self) -> &TextureTransform {
        &self.transform
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn image(&self) -> Option<&VideoFrame> {
        self.image.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Idempotent.
    pub fn release(&mut self) {
        self.released = true;
        self.image = None;
    }
}

/// Draws a full-viewport quad sampling `viewport` of the texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureProgram {
    viewport: NormalizedRect,
}

impl TextureProgram {
    pub fn new(viewport: NormalizedRect) -> Self {
        Self { viewport }
    }

    pub fn viewport(&self) -> NormalizedRect {
        self.viewport
    }

    pub fn draw(&self, texture: &ExternalTexture, target: &mut VideoFrame) -> EditResult<()> {
        let image = texture
            .image()
            .ok_or_else(|| EditError::codec("no picture latched into texture"))?;
        let transform = texture.transform_matrix();
        let (out_w, out_h) = (target.width(), target.height());
        let stride = target.stride();
        let pixels = target.as_bytes_mut();

        for dy in 0..out_h {
            let v = (dy as f64 + 0.5) / out_h as f64;
            let row = &mut pixels[dy as usize * stride..(dy as usize + 1) * stride];
            for (dx, px) in row.chunks_exact_mut(RGBA_BYTES).enumerate() {
                let u = (dx as f64 + 0.5) / out_w as f64;
                let (sd, td) = self.viewport.map(u, v);
                let (s, t) = transform.apply(sd, td);
                px.copy_from_slice(&sample_bilinear(image, s, t));
            }
        }
        Ok(())
    }
}

/// Bilinear sample at normalized coordinates, clamping at the edges.
fn sample_bilinear(image: &VideoFrame, s: f64, t: f64) -> [u8; 4] {
    let (w, h) = (image.width(), image.height());
    let fx = (s * w as f64 - 0.5).clamp(0.0, (w - 1) as f64);
    let fy = (t * h as f64 - 0.5).clamp(0.0, (h - 1) as f64);
    let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (wx, wy) = (fx - x0 as f64, fy - y0 as f64);

    let (p00, p10) = (image.pixel(x0, y0), image.pixel(x1, y0));
    let (p01, p11) = (image.pixel(x0, y1), image.pixel(x1, y1));
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f64 * (1.0 - wx) + p10[c] as f64 * wx;
        let bottom = p01[c] as f64 * (1.0 - wx) + p11[c] as f64 * wx;
        out[c] = (top * (1.0 - wy) + bottom * wy).round() as u8;
    }
    out
}

/// Owns the rendering context, the encoder-bound surface, the external
/// texture and the quad program.
pub struct Compositor {
    context: RenderContext,
    surface: WindowSurface,
    texture: ExternalTexture,
    program: TextureProgram,
}

impl Compositor {
    /// Set up drawing of `region` (in display pixels of a
    /// `display_width`×`display_height` source shown rotated by
    /// `rotation_degrees`) onto `target`.
    pub fn new(
        context: RenderContext,
        mut target: Box<dyn EncoderSurface>,
        display_size: (u32, u32),
        rotation_degrees: u32,
        region: CropRegion,
    ) -> EditResult<Self> {
        if let Err(e) = context.make_current() {
            target.release();
            return Err(e);
        }
        let (display_width, display_height) = display_size;
        let viewport = region.viewport.normalized(display_width, display_height);
        tracing::debug!(
            context = context.id(),
            crop = %region.viewport,
            output_width = region.output_width(),
            output_height = region.output_height(),
            rotation_degrees,
            "Compositor ready"
        );
        Ok(Self {
            surface: WindowSurface::new(target, region.output_width(), region.output_height()),
            texture: ExternalTexture::new(TextureTransform::for_rotation(rotation_degrees)),
            program: TextureProgram::new(viewport),
            context,
        })
    }

    /// Latch `frame`, draw the crop quad, stamp `pts_us` and submit it to
    /// the encoder.
    pub fn draw_frame(&mut self, frame: VideoFrame, pts_us: i64) -> EditResult<()> {
        self.context.make_current()?;
        self.texture.update_tex_image(frame, pts_us)?;
        self.program
            .draw(&self.texture, self.surface.back_buffer_mut())?;
        self.surface.set_presentation_time(pts_us);
        self.surface.swap_buffers()?;
        Ok(())
    }

    pub fn release_surface(&mut self) {
        self.surface.release();
    }

    pub fn release_texture(&mut self) {
        self.texture.release();
    }

    pub fn release_context(&mut self) {
        self.context.release();
    }

    /// Release texture, surface and context, in that order. Idempotent.
    pub fn release(&mut self) {
        self.release_texture();
        self.release_surface();
        self.release_context();
    }

    pub fn is_released(&self) -> bool {
        self.texture.is_released() && self.surface.is_released() && self.context.is_released()
    }
}
