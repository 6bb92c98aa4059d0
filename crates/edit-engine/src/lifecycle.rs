//! Ownership and teardown of every codec resource of one edit.
//!
//! Resources are attached as they are created. [`PipelineResources::release`]
//! frees whatever was attached in a fixed order:
//!
//! 1. stop the decoder
//! 2. stop the encoder
//! 3. release the drawable surface
//! 4. release compositor resources (texture, program)
//! 5. release the rendering context
//! 6. release the demuxer
//!
//! Release is idempotent and also runs on drop, so early returns and
//! cancellation both leave nothing behind.

use squarecut_common::{EditError, EditResult};

use crate::codec::{Demuxer, VideoDecoder};
use crate::compositor::Compositor;
use crate::encoder::BufferedEncoder;

/// Mutable access to every stage the codec driver touches.
pub struct ActiveStages<'a> {
    pub demuxer: &'a mut dyn Demuxer,
    pub decoder: &'a mut dyn VideoDecoder,
    pub compositor: &'a mut Compositor,
    pub encoder: &'a mut BufferedEncoder,
}

pub struct PipelineResources {
    demuxer: Option<Box<dyn Demuxer>>,
    decoder: Option<Box<dyn VideoDecoder>>,
    encoder: Option<BufferedEncoder>,
    compositor: Option<Compositor>,
    released: bool,
}

impl PipelineResources {
    pub fn new(demuxer: Box<dyn Demuxer>) -> Self {
        Self {
            demuxer: Some(demuxer),
            decoder: None,
            encoder: None,
            compositor: None,
            released: false,
        }
    }

    pub fn attach_decoder(&mut self, decoder: Box<dyn VideoDecoder>) {
        self.decoder = Some(decoder);
    }

    pub fn attach_encoder(&mut self, encoder: BufferedEncoder) {
        self.encoder = Some(encoder);
    }

    pub fn attach_compositor(&mut self, compositor: Compositor) {
        self.compositor = Some(compositor);
    }

    pub fn demuxer(&self) -> EditResult<&dyn Demuxer> {
        self.demuxer.as_deref().ok_or_else(released)
    }

    pub fn demuxer_mut(&mut self) -> EditResult<&mut dyn Demuxer> {
        match self.demuxer.as_mut() {
            Some(demuxer) => Ok(&mut **demuxer),
            None => Err(released()),
        }
    }

    pub fn decoder_mut(&mut self) -> EditResult<&mut dyn VideoDecoder> {
        match self.decoder.as_mut() {
            Some(decoder) => Ok(&mut **decoder),
            None => Err(released()),
        }
    }

    pub fn encoder_mut(&mut self) -> EditResult<&mut BufferedEncoder> {
        self.encoder.as_mut().ok_or_else(released)
    }

    /// All four stages at once, or an error if any is missing.
    pub fn active(&mut self) -> EditResult<ActiveStages<'_>> {
        match (
            self.demuxer.as_mut(),
            self.decoder.as_mut(),
            self.compositor.as_mut(),
            self.encoder.as_mut(),
        ) {
            (Some(demuxer), Some(decoder), Some(compositor), Some(encoder)) => Ok(ActiveStages {
                demuxer: &mut **demuxer,
                decoder: &mut **decoder,
                compositor,
                encoder,
            }),
            _ => Err(released()),
        }
    }

    /// The encoder (for its ring and output format) together with the
    /// demuxer (for the audio copy).
    pub fn mux_inputs(&mut self) -> EditResult<(&BufferedEncoder, &mut dyn Demuxer)> {
        match (self.encoder.as_ref(), self.demuxer.as_mut()) {
            (Some(encoder), Some(demuxer)) => Ok((encoder, &mut **demuxer)),
            _ => Err(released()),
        }
    }

    /// Free every attached resource in teardown order. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
            tracing::debug!("Decoder stopped");
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.stop();
            tracing::debug!("Encoder stopped");
        }
        if let Some(compositor) = self.compositor.as_mut() {
            compositor.release_surface();
            compositor.release_texture();
            compositor.release_context();
            tracing::debug!("Compositor released");
        }
        self.compositor = None;
        self.encoder = None;
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.release();
            tracing::debug!("Demuxer released");
        }
    }
}

impl Drop for PipelineResources {
    fn drop(&mut self) {
        self.release();
    }
}

fn released() -> EditError {
    EditError::codec("pipeline resources already released")
}
