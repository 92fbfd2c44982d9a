use camwatch_types::{frame::DecodedFrame, playback::RequestToken};

/// The two image slots a viewer alternates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// The buffer whose content is on screen.
    Live,
    /// Hidden buffer that receives polled frames before they are swapped in.
    Prefetch,
}

/// One image slot: the last fully decoded frame plus the request currently
/// loading into it, if any.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    role: BufferRole,
    pending: Option<RequestToken>,
    frame: Option<DecodedFrame>,
}

impl FrameBuffer {
    pub fn new(role: BufferRole) -> Self {
        Self {
            role,
            pending: None,
            frame: None,
        }
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn pending(&self) -> Option<RequestToken> {
        self.pending
    }

    /// Last decoded content, even while a newer request is loading.
    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.frame.as_ref()
    }

    /// Content that is safe to capture: decoded and not being replaced.
    pub fn decoded(&self) -> Option<&DecodedFrame> {
        match self.pending {
            Some(_) => None,
            None => self.frame.as_ref(),
        }
    }

    pub fn token(&self) -> Option<RequestToken> {
        self.frame.as_ref().map(|f| f.token)
    }

    pub(crate) fn begin(&mut self, token: RequestToken) {
        self.pending = Some(token);
    }

    /// Clears the pending marker if it belongs to `token`.
    pub(crate) fn settle(&mut self, token: RequestToken) -> bool {
        if self.pending == Some(token) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Drops the pending marker when a frame newer than the pending request
    /// is already shown; that request can only come back stale.
    pub(crate) fn supersede(&mut self, shown: RequestToken) -> bool {
        match self.pending {
            Some(pending) if pending < shown => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn cancel_pending(&mut self) {
        self.pending = None;
    }

    pub(crate) fn store(&mut self, frame: Option<DecodedFrame>) -> Option<DecodedFrame> {
        std::mem::replace(&mut self.frame, frame)
    }

    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.frame = None;
    }
}
