use std::{fmt, sync::Arc};

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Optional callbacks invoked synchronously at pause/resume transitions.
#[derive(Clone, Default)]
pub struct ViewerHooks {
    on_pause: Option<Hook>,
    on_resume: Option<Hook>,
}

impl ViewerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pause(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pause = Some(Arc::new(hook));
        self
    }

    pub fn on_resume(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_resume = Some(Arc::new(hook));
        self
    }

    pub(crate) fn paused(&self) {
        if let Some(hook) = &self.on_pause {
            hook();
        }
    }

    pub(crate) fn resumed(&self) {
        if let Some(hook) = &self.on_resume {
            hook();
        }
    }
}

impl fmt::Debug for ViewerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerHooks")
            .field("on_pause", &self.on_pause.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .finish()
    }
}
