//! Live preview window control.
//!
//! The engine owns a [`Preview`] that decides when the window should be
//! visible; the actual window is behind [`PreviewSurface`]. The default
//! [`HeadlessPreview`] only logs, which is all a stdio server needs.

use tracing::info;

use crate::session::SessionSignal;

/// A window that can present the remote screen.
pub trait PreviewSurface: Send {
    fn show(&mut self);
    fn hide(&mut self);
    /// Forward local input to the remote desktop, or be view-only.
    fn set_interactive(&mut self, enabled: bool);
    fn set_stays_on_top(&mut self, enabled: bool);
    fn set_title(&mut self, title: &str);
}

/// A surface with no window.
#[derive(Debug, Default)]
pub struct HeadlessPreview;

impl PreviewSurface for HeadlessPreview {
    fn show(&mut self) {
        info!("Preview shown");
    }

    fn hide(&mut self) {
        info!("Preview hidden");
    }

    fn set_interactive(&mut self, enabled: bool) {
        info!(enabled, "Preview interactive");
    }

    fn set_stays_on_top(&mut self, enabled: bool) {
        info!(enabled, "Preview stays on top");
    }

    fn set_title(&mut self, title: &str) {
        info!(title, "Preview title");
    }
}

/// Visibility policy: shown only while enabled and connected.
pub struct Preview {
    surface: Box<dyn PreviewSurface>,
    enabled: bool,
    connected: bool,
    shown: bool,
    interactive: bool,
    stays_on_top: bool,
    title: String,
}

impl Preview {
    pub fn new(surface: Box<dyn PreviewSurface>, title: impl Into<String>) -> Self {
        let title = title.into();
        let mut surface = surface;
        surface.set_title(&title);
        Self {
            surface,
            enabled: false,
            connected: false,
            shown: false,
            interactive: false,
            stays_on_top: false,
            title,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn stays_on_top(&self) -> bool {
        self.stays_on_top
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// An enabled preview keeps framebuffer updates flowing.
    pub fn wants_updates(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.sync();
    }

    pub fn set_interactive(&mut self, enabled: bool) {
        self.interactive = enabled;
        self.surface.set_interactive(enabled);
    }

    pub fn set_stays_on_top(&mut self, enabled: bool) {
        self.stays_on_top = enabled;
        self.surface.set_stays_on_top(enabled);
        // Changing window flags hides a window on most platforms.
        if self.shown {
            self.surface.show();
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        self.surface.set_title(title);
    }

    pub fn on_signal(&mut self, signal: &SessionSignal) {
        if let SessionSignal::ConnectionStateChanged(connected) = signal {
            self.connected = *connected;
            self.sync();
        }
    }

    fn sync(&mut self) {
        let want = self.enabled && self.connected;
        if want && !self.shown {
            self.surface.show();
        } else if !want && self.shown {
            self.surface.hide();
        }
        self.shown = want;
    }
}
