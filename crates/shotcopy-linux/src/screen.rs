//! Display detection for Linux screen capture.
//! Only wlroots-style Wayland compositors (wlr-screencopy) are supported.

use shotcopy_platform::CaptureError;

pub use crate::screencopy::WaylandTransport;

/// Detect the Wayland session and connect a capture transport to it.
pub fn connect_transport() -> Result<WaylandTransport, CaptureError> {
    let has_socket = std::env::var_os("WAYLAND_DISPLAY").is_some()
        || std::env::var_os("WAYLAND_SOCKET").is_some();
    if !has_socket {
        return Err(CaptureError::Connection(
            "no Wayland display detected, set WAYLAND_DISPLAY".to_string(),
        ));
    }

    tracing::info!("detected Wayland display, using wlr-screencopy capture");
    WaylandTransport::connect()
}
