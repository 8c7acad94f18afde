//! Capture pipeline: resolve output, run the session, convert, encode.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use shotcopy_platform::frame::RgbImage;
use shotcopy_platform::output::OutputSummary;
use shotcopy_platform::transport::{CaptureTransport, SharedBuffer};
use shotcopy_platform::CaptureError;

use crate::config::CaptureConfig;
use crate::encode;
use crate::outputs;
use crate::session::CaptureSession;

/// What a successful run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub output: String,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

/// Capture one frame of the output named `target` as RGB.
///
/// The shared buffer is released before returning on every path.
pub fn capture_output<T: CaptureTransport>(
    transport: &mut T,
    target: &str,
    overlay_cursor: bool,
) -> Result<RgbImage, CaptureError> {
    let device = outputs::resolve(transport, target)?;

    let mut session = CaptureSession::new();
    session.start(transport, &device.handle, overlay_cursor)?;
    let descriptor = session.negotiate(transport)?;

    let buffer = transport.allocate_buffer(&descriptor)?;
    session.issue_copy(transport, buffer)?;
    session.await_ready(transport)?;

    let frame = session.into_frame()?;
    let image = frame.to_rgb();
    frame.buffer.release();
    image
}

/// Capture per `config` and write the PNG. Nothing is written on failure.
pub fn capture_to_file<T: CaptureTransport>(
    transport: &mut T,
    config: &CaptureConfig,
) -> Result<CaptureSummary, CaptureError> {
    let image = capture_output(transport, &config.target_output, config.overlay_cursor)?;
    encode::write_png(&image, &config.output_path)?;
    info!(
        "saved {}x{} capture of {} to {}",
        image.width,
        image.height,
        config.target_output,
        config.output_path.display()
    );
    Ok(CaptureSummary {
        output: config.target_output.clone(),
        width: image.width,
        height: image.height,
        path: config.output_path.clone(),
    })
}

/// Every completed output the compositor advertises
pub fn list_outputs<T: CaptureTransport>(
    transport: &mut T,
) -> Result<Vec<OutputSummary>, CaptureError> {
    let resolver = outputs::enumerate(transport)?;
    Ok(resolver.devices().iter().map(|d| d.summary()).collect())
}

/// Run a capture against the session compositor on a blocking thread
#[cfg(target_os = "linux")]
pub async fn take_screenshot(config: CaptureConfig) -> Result<CaptureSummary> {
    let result = tokio::task::spawn_blocking(move || {
        let mut transport = shotcopy_linux::screen::connect_transport()?;
        capture_to_file(&mut transport, &config)
    })
    .await
    .context("capture task failed")?;
    Ok(result?)
}

/// Enumerate the session compositor's outputs on a blocking thread
#[cfg(target_os = "linux")]
pub async fn available_outputs() -> Result<Vec<OutputSummary>> {
    let result = tokio::task::spawn_blocking(|| {
        let mut transport = shotcopy_linux::screen::connect_transport()?;
        list_outputs(&mut transport)
    })
    .await
    .context("output listing task failed")?;
    Ok(result?)
}

#[cfg(not(target_os = "linux"))]
pub async fn take_screenshot(_config: CaptureConfig) -> Result<CaptureSummary> {
    Err(unsupported().into())
}

#[cfg(not(target_os = "linux"))]
pub async fn available_outputs() -> Result<Vec<OutputSummary>> {
    Err(unsupported().into())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> CaptureError {
    CaptureError::Connection("screen capture requires a Wayland compositor on Linux".to_string())
}
