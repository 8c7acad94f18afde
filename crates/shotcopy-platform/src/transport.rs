use crate::error::CaptureError;
use crate::frame::{BufferGeometry, FrameDescriptor, FrameEvent};
use crate::output::OutputEvent;

/// A mapped memory region published to the compositor as a buffer.
///
/// Dropping the buffer unmaps it and destroys the compositor handle, so a
/// buffer is released exactly once on every exit path.
pub trait SharedBuffer {
    /// Geometry the buffer was published with
    fn geometry(&self) -> BufferGeometry;

    /// The mapped bytes, `stride * height` long
    fn bytes(&self) -> &[u8];

    /// Release now instead of at drop
    fn release(self)
    where
        Self: Sized,
    {
        drop(self)
    }
}

/// Connection to a compositor able to serve one-shot frame captures.
///
/// Every method that waits does so by servicing the connection's event queue
/// on the calling thread. Only one caller may wait at a time, which `&mut self`
/// enforces.
pub trait CaptureTransport {
    /// Compositor handle of an output device
    type Output: Clone + PartialEq + std::fmt::Debug;
    type Buffer: SharedBuffer;

    /// Enumerate outputs. Returns the descriptive events in arrival order,
    /// after every advertised output has had the chance to send its `Done`.
    fn output_events(&mut self) -> Result<Vec<OutputEvent<Self::Output>>, CaptureError>;

    /// Send the capture request for `output`
    fn request_capture(
        &mut self,
        output: &Self::Output,
        overlay_cursor: bool,
    ) -> Result<(), CaptureError>;

    /// Block until the next frame event arrives
    fn next_frame_event(&mut self) -> Result<FrameEvent, CaptureError>;

    /// Whether the compositor terminates its buffer descriptions with
    /// [`FrameEvent::BufferDone`]
    fn announces_buffer_done(&self) -> bool;

    /// Allocate, map and publish a buffer matching `descriptor`
    fn allocate_buffer(&mut self, descriptor: &FrameDescriptor)
        -> Result<Self::Buffer, CaptureError>;

    /// Ask the compositor to copy the frame into `buffer`
    fn copy(&mut self, buffer: &Self::Buffer) -> Result<(), CaptureError>;
}
