//! Scripted in-memory transport for driving sessions in tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use shotcopy_platform::frame::{BufferGeometry, FrameDescriptor, FrameEvent};
use shotcopy_platform::output::{OutputEvent, OutputEventKind};
use shotcopy_platform::transport::{CaptureTransport, SharedBuffer};
use shotcopy_platform::CaptureError;

pub fn buffer_event(format: u32, width: u32, height: u32, stride: u32) -> FrameEvent {
    FrameEvent::BufferDescribed {
        format,
        width,
        height,
        stride,
    }
}

/// Output events for a single named device followed by its `Done`
pub fn named_output(device: u32, name: &str) -> Vec<OutputEvent<u32>> {
    vec![
        OutputEvent {
            device,
            kind: OutputEventKind::Name(name.to_string()),
        },
        OutputEvent {
            device,
            kind: OutputEventKind::Done,
        },
    ]
}

pub struct MockBuffer {
    geometry: BufferGeometry,
    data: Vec<u8>,
    releases: Rc<Cell<usize>>,
}

impl SharedBuffer for MockBuffer {
    fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        self.releases.set(self.releases.get() + 1);
    }
}

#[derive(Default)]
pub struct MockTransport {
    outputs: Vec<OutputEvent<u32>>,
    before_copy: VecDeque<FrameEvent>,
    after_copy: VecDeque<FrameEvent>,
    buffer_done: bool,
    /// Bytes the "compositor" writes into every allocated buffer
    pixels: Option<Vec<u8>>,
    fail_allocation: bool,
    releases: Rc<Cell<usize>>,
    pub requests: Vec<(u32, bool)>,
    pub allocations: usize,
    pub copies: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputEvent<u32>>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn before_copy(mut self, events: Vec<FrameEvent>) -> Self {
        self.before_copy = events.into();
        self
    }

    pub fn after_copy(mut self, events: Vec<FrameEvent>) -> Self {
        self.after_copy = events.into();
        self
    }

    pub fn with_buffer_done(mut self) -> Self {
        self.buffer_done = true;
        self
    }

    pub fn with_pixels(mut self, pixels: Vec<u8>) -> Self {
        self.pixels = Some(pixels);
        self
    }

    pub fn failing_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }

    pub fn releases(&self) -> usize {
        self.releases.get()
    }

    /// Events still queued for the current phase
    pub fn pending_events(&self) -> usize {
        if self.copies == 0 {
            self.before_copy.len()
        } else {
            self.after_copy.len()
        }
    }

    pub fn buffer_for(&mut self, geometry: BufferGeometry) -> Result<MockBuffer, CaptureError> {
        if self.fail_allocation {
            return Err(CaptureError::Allocation("mock allocation refused".into()));
        }
        let size = geometry
            .byte_size()
            .ok_or_else(|| CaptureError::Allocation("size overflow".into()))?;
        let mut data = vec![0u8; size];
        if let Some(pixels) = &self.pixels {
            let n = pixels.len().min(size);
            data[..n].copy_from_slice(&pixels[..n]);
        }
        self.allocations += 1;
        Ok(MockBuffer {
            geometry,
            data,
            releases: Rc::clone(&self.releases),
        })
    }
}

impl CaptureTransport for MockTransport {
    type Output = u32;
    type Buffer = MockBuffer;

    fn output_events(&mut self) -> Result<Vec<OutputEvent<u32>>, CaptureError> {
        Ok(std::mem::take(&mut self.outputs))
    }

    fn request_capture(&mut self, output: &u32, overlay_cursor: bool) -> Result<(), CaptureError> {
        self.requests.push((*output, overlay_cursor));
        Ok(())
    }

    fn next_frame_event(&mut self) -> Result<FrameEvent, CaptureError> {
        let queue = if self.copies == 0 {
            &mut self.before_copy
        } else {
            &mut self.after_copy
        };
        queue
            .pop_front()
            .ok_or_else(|| CaptureError::Connection("mock: event queue exhausted".into()))
    }

    fn announces_buffer_done(&self) -> bool {
        self.buffer_done
    }

    fn allocate_buffer(&mut self, descriptor: &FrameDescriptor) -> Result<MockBuffer, CaptureError> {
        self.buffer_for(descriptor.geometry())
    }

    fn copy(&mut self, _buffer: &MockBuffer) -> Result<(), CaptureError> {
        self.copies += 1;
        Ok(())
    }
}
