//! Wayland transport over wlr-screencopy-unstable-v1.
//!
//! Registry, output and frame events are collected into [`WaylandState`];
//! waits block on the connection's event queue from the calling thread.

use std::collections::VecDeque;

use tracing::{debug, info, trace};
use wayland_client::protocol::{wl_buffer, wl_output, wl_registry, wl_shm, wl_shm_pool};
use wayland_client::{
    delegate_noop, Connection, Dispatch, DispatchError, EventQueue, QueueHandle, WEnum,
};
use wayland_protocols_wlr::screencopy::v1::client::{
    zwlr_screencopy_frame_v1, zwlr_screencopy_manager_v1,
};

use shotcopy_platform::frame::{FrameDescriptor, FrameEvent, FrameTimestamp};
use shotcopy_platform::output::{OutputEvent, OutputEventKind};
use shotcopy_platform::transport::CaptureTransport;
use shotcopy_platform::CaptureError;

use crate::shm::{MappedRegion, ShmBuffer};

/// Highest wl_output version used; v4 adds the name event
const WL_OUTPUT_VERSION: u32 = 4;
/// Highest screencopy manager version used; v3 adds buffer_done
const SCREENCOPY_VERSION: u32 = 3;

/// Event sink for everything the compositor sends on our queue
#[derive(Default)]
pub struct WaylandState {
    shm: Option<wl_shm::WlShm>,
    screencopy: Option<(zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, u32)>,
    outputs: Vec<wl_output::WlOutput>,
    output_events: Vec<OutputEvent<wl_output::WlOutput>>,
    frame_events: VecDeque<FrameEvent>,
}

pub struct WaylandTransport {
    conn: Connection,
    queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    state: WaylandState,
    shm: wl_shm::WlShm,
    manager: zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1,
    manager_version: u32,
    frame: Option<zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1>,
}

fn dispatch_error(e: DispatchError) -> CaptureError {
    CaptureError::Connection(format!("wayland dispatch failed: {}", e))
}

impl WaylandTransport {
    /// Connect via WAYLAND_DISPLAY and bind wl_shm, outputs and the screencopy manager
    pub fn connect() -> Result<Self, CaptureError> {
        let conn = Connection::connect_to_env().map_err(|e| {
            CaptureError::Connection(format!("failed to connect to Wayland display: {}", e))
        })?;

        let mut queue = conn.new_event_queue();
        let qh = queue.handle();
        conn.display().get_registry(&qh, ());

        let mut state = WaylandState::default();
        queue.roundtrip(&mut state).map_err(dispatch_error)?;

        let shm = state
            .shm
            .clone()
            .ok_or(CaptureError::CapabilityMissing("wl_shm"))?;
        let (manager, manager_version) = state
            .screencopy
            .clone()
            .ok_or(CaptureError::CapabilityMissing("zwlr_screencopy_manager_v1"))?;

        info!(
            "wayland connected: screencopy v{}, {} output(s)",
            manager_version,
            state.outputs.len()
        );

        Ok(Self {
            conn,
            queue,
            qh,
            state,
            shm,
            manager,
            manager_version,
            frame: None,
        })
    }
}

impl CaptureTransport for WaylandTransport {
    type Output = wl_output::WlOutput;
    type Buffer = ShmBuffer;

    fn output_events(&mut self) -> Result<Vec<OutputEvent<wl_output::WlOutput>>, CaptureError> {
        // Outputs were bound during connect; their descriptions arrive now
        self.queue
            .roundtrip(&mut self.state)
            .map_err(dispatch_error)?;
        Ok(std::mem::take(&mut self.state.output_events))
    }

    fn request_capture(
        &mut self,
        output: &wl_output::WlOutput,
        overlay_cursor: bool,
    ) -> Result<(), CaptureError> {
        if let Some(old) = self.frame.take() {
            old.destroy();
        }
        self.state.frame_events.clear();

        let frame = self
            .manager
            .capture_output(i32::from(overlay_cursor), output, &self.qh, ());
        self.frame = Some(frame);
        self.conn.flush().map_err(|e| {
            CaptureError::Connection(format!("failed to send capture request: {}", e))
        })
    }

    fn next_frame_event(&mut self) -> Result<FrameEvent, CaptureError> {
        loop {
            if let Some(event) = self.state.frame_events.pop_front() {
                return Ok(event);
            }
            self.queue
                .blocking_dispatch(&mut self.state)
                .map_err(dispatch_error)?;
        }
    }

    fn announces_buffer_done(&self) -> bool {
        self.manager_version >= 3
    }

    fn allocate_buffer(&mut self, descriptor: &FrameDescriptor) -> Result<ShmBuffer, CaptureError> {
        let size = descriptor.byte_size().ok_or_else(|| {
            CaptureError::Allocation(format!("{} overflows", descriptor.geometry()))
        })?;
        let region = MappedRegion::allocate(size)?;
        ShmBuffer::publish(region, &self.shm, descriptor.geometry(), &self.qh)
    }

    fn copy(&mut self, buffer: &ShmBuffer) -> Result<(), CaptureError> {
        let frame = self.frame.as_ref().ok_or(CaptureError::IllegalTransition {
            event: "copy",
            state: "idle",
        })?;
        frame.copy(buffer.wl_buffer());
        self.conn
            .flush()
            .map_err(|e| CaptureError::Connection(format!("failed to send copy: {}", e)))
    }
}

impl Drop for WaylandTransport {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.destroy();
        }
        self.manager.destroy();
        let _ = self.conn.flush();
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            match interface.as_str() {
                "wl_shm" => {
                    state.shm = Some(registry.bind::<wl_shm::WlShm, _, _>(name, 1, qh, ()));
                }
                "wl_output" => {
                    if version < WL_OUTPUT_VERSION {
                        debug!("wl_output v{} has no name event, it cannot be matched", version);
                    }
                    let output = registry.bind::<wl_output::WlOutput, _, _>(
                        name,
                        version.min(WL_OUTPUT_VERSION),
                        qh,
                        (),
                    );
                    state.outputs.push(output);
                }
                "zwlr_screencopy_manager_v1" => {
                    let version = version.min(SCREENCOPY_VERSION);
                    let manager = registry
                        .bind::<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, _, _>(
                            name, version, qh, (),
                        );
                    state.screencopy = Some((manager, version));
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<wl_output::WlOutput, ()> for WaylandState {
    fn event(
        state: &mut Self,
        output: &wl_output::WlOutput,
        event: wl_output::Event,
        _: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(kind) = output_event_kind(event) {
            state.output_events.push(OutputEvent {
                device: output.clone(),
                kind,
            });
        }
    }
}

impl Dispatch<zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _frame: &zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(event) = frame_event(event) {
            state.frame_events.push_back(event);
        }
    }
}

delegate_noop!(WaylandState: ignore wl_shm::WlShm);
delegate_noop!(WaylandState: ignore wl_shm_pool::WlShmPool);
delegate_noop!(WaylandState: ignore wl_buffer::WlBuffer);
delegate_noop!(WaylandState: ignore zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1);

/// Map a wl_output event; non-current modes are dropped
fn output_event_kind(event: wl_output::Event) -> Option<OutputEventKind> {
    match event {
        wl_output::Event::Geometry { make, model, .. } => {
            Some(OutputEventKind::Geometry { make, model })
        }
        wl_output::Event::Mode {
            flags,
            width,
            height,
            refresh,
        } => {
            let current = match flags {
                WEnum::Value(flags) => flags.contains(wl_output::Mode::Current),
                WEnum::Unknown(bits) => bits & 0x1 != 0,
            };
            current.then_some(OutputEventKind::Mode {
                width,
                height,
                refresh_mhz: refresh,
            })
        }
        wl_output::Event::Scale { factor } => Some(OutputEventKind::Scale(factor)),
        wl_output::Event::Name { name } => Some(OutputEventKind::Name(name)),
        wl_output::Event::Description { description } => {
            Some(OutputEventKind::Description(description))
        }
        wl_output::Event::Done => Some(OutputEventKind::Done),
        _ => None,
    }
}

/// Map a screencopy frame event; dmabuf offers are not used
fn frame_event(event: zwlr_screencopy_frame_v1::Event) -> Option<FrameEvent> {
    use zwlr_screencopy_frame_v1::Event;

    match event {
        Event::Buffer {
            format,
            width,
            height,
            stride,
        } => {
            let format = match format {
                WEnum::Value(format) => format as u32,
                WEnum::Unknown(code) => code,
            };
            Some(FrameEvent::BufferDescribed {
                format,
                width,
                height,
                stride,
            })
        }
        Event::Flags { flags } => {
            let y_invert = match flags {
                WEnum::Value(flags) => flags.contains(zwlr_screencopy_frame_v1::Flags::YInvert),
                WEnum::Unknown(bits) => bits & 0x1 != 0,
            };
            Some(FrameEvent::FlagsSet { y_invert })
        }
        Event::Ready {
            tv_sec_hi,
            tv_sec_lo,
            tv_nsec,
        } => Some(FrameEvent::Ready {
            timestamp: FrameTimestamp::from_parts(tv_sec_hi, tv_sec_lo, tv_nsec),
        }),
        Event::Failed => Some(FrameEvent::Failed),
        Event::Damage {
            x,
            y,
            width,
            height,
        } => Some(FrameEvent::Damage {
            x,
            y,
            width,
            height,
        }),
        Event::BufferDone => Some(FrameEvent::BufferDone),
        Event::LinuxDmabuf { format, .. } => {
            trace!("ignoring dmabuf offer (format=0x{:x})", format);
            None
        }
        other => {
            debug!("unhandled screencopy event: {:?}", other);
            None
        }
    }
}
