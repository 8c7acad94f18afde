//! One-shot capture session: request, buffer negotiation, copy, ready/failed.
//!
//! The session owns the negotiated [`FrameDescriptor`] and, once a copy is
//! issued, the shared buffer. Dropping the session at any point drops the
//! buffer, which releases the mapping.

use tracing::{debug, info};

use shotcopy_platform::frame::{
    FrameDescriptor, FrameEvent, FrameTimestamp, PixelFamily, RgbImage,
};
use shotcopy_platform::transport::{CaptureTransport, SharedBuffer};
use shotcopy_platform::CaptureError;

use crate::convert;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requested,
    BufferNegotiated,
    Copying,
    Ready,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Requested => "requested",
            SessionState::BufferNegotiated => "buffer-negotiated",
            SessionState::Copying => "copying",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Failed)
    }
}

/// A frame the compositor has finished writing
pub struct CapturedFrame<B> {
    pub descriptor: FrameDescriptor,
    pub buffer: B,
    pub timestamp: FrameTimestamp,
}

impl<B: SharedBuffer> CapturedFrame<B> {
    pub fn to_rgb(&self) -> Result<RgbImage, CaptureError> {
        convert::convert(self.buffer.bytes(), &self.descriptor)
    }
}

pub struct CaptureSession<B> {
    state: SessionState,
    descriptor: Option<FrameDescriptor>,
    y_invert: bool,
    /// Compositor finished listing buffer types (protocol v3+)
    buffers_done: bool,
    buffer: Option<B>,
    timestamp: Option<FrameTimestamp>,
}

impl<B: SharedBuffer> Default for CaptureSession<B> {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            descriptor: None,
            y_invert: false,
            buffers_done: false,
            buffer: None,
            timestamp: None,
        }
    }
}

impl<B: SharedBuffer> CaptureSession<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated descriptor with the latest y-invert flag applied
    pub fn descriptor(&self) -> Option<FrameDescriptor> {
        self.descriptor.map(|d| FrameDescriptor {
            y_invert: self.y_invert,
            ..d
        })
    }

    pub fn timestamp(&self) -> Option<FrameTimestamp> {
        self.timestamp
    }

    fn illegal(&self, event: &'static str) -> CaptureError {
        CaptureError::IllegalTransition {
            event,
            state: self.state.name(),
        }
    }

    /// Idle -> Requested
    pub fn start<T>(
        &mut self,
        transport: &mut T,
        output: &T::Output,
        overlay_cursor: bool,
    ) -> Result<(), CaptureError>
    where
        T: CaptureTransport<Buffer = B>,
    {
        if self.state != SessionState::Idle {
            return Err(self.illegal("start"));
        }
        transport.request_capture(output, overlay_cursor)?;
        self.state = SessionState::Requested;
        debug!("capture requested (overlay_cursor={})", overlay_cursor);
        Ok(())
    }

    /// Apply one compositor event. Every state/event pair is decided here.
    pub fn handle_event(&mut self, event: FrameEvent) -> Result<(), CaptureError> {
        use SessionState::*;

        match (event, self.state) {
            (FrameEvent::Failed, state) if !state.is_terminal() => {
                info!("compositor failed the capture in state {}", state.name());
                self.state = Failed;
            }
            (
                FrameEvent::BufferDescribed {
                    format,
                    width,
                    height,
                    stride,
                },
                Requested,
            ) => {
                self.record_offer(format, width, height, stride);
                self.state = BufferNegotiated;
            }
            (
                FrameEvent::BufferDescribed {
                    format,
                    width,
                    height,
                    stride,
                },
                BufferNegotiated,
            ) if !self.holds_supported_offer() && PixelFamily::from_format(format).is_some() => {
                debug!("replacing unconvertible buffer offer");
                self.record_offer(format, width, height, stride);
            }
            (FrameEvent::BufferDescribed { format, .. }, BufferNegotiated) => {
                debug!("ignoring additional buffer offer (format=0x{:x})", format);
            }
            (FrameEvent::FlagsSet { y_invert }, Requested | BufferNegotiated | Copying) => {
                self.y_invert = y_invert;
            }
            (FrameEvent::BufferDone, Requested | BufferNegotiated) => {
                self.buffers_done = true;
            }
            (FrameEvent::Ready { timestamp }, Copying) => {
                self.timestamp = Some(timestamp);
                self.state = Ready;
                info!("frame ready");
            }
            (FrameEvent::Damage { .. }, _) => {}
            (event, _) => return Err(self.illegal(event.name())),
        }
        Ok(())
    }

    fn record_offer(&mut self, format: u32, width: u32, height: u32, stride: u32) {
        info!(
            "buffer: {}x{}, stride={}, format=0x{:x}",
            width, height, stride, format
        );
        self.descriptor = Some(FrameDescriptor {
            format,
            width,
            height,
            stride,
            y_invert: self.y_invert,
        });
    }

    fn holds_supported_offer(&self) -> bool {
        self.descriptor
            .and_then(|d| PixelFamily::from_format(d.format))
            .is_some()
    }

    /// Service the transport until `done` holds or the session fails
    fn wait_for<T>(
        &mut self,
        transport: &mut T,
        what: &str,
        done: impl Fn(&Self) -> bool,
    ) -> Result<(), CaptureError>
    where
        T: CaptureTransport<Buffer = B>,
    {
        loop {
            if self.state == SessionState::Failed {
                return Err(CaptureError::CaptureFailed(format!(
                    "compositor reported failure while waiting for {}",
                    what
                )));
            }
            if done(self) {
                return Ok(());
            }
            let event = transport.next_frame_event()?;
            debug!("frame event: {}", event.name());
            self.handle_event(event)?;
        }
    }

    /// Wait for the buffer description. On transports announcing
    /// `BufferDone` the wait extends until that marker arrives, and a
    /// convertible offer replaces an earlier unconvertible one. Fails
    /// before any allocation when the final offer cannot be converted.
    pub fn negotiate<T>(&mut self, transport: &mut T) -> Result<FrameDescriptor, CaptureError>
    where
        T: CaptureTransport<Buffer = B>,
    {
        if !matches!(
            self.state,
            SessionState::Requested | SessionState::BufferNegotiated
        ) {
            return Err(self.illegal("negotiate"));
        }

        let await_done = transport.announces_buffer_done();
        self.wait_for(transport, "buffer description", |s| {
            let described = s.state == SessionState::BufferNegotiated;
            (described && (!await_done || s.buffers_done)) || (!described && s.buffers_done)
        })?;

        let descriptor = self
            .descriptor()
            .ok_or_else(|| CaptureError::CaptureFailed("compositor offered no shm buffer".into()))?;
        if PixelFamily::from_format(descriptor.format).is_none() {
            return Err(CaptureError::FormatUnsupported(descriptor.format));
        }
        Ok(descriptor)
    }

    /// BufferNegotiated -> Copying. The buffer must match the negotiated
    /// geometry exactly.
    pub fn issue_copy<T>(&mut self, transport: &mut T, buffer: B) -> Result<(), CaptureError>
    where
        T: CaptureTransport<Buffer = B>,
    {
        if self.state != SessionState::BufferNegotiated {
            return Err(self.illegal("copy"));
        }
        let expected = self
            .descriptor
            .map(|d| d.geometry())
            .ok_or_else(|| self.illegal("copy"))?;
        let actual = buffer.geometry();
        if expected != actual {
            return Err(CaptureError::BufferMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let buffer = self.buffer.insert(buffer);
        transport.copy(buffer)?;
        self.state = SessionState::Copying;
        debug!("copy issued");
        Ok(())
    }

    /// Wait for Ready (or Failed) after the copy was issued
    pub fn await_ready<T>(&mut self, transport: &mut T) -> Result<(), CaptureError>
    where
        T: CaptureTransport<Buffer = B>,
    {
        if !matches!(self.state, SessionState::Copying | SessionState::Ready) {
            return Err(self.illegal("await-ready"));
        }
        self.wait_for(transport, "frame", |s| s.state == SessionState::Ready)
    }

    /// Hand out the finished frame. Only valid in Ready.
    pub fn into_frame(mut self) -> Result<CapturedFrame<B>, CaptureError> {
        if self.state != SessionState::Ready {
            return Err(self.illegal("convert"));
        }
        let descriptor = self.descriptor().ok_or_else(|| self.illegal("convert"))?;
        let buffer = self.buffer.take().ok_or_else(|| self.illegal("convert"))?;
        Ok(CapturedFrame {
            descriptor,
            buffer,
            timestamp: self.timestamp.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_event, MockBuffer, MockTransport};
    use shotcopy_platform::frame::{BufferGeometry, SHM_FORMAT_XBGR8888, SHM_FORMAT_XRGB8888};

    fn ready() -> FrameEvent {
        FrameEvent::Ready {
            timestamp: FrameTimestamp::from_parts(0, 42, 7),
        }
    }

    fn started(transport: &mut MockTransport) -> CaptureSession<MockBuffer> {
        let mut session = CaptureSession::new();
        session.start(transport, &1, false).unwrap();
        session
    }

    fn negotiated(transport: &mut MockTransport) -> CaptureSession<MockBuffer> {
        let mut session = started(transport);
        session.negotiate(transport).unwrap();
        session
    }

    #[test]
    fn test_full_transition_sequence() {
        let mut transport = MockTransport::new()
            .before_copy(vec![buffer_event(SHM_FORMAT_XRGB8888, 4, 2, 16)])
            .after_copy(vec![FrameEvent::FlagsSet { y_invert: true }, ready()]);

        let mut session = CaptureSession::new();
        assert_eq!(session.state(), SessionState::Idle);

        session.start(&mut transport, &1, true).unwrap();
        assert_eq!(session.state(), SessionState::Requested);
        assert_eq!(transport.requests, vec![(1, true)]);

        let descriptor = session.negotiate(&mut transport).unwrap();
        assert_eq!(session.state(), SessionState::BufferNegotiated);
        assert_eq!(descriptor.byte_size(), Some(32));

        let buffer = transport.allocate_buffer(&descriptor).unwrap();
        session.issue_copy(&mut transport, buffer).unwrap();
        assert_eq!(session.state(), SessionState::Copying);
        assert_eq!(transport.copies, 1);

        session.await_ready(&mut transport).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.timestamp().unwrap().secs, 42);

        let frame = session.into_frame().unwrap();
        assert!(frame.descriptor.y_invert);
        assert_eq!(transport.releases(), 0);
        drop(frame);
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn test_copy_before_negotiation_is_rejected() {
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        let buffer = transport
            .buffer_for(BufferGeometry {
                format: SHM_FORMAT_XRGB8888,
                width: 1,
                height: 1,
                stride: 4,
            })
            .unwrap();

        let err = session.issue_copy(&mut transport, buffer).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::IllegalTransition { event: "copy", state: "requested" }
        ));
        assert_eq!(transport.copies, 0);
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn test_copy_from_idle_is_rejected() {
        let mut transport = MockTransport::new();
        let mut session: CaptureSession<MockBuffer> = CaptureSession::new();
        let buffer = transport
            .buffer_for(BufferGeometry {
                format: SHM_FORMAT_XRGB8888,
                width: 1,
                height: 1,
                stride: 4,
            })
            .unwrap();
        assert!(session.issue_copy(&mut transport, buffer).is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let mut transport =
            MockTransport::new().before_copy(vec![buffer_event(SHM_FORMAT_XRGB8888, 4, 2, 16)]);
        let mut session = negotiated(&mut transport);

        let wrong = transport
            .buffer_for(BufferGeometry {
                format: SHM_FORMAT_XRGB8888,
                width: 4,
                height: 2,
                stride: 32,
            })
            .unwrap();
        let err = session.issue_copy(&mut transport, wrong).unwrap_err();
        assert!(matches!(err, CaptureError::BufferMismatch { .. }));
        assert_eq!(session.state(), SessionState::BufferNegotiated);
        assert_eq!(transport.copies, 0);
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        // Idle
        let mut session: CaptureSession<MockBuffer> = CaptureSession::new();
        session.handle_event(FrameEvent::Failed).unwrap();
        assert_eq!(session.state(), SessionState::Failed);

        // Requested
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        session.handle_event(FrameEvent::Failed).unwrap();
        assert_eq!(session.state(), SessionState::Failed);

        // BufferNegotiated
        let mut transport =
            MockTransport::new().before_copy(vec![buffer_event(SHM_FORMAT_XRGB8888, 1, 1, 4)]);
        let mut session = negotiated(&mut transport);
        session.handle_event(FrameEvent::Failed).unwrap();
        assert_eq!(session.state(), SessionState::Failed);

        // Copying
        let mut transport =
            MockTransport::new().before_copy(vec![buffer_event(SHM_FORMAT_XRGB8888, 1, 1, 4)]);
        let mut session = negotiated(&mut transport);
        let descriptor = session.descriptor().unwrap();
        let buffer = transport.allocate_buffer(&descriptor).unwrap();
        session.issue_copy(&mut transport, buffer).unwrap();
        session.handle_event(FrameEvent::Failed).unwrap();
        assert_eq!(session.state(), SessionState::Failed);
        drop(session);
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let mut session: CaptureSession<MockBuffer> = CaptureSession::new();
        session.handle_event(FrameEvent::Failed).unwrap();
        assert!(session.handle_event(FrameEvent::Failed).is_err());
        assert!(session.handle_event(ready()).is_err());
    }

    #[test]
    fn test_failure_unblocks_negotiation_wait() {
        let mut transport = MockTransport::new().before_copy(vec![
            FrameEvent::Failed,
            buffer_event(SHM_FORMAT_XRGB8888, 1, 1, 4),
        ]);
        let mut session = started(&mut transport);

        let err = session.negotiate(&mut transport).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
        assert_eq!(session.state(), SessionState::Failed);
        // the wait returned without consuming further events
        assert_eq!(transport.pending_events(), 1);
    }

    #[test]
    fn test_failure_unblocks_ready_wait() {
        let mut transport = MockTransport::new()
            .before_copy(vec![buffer_event(SHM_FORMAT_XRGB8888, 2, 2, 8)])
            .after_copy(vec![FrameEvent::Failed, ready()]);
        let mut session = negotiated(&mut transport);
        let descriptor = session.descriptor().unwrap();
        let buffer = transport.allocate_buffer(&descriptor).unwrap();
        session.issue_copy(&mut transport, buffer).unwrap();

        assert!(matches!(
            session.await_ready(&mut transport),
            Err(CaptureError::CaptureFailed(_))
        ));
        assert!(session.into_frame().is_err());
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn test_ready_before_buffer_is_illegal() {
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        let err = session.handle_event(ready()).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::IllegalTransition { event: "ready", state: "requested" }
        ));
    }

    #[test]
    fn test_damage_is_ignored() {
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        session
            .handle_event(FrameEvent::Damage {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            })
            .unwrap();
        assert_eq!(session.state(), SessionState::Requested);
    }

    #[test]
    fn test_flags_before_buffer_apply_to_descriptor() {
        let mut transport = MockTransport::new().before_copy(vec![
            FrameEvent::FlagsSet { y_invert: true },
            buffer_event(SHM_FORMAT_XRGB8888, 2, 2, 8),
        ]);
        let mut session = started(&mut transport);
        let descriptor = session.negotiate(&mut transport).unwrap();
        assert!(descriptor.y_invert);
    }

    #[test]
    fn test_waits_for_buffer_done_when_announced() {
        let mut transport = MockTransport::new()
            .with_buffer_done()
            .before_copy(vec![
                buffer_event(SHM_FORMAT_XRGB8888, 2, 2, 8),
                buffer_event(SHM_FORMAT_XBGR8888, 2, 2, 8),
                FrameEvent::BufferDone,
            ]);
        let mut session = started(&mut transport);
        let descriptor = session.negotiate(&mut transport).unwrap();

        assert_eq!(descriptor.format, SHM_FORMAT_XRGB8888);
        assert_eq!(transport.pending_events(), 0);
    }

    #[test]
    fn test_supported_offer_replaces_unsupported_one() {
        // XRGB2101010 first, then XRGB8888
        let mut transport = MockTransport::new()
            .with_buffer_done()
            .before_copy(vec![
                buffer_event(0x3033_5258, 2, 1, 8),
                buffer_event(SHM_FORMAT_XRGB8888, 2, 1, 8),
                buffer_event(SHM_FORMAT_XBGR8888, 2, 1, 8),
                FrameEvent::BufferDone,
            ]);
        let mut session = started(&mut transport);
        let descriptor = session.negotiate(&mut transport).unwrap();

        assert_eq!(descriptor.format, SHM_FORMAT_XRGB8888);
        assert_eq!(session.state(), SessionState::BufferNegotiated);
    }

    #[test]
    fn test_only_unsupported_offers_fail_before_allocation() {
        let mut transport = MockTransport::new()
            .with_buffer_done()
            .before_copy(vec![
                buffer_event(0x3033_5258, 2, 1, 8),
                buffer_event(0x3631_4752, 2, 1, 4),
                FrameEvent::BufferDone,
            ]);
        let mut session = started(&mut transport);

        assert!(matches!(
            session.negotiate(&mut transport),
            Err(CaptureError::FormatUnsupported(0x3033_5258))
        ));
        assert_eq!(transport.allocations, 0);
    }

    #[test]
    fn test_negotiation_stops_at_first_buffer_without_buffer_done() {
        let mut transport = MockTransport::new().before_copy(vec![
            buffer_event(SHM_FORMAT_XRGB8888, 2, 2, 8),
            FrameEvent::BufferDone,
        ]);
        let mut session = started(&mut transport);
        session.negotiate(&mut transport).unwrap();
        assert_eq!(transport.pending_events(), 1);
    }

    #[test]
    fn test_buffer_done_without_shm_offer_fails() {
        let mut transport = MockTransport::new()
            .with_buffer_done()
            .before_copy(vec![FrameEvent::BufferDone]);
        let mut session = started(&mut transport);
        assert!(matches!(
            session.negotiate(&mut transport),
            Err(CaptureError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_transport_error_propagates() {
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        assert!(matches!(
            session.negotiate(&mut transport),
            Err(CaptureError::Connection(_))
        ));
    }

    #[test]
    fn test_start_twice_is_illegal() {
        let mut transport = MockTransport::new();
        let mut session = started(&mut transport);
        assert!(session.start(&mut transport, &1, false).is_err());
        assert_eq!(transport.requests.len(), 1);
    }
}
