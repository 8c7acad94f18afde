use thiserror::Error;

/// Every way a one-shot capture can end early. All of them are terminal.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("connection: {0}")]
    Connection(String),
    #[error("compositor: required global {0} not advertised")]
    CapabilityMissing(&'static str),
    #[error("output: no output named '{0}'")]
    OutputNotFound(String),
    #[error("capture: {0}")]
    CaptureFailed(String),
    #[error("allocation: {0}")]
    Allocation(String),
    #[error("mmap: {0}")]
    Map(String),
    #[error("convert: unsupported pixel format 0x{0:08x}")]
    FormatUnsupported(u32),
    #[error("convert: {0}")]
    Convert(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("session: {event} not valid in state {state}")]
    IllegalTransition {
        event: &'static str,
        state: &'static str,
    },
    #[error("session: buffer {actual} does not match negotiated {expected}")]
    BufferMismatch { expected: String, actual: String },
}

impl CaptureError {
    /// Short name of the stage that failed, used for structured logging.
    pub fn stage(&self) -> &'static str {
        match self {
            CaptureError::Connection(_) => "connection",
            CaptureError::CapabilityMissing(_) => "compositor",
            CaptureError::OutputNotFound(_) => "output",
            CaptureError::CaptureFailed(_) => "capture",
            CaptureError::Allocation(_) => "allocation",
            CaptureError::Map(_) => "mmap",
            CaptureError::FormatUnsupported(_) | CaptureError::Convert(_) => "convert",
            CaptureError::Encode(_) => "encode",
            CaptureError::IllegalTransition { .. } | CaptureError::BufferMismatch { .. } => {
                "session"
            }
        }
    }
}
