use serde::Serialize;

/// One descriptive event emitted by an output device. Events of different
/// devices may interleave; a device's description is complete at `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent<H> {
    pub device: H,
    pub kind: OutputEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEventKind {
    Geometry { make: String, model: String },
    Mode { width: i32, height: i32, refresh_mhz: i32 },
    Scale(i32),
    Name(String),
    Description(String),
    Done,
}

/// A fully described output, as printed by `shotcopy list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Current mode (width, height)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<(i32, i32)>,
    pub scale: i32,
}
