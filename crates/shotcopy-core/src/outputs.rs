//! Output resolution: match a requested name against advertised output devices.

use tracing::{debug, info};

use shotcopy_platform::output::{OutputEvent, OutputEventKind, OutputSummary};
use shotcopy_platform::transport::CaptureTransport;
use shotcopy_platform::CaptureError;

/// A completely described output device
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDevice<H> {
    pub handle: H,
    pub name: String,
    pub description: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub mode: Option<(i32, i32)>,
    pub scale: i32,
}

impl<H> OutputDevice<H> {
    pub fn summary(&self) -> OutputSummary {
        OutputSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            make: self.make.clone(),
            model: self.model.clone(),
            mode: self.mode,
            scale: self.scale,
        }
    }
}

/// Fields received for a device since its last `Done`
#[derive(Debug, Default)]
struct PendingFields {
    name: Option<String>,
    description: Option<String>,
    make: Option<String>,
    model: Option<String>,
    mode: Option<(i32, i32)>,
    scale: Option<i32>,
}

/// Collects interleaved output events and only commits a device's fields
/// once that device's own `Done` arrives.
#[derive(Debug)]
pub struct OutputResolver<H> {
    pending: Vec<(H, PendingFields)>,
    devices: Vec<OutputDevice<H>>,
}

impl<H> Default for OutputResolver<H> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl<H: Clone + PartialEq + std::fmt::Debug> OutputResolver<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: OutputEvent<H>) {
        let OutputEvent { device, kind } = event;
        match kind {
            OutputEventKind::Done => self.complete(device),
            OutputEventKind::Name(name) => self.pending_mut(device).name = Some(name),
            OutputEventKind::Description(desc) => {
                self.pending_mut(device).description = Some(desc)
            }
            OutputEventKind::Geometry { make, model } => {
                let fields = self.pending_mut(device);
                fields.make = Some(make);
                fields.model = Some(model);
            }
            OutputEventKind::Mode { width, height, .. } => {
                self.pending_mut(device).mode = Some((width, height))
            }
            OutputEventKind::Scale(factor) => self.pending_mut(device).scale = Some(factor),
        }
    }

    fn pending_mut(&mut self, device: H) -> &mut PendingFields {
        let idx = match self.pending.iter().position(|(h, _)| *h == device) {
            Some(idx) => idx,
            None => {
                self.pending.push((device, PendingFields::default()));
                self.pending.len() - 1
            }
        };
        &mut self.pending[idx].1
    }

    fn complete(&mut self, device: H) {
        let fields = match self.pending.iter().position(|(h, _)| *h == device) {
            Some(idx) => self.pending.remove(idx).1,
            None => PendingFields::default(),
        };

        // A device may send further updates followed by another Done
        if let Some(existing) = self.devices.iter_mut().find(|d| d.handle == device) {
            if let Some(name) = fields.name {
                existing.name = name;
            }
            existing.description = fields.description.or(existing.description.take());
            existing.make = fields.make.or(existing.make.take());
            existing.model = fields.model.or(existing.model.take());
            existing.mode = fields.mode.or(existing.mode);
            existing.scale = fields.scale.unwrap_or(existing.scale);
            debug!("output {} updated", existing.name);
            return;
        }

        match fields.name {
            Some(name) => {
                debug!("output {} described", name);
                self.devices.push(OutputDevice {
                    handle: device,
                    name,
                    description: fields.description,
                    make: fields.make,
                    model: fields.model,
                    mode: fields.mode,
                    scale: fields.scale.unwrap_or(1),
                });
            }
            None => debug!("output {:?} finished without a name, skipping", device),
        }
    }

    /// Completed devices, in the order their first `Done` arrived
    pub fn devices(&self) -> &[OutputDevice<H>] {
        &self.devices
    }

    /// First completed device whose name matches exactly
    pub fn resolve(&self, name: &str) -> Result<&OutputDevice<H>, CaptureError> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CaptureError::OutputNotFound(name.to_string()))
    }
}

/// Enumerate every output the compositor advertises
pub fn enumerate<T: CaptureTransport>(
    transport: &mut T,
) -> Result<OutputResolver<T::Output>, CaptureError> {
    let mut resolver = OutputResolver::new();
    for event in transport.output_events()? {
        resolver.feed(event);
    }
    if !resolver.pending.is_empty() {
        debug!("{} output(s) never sent done", resolver.pending.len());
    }
    Ok(resolver)
}

/// Resolve `name` to an output device
pub fn resolve<T: CaptureTransport>(
    transport: &mut T,
    name: &str,
) -> Result<OutputDevice<T::Output>, CaptureError> {
    let resolver = enumerate(transport)?;
    let device = resolver.resolve(name)?.clone();
    info!("found target output: {}", device.name);
    Ok(device)
}
