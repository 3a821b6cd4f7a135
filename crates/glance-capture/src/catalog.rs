use std::sync::Arc;

use glance_core::{ActiveDisplay, CaptureError, DisplayDescriptor, DisplayId};

use crate::backend::CaptureBackend;

/// Query-only view of the displays a backend can capture.
///
/// Every call enumerates afresh; nothing is cached between queries.
#[derive(Clone)]
pub struct DisplayCatalog {
    backend: Arc<dyn CaptureBackend>,
}

impl DisplayCatalog {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    /// Displays offered for mirroring: externals only, or the main display
    /// when nothing else is attached.
    pub fn list_capturable(&self) -> Result<Vec<DisplayId>, CaptureError> {
        Ok(select_capturable(&self.backend.active_displays()?))
    }

    pub fn first_capturable(&self) -> Result<Option<DisplayId>, CaptureError> {
        Ok(self.list_capturable()?.into_iter().next())
    }

    /// Describes `id`; `index` is its position in the menu and only feeds the
    /// fallback name.
    pub fn describe(&self, id: DisplayId, index: usize) -> Result<DisplayDescriptor, CaptureError> {
        self.backend
            .active_displays()?
            .iter()
            .find(|d| d.id == id)
            .map(|d| describe_display(d, index))
            .ok_or(CaptureError::DisplayUnavailable { display: id })
    }

    /// `describe` applied to `list_capturable`, from a single enumeration.
    pub fn descriptors(&self) -> Result<Vec<DisplayDescriptor>, CaptureError> {
        let active = self.backend.active_displays()?;
        Ok(select_capturable(&active)
            .into_iter()
            .enumerate()
            .filter_map(|(index, id)| {
                active.iter().find(|d| d.id == id).map(|d| describe_display(d, index))
            })
            .collect())
    }

    /// Start-time presence check: fails with `DisplayUnavailable` once the
    /// display is no longer attached.
    ///
    /// A display outside the capturable list (only ever the main display) is
    /// numbered after the menu entries so its fallback name stays unique.
    pub fn resolve(&self, id: DisplayId) -> Result<DisplayDescriptor, CaptureError> {
        let active = self.backend.active_displays()?;
        let capturable = select_capturable(&active);
        let index = capturable
            .iter()
            .position(|candidate| *candidate == id)
            .unwrap_or(capturable.len());
        active
            .iter()
            .find(|d| d.id == id)
            .map(|d| describe_display(d, index))
            .ok_or(CaptureError::DisplayUnavailable { display: id })
    }
}

impl std::fmt::Debug for DisplayCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayCatalog")
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Externals when at least one is attached, otherwise just the main display.
///
/// A platform that reports no main display gets its first entry treated as main.
pub fn select_capturable(displays: &[ActiveDisplay]) -> Vec<DisplayId> {
    let Some(main) = displays.iter().find(|d| d.is_main).or(displays.first()).map(|d| d.id) else {
        return Vec::new();
    };
    let externals: Vec<DisplayId> = displays
        .iter()
        .map(|d| d.id)
        .filter(|id| *id != main)
        .collect();
    if externals.is_empty() {
        vec![main]
    } else {
        externals
    }
}

/// Builds a descriptor, synthesising `"Monitor {index+1}"` for nameless displays.
pub fn describe_display(display: &ActiveDisplay, index: usize) -> DisplayDescriptor {
    let name = display
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("Monitor {}", index + 1));
    DisplayDescriptor {
        id: display.id,
        resolution: display.resolution,
        name,
    }
}
