//! Offscreen render targets and the ping-pong pool that hands them out.

use serde::{Deserialize, Serialize};

use crate::device::{Attachment, PassTarget, RenderDevice, TextureDesc, TextureFormat, TextureId};
use crate::error::{RenderError, Result};

/// Color formats available for offscreen targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Rgba8Unorm,
    /// HDR; needed for values above 1.0 to survive until tone mapping.
    Rgba16Float,
}

impl From<ColorFormat> for TextureFormat {
    fn from(format: ColorFormat) -> Self {
        match format {
            ColorFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            ColorFormat::Rgba16Float => TextureFormat::Rgba16Float,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetFormat {
    pub color: ColorFormat,
    /// Whether the target carries a depth attachment.
    pub depth: bool,
}

/// An offscreen color (and optional depth) target.
///
/// Targets are owned by [`RenderTargetChain`]; passes only ever see them
/// through a borrow for the duration of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    color: TextureId,
    depth: Option<TextureId>,
    width: u32,
    height: u32,
    format: TargetFormat,
}

impl RenderTarget {
    fn new(device: &mut dyn RenderDevice, width: u32, height: u32, format: TargetFormat) -> Result<Self> {
        let color = device.create_texture(&TextureDesc {
            width,
            height,
            format: format.color.into(),
        })?;
        let depth = if format.depth {
            match device.create_texture(&TextureDesc {
                width,
                height,
                format: TextureFormat::Depth32Float,
            }) {
                Ok(id) => Some(id),
                Err(err) => {
                    device.destroy_texture(color);
                    return Err(err);
                }
            }
        } else {
            None
        };
        Ok(Self {
            color,
            depth,
            width,
            height,
            format,
        })
    }

    fn destroy(self, device: &mut dyn RenderDevice) {
        device.destroy_texture(self.color);
        if let Some(depth) = self.depth {
            device.destroy_texture(depth);
        }
    }

    pub fn color(&self) -> TextureId {
        self.color
    }

    pub fn depth(&self) -> Option<TextureId> {
        self.depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    /// This target as a pass attachment, contents loaded.
    pub fn pass_target(&self) -> PassTarget {
        PassTarget {
            color: Attachment::Texture(self.color),
            depth: self.depth.map(Attachment::Texture),
            clear: None,
        }
    }

    fn matches(&self, extent: (u32, u32), format: TargetFormat) -> bool {
        (self.width, self.height) == extent && self.format == format
    }
}

/// Generation-tagged reference to a pooled target.
///
/// Releasing a target bumps its slot's generation, so every handle to the old
/// allocation turns stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
enum SlotState {
    Vacant,
    Free(RenderTarget),
    Acquired(RenderTarget),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Pool of offscreen targets with ping-pong discipline.
///
/// ```text
///   acquire ──▶ Acquired ──release──▶ Free ──acquire──▶ Acquired ...
///                                       │
///                          extent change│
///                                       ▼
///                                    destroyed
/// ```
///
/// An acquired target is never handed out again until it is released, and a
/// pass may not bind the same target as both source and destination. All
/// targets track the current extent; a new extent makes pooled targets stale
/// and they are reallocated lazily by the next [`acquire`](Self::acquire).
#[derive(Debug, Default)]
pub struct RenderTargetChain {
    slots: Vec<Slot>,
    extent: (u32, u32),
    sources: Vec<TargetHandle>,
    destination: Option<TargetHandle>,
    allocations: u64,
}

impl RenderTargetChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current target extent.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Total number of targets ever allocated.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Number of targets currently held by passes.
    pub fn acquired_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Acquired(_)))
            .count()
    }

    /// Hands out a target of the given size and format.
    ///
    /// Reuses a free pooled target when one matches; otherwise allocates.
    pub fn acquire(
        &mut self,
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> Result<TargetHandle> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidTarget(format!(
                "cannot allocate a {width}x{height} target"
            )));
        }
        if (width, height) != self.extent {
            self.resize(device, width, height);
        }

        let extent = self.extent;
        let reusable = self
            .slots
            .iter()
            .position(|s| matches!(&s.state, SlotState::Free(t) if t.matches(extent, format)));
        let index = match reusable {
            Some(index) => {
                let slot = &mut self.slots[index];
                if let SlotState::Free(target) = std::mem::replace(&mut slot.state, SlotState::Vacant) {
                    slot.state = SlotState::Acquired(target);
                }
                index
            }
            None => {
                let target = RenderTarget::new(device, width, height, format)?;
                self.allocations += 1;
                log::debug!(
                    "allocated {width}x{height} {:?} target (depth: {})",
                    format.color,
                    format.depth
                );
                match self
                    .slots
                    .iter()
                    .position(|s| matches!(s.state, SlotState::Vacant))
                {
                    Some(index) => {
                        self.slots[index].state = SlotState::Acquired(target);
                        index
                    }
                    None => {
                        self.slots.push(Slot {
                            generation: 0,
                            state: SlotState::Acquired(target),
                        });
                        self.slots.len() - 1
                    }
                }
            }
        };

        Ok(TargetHandle {
            index: index as u32,
            generation: self.slots[index].generation,
        })
    }

    /// Returns a target to the pool. The handle (and any copy of it) becomes stale.
    pub fn release(&mut self, device: &mut dyn RenderDevice, handle: TargetHandle) -> Result<()> {
        self.get(handle)?;
        self.sources.retain(|h| *h != handle);
        if self.destination == Some(handle) {
            self.destination = None;
        }

        let extent = self.extent;
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        if let SlotState::Acquired(target) = std::mem::replace(&mut slot.state, SlotState::Vacant) {
            if target.matches(extent, target.format) {
                slot.state = SlotState::Free(target);
            } else {
                target.destroy(device);
            }
        }
        Ok(())
    }

    pub fn get(&self, handle: TargetHandle) -> Result<&RenderTarget> {
        match self.slots.get(handle.index as usize) {
            Some(Slot {
                generation,
                state: SlotState::Acquired(target),
            }) if *generation == handle.generation => Ok(target),
            _ => Err(RenderError::StaleTarget(handle)),
        }
    }

    /// Marks `handle` as read by the current pass.
    pub fn bind_source(&mut self, handle: TargetHandle) -> Result<()> {
        self.get(handle)?;
        if self.destination == Some(handle) {
            return Err(RenderError::TargetAliasing(handle));
        }
        if !self.sources.contains(&handle) {
            self.sources.push(handle);
        }
        Ok(())
    }

    /// Marks `handle` as written by the current pass.
    pub fn bind_destination(&mut self, handle: TargetHandle) -> Result<()> {
        self.get(handle)?;
        if self.sources.contains(&handle) {
            return Err(RenderError::TargetAliasing(handle));
        }
        self.destination = Some(handle);
        Ok(())
    }

    /// Clears the current pass's source and destination bindings.
    pub fn unbind_all(&mut self) {
        self.sources.clear();
        self.destination = None;
    }

    /// Adopts a new extent. Free targets of the old extent are destroyed now;
    /// acquired ones are destroyed when released.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) {
        if self.extent == (width, height) {
            return;
        }
        log::debug!(
            "render target extent {}x{} -> {width}x{height}",
            self.extent.0,
            self.extent.1
        );
        self.extent = (width, height);
        for slot in &mut self.slots {
            if matches!(&slot.state, SlotState::Free(t) if (t.width, t.height) != (width, height)) {
                if let SlotState::Free(target) = std::mem::replace(&mut slot.state, SlotState::Vacant) {
                    target.destroy(device);
                }
            }
        }
    }

    /// Destroys every target, acquired or not. All outstanding handles turn stale.
    pub fn release_all(&mut self, device: &mut dyn RenderDevice) {
        self.unbind_all();
        for slot in &mut self.slots {
            match std::mem::replace(&mut slot.state, SlotState::Vacant) {
                SlotState::Free(target) | SlotState::Acquired(target) => {
                    slot.generation = slot.generation.wrapping_add(1);
                    target.destroy(device);
                }
                SlotState::Vacant => {}
            }
        }
    }
}
