//! Render target: a set of color attachments plus an optional depth attachment
//!
//! Creating a render target allocates one RTV slot per color attachment and
//! one DSV slot for the depth attachment, and writes the attachment views
//! into them. The slots are released when the render target is dropped.

use std::sync::{Arc, Mutex};

use crate::backend::{AttachmentView, DescriptorHandle, GraphicsBackend, RenderTargetBinding};
use crate::error::{Error, Result};
use crate::memory::{DescriptorRange, HeapAllocator};
use crate::pipeline::PassFormatKey;
use crate::resource::{next_object_id, Resource, Texture};
use crate::types::{Format, TextureUsage, MAX_RENDER_TARGETS};
use crate::hal_warn;

/// One attachment: a single mip/layer of a texture
#[derive(Debug, Clone)]
pub struct RenderTargetAttachment {
    pub texture: Arc<Texture>,
    pub mip: u32,
    pub layer: u32,
}

impl RenderTargetAttachment {
    pub fn new(texture: Arc<Texture>) -> Self {
        Self { texture, mip: 0, layer: 0 }
    }

    pub fn subresource(&self) -> u32 {
        self.texture.subresource_index(self.mip, self.layer)
    }

    fn extent(&self) -> (u32, u32) {
        let desc = self.texture.desc();
        ((desc.width >> self.mip).max(1), (desc.height >> self.mip).max(1))
    }

    fn view(&self) -> AttachmentView {
        AttachmentView {
            texture: self.texture.native().clone(),
            format: self.texture.desc().format,
            mip: self.mip,
            layer: self.layer,
        }
    }
}

/// Render target creation parameters
#[derive(Debug, Clone, Default)]
pub struct RenderTargetDesc {
    pub colors: Vec<RenderTargetAttachment>,
    pub depth: Option<RenderTargetAttachment>,
}

/// Attachments bound together for drawing
pub struct RenderTarget {
    id: u64,
    colors: Vec<RenderTargetAttachment>,
    depth: Option<RenderTargetAttachment>,
    width: u32,
    height: u32,
    sample_count: u32,
    rtv_range: Option<DescriptorRange>,
    dsv_slot: Option<u32>,
    binding: RenderTargetBinding,
    backend: Arc<dyn GraphicsBackend>,
    rtv_heap: Arc<Mutex<HeapAllocator>>,
    dsv_heap: Arc<Mutex<HeapAllocator>>,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("id", &self.id)
            .field("colors", &self.colors.len())
            .field("depth", &self.depth.is_some())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

fn validate(desc: &RenderTargetDesc) -> Result<(u32, u32, u32)> {
    if desc.colors.is_empty() && desc.depth.is_none() {
        return Err(Error::InvalidResource("render target has no attachment".to_string()));
    }
    if desc.colors.len() > MAX_RENDER_TARGETS {
        return Err(Error::InvalidResource(format!(
            "{} color attachments (max {})",
            desc.colors.len(), MAX_RENDER_TARGETS
        )));
    }

    let mut shape: Option<(u32, u32, u32)> = None;
    let attachments = desc.colors.iter().map(|a| (a, false)).chain(desc.depth.iter().map(|a| (a, true)));

    for (attachment, is_depth) in attachments {
        let texture = attachment.texture.desc();
        if attachment.mip >= texture.mip_levels || attachment.layer >= texture.array_layers {
            return Err(Error::InvalidResource(format!(
                "attachment mip {} layer {} out of range",
                attachment.mip, attachment.layer
            )));
        }

        let required = if is_depth { TextureUsage::DEPTH_STENCIL } else { TextureUsage::RENDER_TARGET };
        if !texture.usage.contains(required) {
            return Err(Error::InvalidResource(format!(
                "attachment texture lacks {:?} usage",
                required
            )));
        }

        let (width, height) = attachment.extent();
        match shape {
            None => shape = Some((width, height, texture.sample_count)),
            Some(expected) if expected != (width, height, texture.sample_count) => {
                return Err(Error::InvalidResource(format!(
                    "attachment {}x{} ({} samples) does not match {}x{} ({} samples)",
                    width, height, texture.sample_count, expected.0, expected.1, expected.2
                )));
            }
            Some(_) => {}
        }
    }

    shape.ok_or_else(|| Error::InvalidResource("render target has no attachment".to_string()))
}

impl RenderTarget {
    /// Create a render target and write its attachment views
    ///
    /// # Errors
    ///
    /// `InvalidResource` for mismatched attachments, `ResourceExhausted` when
    /// the RTV or DSV heap is full.
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        rtv_heap: Arc<Mutex<HeapAllocator>>,
        dsv_heap: Arc<Mutex<HeapAllocator>>,
        desc: RenderTargetDesc,
    ) -> Result<Self> {
        let (width, height, sample_count) = validate(&desc)?;

        let mut target = Self {
            id: next_object_id(),
            colors: desc.colors,
            depth: desc.depth,
            width,
            height,
            sample_count,
            rtv_range: None,
            dsv_slot: None,
            binding: RenderTargetBinding {
                colors: Vec::new(),
                depth: None,
                width,
                height,
            },
            backend,
            rtv_heap,
            dsv_heap,
        };

        // Slots are freed by Drop if anything below fails
        if !target.colors.is_empty() {
            let count = target.colors.len() as u32;
            let mut heap = target.rtv_heap.lock()?;
            let offset = heap.allocate(count).ok_or_else(|| {
                Error::ResourceExhausted(format!("RTV heap cannot fit {} more slot(s)", count))
            })?;
            target.rtv_range = Some(DescriptorRange { offset, count });

            for (i, attachment) in target.colors.iter().enumerate() {
                let handle = heap.handle(offset + i as u32).ok_or_else(|| {
                    Error::InitializationFailed("RTV heap has no native heap".to_string())
                })?;
                target.backend.write_attachment_view(&handle.heap, handle.index, &attachment.view())?;
                target.binding.colors.push(handle);
            }
        }

        if let Some(attachment) = &target.depth {
            let mut heap = target.dsv_heap.lock()?;
            let slot = heap
                .allocate(1)
                .ok_or_else(|| Error::ResourceExhausted("DSV heap is full".to_string()))?;
            target.dsv_slot = Some(slot);

            let handle = heap
                .handle(slot)
                .ok_or_else(|| Error::InitializationFailed("DSV heap has no native heap".to_string()))?;
            target.backend.write_attachment_view(&handle.heap, handle.index, &attachment.view())?;
            target.binding.depth = Some(handle);
        }

        Ok(target)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn colors(&self) -> &[RenderTargetAttachment] {
        &self.colors
    }

    pub fn depth(&self) -> Option<&RenderTargetAttachment> {
        self.depth.as_ref()
    }

    pub fn color_formats(&self) -> Vec<Format> {
        self.colors.iter().map(|a| a.texture.desc().format).collect()
    }

    /// Depth format (`Format::Unknown` without depth attachment)
    pub fn depth_format(&self) -> Format {
        self.depth
            .as_ref()
            .map(|a| a.texture.desc().format)
            .unwrap_or(Format::Unknown)
    }

    /// Formats pipelines drawing into this target must be compatible with
    pub fn pass_format_key(&self) -> PassFormatKey {
        PassFormatKey {
            color_formats: self.color_formats(),
            depth_format: self.depth_format(),
            sample_count: self.sample_count,
        }
    }

    /// Native binding (RTV/DSV handles)
    pub fn binding(&self) -> &RenderTargetBinding {
        &self.binding
    }

    pub fn color_handle(&self, index: usize) -> Option<&DescriptorHandle> {
        self.binding.colors.get(index)
    }

    pub fn depth_handle(&self) -> Option<&DescriptorHandle> {
        self.binding.depth.as_ref()
    }

    /// Color texture subresources as tracked resources
    pub(crate) fn color_subresources(&self) -> Vec<(Arc<dyn Resource>, u32)> {
        self.colors
            .iter()
            .map(|a| (a.texture.clone() as Arc<dyn Resource>, a.subresource()))
            .collect()
    }

    /// Depth texture subresource as a tracked resource
    pub(crate) fn depth_subresource(&self) -> Option<(Arc<dyn Resource>, u32)> {
        self.depth
            .as_ref()
            .map(|a| (a.texture.clone() as Arc<dyn Resource>, a.subresource()))
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        for handle in self.binding.colors.iter().chain(self.binding.depth.iter()) {
            self.backend.release_attachment_view(&handle.heap, handle.index);
        }

        if let Some(range) = self.rtv_range.take() {
            match self.rtv_heap.lock() {
                Ok(mut heap) => {
                    let _ = heap.free(range.offset, range.count);
                }
                Err(_) => hal_warn!("quasar::RenderTarget", "RTV heap lock poisoned, slots leaked"),
            }
        }
        if let Some(slot) = self.dsv_slot.take() {
            match self.dsv_heap.lock() {
                Ok(mut heap) => {
                    let _ = heap.free(slot, 1);
                }
                Err(_) => hal_warn!("quasar::RenderTarget", "DSV heap lock poisoned, slot leaked"),
            }
        }
    }
}

#[cfg(test)]
#[path = "render_target_tests.rs"]
mod tests;
