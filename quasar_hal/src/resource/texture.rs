//! Texture resource

use std::sync::Arc;

use crate::backend::{GraphicsBackend, NativeResource, NativeTexture};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceId, SubresourceStates};
use crate::types::{Format, ResourceState, TextureUsage, TEXTURE_ROW_PITCH_ALIGNMENT};

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            format: Format::R8G8B8A8_UNORM,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            usage: TextureUsage::SHADER_READ,
        }
    }
}

impl TextureDesc {
    /// Resting state derived from the usage flags
    ///
    /// Priority: shader read, render target, depth stencil, readback.
    pub fn default_state(&self) -> ResourceState {
        if self.usage.contains(TextureUsage::SHADER_READ) {
            ResourceState::SHADER_RESOURCE
        } else if self.usage.contains(TextureUsage::RENDER_TARGET) {
            ResourceState::RENDER_TARGET
        } else if self.usage.contains(TextureUsage::DEPTH_STENCIL) {
            ResourceState::DEPTH_WRITE
        } else if self.usage.contains(TextureUsage::READBACK) {
            ResourceState::COPY_DEST
        } else {
            ResourceState::COMMON
        }
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidResource(format!(
                "texture size {}x{} must not be empty",
                self.width, self.height
            )));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(Error::InvalidResource(
                "texture needs at least one mip level and one array layer".to_string(),
            ));
        }
        if self.format == Format::Unknown {
            return Err(Error::InvalidResource("texture format is Unknown".to_string()));
        }
        if !matches!(self.sample_count, 1 | 2 | 4 | 8) {
            return Err(Error::InvalidResource(format!(
                "unsupported sample count {}",
                self.sample_count
            )));
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL) != self.format.is_depth() {
            return Err(Error::InvalidResource(format!(
                "depth stencil usage and format {:?} do not match",
                self.format
            )));
        }
        Ok(())
    }
}

/// Rectangle of one subresource, the unit of buffer <-> texture copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureRegion {
    pub mip: u32,
    pub layer: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    /// Bytes of one row of texels
    pub fn row_size(&self, format: Format) -> u64 {
        self.width as u64 * format.size_in_bytes() as u64
    }

    /// Row pitch of the region laid out in a buffer
    pub fn row_pitch(&self, format: Format) -> u64 {
        self.row_size(format).div_ceil(TEXTURE_ROW_PITCH_ALIGNMENT) * TEXTURE_ROW_PITCH_ALIGNMENT
    }

    /// Bytes the region covers in a buffer (last row unpadded)
    pub fn buffer_size(&self, format: Format) -> u64 {
        if self.height == 0 {
            return 0;
        }
        self.row_pitch(format) * (self.height as u64 - 1) + self.row_size(format)
    }
}

/// GPU texture with per-subresource state tracking
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    desc: TextureDesc,
    native: Arc<dyn NativeTexture>,
    default_state: ResourceState,
    states: SubresourceStates,
}

impl Texture {
    pub fn new(backend: &dyn GraphicsBackend, desc: TextureDesc) -> Result<Self> {
        desc.validate()?;
        let default_state = desc.default_state();
        let native = backend.create_texture(&desc, default_state)?;

        Ok(Self {
            id: ResourceId::next(),
            states: SubresourceStates::new(desc.subresource_count(), default_state),
            desc,
            native,
            default_state,
        })
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn native(&self) -> &Arc<dyn NativeTexture> {
        &self.native
    }

    /// Subresource index of (`mip`, `layer`)
    pub fn subresource_index(&self, mip: u32, layer: u32) -> u32 {
        mip + layer * self.desc.mip_levels
    }

    /// Width and height of a mip level
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        let shift = mip.min(31);
        ((self.desc.width >> shift).max(1), (self.desc.height >> shift).max(1))
    }

    /// Whole mip 0 of layer 0
    pub fn full_region(&self) -> TextureRegion {
        TextureRegion {
            width: self.desc.width,
            height: self.desc.height,
            ..Default::default()
        }
    }

    /// Check that `region` lies inside one existing subresource
    pub fn validate_region(&self, region: &TextureRegion) -> Result<()> {
        if region.mip >= self.desc.mip_levels || region.layer >= self.desc.array_layers {
            return Err(Error::InvalidResource(format!(
                "mip {} / layer {} out of range ({} mips, {} layers)",
                region.mip, region.layer, self.desc.mip_levels, self.desc.array_layers
            )));
        }
        if region.width == 0 || region.height == 0 {
            return Err(Error::InvalidResource("empty texture region".to_string()));
        }
        let (width, height) = self.mip_extent(region.mip);
        let right = region.x as u64 + region.width as u64;
        let bottom = region.y as u64 + region.height as u64;
        if right > width as u64 || bottom > height as u64 {
            return Err(Error::InvalidResource(format!(
                "region {}x{} at ({}, {}) exceeds mip {} extent {}x{}",
                region.width, region.height, region.x, region.y, region.mip, width, height
            )));
        }
        Ok(())
    }
}

impl Resource for Texture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn default_state(&self) -> ResourceState {
        self.default_state
    }

    fn subresource_count(&self) -> u32 {
        self.desc.subresource_count()
    }

    fn current_state(&self, subresource: u32) -> ResourceState {
        self.states.get(subresource)
    }

    fn set_current_state(&self, subresource: u32, state: ResourceState) {
        self.states.set(subresource, state);
    }

    fn native_resource(&self) -> Option<NativeResource> {
        Some(NativeResource::Texture(self.native.clone()))
    }
}

#[cfg(test)]
#[path = "texture_tests.rs"]
mod tests;
