// Staging uploads - host data into device-local buffers and images
//
// Every transfer goes through a host-visible staging buffer and a one-shot
// command buffer. The graphics queue is drained before the staging buffer is
// freed, so uploads are synchronous for the caller.

use super::buffer::{self, GpuBuffer, GpuImage, ImageDesc};
use super::capability;
use super::error::{OrRelease, RenderError, RenderResult, VkResultExt};
use super::VulkanDevice;
use crate::assets::{level_len, TextureAsset};
use ash::vk;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;
const TEXTURE_CHANNELS: u32 = 4;

/// Command buffer recorded once, submitted, and waited on
pub struct OneShotCommands<'a> {
    device: &'a VulkanDevice,
    pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl<'a> OneShotCommands<'a> {
    pub fn begin(device: &'a VulkanDevice, pool: vk::CommandPool) -> RenderResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .vk_context("Failed to allocate one-shot command buffer")?[0];

        let commands = Self { device, pool, cmd };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.device.begin_command_buffer(cmd, &begin_info) }
            .vk_context("Failed to begin one-shot command buffer")?;

        Ok(commands)
    }

    /// Submit on the graphics queue and block until the queue is idle
    pub fn finish(self) -> RenderResult<()> {
        let device = &self.device.device;
        unsafe {
            device
                .end_command_buffer(self.cmd)
                .vk_context("Failed to end one-shot command buffer")?;

            let command_buffers = [self.cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )
                .vk_context("Failed to submit one-shot commands")?;
            device
                .queue_wait_idle(self.device.graphics_queue)
                .vk_context("Failed to wait for graphics queue")?;
        }
        Ok(())
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &[self.cmd]);
        }
    }
}

/// Upload `data` into a new device-local buffer
pub fn upload_buffer<T: bytemuck::Pod>(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> RenderResult<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as vk::DeviceSize;

    let staging = create_staging(device, bytes)?;

    let result = buffer::create_buffer(
        device,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .and_then(|target| {
        copy_buffer(device, pool, &staging, &target, size).or_release(|| target.destroy(&device.device))?;
        Ok(target)
    });

    staging.destroy(&device.device);
    result
}

fn copy_buffer(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: vk::DeviceSize,
) -> RenderResult<()> {
    let commands = OneShotCommands::begin(device, pool)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    unsafe {
        device
            .device
            .cmd_copy_buffer(commands.cmd, src.buffer, dst.buffer, &[region]);
    }
    commands.finish()
}

/// A sampled texture: image, view and sampler
#[derive(Debug, Clone, Copy, Default)]
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
        }
        self.image.destroy(device);
    }
}

/// Placement of one mip level inside a texture's pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipRegion {
    pub level: u32,
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

/// Levels stored back to back, each offset the sum of the previous levels' sizes
///
/// `None` when the total size does not fit in a u64.
pub fn mip_regions(width: u32, height: u32, channels: u32, levels: u32) -> Option<Vec<MipRegion>> {
    let mut offset = 0u64;
    let mut regions = Vec::new();
    for level in 0..levels.max(1) {
        let size = level_len(width, height, channels, level)?;
        regions.push(MipRegion {
            level,
            offset,
            width: width.checked_shr(level).unwrap_or(0).max(1),
            height: height.checked_shr(level).unwrap_or(0).max(1),
            size,
        });
        offset = offset.checked_add(size)?;
    }
    Some(regions)
}

/// Upload a decoded texture with all of its stored mip levels
pub fn upload_texture(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    asset: &TextureAsset,
) -> RenderResult<Texture> {
    let unsupported = |reason: String| RenderError::UnsupportedTexture {
        name: asset.name.clone(),
        reason,
    };

    if asset.channels != TEXTURE_CHANNELS {
        return Err(unsupported(format!(
            "{} channels, expected {}",
            asset.channels, TEXTURE_CHANNELS
        )));
    }

    let features = vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::TRANSFER_DST;
    capability::find_supported_format(
        &[TEXTURE_FORMAT],
        vk::ImageTiling::OPTIMAL,
        features,
        |format| unsafe {
            device
                .instance
                .get_physical_device_format_properties(device.physical_device, format)
        },
    )
    .ok_or_else(|| RenderError::UnsupportedFormat(vec![TEXTURE_FORMAT]))?;

    let mip_levels = asset.mip_levels.max(1);
    let regions = mip_regions(asset.width, asset.height, asset.channels, mip_levels)
        .ok_or_else(|| unsupported(format!("{}x{} is too large", asset.width, asset.height)))?;
    let required = regions.last().map_or(0, |r| r.offset + r.size);
    if (asset.pixels.len() as u64) < required {
        return Err(unsupported(format!(
            "{} bytes of pixel data, {} levels need {}",
            asset.pixels.len(),
            mip_levels,
            required
        )));
    }

    let staging = create_staging(device, &asset.pixels)?;

    let result = upload_texture_image(device, pool, asset, &staging, &regions);
    staging.destroy(&device.device);
    let mut texture = Texture {
        image: result?,
        ..Default::default()
    };

    create_view_and_sampler(device, &mut texture, mip_levels)
        .or_release(|| texture.destroy(&device.device))?;

    log::info!(
        "Uploaded texture '{}' ({}x{}, {} mip levels)",
        asset.name,
        asset.width,
        asset.height,
        mip_levels
    );

    Ok(texture)
}

fn create_view_and_sampler(device: &VulkanDevice, texture: &mut Texture, mip_levels: u32) -> RenderResult<()> {
    texture.view = buffer::create_image_view(
        device,
        texture.image.image,
        TEXTURE_FORMAT,
        vk::ImageAspectFlags::COLOR,
        mip_levels,
    )?;
    texture.sampler = create_sampler(device, mip_levels)?;
    Ok(())
}

fn upload_texture_image(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    asset: &TextureAsset,
    staging: &GpuBuffer,
    regions: &[MipRegion],
) -> RenderResult<GpuImage> {
    let levels = regions.len() as u32;
    let image = buffer::create_image(
        device,
        &ImageDesc {
            width: asset.width,
            height: asset.height,
            mip_levels: levels,
            format: TEXTURE_FORMAT,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        },
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let copies: Vec<vk::BufferImageCopy> = regions
        .iter()
        .map(|region| vk::BufferImageCopy {
            buffer_offset: region.offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: region.level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            },
        })
        .collect();

    copy_to_image(device, pool, staging, &image, &copies).or_release(|| image.destroy(&device.device))?;
    Ok(image)
}

fn copy_to_image(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    staging: &GpuBuffer,
    image: &GpuImage,
    copies: &[vk::BufferImageCopy],
) -> RenderResult<()> {
    let levels = image.mip_levels;
    let commands = OneShotCommands::begin(device, pool)?;
    transition_layout(
        device,
        commands.cmd,
        image.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        levels,
    );
    unsafe {
        device.device.cmd_copy_buffer_to_image(
            commands.cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            copies,
        );
    }
    transition_layout(
        device,
        commands.cmd,
        image.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        levels,
    );
    commands.finish()
}

fn transition_layout(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    levels: u32,
) {
    let (src_access, dst_access, src_stage, dst_stage) = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

    unsafe {
        device.device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn create_sampler(device: &VulkanDevice, mip_levels: u32) -> RenderResult<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .mip_lod_bias(0.0)
        .anisotropy_enable(true)
        .max_anisotropy(device.properties.limits.max_sampler_anisotropy)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .vk_context("Failed to create texture sampler")
}

fn create_staging(device: &VulkanDevice, bytes: &[u8]) -> RenderResult<GpuBuffer> {
    let staging = buffer::create_buffer(
        device,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    if let Err(e) = buffer::write_mapped(device, &staging, bytes) {
        staging.destroy(&device.device);
        return Err(e);
    }

    Ok(staging)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_covers_whole_image() {
        let regions = mip_regions(4, 4, 4, 1).unwrap();
        assert_eq!(
            regions,
            vec![MipRegion {
                level: 0,
                offset: 0,
                width: 4,
                height: 4,
                size: 64,
            }]
        );
    }

    #[test]
    fn level_offsets_sum_previous_level_sizes() {
        let regions = mip_regions(8, 4, 4, 4).unwrap();
        let dims: Vec<_> = regions.iter().map(|r| (r.width, r.height)).collect();
        assert_eq!(dims, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);

        let offsets: Vec<_> = regions.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 128, 160, 168]);

        for pair in regions.windows(2) {
            assert_eq!(pair[1].offset, pair[0].offset + pair[0].size);
        }
    }

    #[test]
    fn zero_levels_is_treated_as_one() {
        assert_eq!(mip_regions(2, 2, 4, 0).unwrap().len(), 1);
    }

    #[test]
    fn oversized_textures_have_no_layout() {
        assert_eq!(mip_regions(u32::MAX, u32::MAX, 4, 1), None);
        assert_eq!(mip_regions(u32::MAX, u32::MAX, 4, 32), None);
    }
}
