//! Decoded-record to `ash::vk` struct conversions shared by the consumer
//! and the dump engine.

use ash::vk;
use vkrd_core::ObjectTable;
use vkrd_protocol::calls::{BufferMemoryBarrier, ClearValue, ImageMemoryBarrier, Rect2d};

use crate::remap;

pub(crate) fn rect2d(r: &Rect2d) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: r.offset.x,
            y: r.offset.y,
        },
        extent: vk::Extent2D {
            width: r.width,
            height: r.height,
        },
    }
}

pub(crate) fn clear_value(c: &ClearValue) -> vk::ClearValue {
    match *c {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::ColorInt(int32) => vk::ClearValue {
            color: vk::ClearColorValue { int32 },
        },
        ClearValue::ColorUint(uint32) => vk::ClearValue {
            color: vk::ClearColorValue { uint32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

pub(crate) fn viewport(v: &[f32; 6]) -> vk::Viewport {
    vk::Viewport {
        x: v[0],
        y: v[1],
        width: v[2],
        height: v[3],
        min_depth: v[4],
        max_depth: v[5],
    }
}

pub(crate) fn image_barrier<'a>(
    table: &ObjectTable,
    b: &ImageMemoryBarrier,
) -> vk::ImageMemoryBarrier<'a> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::from_raw(b.src_access_mask))
        .dst_access_mask(vk::AccessFlags::from_raw(b.dst_access_mask))
        .old_layout(vk::ImageLayout::from_raw(b.old_layout))
        .new_layout(vk::ImageLayout::from_raw(b.new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(remap::image(table, b.image))
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::from_raw(b.aspect_mask))
                .base_mip_level(b.base_mip_level)
                .level_count(b.level_count)
                .base_array_layer(b.base_array_layer)
                .layer_count(b.layer_count),
        )
}

pub(crate) fn buffer_barrier<'a>(
    table: &ObjectTable,
    b: &BufferMemoryBarrier,
) -> vk::BufferMemoryBarrier<'a> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::from_raw(b.src_access_mask))
        .dst_access_mask(vk::AccessFlags::from_raw(b.dst_access_mask))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(remap::buffer(table, b.buffer))
        .offset(b.offset)
        .size(b.size)
}
