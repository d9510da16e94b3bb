//! GPU buffer resource (§3 "Buffer").

use wgpu::util::DeviceExt;

use crate::context::Context;
use crate::registry::{Resource, ResourceHeader};

/// A typed blob on the GPU. `resize` destroys and recreates the
/// allocation, preserving the name; `set_content`/`get_content` copy
/// through a staging buffer.
pub struct Buffer {
    header: ResourceHeader,
    pub handle: wgpu::Buffer,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

impl Resource for Buffer {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ResourceHeader {
        &mut self.header
    }
}

impl Buffer {
    pub fn new(context: &Context, name: &str, size: u64, usage: wgpu::BufferUsages) -> Self {
        let handle = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size,
            usage,
            mapped_at_creation: false,
        });

        Self {
            header: ResourceHeader::new(name, "buffer"),
            handle,
            size,
            usage,
        }
    }

    pub fn with_data(context: &Context, name: &str, data: &[u8], usage: wgpu::BufferUsages) -> Self {
        let handle = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(name),
                contents: data,
                usage,
            });

        Self {
            header: ResourceHeader::new(name, "buffer"),
            size: data.len() as u64,
            usage,
            handle,
        }
    }

    /// Destroy and recreate the allocation at `new_size`, optionally
    /// seeding it with `new_data`. The name and usage flags are preserved.
    /// Intended to be passed as the rebuild closure to `Registry::resize`.
    pub fn recreate(context: &Context, old: Self, new_size: u64, new_data: Option<&[u8]>) -> Self {
        let name = old.header().name().to_string();
        drop(old);

        match new_data {
            Some(data) => {
                debug_assert_eq!(data.len() as u64, new_size);
                Self::with_data(context, &name, data, wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC)
            }
            None => Self::new(context, &name, new_size, wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC),
        }
    }

    pub fn set_content(&self, context: &Context, data: &[u8]) {
        assert!(self.usage.contains(wgpu::BufferUsages::COPY_DST));
        context.queue.write_buffer(&self.handle, 0, data);
    }

    /// Read the buffer's full contents back to the host via a staging
    /// buffer. The caller's buffer must have been created with
    /// `COPY_SRC`; this is the one suspension point in the resource layer
    /// (§5) besides fences and presentation.
    pub fn get_content(&self, context: &Context) -> Vec<u8> {
        assert!(self.usage.contains(wgpu::BufferUsages::COPY_SRC));

        let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging readback"),
            size: self.size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer readback"),
            });
        encoder.copy_buffer_to_buffer(&self.handle, 0, &staging, 0, self.size);
        context.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        context.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .expect("map_async callback dropped without firing")
            .expect("buffer readback mapping failed");

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        data
    }
}
