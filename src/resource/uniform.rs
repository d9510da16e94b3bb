//! The cell-aligned uniform buffer (§3 "Uniform Buffer (cell-aligned)",
//! §4.3 "per-material the host-side cell layout").
//!
//! A host-side CPU mirror is divided into `N` cells, each at least
//! `cell_size` bytes and aligned up to the device's minimum uniform buffer
//! offset alignment. Callers append typed values into a cell through a
//! cursor; `upload` pushes the whole CPU mirror to the GPU buffer in one
//! `write_buffer` call. This is how per-material dynamic offsets are
//! supplied to bind groups.

use bytemuck::Pod;

use crate::context::Context;
use crate::registry::{Resource, ResourceHeader};
use crate::util::div_ceil;

fn align_up(value: u64, alignment: u64) -> u64 {
    div_ceil(value as u32, alignment as u32) as u64 * alignment
}

#[derive(Debug, Clone, Copy, Default)]
struct CellCursor {
    start: u64,
    current: u64,
}

pub struct UniformCellAllocator {
    header: ResourceHeader,
    cpu_data: Vec<u8>,
    gpu_buffer: wgpu::Buffer,
    dynamic_alignment: u64,
    cell_count: usize,
    cursors: Vec<CellCursor>,
}

impl Resource for UniformCellAllocator {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ResourceHeader {
        &mut self.header
    }
}

impl UniformCellAllocator {
    pub fn new(context: &Context, name: &str, cell_size: u64, cell_count: usize) -> Self {
        let alignment = context.limits.min_uniform_buffer_offset_alignment as u64;
        let dynamic_alignment = align_up(cell_size.max(1), alignment);

        let total_size = dynamic_alignment * cell_count as u64;

        let gpu_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: total_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let cursors = (0..cell_count)
            .map(|index| {
                let start = dynamic_alignment * index as u64;
                CellCursor { start, current: start }
            })
            .collect();

        Self {
            header: ResourceHeader::new(name, "uniform_cell_allocator"),
            cpu_data: vec![0u8; total_size as usize],
            gpu_buffer,
            dynamic_alignment,
            cell_count,
            cursors,
        }
    }

    pub fn dynamic_alignment(&self) -> u64 {
        self.dynamic_alignment
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// The dynamic offset to bind for a material occupying `cell_index`.
    pub fn dynamic_offset(&self, cell_index: usize) -> u32 {
        (cell_index as u64 * self.dynamic_alignment) as u32
    }

    /// Rewind a cell's write cursor back to its start, for a new frame's
    /// worth of appends.
    pub fn reset_cell(&mut self, cell_index: usize) {
        let cursor = &mut self.cursors[cell_index];
        cursor.current = cursor.start;
    }

    /// Append a POD value at the cell's current cursor, returning the
    /// offset of the write relative to the cell start. Panics if the
    /// append would cross into the next cell.
    pub fn append<T: Pod>(&mut self, cell_index: usize, value: T) -> u64 {
        let size = std::mem::size_of::<T>() as u64;
        let cursor = &mut self.cursors[cell_index];
        let offset_in_cell = cursor.current - cursor.start;

        assert!(
            offset_in_cell + size <= self.dynamic_alignment,
            "uniform cell {cell_index} overflowed: {offset_in_cell} + {size} > {}",
            self.dynamic_alignment
        );

        let write_at = cursor.current as usize;
        self.cpu_data[write_at..write_at + size as usize].copy_from_slice(bytemuck::bytes_of(&value));
        cursor.current += size;

        offset_in_cell
    }

    /// Write raw bytes at a fixed offset within a cell, for callers (e.g.
    /// `shader_reflect::ExposedValues::write_dirty`) that address fields by
    /// their reflected offset rather than by sequential append.
    pub fn write_field(&mut self, cell_index: usize, offset_in_cell: u64, bytes: &[u8]) {
        let cursor = &self.cursors[cell_index];
        assert!(
            offset_in_cell + bytes.len() as u64 <= self.dynamic_alignment,
            "uniform cell {cell_index} field write overflowed: {offset_in_cell} + {} > {}",
            bytes.len(),
            self.dynamic_alignment
        );
        let write_at = (cursor.start + offset_in_cell) as usize;
        self.cpu_data[write_at..write_at + bytes.len()].copy_from_slice(bytes);
    }

    /// Push the entire CPU mirror to the GPU buffer.
    pub fn upload(&self, context: &Context) {
        context.queue.write_buffer(&self.gpu_buffer, 0, &self.cpu_data);
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.gpu_buffer
    }

    pub fn binding_size(&self) -> u64 {
        self.dynamic_alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_alignment() {
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
