// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU helpers
//!
//! - Dimension caching for reusable buffers
//! - Row padding for texture-to-buffer copies
//! - Async buffer readback

use crate::constants::COPY_ROW_ALIGNMENT;

/// Cached resource dimensions - avoids reallocation when dimensions match
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if dimensions have changed and need update
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

}

/// Bytes per row of a texture copy, rounded up to the copy alignment
#[inline]
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    (width * bytes_per_pixel).next_multiple_of(COPY_ROW_ALIGNMENT)
}

/// Map a `MAP_READ` buffer, wait for the device and copy its contents out
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| format!("Failed to wait for GPU: {:?}", e))?;

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Drop per-row padding from a texture readback
pub fn strip_row_padding(
    data: &[u8],
    row_bytes: usize,
    padded_row_bytes: usize,
    rows: usize,
) -> Vec<u8> {
    if row_bytes == padded_row_bytes {
        return data[..row_bytes * rows].to_vec();
    }
    data.chunks(padded_row_bytes)
        .take(rows)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_dimensions() {
        assert!(CachedDimensions::default().needs_update(640, 480));

        let dims = CachedDimensions::new(640, 480);
        assert!(!dims.needs_update(640, 480));
        assert!(dims.needs_update(1280, 720));
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(16, 16), 256);
        assert_eq!(padded_bytes_per_row(1, 16), 256);
        assert_eq!(padded_bytes_per_row(17, 16), 512);
    }

    #[test]
    fn test_strip_row_padding() {
        let data = [1u8, 2, 0, 0, 3, 4, 0, 0];
        assert_eq!(strip_row_padding(&data, 2, 4, 2), vec![1, 2, 3, 4]);
        assert_eq!(strip_row_padding(&data, 4, 4, 1), vec![1, 2, 0, 0]);
    }
}
