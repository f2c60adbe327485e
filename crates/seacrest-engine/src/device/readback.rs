use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};

use super::backend::ResourceId;
use super::command::TextureCopyLayout;
use super::error::{GpuError, GpuResult};

/// Back-buffer copy waiting for its frame's fence.
#[derive(Debug)]
pub(crate) struct PendingReadback {
    pub path: PathBuf,
    pub buffer: ResourceId,
    pub layout: TextureCopyLayout,
    /// Fence value of the frame that recorded the copy.
    pub fence: u64,
}

/// Removes the per-row padding a texture copy leaves in a linear buffer.
pub(crate) fn strip_row_pitch(data: &[u8], layout: &TextureCopyLayout) -> Vec<u8> {
    let row = (layout.width * layout.format.bytes_per_pixel()) as usize;
    let pitch = layout.row_pitch as usize;
    data.chunks(pitch)
        .take(layout.height as usize)
        .flat_map(|line| &line[..row])
        .copied()
        .collect()
}

pub(crate) fn write_png(path: &Path, layout: &TextureCopyLayout, pixels: Vec<u8>) -> GpuResult<()> {
    let image = RgbaImage::from_raw(layout.width, layout.height, pixels).ok_or_else(|| {
        GpuError::Screenshot(format!(
            "pixel data does not match {}x{}",
            layout.width, layout.height
        ))
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| GpuError::Screenshot(format!("{}: {e}", parent.display())))?;
    }

    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| GpuError::Screenshot(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::Format;

    #[test]
    fn padding_is_dropped() {
        let layout = TextureCopyLayout::new(2, 2, Format::Rgba8Unorm);
        let mut data = vec![0u8; layout.size() as usize];
        data[..8].copy_from_slice(&[1; 8]);
        data[256..264].copy_from_slice(&[2; 8]);

        let pixels = strip_row_pitch(&data, &layout);
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..8], &[1; 8]);
        assert_eq!(&pixels[8..], &[2; 8]);
    }

    #[test]
    fn png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots/frame.png");
        let layout = TextureCopyLayout::new(1, 1, Format::Rgba8Unorm);
        write_png(&path, &layout, vec![0x16, 0x16, 0x16, 0xff]).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.into_raw(), vec![0x16, 0x16, 0x16, 0xff]);
    }

    #[test]
    fn wrong_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TextureCopyLayout::new(2, 2, Format::Rgba8Unorm);
        assert!(matches!(
            write_png(&dir.path().join("x.png"), &layout, vec![0; 4]),
            Err(GpuError::Screenshot(_))
        ));
    }
}
