//! Screen-region capture using GDI.

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::CaptureRegion;

/// Captures `region` of the desktop as an RGB image.
///
/// This function:
/// 1. Gets the screen device context
/// 2. Blits the region into a compatible bitmap
/// 3. Reads the bitmap back as top-down 32-bit BGRA
/// 4. Converts BGRA to RGB
#[cfg(windows)]
pub fn capture_region(region: &CaptureRegion) -> Result<RgbImage> {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
        GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
        DIB_RGB_COLORS, SRCCOPY,
    };

    if region.is_empty() {
        return Err(anyhow!("Capture region has zero area"));
    }

    let width = region.width as i32;
    let height = region.height as i32;
    let mut bgra = vec![0u8; region.width as usize * region.height as usize * 4];

    unsafe {
        let screen_dc = GetDC(HWND::default());
        if screen_dc.is_invalid() {
            return Err(anyhow!("GetDC failed"));
        }
        let mem_dc = CreateCompatibleDC(screen_dc);
        let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
        let previous = SelectObject(mem_dc, bitmap);

        let blit = BitBlt(
            mem_dc, 0, 0, width, height, screen_dc, region.x, region.y, SRCCOPY,
        );

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                // Negative height requests a top-down bitmap
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let lines = if blit.is_ok() {
            GetDIBits(
                mem_dc,
                bitmap,
                0,
                region.height,
                Some(bgra.as_mut_ptr() as *mut _),
                &mut info,
                DIB_RGB_COLORS,
            )
        } else {
            0
        };

        SelectObject(mem_dc, previous);
        let _ = DeleteObject(bitmap);
        let _ = DeleteDC(mem_dc);
        ReleaseDC(HWND::default(), screen_dc);

        blit.map_err(|e| anyhow!("BitBlt failed: {}", e))?;
        if lines == 0 {
            return Err(anyhow!("GetDIBits returned no scan lines"));
        }
    }

    bgra_to_rgb(region.width, region.height, &bgra)
}

#[cfg(not(windows))]
pub fn capture_region(region: &CaptureRegion) -> Result<RgbImage> {
    if region.is_empty() {
        return Err(anyhow!("Capture region has zero area"));
    }
    Err(anyhow!("Screen capture is only supported on Windows"))
}

/// Converts a tightly packed BGRA buffer into an RGB image, dropping alpha.
pub fn bgra_to_rgb(width: u32, height: u32, bgra: &[u8]) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 4;
    if bgra.len() < expected {
        return Err(anyhow!(
            "BGRA buffer too small: {} bytes for {}x{}",
            bgra.len(),
            width,
            height
        ));
    }

    let rgb: Vec<u8> = bgra[..expected]
        .chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();

    RgbImage::from_raw(width, height, rgb).ok_or_else(|| anyhow!("Failed to build RGB image"))
}
