use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ValidationError, VidwallError};
use crate::Result;

pub const SUPPORTED_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "avif"];

/// Checks that a placeholder exists, has an image extension and starts with a
/// known image signature.
pub fn validate_image(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(VidwallError::Validation(ValidationError::InvalidPath {
            path: path.to_path_buf(),
        }));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase());

    match extension.as_deref() {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext) => {}
        _ => {
            return Err(VidwallError::Validation(ValidationError::UnsupportedImage {
                path: path.to_path_buf(),
            }))
        }
    }

    let mut header = [0u8; 12];
    let bytes_read = File::open(path)
        .and_then(|mut file| file.read(&mut header))
        .map_err(|_| VidwallError::Validation(ValidationError::InvalidPath { path: path.to_path_buf() }))?;

    if has_image_signature(&header[..bytes_read]) {
        Ok(())
    } else {
        Err(VidwallError::Validation(ValidationError::CorruptedImage {
            path: path.to_path_buf(),
        }))
    }
}

fn has_image_signature(header: &[u8]) -> bool {
    match header {
        [0xFF, 0xD8, 0xFF, ..] => true,            // JPEG
        [0x89, b'P', b'N', b'G', ..] => true,      // PNG
        [b'G', b'I', b'F', b'8', ..] => true,      // GIF
        [b'B', b'M', ..] => true,                  // BMP
        [0x49, 0x49, 0x2A, 0x00, ..] => true,      // TIFF little endian
        [0x4D, 0x4D, 0x00, 0x2A, ..] => true,      // TIFF big endian
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => true,
        [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', ..] => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_validate_image() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();

        fs::write(dir.join("offline.jpg"), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        fs::write(dir.join("offline.PNG"), [0x89, b'P', b'N', b'G', 0x0D, 0x0A]).unwrap();
        fs::write(dir.join("notes.txt"), "not an image").unwrap();
        fs::write(dir.join("broken.png"), "plain text").unwrap();

        assert!(validate_image(&dir.join("offline.jpg")).is_ok());
        assert!(validate_image(&dir.join("offline.PNG")).is_ok());

        assert!(matches!(
            validate_image(&dir.join("notes.txt")),
            Err(VidwallError::Validation(ValidationError::UnsupportedImage { .. }))
        ));
        assert!(matches!(
            validate_image(&dir.join("broken.png")),
            Err(VidwallError::Validation(ValidationError::CorruptedImage { .. }))
        ));
        assert!(matches!(
            validate_image(&dir.join("missing.jpg")),
            Err(VidwallError::Validation(ValidationError::InvalidPath { .. }))
        ));
        assert!(validate_image(dir).is_err());
    }

    #[test]
    fn test_signatures() {
        assert!(has_image_signature(b"RIFF\x10\x00\x00\x00WEBPVP8 "));
        assert!(has_image_signature(b"\x00\x00\x00\x1cftypavif"));
        assert!(!has_image_signature(b"RIFF\x10\x00\x00\x00WAVE"));
        assert!(!has_image_signature(b""));
    }
}
