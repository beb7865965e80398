use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::VolumeError;

/// Number of header bytes needed to tell every supported format apart.
pub const SNIFF_LEN: usize = 352;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// Single-file NIfTI-1 (`n+1` magic).
    Nifti,
    /// NIfTI-1 header/image pair (`ni1` magic); the image lives in a separate file.
    NiftiPair,
    /// DICOM Part 10 file (`DICM` after the 128-byte preamble).
    Dicom,
    /// gzip stream; the payload has to be inflated before it can be identified.
    Gzip,
    Unknown,
}

/// Detect the volume format from the first bytes of a file.
pub fn detect_format(header: &[u8]) -> VolumeFormat {
    // gzip: magic 1f 8b
    if header.len() >= 2 && header[0] == 0x1F && header[1] == 0x8B {
        return VolumeFormat::Gzip;
    }

    // NIfTI-1: magic at offset 344, independent of byte order
    if header.len() >= 348 {
        match &header[344..348] {
            b"n+1\0" => return VolumeFormat::Nifti,
            b"ni1\0" => return VolumeFormat::NiftiPair,
            _ => {}
        }
    }

    // DICOM: "DICM" at offset 128
    if header.len() >= 132 && &header[128..132] == b"DICM" {
        return VolumeFormat::Dicom;
    }

    VolumeFormat::Unknown
}

/// Read just enough of `path` to detect its format.
pub fn sniff_file(path: &Path) -> Result<VolumeFormat, VolumeError> {
    let mut file = File::open(path).map_err(|e| VolumeError::io(path, e))?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| VolumeError::io(path, e))?;
    Ok(detect_format(&header))
}
