// NIfTI-1 single-file reader and a minimal u8 writer.
//
// Header offsets follow the NIfTI-1 layout (348-byte header, data at
// `vox_offset`). Voxel data is x-fastest, so storage shape is [nz, ny, nx].

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::geometry::{AxisOrder, SpatialMetadata};
use super::grid::{ByteOrder, RawVolume, SampleLayout, SampleType, VolumeMetadata, VoxelBytes};
use crate::error::VolumeError;

pub const HEADER_SIZE: usize = 348;

/// Header plus the 4-byte extension flag that precedes data in `.nii` files.
const MIN_DATA_OFFSET: usize = 352;

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;
const DT_INT64: i16 = 1024;
const DT_UINT64: i16 = 1280;

#[derive(Debug, Clone)]
pub(crate) struct NiftiHeader {
    byte_order: ByteOrder,
    /// Grid size in x, y, z.
    dims: [usize; 3],
    sample_type: SampleType,
    vox_offset: usize,
    slope: f64,
    intercept: f64,
    spatial: SpatialMetadata,
}

impl NiftiHeader {
    pub fn metadata(&self) -> VolumeMetadata {
        VolumeMetadata {
            shape: [self.dims[2], self.dims[1], self.dims[0]],
            axis_order: AxisOrder::ZYX,
            spatial: self.spatial,
        }
    }

    fn layout(&self) -> SampleLayout {
        SampleLayout {
            sample_type: self.sample_type,
            byte_order: self.byte_order,
            slope: self.slope,
            intercept: self.intercept,
        }
    }
}

fn i16_at(buf: &[u8], offset: usize, order: ByteOrder) -> i16 {
    let bytes = [buf[offset], buf[offset + 1]];
    match order {
        ByteOrder::Little => i16::from_le_bytes(bytes),
        ByteOrder::Big => i16::from_be_bytes(bytes),
    }
}

fn f32_at(buf: &[u8], offset: usize, order: ByteOrder) -> f32 {
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    match order {
        ByteOrder::Little => f32::from_le_bytes(bytes),
        ByteOrder::Big => f32::from_be_bytes(bytes),
    }
}

fn finite_or_zero(value: f32) -> f64 {
    if value.is_finite() {
        value as f64
    } else {
        0.0
    }
}

fn sample_type_for(code: i16) -> Option<SampleType> {
    Some(match code {
        DT_UINT8 => SampleType::U8,
        DT_INT8 => SampleType::I8,
        DT_UINT16 => SampleType::U16,
        DT_INT16 => SampleType::I16,
        DT_UINT32 => SampleType::U32,
        DT_INT32 => SampleType::I32,
        DT_UINT64 => SampleType::U64,
        DT_INT64 => SampleType::I64,
        DT_FLOAT32 => SampleType::F32,
        DT_FLOAT64 => SampleType::F64,
        _ => return None,
    })
}

/// Parse a NIfTI-1 header from the first bytes of a (decompressed) file.
pub(crate) fn parse_header(buf: &[u8]) -> Result<NiftiHeader, VolumeError> {
    if buf.len() < HEADER_SIZE {
        return Err(VolumeError::Header(format!(
            "nifti header needs {} bytes, got {}",
            HEADER_SIZE,
            buf.len()
        )));
    }

    // sizeof_hdr is always 348; reading it in the wrong order reveals the byte order.
    let sizeof_hdr = [buf[0], buf[1], buf[2], buf[3]];
    let byte_order = if i32::from_le_bytes(sizeof_hdr) == HEADER_SIZE as i32 {
        ByteOrder::Little
    } else if i32::from_be_bytes(sizeof_hdr) == HEADER_SIZE as i32 {
        ByteOrder::Big
    } else {
        return Err(VolumeError::Header("sizeof_hdr is not 348".into()));
    };

    match &buf[344..348] {
        b"n+1\0" => {}
        b"ni1\0" => {
            return Err(VolumeError::Unsupported(
                "nifti header/image pairs (.hdr/.img)".into(),
            ))
        }
        _ => return Err(VolumeError::Header("missing n+1 magic".into())),
    }

    let ndim = i16_at(buf, 40, byte_order);
    if !(1..=7).contains(&ndim) {
        return Err(VolumeError::Header(format!("dim[0] out of range: {ndim}")));
    }
    let ndim = ndim as usize;

    let mut dims = [1usize; 3];
    let mut spacing = [1.0f64; 3];
    for axis in 0..ndim {
        let n = i16_at(buf, 42 + 2 * axis, byte_order);
        if n <= 0 {
            return Err(VolumeError::Header(format!("dim[{}] = {n}", axis + 1)));
        }
        if axis < 3 {
            dims[axis] = n as usize;
            spacing[axis] = f32_at(buf, 80 + 4 * axis, byte_order).abs() as f64;
        } else if n > 1 {
            return Err(VolumeError::Unsupported(format!("{ndim}-D nifti volumes")));
        }
    }

    let datatype = i16_at(buf, 70, byte_order);
    let sample_type = sample_type_for(datatype)
        .ok_or_else(|| VolumeError::Unsupported(format!("nifti datatype {datatype}")))?;

    let vox_offset = f32_at(buf, 108, byte_order);
    if !vox_offset.is_finite() || (vox_offset as usize) < MIN_DATA_OFFSET {
        return Err(VolumeError::Header(format!("vox_offset {vox_offset} too small")));
    }

    let qform_code = i16_at(buf, 252, byte_order);
    let sform_code = i16_at(buf, 254, byte_order);
    let ras_origin = if sform_code > 0 {
        [
            f32_at(buf, 292, byte_order),
            f32_at(buf, 308, byte_order),
            f32_at(buf, 324, byte_order),
        ]
    } else if qform_code > 0 {
        [
            f32_at(buf, 268, byte_order),
            f32_at(buf, 272, byte_order),
            f32_at(buf, 276, byte_order),
        ]
    } else {
        [0.0; 3]
    };
    // NIfTI world space is RAS; the ITK convention used downstream is LPS.
    let origin = [
        -finite_or_zero(ras_origin[0]),
        -finite_or_zero(ras_origin[1]),
        finite_or_zero(ras_origin[2]),
    ];

    Ok(NiftiHeader {
        byte_order,
        dims,
        sample_type,
        vox_offset: vox_offset as usize,
        slope: finite_or_zero(f32_at(buf, 112, byte_order)),
        intercept: finite_or_zero(f32_at(buf, 116, byte_order)),
        spatial: SpatialMetadata::new(spacing, origin),
    })
}

/// Wrap already-loaded file bytes (mapped or inflated) as a raw volume.
pub(crate) fn raw_from_bytes(bytes: VoxelBytes) -> Result<RawVolume, VolumeError> {
    let header = parse_header(&bytes)?;
    Ok(RawVolume {
        meta: header.metadata(),
        layout: header.layout(),
        data_offset: header.vox_offset,
        bytes,
    })
}

/// Inflate a `.nii.gz` file completely.
pub(crate) fn inflate(path: &Path) -> Result<Vec<u8>, VolumeError> {
    let file = File::open(path).map_err(|e| VolumeError::io(path, e))?;
    let mut buf = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut buf)
        .map_err(|e| VolumeError::io(path, e))?;
    Ok(buf)
}

/// Read only the header of a `.nii` or `.nii.gz` file.
pub(crate) fn read_header(path: &Path, gzipped: bool) -> Result<NiftiHeader, VolumeError> {
    let file = File::open(path).map_err(|e| VolumeError::io(path, e))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    let read = if gzipped {
        GzDecoder::new(file)
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut buf)
    } else {
        file.take(HEADER_SIZE as u64).read_to_end(&mut buf)
    };
    read.map_err(|e| VolumeError::io(path, e))?;
    parse_header(&buf)
}

/// Write a u8 volume as single-file NIfTI-1, gzip-compressed when `path` ends
/// in `.gz`. `dims` is x, y, z and `data` is x-fastest.
pub fn write_nifti(
    path: &Path,
    dims: [usize; 3],
    spatial: &SpatialMetadata,
    data: &[u8],
) -> Result<(), VolumeError> {
    let count: usize = dims.iter().product();
    if data.len() != count {
        return Err(VolumeError::Truncated {
            expected: count,
            found: data.len(),
        });
    }
    if dims.iter().any(|&n| n == 0 || n > i16::MAX as usize) {
        return Err(VolumeError::Header(format!("dims {:?} not representable", dims)));
    }

    let mut header = vec![0u8; MIN_DATA_OFFSET];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    put_i16(&mut header, 40, 3);
    for axis in 0..3 {
        put_i16(&mut header, 42 + 2 * axis, dims[axis] as i16);
        put_f32(&mut header, 80 + 4 * axis, spatial.spacing[axis] as f32);
    }
    put_i16(&mut header, 70, DT_UINT8);
    put_i16(&mut header, 72, 8);
    put_f32(&mut header, 76, 1.0);
    put_f32(&mut header, 108, MIN_DATA_OFFSET as f32);
    put_f32(&mut header, 112, 1.0);
    put_i16(&mut header, 254, 1);

    // Identity LPS directions expressed as an RAS sform.
    let [sx, sy, sz] = spatial.spacing;
    let [ox, oy, oz] = spatial.origin;
    let srow = [
        [-sx, 0.0, 0.0, -ox],
        [0.0, -sy, 0.0, -oy],
        [0.0, 0.0, sz, oz],
    ];
    for (row, values) in srow.iter().enumerate() {
        for (col, v) in values.iter().enumerate() {
            put_f32(&mut header, 280 + 16 * row + 4 * col, *v as f32);
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let file = File::create(path).map_err(|e| VolumeError::io(path, e))?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    let result = if gzipped {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        write_payload(encoder, &header, data)
            .and_then(|encoder| encoder.finish())
            .and_then(|mut inner| inner.flush())
    } else {
        write_payload(BufWriter::new(file), &header, data).and_then(|mut writer| writer.flush())
    };
    result.map_err(|e| VolumeError::io(path, e))
}

fn write_payload<W: Write>(mut writer: W, header: &[u8], data: &[u8]) -> io::Result<W> {
    writer.write_all(header)?;
    writer.write_all(data)?;
    Ok(writer)
}

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
