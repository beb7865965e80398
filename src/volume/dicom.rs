// DICOM Part 10 reader for single-file, uncompressed little-endian images.
//
// Only the tags needed to place the grid in space and decode its samples are
// kept. Sequences are skipped, including undefined-length ones.

use super::geometry::{AxisOrder, SpatialMetadata};
use super::grid::{ByteOrder, RawVolume, SampleLayout, SampleType, VolumeMetadata, VoxelBytes};
use crate::error::VolumeError;

type Tag = (u16, u16);

const PREAMBLE_LEN: usize = 128;
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

const TRANSFER_SYNTAX: Tag = (0x0002, 0x0010);
const SLICE_THICKNESS: Tag = (0x0018, 0x0050);
const SPACING_BETWEEN_SLICES: Tag = (0x0018, 0x0088);
const IMAGE_POSITION: Tag = (0x0020, 0x0032);
const SAMPLES_PER_PIXEL: Tag = (0x0028, 0x0002);
const NUMBER_OF_FRAMES: Tag = (0x0028, 0x0008);
const ROWS: Tag = (0x0028, 0x0010);
const COLUMNS: Tag = (0x0028, 0x0011);
const PIXEL_SPACING: Tag = (0x0028, 0x0030);
const BITS_ALLOCATED: Tag = (0x0028, 0x0100);
const PIXEL_REPRESENTATION: Tag = (0x0028, 0x0103);
const RESCALE_INTERCEPT: Tag = (0x0028, 0x1052);
const RESCALE_SLOPE: Tag = (0x0028, 0x1053);
const PIXEL_DATA: Tag = (0x7FE0, 0x0010);

const ITEM: Tag = (0xFFFE, 0xE000);
const ITEM_END: Tag = (0xFFFE, 0xE00D);
const SEQUENCE_END: Tag = (0xFFFE, 0xE0DD);

const IMPLICIT_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
const DEFLATED_LE: &str = "1.2.840.10008.1.2.1.99";
const EXPLICIT_BE: &str = "1.2.840.10008.1.2.2";

/// VRs whose explicit encoding uses 2 reserved bytes and a 4-byte length.
const LONG_VRS: &[&[u8; 2]] = &[
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"SV", b"UC", b"UN", b"UR", b"UT", b"UV",
];

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], VolumeError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(VolumeError::Header(format!(
                "dicom element at offset {} overruns file",
                self.pos
            ))),
        }
    }

    fn u16(&mut self) -> Result<u16, VolumeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, VolumeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn peek_group(&self) -> Option<u16> {
        self.buf
            .get(self.pos..self.pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read an element header: tag and value length.
    fn header(&mut self, explicit: bool) -> Result<(Tag, u32), VolumeError> {
        let tag = (self.u16()?, self.u16()?);
        // Item and delimiter tags never carry a VR.
        if tag.0 == 0xFFFE || !explicit {
            return Ok((tag, self.u32()?));
        }
        let vr = self.take(2)?;
        if LONG_VRS.iter().any(|long| long[..] == vr[..]) {
            self.take(2)?;
            Ok((tag, self.u32()?))
        } else {
            Ok((tag, self.u16()? as u32))
        }
    }

    fn skip_value(&mut self, len: u32, explicit: bool) -> Result<(), VolumeError> {
        if len == UNDEFINED_LENGTH {
            self.skip_undefined_sequence(explicit)
        } else {
            self.take(len as usize).map(|_| ())
        }
    }

    fn skip_undefined_sequence(&mut self, explicit: bool) -> Result<(), VolumeError> {
        loop {
            let (tag, len) = self.header(explicit)?;
            match tag {
                SEQUENCE_END => return Ok(()),
                ITEM if len == UNDEFINED_LENGTH => self.skip_item_dataset(explicit)?,
                ITEM => {
                    self.take(len as usize)?;
                }
                other => {
                    return Err(VolumeError::Header(format!(
                        "unexpected tag ({:04X},{:04X}) inside sequence",
                        other.0, other.1
                    )))
                }
            }
        }
    }

    fn skip_item_dataset(&mut self, explicit: bool) -> Result<(), VolumeError> {
        loop {
            let (tag, len) = self.header(explicit)?;
            if tag == ITEM_END {
                return Ok(());
            }
            self.skip_value(len, explicit)?;
        }
    }
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn decimals(value: &[u8]) -> Result<Vec<f64>, VolumeError> {
    text(value)
        .split('\\')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| VolumeError::Header(format!("bad decimal string '{part}'")))
        })
        .collect()
}

fn us(value: &[u8]) -> Result<u16, VolumeError> {
    match value {
        [a, b, ..] => Ok(u16::from_le_bytes([*a, *b])),
        _ => Err(VolumeError::Header("short US value".into())),
    }
}

#[derive(Default)]
struct Fields<'a> {
    transfer_syntax: Option<String>,
    rows: Option<&'a [u8]>,
    columns: Option<&'a [u8]>,
    frames: Option<&'a [u8]>,
    samples_per_pixel: Option<&'a [u8]>,
    bits_allocated: Option<&'a [u8]>,
    pixel_representation: Option<&'a [u8]>,
    pixel_spacing: Option<&'a [u8]>,
    slice_thickness: Option<&'a [u8]>,
    spacing_between_slices: Option<&'a [u8]>,
    image_position: Option<&'a [u8]>,
    rescale_slope: Option<&'a [u8]>,
    rescale_intercept: Option<&'a [u8]>,
    /// Offset and length of uncompressed pixel data.
    pixel_data: Option<(usize, usize)>,
    encapsulated: bool,
}

fn scan(buf: &[u8]) -> Result<Fields<'_>, VolumeError> {
    if buf.len() < PREAMBLE_LEN + 4 || &buf[PREAMBLE_LEN..PREAMBLE_LEN + 4] != b"DICM" {
        return Err(VolumeError::Header("missing DICM prefix".into()));
    }
    let mut reader = Reader {
        buf,
        pos: PREAMBLE_LEN + 4,
    };
    let mut fields = Fields::default();

    // File meta group is always explicit VR little endian.
    while reader.peek_group() == Some(0x0002) {
        let (tag, len) = reader.header(true)?;
        let value = reader.take(len as usize)?;
        if tag == TRANSFER_SYNTAX {
            fields.transfer_syntax = Some(text(value));
        }
    }

    let explicit = match fields.transfer_syntax.as_deref() {
        Some(IMPLICIT_LE) => false,
        Some(DEFLATED_LE) => {
            return Err(VolumeError::Unsupported("deflated dicom transfer syntax".into()))
        }
        Some(EXPLICIT_BE) => {
            return Err(VolumeError::Unsupported("big endian dicom transfer syntax".into()))
        }
        _ => true,
    };

    while !reader.at_end() {
        let (tag, len) = reader.header(explicit)?;
        if tag == PIXEL_DATA {
            if len == UNDEFINED_LENGTH {
                fields.encapsulated = true;
            } else {
                fields.pixel_data = Some((reader.pos, len as usize));
            }
            break;
        }
        if len == UNDEFINED_LENGTH {
            reader.skip_undefined_sequence(explicit)?;
            continue;
        }
        let value = reader.take(len as usize)?;
        let slot = match tag {
            ROWS => &mut fields.rows,
            COLUMNS => &mut fields.columns,
            NUMBER_OF_FRAMES => &mut fields.frames,
            SAMPLES_PER_PIXEL => &mut fields.samples_per_pixel,
            BITS_ALLOCATED => &mut fields.bits_allocated,
            PIXEL_REPRESENTATION => &mut fields.pixel_representation,
            PIXEL_SPACING => &mut fields.pixel_spacing,
            SLICE_THICKNESS => &mut fields.slice_thickness,
            SPACING_BETWEEN_SLICES => &mut fields.spacing_between_slices,
            IMAGE_POSITION => &mut fields.image_position,
            RESCALE_SLOPE => &mut fields.rescale_slope,
            RESCALE_INTERCEPT => &mut fields.rescale_intercept,
            _ => continue,
        };
        *slot = Some(value);
    }

    Ok(fields)
}

fn metadata(fields: &Fields<'_>) -> Result<VolumeMetadata, VolumeError> {
    let rows = fields
        .rows
        .ok_or_else(|| VolumeError::Header("dicom Rows missing".into()))
        .and_then(us)? as usize;
    let columns = fields
        .columns
        .ok_or_else(|| VolumeError::Header("dicom Columns missing".into()))
        .and_then(us)? as usize;
    let frames = match fields.frames {
        Some(value) => text(value)
            .parse::<usize>()
            .map_err(|_| VolumeError::Header("bad NumberOfFrames".into()))?,
        None => 1,
    };
    if rows == 0 || columns == 0 || frames == 0 {
        return Err(VolumeError::Header("dicom image has an empty dimension".into()));
    }

    // PixelSpacing is row spacing (y) then column spacing (x).
    let (spacing_x, spacing_y) = match fields.pixel_spacing.map(decimals).transpose()? {
        Some(values) if values.len() >= 2 => (values[1], values[0]),
        _ => (1.0, 1.0),
    };
    let spacing_z = fields
        .spacing_between_slices
        .or(fields.slice_thickness)
        .map(decimals)
        .transpose()?
        .and_then(|values| values.first().copied())
        .unwrap_or(1.0);

    let origin = match fields.image_position.map(decimals).transpose()? {
        Some(values) if values.len() >= 3 => [values[0], values[1], values[2]],
        _ => [0.0; 3],
    };

    Ok(VolumeMetadata {
        shape: [frames, rows, columns],
        axis_order: AxisOrder::ZYX,
        spatial: SpatialMetadata::new([spacing_x, spacing_y, spacing_z.abs()], origin),
    })
}

fn layout(fields: &Fields<'_>) -> Result<SampleLayout, VolumeError> {
    if let Some(samples) = fields.samples_per_pixel {
        let samples = us(samples)?;
        if samples != 1 {
            return Err(VolumeError::Unsupported(format!(
                "{samples} samples per pixel"
            )));
        }
    }
    let bits = fields.bits_allocated.map(us).transpose()?.unwrap_or(16);
    let signed = fields.pixel_representation.map(us).transpose()?.unwrap_or(0) == 1;
    let sample_type = match (bits, signed) {
        (8, false) => SampleType::U8,
        (8, true) => SampleType::I8,
        (16, false) => SampleType::U16,
        (16, true) => SampleType::I16,
        (32, false) => SampleType::U32,
        (32, true) => SampleType::I32,
        _ => return Err(VolumeError::Unsupported(format!("{bits}-bit dicom pixels"))),
    };
    let first_decimal = |value: Option<&[u8]>| -> Result<Option<f64>, VolumeError> {
        Ok(value.map(decimals).transpose()?.and_then(|v| v.first().copied()))
    };

    Ok(SampleLayout {
        sample_type,
        byte_order: ByteOrder::Little,
        slope: first_decimal(fields.rescale_slope)?.unwrap_or(1.0),
        intercept: first_decimal(fields.rescale_intercept)?.unwrap_or(0.0),
    })
}

pub(crate) fn read_metadata(buf: &[u8]) -> Result<VolumeMetadata, VolumeError> {
    metadata(&scan(buf)?)
}

pub(crate) fn raw_from_bytes(bytes: VoxelBytes) -> Result<RawVolume, VolumeError> {
    let (meta, layout, data_offset) = {
        let fields = scan(&bytes)?;
        if fields.encapsulated {
            return Err(VolumeError::Unsupported(format!(
                "compressed dicom pixel data ({})",
                fields.transfer_syntax.as_deref().unwrap_or("unknown syntax")
            )));
        }
        let (offset, _len) = fields
            .pixel_data
            .ok_or_else(|| VolumeError::Header("dicom PixelData missing".into()))?;
        (metadata(&fields)?, layout(&fields)?, offset)
    };

    Ok(RawVolume {
        meta,
        layout,
        bytes,
        data_offset,
    })
}
