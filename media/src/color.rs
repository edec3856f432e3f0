//! Mapping of container/bitstream colour metadata (ISO/IEC 23001-8 code
//! points) onto the V4L2 colour enums the decoder expects.

/// Colour primaries code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPrimaries {
    Bt709,
    Unspecified,
    Bt470M,
    Bt470Bg,
    Smpte170,
    Smpte240,
    Film,
    Bt2020,
}

/// Transfer characteristics code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFunc {
    Bt709,
    Unspecified,
    Bt470M,
    Bt470Bg,
    Smpte170,
    Smpte240,
    Linear,
}

/// Matrix coefficients code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixCoefficients {
    Identity,
    Bt709,
    Unspecified,
    Fcc,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
}

impl ColorPrimaries {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::Bt709,
            2 => Self::Unspecified,
            4 => Self::Bt470M,
            5 => Self::Bt470Bg,
            6 => Self::Smpte170,
            7 => Self::Smpte240,
            8 => Self::Film,
            9 => Self::Bt2020,
            _ => return None,
        })
    }
}

impl TransferFunc {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::Bt709,
            2 => Self::Unspecified,
            4 => Self::Bt470M,
            5 => Self::Bt470Bg,
            6 => Self::Smpte170,
            7 => Self::Smpte240,
            8 => Self::Linear,
            _ => return None,
        })
    }
}

impl MatrixCoefficients {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Identity,
            1 => Self::Bt709,
            2 => Self::Unspecified,
            4 => Self::Fcc,
            5 => Self::Bt470Bg,
            6 => Self::Smpte170M,
            7 => Self::Smpte240M,
            _ => return None,
        })
    }
}

/// `enum v4l2_colorspace` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[repr(u32)]
pub enum ColorSpace {
    Smpte170M = 1,
    Smpte240M = 2,
    Bt709 = 3,
    Ntsc470SystemM = 5,
    Pal470SystemBg = 6,
}

/// `enum v4l2_xfer_func` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[repr(u32)]
pub enum TransferFunction {
    Bt709 = 1,
    Smpte240M = 3,
    None = 5,
}

/// `enum v4l2_ycbcr_encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[repr(u32)]
pub enum YCbCrEncoding {
    Bt601 = 1,
    Bt709 = 2,
    Smpte240M = 8,
}

static TRANSFER_FUNCTIONS: [(TransferFunc, TransferFunction); 7] = [
    (TransferFunc::Bt709, TransferFunction::Bt709),
    (TransferFunc::Unspecified, TransferFunction::Bt709),
    (TransferFunc::Bt470M, TransferFunction::Bt709),
    (TransferFunc::Bt470Bg, TransferFunction::Bt709),
    (TransferFunc::Smpte170, TransferFunction::Bt709),
    (TransferFunc::Smpte240, TransferFunction::Smpte240M),
    (TransferFunc::Linear, TransferFunction::None),
];

// FCC defines KR = 0.30, KB = 0.11; BT.601 is close enough.
static ENCODINGS: [(MatrixCoefficients, YCbCrEncoding); 6] = [
    (MatrixCoefficients::Bt709, YCbCrEncoding::Bt709),
    (MatrixCoefficients::Unspecified, YCbCrEncoding::Bt709),
    (MatrixCoefficients::Fcc, YCbCrEncoding::Bt601),
    (MatrixCoefficients::Bt470Bg, YCbCrEncoding::Bt601),
    (MatrixCoefficients::Smpte170M, YCbCrEncoding::Bt601),
    (MatrixCoefficients::Smpte240M, YCbCrEncoding::Smpte240M),
];

// Film (illuminant C) has no V4L2 counterpart.
static COLOR_SPACES: [(ColorPrimaries, ColorSpace); 6] = [
    (ColorPrimaries::Bt709, ColorSpace::Bt709),
    (ColorPrimaries::Unspecified, ColorSpace::Bt709),
    (ColorPrimaries::Bt470M, ColorSpace::Ntsc470SystemM),
    (ColorPrimaries::Bt470Bg, ColorSpace::Pal470SystemBg),
    (ColorPrimaries::Smpte170, ColorSpace::Smpte170M),
    (ColorPrimaries::Smpte240, ColorSpace::Smpte240M),
];

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K) -> Option<V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

pub fn map_transfer(tf: TransferFunc) -> Option<TransferFunction> {
    lookup(&TRANSFER_FUNCTIONS, tf)
}

pub fn map_matrix(mc: MatrixCoefficients) -> Option<YCbCrEncoding> {
    lookup(&ENCODINGS, mc)
}

pub fn map_primaries(cp: ColorPrimaries) -> Option<ColorSpace> {
    lookup(&COLOR_SPACES, cp)
}

/// Colour attributes for the decoder's pixel formats. `None` fields leave
/// the driver default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ColorAttributes {
    pub color_space: Option<ColorSpace>,
    pub transfer: Option<TransferFunction>,
    pub encoding: Option<YCbCrEncoding>,
    pub full_range: Option<bool>,
}

impl ColorAttributes {
    /// Build from raw code points, as stored in the MKV `Colour` element or
    /// the H.264 VUI.
    pub fn from_codes(
        primaries: Option<u64>,
        transfer: Option<u64>,
        matrix: Option<u64>,
        full_range: Option<bool>,
    ) -> Self {
        Self {
            color_space: primaries.and_then(ColorPrimaries::from_code).and_then(map_primaries),
            transfer: transfer.and_then(TransferFunc::from_code).and_then(map_transfer),
            encoding: matrix.and_then(MatrixCoefficients::from_code).and_then(map_matrix),
            full_range,
        }
    }

    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: ColorAttributes) -> Self {
        Self {
            color_space: self.color_space.or(fallback.color_space),
            transfer: self.transfer.or(fallback.transfer),
            encoding: self.encoding.or(fallback.encoding),
            full_range: self.full_range.or(fallback.full_range),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ColorAttributes::default()
    }
}
