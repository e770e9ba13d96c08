//! Normalization methods, matrix value transforms, and matrix units.

use std::fmt;
use std::str::FromStr;

use velella_core::Error;

/// Per-bin multiplicative correction applied to raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Normalization {
    None,
    /// Matrix-balancing weights (the `weight` dataset of MRES files).
    Weight,
    Vc,
    VcSqrt,
    Kr,
    Scale,
}

impl Normalization {
    /// Canonical name, also the MRES weight-dataset name under `bins/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::None => "NONE",
            Normalization::Weight => "weight",
            Normalization::Vc => "VC",
            Normalization::VcSqrt => "VC_SQRT",
            Normalization::Kr => "KR",
            Normalization::Scale => "SCALE",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Normalization::None)
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "NONE" => Ok(Normalization::None),
            "weight" => Ok(Normalization::Weight),
            "VC" => Ok(Normalization::Vc),
            "VC_SQRT" => Ok(Normalization::VcSqrt),
            "KR" => Ok(Normalization::Kr),
            "SCALE" => Ok(Normalization::Scale),
            other => Err(Error::InvalidArgument(format!(
                "unknown normalization method '{other}'"
            ))),
        }
    }
}

/// The value kind a selector reports for each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixType {
    /// Raw (optionally normalized) counts.
    #[default]
    Observed,
    /// The expected count for the cell's diagonal (intra) or the
    /// matrix-wide average (inter).
    Expected,
    /// Observed over expected.
    Oe,
}

impl MatrixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixType::Observed => "observed",
            MatrixType::Expected => "expected",
            MatrixType::Oe => "oe",
        }
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatrixType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "observed" => Ok(MatrixType::Observed),
            "expected" => Ok(MatrixType::Expected),
            "oe" => Ok(MatrixType::Oe),
            other => Err(Error::InvalidArgument(format!(
                "unknown matrix type '{other}'"
            ))),
        }
    }
}

/// Resolution unit of a stored matrix axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixUnit {
    #[default]
    Bp,
    Frag,
}

impl MatrixUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixUnit::Bp => "BP",
            MatrixUnit::Frag => "FRAG",
        }
    }
}

impl fmt::Display for MatrixUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatrixUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "BP" => Ok(MatrixUnit::Bp),
            "FRAG" => Ok(MatrixUnit::Frag),
            other => Err(Error::InvalidArgument(format!(
                "unknown matrix unit '{other}'"
            ))),
        }
    }
}
