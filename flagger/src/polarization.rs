//! Polarization labels and complex representations.
//!
//! Both are closed sets. Every conversion in [`crate::data`] matches on them
//! exhaustively, so an unsupported combination is rejected up front instead of
//! being discovered halfway through a strategy run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlagError;

/// A measured or derived polarization product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
    #[serde(rename = "I")]
    StokesI,
    #[serde(rename = "Q")]
    StokesQ,
    #[serde(rename = "U")]
    StokesU,
    #[serde(rename = "V")]
    StokesV,
}

impl Polarization {
    pub const LINEAR: [Polarization; 4] = [
        Polarization::XX,
        Polarization::XY,
        Polarization::YX,
        Polarization::YY,
    ];

    pub const CIRCULAR: [Polarization; 4] = [
        Polarization::RR,
        Polarization::RL,
        Polarization::LR,
        Polarization::LL,
    ];

    pub const STOKES: [Polarization; 4] = [
        Polarization::StokesI,
        Polarization::StokesQ,
        Polarization::StokesU,
        Polarization::StokesV,
    ];

    /// Short label, e.g. `"XX"` or `"I"`.
    pub fn label(&self) -> &'static str {
        match self {
            Polarization::XX => "XX",
            Polarization::XY => "XY",
            Polarization::YX => "YX",
            Polarization::YY => "YY",
            Polarization::RR => "RR",
            Polarization::RL => "RL",
            Polarization::LR => "LR",
            Polarization::LL => "LL",
            Polarization::StokesI => "I",
            Polarization::StokesQ => "Q",
            Polarization::StokesU => "U",
            Polarization::StokesV => "V",
        }
    }

    pub fn is_linear(&self) -> bool {
        Self::LINEAR.contains(self)
    }

    pub fn is_circular(&self) -> bool {
        Self::CIRCULAR.contains(self)
    }

    pub fn is_stokes(&self) -> bool {
        Self::STOKES.contains(self)
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Polarization {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let pol = match upper.as_str() {
            "XX" => Polarization::XX,
            "XY" => Polarization::XY,
            "YX" => Polarization::YX,
            "YY" => Polarization::YY,
            "RR" => Polarization::RR,
            "RL" => Polarization::RL,
            "LR" => Polarization::LR,
            "LL" => Polarization::LL,
            "I" | "STOKESI" => Polarization::StokesI,
            "Q" | "STOKESQ" => Polarization::StokesQ,
            "U" | "STOKESU" => Polarization::StokesU,
            "V" | "STOKESV" => Polarization::StokesV,
            _ => {
                return Err(FlagError::InvalidConfig(format!(
                    "unknown polarization '{s}'"
                )))
            }
        };
        Ok(pol)
    }
}

/// How complex visibilities are presented to a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexRepresentation {
    Real,
    Imaginary,
    Amplitude,
    Phase,
    /// Two images: real part and imaginary part.
    ComplexParts,
}

impl ComplexRepresentation {
    /// Number of image buffers this representation occupies.
    pub fn image_count(&self) -> usize {
        match self {
            ComplexRepresentation::ComplexParts => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ComplexRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComplexRepresentation::Real => "real",
            ComplexRepresentation::Imaginary => "imaginary",
            ComplexRepresentation::Amplitude => "amplitude",
            ComplexRepresentation::Phase => "phase",
            ComplexRepresentation::ComplexParts => "complex",
        };
        f.write_str(name)
    }
}

impl FromStr for ComplexRepresentation {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "real" => Ok(ComplexRepresentation::Real),
            "imaginary" | "imag" => Ok(ComplexRepresentation::Imaginary),
            "amplitude" => Ok(ComplexRepresentation::Amplitude),
            "phase" => Ok(ComplexRepresentation::Phase),
            "complex" | "complex_parts" => Ok(ComplexRepresentation::ComplexParts),
            _ => Err(FlagError::InvalidConfig(format!(
                "unknown complex representation '{s}'"
            ))),
        }
    }
}
