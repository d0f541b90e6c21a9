//! User parameters for optional patch groups
//!
//! Parameters are parsed and range-checked here, then encoded into the
//! replacement words of their patch group before verification starts.

use crate::error::ParamError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` firmware version
///
/// Encoded in a ware header as `major << 24 | minor << 16 | patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl WareVersion {
    /// Decode a header version word
    pub fn from_word(word: u32) -> Self {
        Self {
            major: (word >> 24) as u8,
            minor: (word >> 16) as u8,
            patch: word as u16,
        }
    }

    /// Header version word
    pub fn to_word(&self) -> u32 {
        (self.major as u32) << 24 | (self.minor as u32) << 16 | self.patch as u32
    }

    /// Version word as little-endian 16-bit words
    pub fn words(&self) -> Vec<u16> {
        let word = self.to_word();
        vec![word as u16, (word >> 16) as u16]
    }
}

impl FromStr for WareVersion {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(ParamError::VersionSyntax(s.to_string()));
        }

        let mut values = [0u32; 3];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| ParamError::VersionSyntax(s.to_string()))?;
        }

        Ok(Self {
            major: in_range("major", values[0], u8::MAX as u32)? as u8,
            minor: in_range("minor", values[1], u8::MAX as u32)? as u8,
            patch: in_range("patch", values[2], u16::MAX as u32)? as u16,
        })
    }
}

impl fmt::Display for WareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn in_range(component: &'static str, value: u32, max: u32) -> Result<u32, ParamError> {
    if value > max {
        return Err(ParamError::VersionRange {
            component,
            value,
            max,
        });
    }
    Ok(value)
}

/// Bike model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BikeModel {
    S3,
    X3,
}

/// Gear shifter fitted to the bike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shifter {
    Manual,
    Auto,
}

/// Handlebar display fitted to the bike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    None,
    Matrix,
}

const MODELS: &[(&str, BikeModel)] = &[("S3", BikeModel::S3), ("X3", BikeModel::X3)];
const SHIFTERS: &[(&str, Shifter)] = &[("manual", Shifter::Manual), ("auto", Shifter::Auto)];
const DISPLAYS: &[(&str, Display)] = &[("none", Display::None), ("matrix", Display::Matrix)];

/// Model configuration reported by the firmware: `model,shifter,display`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub model: BikeModel,
    pub shifter: Shifter,
    pub display: Display,
}

impl ModelDescriptor {
    /// Configuration word: model in bits 0-3, shifter in 4-7, display in 8-11
    pub fn to_word(&self) -> u16 {
        let model = match self.model {
            BikeModel::S3 => 1,
            BikeModel::X3 => 2,
        };
        let shifter = match self.shifter {
            Shifter::Manual => 0,
            Shifter::Auto => 1,
        };
        let display = match self.display {
            Display::None => 0,
            Display::Matrix => 1,
        };
        model | shifter << 4 | display << 8
    }

    pub fn words(&self) -> Vec<u16> {
        vec![self.to_word()]
    }
}

impl FromStr for ModelDescriptor {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [model, shifter, display] = parts[..] else {
            return Err(ParamError::ModelSyntax(s.to_string()));
        };

        Ok(Self {
            model: choose("model", model, MODELS, "S3, X3")?,
            shifter: choose("shifter", shifter, SHIFTERS, "manual, auto")?,
            display: choose("display", display, DISPLAYS, "none, matrix")?,
        })
    }
}

fn choose<T: Copy>(
    field: &'static str,
    value: &str,
    choices: &[(&str, T)],
    allowed: &'static str,
) -> Result<T, ParamError> {
    choices
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, choice)| *choice)
        .ok_or_else(|| ParamError::NotAllowed {
            field,
            value: value.to_string(),
            allowed,
        })
}
