//! Patch catalog
//!
//! A fixed registry of known firmware builds, each keyed by the exact
//! (version, crc, length) fingerprint of the image it was written for.
//! Lookup never guesses: an image that matches no entry is rejected.

use crate::builds;
use crate::config::PatchOptions;
use crate::container::{Format, Image};
use crate::error::{ParamError, WareError};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

/// Identity of a concrete image, read from its header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    pub format: Format,
    pub version: u32,
    pub crc: u32,
    pub length: u32,
}

/// Fingerprint of a registered build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildId {
    pub format: Format,
    /// `None` when the build's version word was never recorded; crc and
    /// length still pin it to one image
    pub version: Option<u32>,
    pub crc: u32,
    pub length: u32,
}

impl BuildId {
    /// Exact match on every recorded field
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.format == fingerprint.format
            && self.version.map_or(true, |v| v == fingerprint.version)
            && self.crc == fingerprint.crc
            && self.length == fingerprint.length
    }
}

/// Source of a patch's replacement words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// Fixed words
    Words(&'static [u16]),
    /// The patchset stamp as ASCII `"<date> / <time>"`
    Stamp,
    /// The caller's payload, appended
    Payload,
    /// Thumb pointer to a payload symbol: `(load address + offset) | 1`
    PayloadEntry(&'static str),
    /// The requested fake version word
    FakeVersion,
    /// The requested fake model configuration word
    FakeModel,
}

/// One byte-range edit at an absolute load address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSpec {
    /// Diagnostic label
    pub name: &'static str,
    pub target_address: u32,
    /// Words that must be present before patching; `None` for regions
    /// that are written unconditionally (appended data)
    pub expected: Option<&'static [u16]>,
    pub replacement: Replacement,
}

/// Which part of a patchset a patch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    Mandatory,
    FakeVersion,
    FakeModel,
}

impl GroupKind {
    pub fn name(&self) -> &'static str {
        match self {
            GroupKind::Mandatory => "mandatory",
            GroupKind::FakeVersion => "fake version",
            GroupKind::FakeModel => "fake model",
        }
    }
}

/// Optional patches enabled by a user parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubGroup {
    pub kind: GroupKind,
    pub specs: &'static [PatchSpec],
}

/// Date/time stamp marking a patched image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Fixed {
        date: &'static str,
        time: &'static str,
    },
    /// The run clock, formatted `"%b %e %Y"` / `"%T"` in UTC
    Clock,
}

impl Stamp {
    /// Produce the date and time text
    pub fn resolve(&self, now: &DateTime<Utc>) -> ResolvedStamp {
        match self {
            Stamp::Fixed { date, time } => ResolvedStamp {
                date: date.to_string(),
                time: time.to_string(),
            },
            Stamp::Clock => ResolvedStamp {
                date: now.format("%b %e %Y").to_string(),
                time: now.format("%T").to_string(),
            },
        }
    }
}

/// Stamp text for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStamp {
    pub date: String,
    pub time: String,
}

impl ResolvedStamp {
    /// The stamp as written into an image body
    pub fn body_text(&self) -> String {
        format!("{} / {}", self.date, self.time)
    }
}

/// All edits for one fingerprinted build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSet {
    pub name: &'static str,
    pub build: BuildId,
    /// Always applied, in order
    pub patches: &'static [PatchSpec],
    /// Applied after the mandatory patches when their parameter is given
    pub groups: &'static [SubGroup],
    pub stamp: Stamp,
}

/// A patch with its offset and replacement words worked out for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPatch {
    pub name: &'static str,
    pub group: GroupKind,
    pub target_address: u32,
    /// File offset of the first word
    pub offset: usize,
    pub expected: Option<&'static [u16]>,
    pub replacement: Vec<u16>,
}

impl ResolvedPatch {
    pub fn word_count(&self) -> usize {
        self.replacement.len()
    }

    /// File offset one past the last byte written
    pub fn end(&self) -> usize {
        self.offset + self.word_count() * 2
    }
}

impl PatchSet {
    pub fn group(&self, kind: GroupKind) -> Option<&SubGroup> {
        self.groups.iter().find(|g| g.kind == kind)
    }

    /// Patches enabled by the options, mandatory ones first
    pub fn enabled(
        &self,
        options: &PatchOptions,
    ) -> Result<Vec<(GroupKind, &'static PatchSpec)>, ParamError> {
        let mut enabled: Vec<(GroupKind, &'static PatchSpec)> = self
            .patches
            .iter()
            .map(|spec| (GroupKind::Mandatory, spec))
            .collect();

        let requested = [
            (GroupKind::FakeVersion, options.fake_version.is_some()),
            (GroupKind::FakeModel, options.fake_model.is_some()),
        ];

        for (kind, wanted) in requested {
            if !wanted {
                continue;
            }
            let group = self.group(kind).ok_or(ParamError::Unsupported {
                patchset: self.name,
                group: kind.name(),
            })?;
            enabled.extend(group.specs.iter().map(|spec| (kind, spec)));
        }

        Ok(enabled)
    }

    /// Work out offsets and replacement words for every enabled patch
    pub fn resolve(
        &self,
        image: &Image,
        options: &PatchOptions,
    ) -> Result<Vec<ResolvedPatch>, WareError> {
        let stamp = self.stamp.resolve(&options.now);
        let mut resolved = Vec::new();

        for (group, spec) in self.enabled(options)? {
            let offset = image.offset_of(spec.target_address).ok_or(WareError::Bounds {
                name: spec.name,
                address: spec.target_address,
            })?;

            let replacement = self.replacement_words(spec, &stamp, options)?;

            if let Some(expected) = spec.expected {
                if expected.len() != replacement.len() {
                    return Err(WareError::Catalog(format!(
                        "patch \"{}\" expects {} words but replaces {}",
                        spec.name,
                        expected.len(),
                        replacement.len()
                    )));
                }
            }

            debug!(
                "resolved \"{}\" ({}): @0x{:08x} offset 0x{:x} [{}]",
                spec.name,
                group.name(),
                spec.target_address,
                offset,
                replacement.len()
            );

            resolved.push(ResolvedPatch {
                name: spec.name,
                group,
                target_address: spec.target_address,
                offset,
                expected: spec.expected,
                replacement,
            });
        }

        Ok(resolved)
    }

    fn replacement_words(
        &self,
        spec: &PatchSpec,
        stamp: &ResolvedStamp,
        options: &PatchOptions,
    ) -> Result<Vec<u16>, WareError> {
        let words = match spec.replacement {
            Replacement::Words(words) => words.to_vec(),
            Replacement::Stamp => {
                let text = stamp.body_text();
                if text.len() % 2 != 0 {
                    return Err(WareError::Catalog(format!(
                        "stamp \"{}\" for patch \"{}\" is not a whole number of words",
                        text, spec.name
                    )));
                }
                text.as_bytes()
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect()
            }
            Replacement::Payload => self.payload(options)?.words(),
            Replacement::PayloadEntry(symbol) => {
                let payload = self.payload(options)?;
                let load = self.payload_address()?;
                let entry = load.wrapping_add(payload.symbol(symbol)?) | 1;
                vec![entry as u16, (entry >> 16) as u16]
            }
            Replacement::FakeVersion => options
                .fake_version
                .map(|v| v.words())
                .ok_or(ParamError::Unsupported {
                    patchset: self.name,
                    group: GroupKind::FakeVersion.name(),
                })?,
            Replacement::FakeModel => options
                .fake_model
                .map(|m| m.words())
                .ok_or(ParamError::Unsupported {
                    patchset: self.name,
                    group: GroupKind::FakeModel.name(),
                })?,
        };
        Ok(words)
    }

    fn payload<'o>(&self, options: &'o PatchOptions) -> Result<&'o crate::Payload, WareError> {
        options.payload.as_ref().ok_or_else(|| {
            WareError::Payload(format!(
                "patchset \"{}\" appends a payload, but none was supplied",
                self.name
            ))
        })
    }

    /// Load address where the payload is appended
    fn payload_address(&self) -> Result<u32, WareError> {
        self.patches
            .iter()
            .find(|spec| spec.replacement == Replacement::Payload)
            .map(|spec| spec.target_address)
            .ok_or_else(|| {
                WareError::Catalog(format!(
                    "patchset \"{}\" points into a payload it never appends",
                    self.name
                ))
            })
    }
}

/// Registry of patchsets
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    sets: &'static [PatchSet],
}

impl Catalog {
    /// The built-in registry of known builds
    pub fn builtin() -> Self {
        Self::new(builds::PATCHSETS)
    }

    pub const fn new(sets: &'static [PatchSet]) -> Self {
        Self { sets }
    }

    /// Find the patchset for an exact fingerprint
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<&'static PatchSet, WareError> {
        self.sets
            .iter()
            .find(|set| set.build.matches(fingerprint))
            .ok_or(WareError::CatalogMiss {
                format: fingerprint.format.name(),
                version: fingerprint.version,
                crc: fingerprint.crc,
                length: fingerprint.length,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static PatchSet> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
