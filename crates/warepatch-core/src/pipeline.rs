//! Patch pipeline
//!
//! A run moves through fixed stages:
//!
//! ```text
//! Loaded -> ChecksumVerified -> PatchesVerified -> Applied -> Resealed
//! ```
//!
//! and any error moves it to `Aborted`. Every patch site is checked before
//! the first write, and writing requires a `VerifiedPlan`, which can only be
//! obtained from a report in which every check passed.

use crate::catalog::{Catalog, Fingerprint, GroupKind, PatchSet, ResolvedPatch, ResolvedStamp};
use crate::checksum;
use crate::config::PatchOptions;
use crate::container::{Format, Image};
use crate::error::WareError;
use crate::segment::{self, FixupSummary};
use log::{debug, error, info, warn};
use serde::Serialize;

/// Stage of a patch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Loaded,
    ChecksumVerified,
    PatchesVerified,
    Applied,
    Resealed,
    Aborted,
}

/// Result of checking one patch site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CheckOutcome {
    /// Expected words found
    Match,
    /// Nothing to compare; the region is written unconditionally
    Unconditional,
    /// Different words found
    Mismatch { found: Vec<u16> },
    /// The site lies outside the range it is allowed to touch
    OutOfBounds { end: usize, limit: usize },
}

/// One entry of a verification report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchCheck {
    pub name: &'static str,
    pub group: GroupKind,
    pub address: u32,
    pub offset: usize,
    pub expected: Option<&'static [u16]>,
    pub outcome: CheckOutcome,
}

impl PatchCheck {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Match | CheckOutcome::Unconditional)
    }
}

/// Outcome of checking every enabled patch of a patchset
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub patchset: &'static str,
    pub fingerprint: Fingerprint,
    pub checks: Vec<PatchCheck>,
    /// Bytes the image grows by when the plan is applied
    pub extra_len: usize,
    pub stamp: ResolvedStamp,
    #[serde(skip)]
    patches: Vec<ResolvedPatch>,
}

impl VerificationReport {
    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &PatchCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Turn a clean report into a plan; a report with any failure is
    /// returned as `WareError::Verification`
    pub fn plan(&self) -> Result<VerifiedPlan, WareError> {
        if !self.is_clean() {
            return Err(WareError::Verification(Box::new(self.clone())));
        }

        let extra_len = u32::try_from(self.extra_len).map_err(|_| {
            WareError::Payload(format!("appending 0x{:x} bytes overflows the image length", self.extra_len))
        })?;

        Ok(VerifiedPlan {
            patchset: self.patchset,
            patches: self.patches.clone(),
            stamp: self.stamp.clone(),
            extra_len,
            end: self.fingerprint.length as usize + self.extra_len,
        })
    }
}

/// Patches whose every site passed verification
#[derive(Debug, Clone)]
pub struct VerifiedPlan {
    patchset: &'static str,
    patches: Vec<ResolvedPatch>,
    stamp: ResolvedStamp,
    extra_len: u32,
    end: usize,
}

impl VerifiedPlan {
    pub fn patchset(&self) -> &'static str {
        self.patchset
    }

    pub fn patches(&self) -> &[ResolvedPatch] {
        &self.patches
    }

    pub fn extra_len(&self) -> u32 {
        self.extra_len
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct PatchOutcome {
    pub patchset: &'static str,
    pub format: Format,
    pub applied: Vec<&'static str>,
    pub stamp: ResolvedStamp,
    pub extra_len: u32,
    pub old_len: u32,
    pub new_len: u32,
    pub old_crc: u32,
    pub new_crc: u32,
    /// Segment table changes, for segmented images
    pub segments: Option<FixupSummary>,
}

impl PatchOutcome {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Check every resolved patch against the image
///
/// Mismatches are collected, never short-circuited, so the report lists
/// every site that differs.
pub fn verify_all(
    image: &Image,
    patchset: &'static PatchSet,
    patches: Vec<ResolvedPatch>,
    stamp: ResolvedStamp,
) -> VerificationReport {
    let limit = image.declared_len() as usize;
    let mut checks = Vec::with_capacity(patches.len());

    for patch in &patches {
        let outcome = check_patch(image, patch, limit);
        match &outcome {
            CheckOutcome::Mismatch { found } => warn!(
                "\"{}\" @0x{:08x}: expected {}, found {}",
                patch.name,
                patch.target_address,
                hex_words(patch.expected.unwrap_or_default()),
                hex_words(found)
            ),
            CheckOutcome::OutOfBounds { end, limit } => warn!(
                "\"{}\" @0x{:08x}: ends at 0x{:x}, beyond 0x{:x}",
                patch.name, patch.target_address, end, limit
            ),
            _ => debug!("\"{}\" @0x{:08x}: ok", patch.name, patch.target_address),
        }

        checks.push(PatchCheck {
            name: patch.name,
            group: patch.group,
            address: patch.target_address,
            offset: patch.offset,
            expected: patch.expected,
            outcome,
        });
    }

    let end = patches.iter().map(ResolvedPatch::end).max().unwrap_or(0);

    VerificationReport {
        patchset: patchset.name,
        fingerprint: image.fingerprint(),
        checks,
        extra_len: end.saturating_sub(limit),
        stamp,
        patches,
    }
}

fn check_patch(image: &Image, patch: &ResolvedPatch, limit: usize) -> CheckOutcome {
    match patch.expected {
        Some(expected) => {
            if patch.end() > limit {
                return CheckOutcome::OutOfBounds {
                    end: patch.end(),
                    limit,
                };
            }
            match image.read_words(patch.offset, expected.len()) {
                Some(found) if found == expected => CheckOutcome::Match,
                Some(found) => CheckOutcome::Mismatch { found },
                None => CheckOutcome::OutOfBounds {
                    end: patch.end(),
                    limit,
                },
            }
        }
        // Appended regions may start at the end of image, not past it
        None if patch.offset > limit => CheckOutcome::OutOfBounds {
            end: patch.end(),
            limit,
        },
        None => CheckOutcome::Unconditional,
    }
}

/// Write every patch of a verified plan, then the header stamp
pub fn apply_all(image: &mut Image, plan: &VerifiedPlan) -> Result<(), WareError> {
    image.grow_to(plan.end);

    for patch in &plan.patches {
        image
            .write_words(patch.offset, &patch.replacement)
            .ok_or(WareError::Bounds {
                name: patch.name,
                address: patch.target_address,
            })?;
        debug!(
            "patched \"{}\" @0x{:08x} ({} words)",
            patch.name,
            patch.target_address,
            patch.word_count()
        );
    }

    image.set_stamp(&plan.stamp.date, &plan.stamp.time);
    Ok(())
}

/// Extend the declared length by `extra_len` and rewrite the checksum
pub fn extend_and_reseal(
    image: &mut Image,
    extra_len: u32,
) -> Result<(u32, Option<FixupSummary>), WareError> {
    match image.format() {
        Format::Monolithic => {
            if extra_len > 0 {
                let old_len = image.declared_len();
                let new_len = old_len.checked_add(extra_len).ok_or_else(|| {
                    WareError::Payload(format!(
                        "length 0x{:08x} + 0x{:08x} overflows",
                        old_len, extra_len
                    ))
                })?;
                image.set_declared_len(new_len);
            }
            Ok((checksum::reseal(image)?, None))
        }
        Format::Segmented => {
            let mut summary = segment::fixup(image, extra_len)?;
            summary.crc = checksum::reseal(image)?;
            Ok((summary.crc, Some(summary)))
        }
    }
}

/// One patch run over an in-memory image
///
/// Nothing reaches disk from here; callers persist the image only after
/// `run` succeeds.
#[derive(Debug)]
pub struct Pipeline {
    image: Image,
    catalog: Catalog,
    options: PatchOptions,
    stage: Stage,
    original: Fingerprint,
    plan: Option<VerifiedPlan>,
}

impl Pipeline {
    pub fn new(image: Image, catalog: Catalog, options: PatchOptions) -> Self {
        let original = image.fingerprint();
        Self {
            image,
            catalog,
            options,
            stage: Stage::Loaded,
            original,
            plan: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn into_image(self) -> Image {
        self.image
    }

    /// Loaded -> ChecksumVerified
    pub fn verify_checksum(&mut self) -> Result<u32, WareError> {
        self.require(Stage::Loaded)?;
        let result = checksum::verify(&self.image);
        self.settle(result, Stage::ChecksumVerified)
    }

    /// Look up the patchset and check every enabled patch site
    ///
    /// Does not change the stage; a report with failures is still returned.
    pub fn inspect(&self) -> Result<VerificationReport, WareError> {
        let patchset = self.catalog.lookup(&self.original)?;
        info!(
            "{} ware matches patchset \"{}\"",
            self.image.format(),
            patchset.name
        );

        let patches = patchset.resolve(&self.image, &self.options)?;
        let stamp = patchset.stamp.resolve(&self.options.now);
        Ok(verify_all(&self.image, patchset, patches, stamp))
    }

    /// ChecksumVerified -> PatchesVerified
    pub fn verify_patches(&mut self) -> Result<&VerifiedPlan, WareError> {
        self.require(Stage::ChecksumVerified)?;
        let result = self.inspect().and_then(|report| {
            info!(
                "{}/{} patch sites verified",
                report.checks.len() - report.failed_count(),
                report.checks.len()
            );
            report.plan()
        });
        let plan = self.settle(result, Stage::PatchesVerified)?;
        Ok(&*self.plan.insert(plan))
    }

    /// PatchesVerified -> Applied
    pub fn apply(&mut self) -> Result<(), WareError> {
        self.require(Stage::PatchesVerified)?;
        let result = match self.plan.as_ref() {
            Some(plan) => apply_all(&mut self.image, plan),
            None => Err(WareError::Stage {
                expected: Stage::PatchesVerified,
                found: self.stage,
            }),
        };
        self.settle(result, Stage::Applied)
    }

    /// Applied -> Resealed
    pub fn reseal(&mut self) -> Result<PatchOutcome, WareError> {
        self.require(Stage::Applied)?;
        let result = match self.plan.as_ref() {
            Some(plan) => extend_and_reseal(&mut self.image, plan.extra_len).map(|(crc, segments)| {
                PatchOutcome {
                    patchset: plan.patchset,
                    format: self.image.format(),
                    applied: plan.patches.iter().map(|p| p.name).collect(),
                    stamp: plan.stamp.clone(),
                    extra_len: plan.extra_len,
                    old_len: self.original.length,
                    new_len: self.image.declared_len(),
                    old_crc: self.original.crc,
                    new_crc: crc,
                    segments,
                }
            }),
            None => Err(WareError::Stage {
                expected: Stage::Applied,
                found: self.stage,
            }),
        };
        let outcome = self.settle(result, Stage::Resealed)?;
        info!(
            "patched with \"{}\": CRC 0x{:08x} -> 0x{:08x}, length 0x{:08x} -> 0x{:08x}",
            outcome.patchset, outcome.old_crc, outcome.new_crc, outcome.old_len, outcome.new_len
        );
        Ok(outcome)
    }

    /// Run every stage, returning the patched image
    pub fn run(mut self) -> Result<(Image, PatchOutcome), WareError> {
        self.verify_checksum()?;
        self.verify_patches()?;
        self.apply()?;
        let outcome = self.reseal()?;
        Ok((self.image, outcome))
    }

    /// Dry run: checksum and patch sites only, image untouched
    pub fn check(mut self) -> Result<VerificationReport, WareError> {
        self.verify_checksum()?;
        let result = self.inspect();
        let report = self.settle(result, Stage::ChecksumVerified)?;
        self.stage = if report.is_clean() {
            Stage::PatchesVerified
        } else {
            Stage::Aborted
        };
        Ok(report)
    }

    fn require(&self, expected: Stage) -> Result<(), WareError> {
        if self.stage != expected {
            return Err(WareError::Stage {
                expected,
                found: self.stage,
            });
        }
        Ok(())
    }

    fn settle<T>(&mut self, result: Result<T, WareError>, next: Stage) -> Result<T, WareError> {
        match result {
            Ok(value) => {
                self.stage = next;
                Ok(value)
            }
            Err(e) => {
                error!("aborted after {:?}: {}", self.stage, e);
                self.stage = Stage::Aborted;
                Err(e)
            }
        }
    }
}

fn hex_words(words: &[u16]) -> String {
    let words: Vec<String> = words.iter().map(|w| format!("{:04x}", w)).collect();
    format!("[{}]", words.join(" "))
}
