//! Registered firmware builds
//!
//! Every address and word pattern below belongs to exactly one build and is
//! only valid for an image whose fingerprint matches that build.

use crate::catalog::{BuildId, GroupKind, PatchSet, PatchSpec, Replacement, Stamp, SubGroup};
use crate::container::Format;

/// Pack ASCII text into little-endian 16-bit words
const fn ascii_words<const N: usize>(text: &[u8]) -> [u16; N] {
    assert!(text.len() == N * 2);
    let mut words = [0u16; N];
    let mut i = 0;
    while i < N {
        words[i] = text[2 * i] as u16 | (text[2 * i + 1] as u16) << 8;
        i += 1;
    }
    words
}

const MAINWARE_1_9_1012: &[PatchSpec] = &[
    PatchSpec {
        name: "power button",
        target_address: 0x0802_7fb6,
        expected: Some(&[0x2b04]),
        replacement: Replacement::Words(&[0x2b05]),
    },
    PatchSpec {
        name: "power BLE",
        target_address: 0x0803_a7ca,
        expected: Some(&[0x2b04]),
        replacement: Replacement::Words(&[0x2b05]),
    },
    PatchSpec {
        name: "region BLE",
        target_address: 0x0803_a876,
        expected: Some(&[0x2b02]),
        replacement: Replacement::Words(&[0x2b03]),
    },
    PatchSpec {
        name: "region boot",
        target_address: 0x0803_ef00,
        expected: Some(&[0xbf08, 0xf884, 0x9109]),
        replacement: Replacement::Words(&[0xbf00, 0xbf00, 0xbf00]),
    },
    PatchSpec {
        name: "power boot",
        target_address: 0x0803_ef0a,
        expected: Some(&[0x2b04]),
        replacement: Replacement::Words(&[0x2b05]),
    },
];

const MAINWARE_1_9_1012_GROUPS: &[SubGroup] = &[SubGroup {
    kind: GroupKind::FakeVersion,
    specs: &[PatchSpec {
        name: "header version",
        target_address: 0x0802_0004,
        expected: Some(&[0x03f4, 0x0109]),
        replacement: Replacement::FakeVersion,
    }],
}];

const BLEWARE_1_4_1_STAMP: [u16; 11] = ascii_words(b"Mar 29 2021 / 14:20:30");

const BLEWARE_1_4_1: &[PatchSpec] = &[
    PatchSpec {
        name: "offset dump",
        target_address: 0x0002_a108,
        expected: Some(&[0xf6a1, 0x0000]),
        replacement: Replacement::Words(&[0xc67d, 0x0002]),
    },
    PatchSpec {
        name: "enable debug",
        target_address: 0x0001_cfda,
        expected: Some(&[0xf440, 0x7040]),
        replacement: Replacement::Words(&[0xf240, 0x30ff]),
    },
    PatchSpec {
        name: "exception dump",
        target_address: 0x0002_94d8,
        expected: Some(&[0x0000, 0x0000]),
        replacement: Replacement::Words(&[0xbeb5, 0x1002]),
    },
    PatchSpec {
        name: "error spin",
        target_address: 0x0002_9440,
        expected: Some(&[0xf1f7, 0x1002]),
        replacement: Replacement::Words(&[0xfb35, 0x1002]),
    },
    PatchSpec {
        name: "system putchar",
        target_address: 0x0002_9604,
        expected: Some(&[0x60f9, 0x0002]),
        replacement: Replacement::PayloadEntry("putchar"),
    },
    PatchSpec {
        name: "dump",
        target_address: 0x0002_c67c,
        expected: None,
        replacement: Replacement::Payload,
    },
    PatchSpec {
        name: "date/time",
        target_address: 0x0000_570f,
        expected: Some(&BLEWARE_1_4_1_STAMP),
        replacement: Replacement::Stamp,
    },
];

const BLEWARE_2_4_1_STAMP: [u16; 11] = ascii_words(b"Mar 29 2021 / 14:17:30");

const BLEWARE_2_4_1: &[PatchSpec] = &[
    PatchSpec {
        name: "offset dump",
        target_address: 0x0003_237c,
        expected: Some(&[0x0fa5, 0x0001]),
        replacement: Replacement::Words(&[0x531d, 0x0003]),
    },
    PatchSpec {
        name: "enable debug",
        target_address: 0x0002_2306,
        expected: Some(&[0xf440, 0x7040]),
        replacement: Replacement::Words(&[0xf240, 0x30ff]),
    },
    PatchSpec {
        name: "exception dump",
        target_address: 0x0003_1770,
        expected: Some(&[0x0000, 0x0000]),
        replacement: Replacement::Words(&[0xbeb5, 0x1002]),
    },
    PatchSpec {
        name: "error spin",
        target_address: 0x0003_16d8,
        expected: Some(&[0xf1f7, 0x1002]),
        replacement: Replacement::Words(&[0xfb35, 0x1002]),
    },
    PatchSpec {
        name: "system putchar",
        target_address: 0x0003_189c,
        expected: Some(&[0xdbc9, 0x0002]),
        replacement: Replacement::PayloadEntry("putchar"),
    },
    PatchSpec {
        name: "dump",
        target_address: 0x0003_531c,
        expected: None,
        replacement: Replacement::Payload,
    },
    PatchSpec {
        name: "date/time",
        target_address: 0x0000_2677,
        expected: Some(&BLEWARE_2_4_1_STAMP),
        replacement: Replacement::Stamp,
    },
];

/// All registered builds
pub static PATCHSETS: &[PatchSet] = &[
    PatchSet {
        name: "mainware 1.9.1012",
        build: BuildId {
            format: Format::Monolithic,
            version: Some(0x0109_03f4),
            crc: 0x76c1_ab9d,
            length: 0x0002_fcc8,
        },
        patches: MAINWARE_1_9_1012,
        groups: MAINWARE_1_9_1012_GROUPS,
        stamp: Stamp::Clock,
    },
    PatchSet {
        name: "bleware 1.4.1",
        build: BuildId {
            format: Format::Segmented,
            version: None,
            crc: 0xb79c_4373,
            length: 0x0002_c67c,
        },
        patches: BLEWARE_1_4_1,
        groups: &[],
        stamp: Stamp::Fixed {
            date: "May 12 2025",
            time: "09:03:35",
        },
    },
    PatchSet {
        name: "bleware 2.4.1",
        build: BuildId {
            format: Format::Segmented,
            version: None,
            crc: 0x884a_9283,
            length: 0x0003_531c,
        },
        patches: BLEWARE_2_4_1,
        groups: &[],
        stamp: Stamp::Fixed {
            date: "Jun 10 2025",
            time: "12:02:27",
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_words() {
        assert_eq!(ascii_words::<2>(b"Mar "), [0x614d, 0x2072]);
        assert_eq!(BLEWARE_1_4_1_STAMP[0], u16::from_le_bytes(*b"Ma"));
        assert_eq!(BLEWARE_2_4_1_STAMP[10], u16::from_le_bytes(*b"30"));
    }

    #[test]
    fn test_fingerprints_unique() {
        for (i, a) in PATCHSETS.iter().enumerate() {
            for b in &PATCHSETS[i + 1..] {
                assert_ne!(a.build, b.build, "{} / {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_expected_lengths_match_fixed_replacements() {
        for set in PATCHSETS {
            let groups = set.groups.iter().flat_map(|g| g.specs.iter());
            for spec in set.patches.iter().chain(groups) {
                if let (Some(expected), Replacement::Words(words)) =
                    (spec.expected, spec.replacement)
                {
                    assert_eq!(expected.len(), words.len(), "{}: {}", set.name, spec.name);
                }
            }
        }
    }

    #[test]
    fn test_payload_appended_at_end_of_image() {
        for set in PATCHSETS {
            for spec in set.patches {
                if spec.replacement == Replacement::Payload {
                    let base = set.build.format.base_address();
                    assert_eq!(spec.target_address - base, set.build.length, "{}", set.name);
                }
            }
        }
    }

    #[test]
    fn test_conditional_patches_inside_declared_length() {
        for set in PATCHSETS {
            let base = set.build.format.base_address();
            let groups = set.groups.iter().flat_map(|g| g.specs.iter());
            for spec in set.patches.iter().chain(groups) {
                if let Some(expected) = spec.expected {
                    let offset = spec.target_address - base;
                    let end = offset + expected.len() as u32 * 2;
                    assert!(end <= set.build.length, "{}: {}", set.name, spec.name);
                }
            }
        }
    }
}
