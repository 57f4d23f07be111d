use std::io::Read;

use crate::{XlsxError, XlsxPackageLimits};

/// Whether two part names address the same part.
///
/// Producers disagree on leading `/`, `\` separators, ASCII case and percent-encoding, so all
/// four are normalized away before comparing.
pub(crate) fn zip_part_names_equivalent(a: &str, b: &str) -> bool {
    canonical_bytes(a).eq(canonical_bytes(b))
}

fn canonical_bytes(name: &str) -> impl Iterator<Item = u8> + '_ {
    PercentDecoded {
        rest: name.as_bytes(),
    }
    .map(|b| if b == b'\\' { b'/' } else { b.to_ascii_lowercase() })
    .skip_while(|b| *b == b'/')
}

struct PercentDecoded<'a> {
    rest: &'a [u8],
}

impl Iterator for PercentDecoded<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let rest = self.rest;
        match rest {
            [] => None,
            [b'%', hi, lo, tail @ ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                self.rest = tail;
                Some(hex_digit(*hi) << 4 | hex_digit(*lo))
            }
            [b, tail @ ..] => {
                self.rest = tail;
                Some(*b)
            }
        }
    }
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Running total of inflated bytes for one package, checked against [`XlsxPackageLimits`].
pub(crate) struct InflateBudget {
    limits: XlsxPackageLimits,
    used: u64,
}

impl InflateBudget {
    pub(crate) fn new(limits: XlsxPackageLimits) -> Self {
        Self { limits, used: 0 }
    }

    /// Inflate one entry.
    ///
    /// `declared_size` (from the ZIP header) only short-circuits; the read itself is capped, so a
    /// forged header cannot force an unbounded allocation.
    pub(crate) fn read_part<R: Read>(
        &mut self,
        part: &str,
        declared_size: u64,
        entry: R,
    ) -> Result<Vec<u8>, XlsxError> {
        let part_max = self.limits.max_part_bytes;
        let remaining = self.limits.max_total_bytes.saturating_sub(self.used);
        if declared_size > part_max {
            return Err(self.part_too_large(part, declared_size));
        }
        if declared_size > remaining {
            return Err(self.package_too_large(declared_size));
        }

        let mut buf = Vec::new();
        entry
            .take(part_max.min(remaining).saturating_add(1))
            .read_to_end(&mut buf)?;

        let size = buf.len() as u64;
        if size > part_max {
            return Err(self.part_too_large(part, size));
        }
        if size > remaining {
            return Err(self.package_too_large(size));
        }
        self.used += size;
        Ok(buf)
    }

    fn part_too_large(&self, part: &str, size: u64) -> XlsxError {
        XlsxError::PartTooLarge {
            part: part.to_string(),
            size,
            max: self.limits.max_part_bytes,
        }
    }

    fn package_too_large(&self, adding: u64) -> XlsxError {
        XlsxError::PackageTooLarge {
            total: self.used.saturating_add(adding),
            max: self.limits.max_total_bytes,
        }
    }
}
