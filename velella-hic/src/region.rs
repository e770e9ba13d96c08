//! Genomic interval parsing — UCSC (`chr:start-end`) and BED styles.

use velella_core::{Error, Result};

use crate::reference::{Chromosome, Reference};

/// A half-open genomic interval `[start, end)` on one chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenomicInterval {
    pub chrom: Chromosome,
    pub start: u32,
    pub end: u32,
}

impl GenomicInterval {
    /// Build an interval, validating `start < end <= chrom.length`.
    pub fn new(chrom: Chromosome, start: u32, end: u32) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidQuery(format!(
                "interval {}:{start}-{end} has reversed or empty coordinates",
                chrom.name
            )));
        }
        if end > chrom.length {
            return Err(Error::InvalidArgument(format!(
                "interval {}:{start}-{end} extends past the end of the chromosome ({} bp)",
                chrom.name, chrom.length
            )));
        }
        Ok(Self { chrom, start, end })
    }

    /// Whole-chromosome interval.
    pub fn whole(chrom: Chromosome) -> Self {
        let end = chrom.length;
        Self {
            chrom,
            start: 0,
            end,
        }
    }

    /// Parse a UCSC-style query: `chrom`, or `chrom:start-end` (digit
    /// separators `,` are accepted). A bare chromosome name covers the
    /// whole chromosome.
    pub fn parse_ucsc(reference: &Reference, query: &str) -> Result<Self> {
        let query = query.trim();
        let Some((name, range)) = query.rsplit_once(':') else {
            let chrom = reference.chromosome_by_name(query)?;
            return Ok(Self::whole(chrom.clone()));
        };
        let chrom = reference.chromosome_by_name(name)?;
        let Some((start, end)) = range.split_once('-') else {
            return Err(Error::InvalidArgument(format!(
                "invalid query '{query}': expected 'chrom:start-end'"
            )));
        };
        Self::new(chrom.clone(), parse_pos(query, start)?, parse_pos(query, end)?)
    }

    /// Parse a BED-style record: `chrom<TAB>start<TAB>end`.
    pub fn parse_bed(reference: &Reference, record: &str) -> Result<Self> {
        let mut fields = record.trim().split_whitespace();
        let (name, start, end) = match (fields.next(), fields.next(), fields.next()) {
            (Some(n), Some(s), Some(e)) => (n, s, e),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "invalid BED record '{record}': expected three fields"
                )))
            }
        };
        let chrom = reference.chromosome_by_name(name)?;
        Self::new(
            chrom.clone(),
            parse_pos(record, start)?,
            parse_pos(record, end)?,
        )
    }

    /// Interval length in base pairs.
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Whether the interval is empty (never true for a constructed one).
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

fn parse_pos(query: &str, field: &str) -> Result<u32> {
    let cleaned: String = field.chars().filter(|&c| c != ',').collect();
    cleaned.parse().map_err(|_| {
        Error::InvalidArgument(format!("invalid position '{field}' in query '{query}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> Reference {
        Reference::new([("1", 248956422u32), ("chr2L", 23513712)]).unwrap()
    }

    #[test]
    fn ucsc_full_form() {
        let r = reference();
        let iv = GenomicInterval::parse_ucsc(&r, "1:5000000-6500000").unwrap();
        assert_eq!(iv.chrom.name, "1");
        assert_eq!((iv.start, iv.end), (5_000_000, 6_500_000));
    }

    #[test]
    fn ucsc_accepts_digit_separators() {
        let r = reference();
        let iv = GenomicInterval::parse_ucsc(&r, "chr2L:5,000,000-10,000,000").unwrap();
        assert_eq!((iv.start, iv.end), (5_000_000, 10_000_000));
    }

    #[test]
    fn bare_name_is_whole_chromosome() {
        let r = reference();
        let iv = GenomicInterval::parse_ucsc(&r, "chr2L").unwrap();
        assert_eq!((iv.start, iv.end), (0, 23_513_712));
    }

    #[test]
    fn bed_form() {
        let r = reference();
        let iv = GenomicInterval::parse_bed(&r, "1\t100\t200").unwrap();
        assert_eq!((iv.start, iv.end), (100, 200));
        assert!(GenomicInterval::parse_bed(&r, "1\t100").is_err());
    }

    #[test]
    fn reversed_coordinates_rejected() {
        let r = reference();
        let err = GenomicInterval::parse_ucsc(&r, "1:200-100").unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn out_of_range_end_rejected() {
        let r = reference();
        let err = GenomicInterval::parse_ucsc(&r, "chr2L:0-999999999").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unknown_chromosome_rejected() {
        let r = reference();
        assert!(GenomicInterval::parse_ucsc(&r, "chr9:0-100").is_err());
        assert!(GenomicInterval::parse_ucsc(&r, "chr9").is_err());
    }
}
