//! Pixel selectors — sorted, filtered, normalized pixel streams for one
//! interval-pair query.
//!
//! The two storage backends answer the same contract, so the selector is a
//! closed sum type rather than a trait object. Iterators yield
//! `Result<ThinPixel<N>>` in ascending `(bin1_id, bin2_id)` order with no
//! duplicate cells; every error of the underlying storage surfaces through
//! the iterator.

use std::sync::Arc;

use velella_core::Result;

use crate::bbm::{BbmFooter, BbmInner, BlockCandidate};
use crate::bins::{BinTable, PixelCoordinates};
use crate::cache::{BlockCache, BlockKey};
use crate::norm::MatrixType;
use crate::pixel::{Count, ThinPixel};

/// Normalization weight slices covering the two queried chromosomes,
/// indexed by chromosome-relative bin id.
pub(crate) struct Weights {
    pub(crate) w1: Vec<f64>,
    pub(crate) w2: Vec<f64>,
}

/// A prepared interval-pair query over either backend.
#[derive(Debug)]
pub enum PixelSelector {
    Mres(MresSelector),
    Bbm(BbmSelector),
}

impl PixelSelector {
    /// Iterate the query's pixels with the requested count type.
    pub fn iter<N: Count>(&self) -> PixelIter<N> {
        match self {
            PixelSelector::Mres(sel) => PixelIter::Mres(MresIter::new(sel)),
            PixelSelector::Bbm(sel) => PixelIter::Bbm(BbmIter::new(sel)),
        }
    }

    /// Collect the whole stream.
    pub fn read_all<N: Count>(&self) -> Result<Vec<ThinPixel<N>>> {
        self.iter::<N>().collect()
    }

    pub fn coord1(&self) -> &PixelCoordinates {
        match self {
            PixelSelector::Mres(sel) => &sel.coord1,
            PixelSelector::Bbm(sel) => &sel.coord1,
        }
    }

    pub fn coord2(&self) -> &PixelCoordinates {
        match self {
            PixelSelector::Mres(sel) => &sel.coord2,
            PixelSelector::Bbm(sel) => &sel.coord2,
        }
    }

    pub fn bins(&self) -> &Arc<BinTable> {
        match self {
            PixelSelector::Mres(sel) => &sel.bins,
            PixelSelector::Bbm(sel) => &sel.bins,
        }
    }

    /// Whether both intervals lie on the same chromosome.
    pub fn is_intra(&self) -> bool {
        self.coord1().chrom_id() == self.coord2().chrom_id()
    }
}

/// Iterator over a [`PixelSelector`].
pub enum PixelIter<N> {
    Mres(MresIter<N>),
    Bbm(BbmIter<N>),
}

impl<N: Count> Iterator for PixelIter<N> {
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            PixelIter::Mres(it) => it.next(),
            PixelIter::Bbm(it) => it.next(),
        }
    }
}

// ---------------------------------------------------------------------------
// MRES backend
// ---------------------------------------------------------------------------

/// Query over an MRES matrix: a row-range scan of the bin1-offset index.
#[derive(Debug)]
pub struct MresSelector {
    pub(crate) datasets: Arc<crate::mres::MresDatasets>,
    pub(crate) bins: Arc<BinTable>,
    pub(crate) coord1: PixelCoordinates,
    pub(crate) coord2: PixelCoordinates,
    /// `bin1_offset` entries for rows `a_lo ..= a_hi + 1`.
    pub(crate) offsets: Vec<u64>,
    pub(crate) weights: Option<Arc<Weights>>,
}

pub struct MresIter<N> {
    datasets: Arc<crate::mres::MresDatasets>,
    offsets: Vec<u64>,
    weights: Option<Arc<Weights>>,
    a_lo: u64,
    a_hi: u64,
    b_lo: u64,
    b_hi: u64,
    chrom1_start: u64,
    chrom2_start: u64,
    row: u64,
    buffer: Vec<ThinPixel<N>>,
    buffer_at: usize,
    errored: bool,
}

impl<N: Count> MresIter<N> {
    fn new(sel: &MresSelector) -> Self {
        let (a_lo, a_hi) = sel.coord1.global_range();
        let (b_lo, b_hi) = sel.coord2.global_range();
        Self {
            datasets: Arc::clone(&sel.datasets),
            offsets: sel.offsets.clone(),
            weights: sel.weights.clone(),
            a_lo,
            a_hi,
            b_lo,
            b_hi,
            chrom1_start: a_lo - sel.coord1.bin1.rel_id,
            chrom2_start: b_lo - sel.coord2.bin1.rel_id,
            row: a_lo,
            buffer: Vec::new(),
            buffer_at: 0,
            errored: false,
        }
    }

    /// Decode the pixels of one matrix row that fall inside the query.
    fn fill_row(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer_at = 0;

        let i = (self.row - self.a_lo) as usize;
        let (lo, hi) = (self.offsets[i], self.offsets[i + 1]);
        if lo == hi {
            return Ok(());
        }

        let bin2 = self.datasets.read_bin2(lo, hi)?;
        // Rows are ascending in bin2_id, so the query span is contiguous.
        let first = bin2.partition_point(|&b| b < self.b_lo);
        let last = bin2.partition_point(|&b| b <= self.b_hi);
        if first == last {
            return Ok(());
        }

        let counts = self
            .datasets
            .read_counts(lo + first as u64, lo + last as u64)?;
        for (k, &b2) in bin2[first..last].iter().enumerate() {
            let mut count = counts[k];
            if let Some(w) = &self.weights {
                let w1 = w.w1[(self.row - self.chrom1_start) as usize];
                let w2 = w.w2[(b2 - self.chrom2_start) as usize];
                count /= w1 * w2;
            }
            self.buffer.push(ThinPixel {
                bin1_id: self.row,
                bin2_id: b2,
                count: N::from_f64(count),
            });
        }
        Ok(())
    }
}

impl<N: Count> Iterator for MresIter<N> {
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.errored {
                return None;
            }
            if self.buffer_at < self.buffer.len() {
                let p = self.buffer[self.buffer_at];
                self.buffer_at += 1;
                return Some(Ok(p));
            }
            if self.row > self.a_hi {
                return None;
            }
            if let Err(e) = self.fill_row() {
                self.errored = true;
                return Some(Err(e));
            }
            self.row += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// BBM backend
// ---------------------------------------------------------------------------

/// Query over a BBM matrix: a walk of the block grid, one grid row at a
/// time, pulling blocks through the shared cache.
#[derive(Debug)]
pub struct BbmSelector {
    pub(crate) inner: Arc<BbmInner>,
    pub(crate) footer: Arc<BbmFooter>,
    pub(crate) cache: Arc<BlockCache>,
    pub(crate) bins: Arc<BinTable>,
    pub(crate) coord1: PixelCoordinates,
    pub(crate) coord2: PixelCoordinates,
    /// Blocks intersecting the query, sorted by `(row, col)`.
    pub(crate) candidates: Arc<Vec<BlockCandidate>>,
}

pub struct BbmIter<N> {
    inner: Arc<BbmInner>,
    footer: Arc<BbmFooter>,
    cache: Arc<BlockCache>,
    candidates: Arc<Vec<BlockCandidate>>,
    r1: (u64, u64),
    r2: (u64, u64),
    chrom1_start: u64,
    chrom2_start: u64,
    intra: bool,
    at: usize,
    buffer: Vec<ThinPixel<N>>,
    buffer_at: usize,
    errored: bool,
}

impl<N: Count> BbmIter<N> {
    fn new(sel: &BbmSelector) -> Self {
        let (a_lo, _) = sel.coord1.global_range();
        let (b_lo, _) = sel.coord2.global_range();
        Self {
            inner: Arc::clone(&sel.inner),
            footer: Arc::clone(&sel.footer),
            cache: Arc::clone(&sel.cache),
            candidates: Arc::clone(&sel.candidates),
            r1: sel.coord1.rel_range(),
            r2: sel.coord2.rel_range(),
            chrom1_start: a_lo - sel.coord1.bin1.rel_id,
            chrom2_start: b_lo - sel.coord2.bin1.rel_id,
            intra: sel.coord1.chrom_id() == sel.coord2.chrom_id(),
            at: 0,
            buffer: Vec::new(),
            buffer_at: 0,
            errored: false,
        }
    }

    /// Consume every block sharing the current grid row, pool the surviving
    /// pixels, and sort them. Grid rows are visited in order, so this yields
    /// the global sort without a full external merge.
    fn fill_grid_row(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer_at = 0;

        let row = self.candidates[self.at].row;
        while self.at < self.candidates.len() && self.candidates[self.at].row == row {
            let cand = self.candidates[self.at].clone();
            self.at += 1;
            self.consume_block(&cand)?;
        }
        self.buffer
            .sort_unstable_by_key(|p| (p.bin1_id, p.bin2_id));
        Ok(())
    }

    fn consume_block(&mut self, cand: &BlockCandidate) -> Result<()> {
        let key = BlockKey {
            chrom1_id: self.footer.chrom1_id,
            chrom2_id: self.footer.chrom2_id,
            block_id: cand.entry.id,
        };
        let inner = Arc::clone(&self.inner);
        let footer = Arc::clone(&self.footer);
        let entry = cand.entry.clone();
        let block = self
            .cache
            .get_or_load(key, move || inner.read_block(&footer, &entry))?;

        let (r1, r2) = (self.r1, self.r2);
        let in_rect =
            move |b1: u64, b2: u64| b1 >= r1.0 && b1 <= r1.1 && b2 >= r2.0 && b2 <= r2.1;
        for p in block.pixels() {
            // Each matrix cell is emitted exactly once: the stored
            // orientation wins, the transposed consult only picks up cells
            // whose stored form falls outside the rectangle.
            let (rel1, rel2) = if !cand.transposed {
                if !in_rect(p.bin1, p.bin2) {
                    continue;
                }
                (p.bin1, p.bin2)
            } else {
                if in_rect(p.bin1, p.bin2) || !in_rect(p.bin2, p.bin1) {
                    continue;
                }
                (p.bin2, p.bin1)
            };

            let count = self.transform(rel1, rel2, f64::from(p.count));
            self.buffer.push(ThinPixel {
                bin1_id: self.chrom1_start + rel1,
                bin2_id: self.chrom2_start + rel2,
                count: N::from_f64(count),
            });
        }
        Ok(())
    }

    /// Normalization and observed/expected/OE transforms, in that order.
    fn transform(&self, rel1: u64, rel2: u64, mut count: f64) -> f64 {
        let f = &self.footer;
        let skip_normalization = f.normalization.is_none() || f.matrix_type == MatrixType::Expected;
        if !skip_normalization {
            count /= f.c1_norm[rel1 as usize] * f.c2_norm[rel2 as usize];
        }
        if f.matrix_type == MatrixType::Observed {
            return count;
        }
        let expected = if self.intra {
            // Indexed by diagonal distance (transposed pixels may have
            // rel1 > rel2); the footer reader has verified the vector
            // covers every distance this pair can produce.
            f.expected_values[rel1.abs_diff(rel2) as usize]
        } else {
            f.average
        };
        match f.matrix_type {
            MatrixType::Expected => expected,
            _ => count / expected,
        }
    }
}

impl<N: Count> Iterator for BbmIter<N> {
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.errored {
                return None;
            }
            if self.buffer_at < self.buffer.len() {
                let p = self.buffer[self.buffer_at];
                self.buffer_at += 1;
                return Some(Ok(p));
            }
            if self.at >= self.candidates.len() {
                return None;
            }
            if let Err(e) = self.fill_grid_row() {
                self.errored = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mres::tests::{toy_reference, write_toy_file};
    use crate::mres::{MresFile, MresWriter};
    use crate::norm::Normalization;
    use velella_core::Error;

    fn open_toy(dir: &tempfile::TempDir) -> MresFile {
        let path = dir.path().join("toy.mres");
        write_toy_file(&path);
        MresFile::open(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn intra_rectangle_query() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        // Bins 0..=2 of "1" against bins 0..=6.
        let sel = clr.fetch_2d("1:0-300", "1:0-700", Normalization::None).unwrap();
        let pixels = sel.read_all::<i32>().unwrap();
        let counts: Vec<_> = pixels.iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![20, 1, 5, 18, 8, 9]);

        for p in &pixels {
            assert!(p.bin1_id <= 2);
            assert!(p.bin2_id <= 6);
        }
        assert!(pixels
            .windows(2)
            .all(|w| (w[0].bin1_id, w[0].bin2_id) < (w[1].bin1_id, w[1].bin2_id)));
    }

    #[test]
    fn inter_query() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        let sel = clr.fetch_2d("1", "2", Normalization::None).unwrap();
        let pixels = sel.read_all::<i32>().unwrap();
        assert_eq!(pixels.len(), 1);
        assert_eq!(
            (pixels[0].bin1_id, pixels[0].bin2_id, pixels[0].count),
            (4, 11, 3)
        );
    }

    #[test]
    fn whole_chromosome_sums_match_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        let sel = clr.fetch("1", Normalization::None).unwrap();
        let total: i64 = sel
            .read_all::<i32>()
            .unwrap()
            .iter()
            .map(|p| i64::from(p.count))
            .sum();
        // Every intra pixel of "1": 20+1+5+18+8+9+2+6+7.
        assert_eq!(total, 76);

        let sel2 = clr.fetch("2", Normalization::None).unwrap();
        let total2: i64 = sel2
            .read_all::<i32>()
            .unwrap()
            .iter()
            .map(|p| i64::from(p.count))
            .sum();
        assert_eq!(total2, 15);
        assert_eq!(total + total2, clr.attributes().cis as i64);
    }

    #[test]
    fn below_diagonal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        let err = clr
            .fetch_2d("2:0-100", "1:0-100", Normalization::None)
            .unwrap_err();
        match err {
            Error::InvalidQuery(msg) => assert!(msg.contains("lower triangle")),
            other => panic!("unexpected error: {other}"),
        }

        let err = clr
            .fetch_2d("1:500-600", "1:0-100", Normalization::None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn empty_region_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        let sel = clr.fetch("1:600-700", Normalization::None).unwrap();
        assert!(sel.read_all::<i32>().unwrap().is_empty());
    }

    #[test]
    fn missing_normalization_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let clr = open_toy(&dir);

        let err = clr.fetch("1", Normalization::Kr).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn weights_divide_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weighted.mres");
        {
            let mut writer = MresWriter::create(
                path.to_str().unwrap(),
                &toy_reference(),
                100,
                "toy",
                false,
                false,
            )
            .unwrap();
            writer
                .add_pixels([
                    crate::pixel::ThinPixel { bin1_id: 0, bin2_id: 1, count: 8i32 },
                    crate::pixel::ThinPixel { bin1_id: 1, bin2_id: 2, count: 4i32 },
                ])
                .unwrap();
            writer.finish().unwrap();
        }
        // Attach a weight vector by hand: w = 0.5 everywhere.
        {
            let file = hdf5::File::open_rw(&path).unwrap();
            let group = file.group("bins").unwrap();
            let w = ndarray::Array1::from(vec![0.5f64; 15]);
            group
                .new_dataset_builder()
                .with_data(&w)
                .create("weight")
                .unwrap();
        }

        let clr = MresFile::open(path.to_str().unwrap()).unwrap();
        let sel = clr.fetch("1", Normalization::Weight).unwrap();
        let pixels = sel.read_all::<f64>().unwrap();
        // count / (0.5 * 0.5) = count * 4.
        assert_eq!(pixels[0].count, 32.0);
        assert_eq!(pixels[1].count, 16.0);
    }
}
