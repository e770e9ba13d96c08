//! Lazy pixel-stream transformers.
//!
//! All three adapt any iterator yielding `Result<ThinPixel<N>>` and keep no
//! state beyond the wrapped iterator:
//!
//! - [`JoinGenomicCoords`] — replace bin ids with real bins
//! - [`CoarsenPixels`] — re-bin a sorted stream to a coarser resolution
//! - [`PixelRandomSampler`] — seeded binomial subsampling of integer counts

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use velella_core::{Error, Result};

use crate::bins::BinTable;
use crate::pixel::{Count, IntCount, Pixel, ThinPixel};

// ---------------------------------------------------------------------------
// JoinGenomicCoords
// ---------------------------------------------------------------------------

/// Joins genomic coordinates onto a thin pixel stream.
pub struct JoinGenomicCoords<I, N> {
    src: I,
    bins: Arc<BinTable>,
    _marker: PhantomData<N>,
}

impl<I, N> JoinGenomicCoords<I, N> {
    pub fn new(src: I, bins: Arc<BinTable>) -> Self {
        Self {
            src,
            bins,
            _marker: PhantomData,
        }
    }
}

impl<I, N> Iterator for JoinGenomicCoords<I, N>
where
    I: Iterator<Item = Result<ThinPixel<N>>>,
    N: Count,
{
    type Item = Result<Pixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.src.next()? {
            Ok(p) => Some(self.bins.bin(p.bin1_id).and_then(|bin1| {
                self.bins.bin(p.bin2_id).map(|bin2| Pixel {
                    bin1,
                    bin2,
                    count: p.count,
                })
            })),
            Err(e) => Some(Err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// CoarsenPixels
// ---------------------------------------------------------------------------

/// Re-bins a sorted pixel stream to `bin_size * factor`, coalescing input
/// pixels that land on the same coarse cell.
///
/// The source must be sorted by `(bin1_id, bin2_id)`; the output is then
/// sorted as well, so calls chain (`factor` composes multiplicatively).
/// Pixels of one coarse row are buffered until the row is complete and
/// flushed in `bin2` order.
pub struct CoarsenPixels<I, N: Count> {
    src: I,
    src_bins: Arc<BinTable>,
    dst_bins: Arc<BinTable>,
    factor: u64,
    row: Option<u64>,
    acc: BTreeMap<u64, N>,
    flushed: VecDeque<ThinPixel<N>>,
    done: bool,
}

impl<I, N: Count> CoarsenPixels<I, N> {
    /// Wrap a sorted stream binned by `src_bins`.
    pub fn new(src: I, src_bins: Arc<BinTable>, factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(Error::InvalidArgument(
                "coarsening factor cannot be zero".into(),
            ));
        }
        let dst_size = src_bins.bin_size().checked_mul(factor).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "coarsening factor {factor} overflows the bin size"
            ))
        })?;
        let dst_bins = Arc::new(BinTable::new(src_bins.reference().clone(), dst_size)?);
        Ok(Self {
            src,
            src_bins,
            dst_bins,
            factor: u64::from(factor),
            row: None,
            acc: BTreeMap::new(),
            flushed: VecDeque::new(),
            done: false,
        })
    }

    /// Bin table of the coarsened stream.
    pub fn dest_bins(&self) -> Arc<BinTable> {
        Arc::clone(&self.dst_bins)
    }

    fn map_bin(&self, id: u64) -> Result<u64> {
        let b = self.src_bins.bin(id)?;
        Ok(self.dst_bins.chrom_offset(b.chrom_id)? + b.rel_id / self.factor)
    }

    fn flush_row(&mut self) {
        if let Some(row) = self.row {
            for (bin2_id, count) in std::mem::take(&mut self.acc) {
                self.flushed.push_back(ThinPixel {
                    bin1_id: row,
                    bin2_id,
                    count,
                });
            }
        }
    }
}

impl<I, N> Iterator for CoarsenPixels<I, N>
where
    I: Iterator<Item = Result<ThinPixel<N>>>,
    N: Count,
{
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(p) = self.flushed.pop_front() {
                return Some(Ok(p));
            }
            if self.done {
                return None;
            }
            match self.src.next() {
                None => {
                    self.done = true;
                    self.flush_row();
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(p)) => {
                    let mapped = self
                        .map_bin(p.bin1_id)
                        .and_then(|d1| self.map_bin(p.bin2_id).map(|d2| (d1, d2)));
                    let (d1, d2) = match mapped {
                        Ok(d) => d,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    if self.row != Some(d1) {
                        self.flush_row();
                        self.row = Some(d1);
                    }
                    let cell = self.acc.entry(d2).or_insert_with(N::zero);
                    *cell = cell.add(p.count);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PixelRandomSampler
// ---------------------------------------------------------------------------

/// Counts up to this size are subsampled by running the Bernoulli process
/// outright; anything larger takes the normal approximation.
const EXACT_TRIAL_LIMIT: u64 = 64;

/// Seedable splitmix64 generator, small enough to keep sampling
/// dependency-free and stable across platforms.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform draw in `[0, 1)` built from the top 53 bits.
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Standard normal draw (Box-Muller; `1 - u` keeps the log argument
    /// strictly positive).
    fn next_gaussian(&mut self) -> f64 {
        let r = (-2.0 * (1.0 - self.next_unit()).ln()).sqrt();
        let theta = std::f64::consts::TAU * self.next_unit();
        r * theta.sin()
    }
}

/// Draw from `Binomial(n, p)`.
///
/// Small counts run every trial; larger ones round a
/// `N(np, np(1 - p))` draw, clamped back into `[0, n]`. Contact counts
/// big enough to hit the approximate branch dwarf its error.
fn draw_binomial(rng: &mut SplitMix64, n: u64, p: f64) -> u64 {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    if n <= EXACT_TRIAL_LIMIT {
        return (0..n).filter(|_| rng.next_unit() < p).count() as u64;
    }

    let mean = n as f64 * p;
    let sd = (mean * (1.0 - p)).sqrt();
    let draw = (mean + sd * rng.next_gaussian()).round();
    (draw.max(0.0) as u64).min(n)
}

/// Bernoulli subsampling of a pixel stream: each pixel's count is replaced
/// by a `Binomial(count, fraction)` draw; pixels whose draw is zero are
/// skipped.
///
/// The same seed over the same input sequence reproduces the same output,
/// and ordering is preserved. Only integer count types are supported.
pub struct PixelRandomSampler<I, N> {
    src: I,
    fraction: f64,
    rng: SplitMix64,
    _marker: PhantomData<N>,
}

impl<I, N> PixelRandomSampler<I, N> {
    pub fn new(src: I, fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::InvalidArgument(format!(
                "sampling fraction {fraction} is not in [0, 1]"
            )));
        }
        Ok(Self {
            src,
            fraction,
            rng: SplitMix64::new(seed),
            _marker: PhantomData,
        })
    }
}

impl<I, N> Iterator for PixelRandomSampler<I, N>
where
    I: Iterator<Item = Result<ThinPixel<N>>>,
    N: IntCount,
{
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.src.next()? {
                Err(e) => return Some(Err(e)),
                Ok(p) => {
                    let kept = draw_binomial(&mut self.rng, p.count.to_u64(), self.fraction);
                    if kept == 0 {
                        continue;
                    }
                    return Some(Ok(ThinPixel {
                        bin1_id: p.bin1_id,
                        bin2_id: p.bin2_id,
                        count: N::from_u64(kept),
                    }));
                }
            }
        }
    }
}
