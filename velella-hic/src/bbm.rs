//! BBM binary format reader.
//!
//! BBM is a legacy monolithic little-endian format holding one genome-wide
//! contact map at several resolutions. The file carries a header with the
//! chromosome table and resolution list, a master index keyed by
//! `"<chromA_id>_<chromB_id>"` (with `chromA_id <= chromB_id`), and one
//! body per chromosome pair containing per-resolution sections: a sparse
//! block index, the pair's total counts, expected-value vectors for intra
//! matrices, and per-method normalization vectors. Matrix bodies are
//! zlib-compressed blocks covering `block_bin_size x block_bin_size` tiles
//! of the pair, in two pixel encodings (dense-by-row and list-of-points).
//!
//! Version 8 stores chromosome lengths as i32, version 9 as i64; everything
//! else is shared. The format is read-only here.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use velella_core::compress::zlib_decompress;
use velella_core::{ByteCursor, Error, FileCursor, RandomAccessFile, Result};

use crate::bins::{BinTable, PixelCoordinates};
use crate::cache::{BlockCache, BlockPixel, InteractionBlock};
use crate::mres::validate_orientation;
use crate::norm::{MatrixType, MatrixUnit, Normalization};
use crate::reference::Reference;
use crate::region::GenomicInterval;
use crate::selector::{BbmSelector, PixelSelector};

/// File magic.
pub const BBM_MAGIC: [u8; 4] = *b"BBM\0";
/// Oldest supported version (i32 chromosome lengths).
pub const BBM_MIN_VERSION: i32 = 8;
/// Newest supported version (i64 chromosome lengths).
pub const BBM_MAX_VERSION: i32 = 9;

/// Default byte budget of the shared block cache.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 500 << 20;

/// Check whether a file starts with the BBM magic.
pub fn is_bbm(path: impl AsRef<Path>) -> bool {
    RandomAccessFile::open(path)
        .and_then(|f| f.read_at(0, 4))
        .map(|magic| magic == BBM_MAGIC)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct MasterEntry {
    pub offset: u64,
    #[allow(dead_code)]
    pub size: u32,
}

#[derive(Debug)]
pub(crate) struct BbmHeader {
    pub version: i32,
    pub genome: String,
    pub attributes: Vec<(String, String)>,
    pub reference: Reference,
    pub resolutions: Vec<u32>,
    pub frag_resolutions: Vec<u32>,
    pub master_index: HashMap<String, MasterEntry>,
}

fn read_header(stream: &RandomAccessFile) -> Result<BbmHeader> {
    let path = stream.path().display().to_string();
    let magic = stream.read_at(0, 4)?;
    if magic != BBM_MAGIC {
        return Err(Error::Corrupt(format!(
            "{path}: not a valid BBM file (bad magic)"
        )));
    }

    let mut cur = stream.stream_at(4);
    let version = cur.read_i32()?;
    if !(BBM_MIN_VERSION..=BBM_MAX_VERSION).contains(&version) {
        return Err(Error::Corrupt(format!(
            "{path}: unsupported BBM version {version}"
        )));
    }
    let master_offset = cur.read_i64()?;
    if master_offset < 0 || master_offset as u64 >= stream.len() {
        return Err(Error::Corrupt(format!(
            "{path}: master index offset {master_offset} out of bounds"
        )));
    }
    let genome = cur.read_cstr()?;

    let n_attrs = read_count(&mut cur, &path, "attribute")?;
    let mut attributes = Vec::with_capacity(n_attrs);
    for _ in 0..n_attrs {
        let key = cur.read_cstr()?;
        let value = cur.read_cstr()?;
        attributes.push((key, value));
    }

    let n_chroms = read_count(&mut cur, &path, "chromosome")?;
    let mut chroms = Vec::with_capacity(n_chroms);
    for _ in 0..n_chroms {
        let name = cur.read_cstr()?;
        // Lengths widened to i64 in version 9.
        let length = if version >= 9 {
            cur.read_i64()?
        } else {
            i64::from(cur.read_i32()?)
        };
        if length <= 0 || length > i64::from(u32::MAX) {
            return Err(Error::Corrupt(format!(
                "{path}: invalid length {length} for chromosome '{name}'"
            )));
        }
        chroms.push((name, length as u32));
    }
    let reference = Reference::new(chroms)
        .map_err(|e| Error::Corrupt(format!("{path}: invalid chromosome table: {e}")))?;

    let n_res = read_count(&mut cur, &path, "resolution")?;
    let mut resolutions = Vec::with_capacity(n_res);
    for _ in 0..n_res {
        resolutions.push(cur.read_i32()? as u32);
    }
    let n_frag = read_count(&mut cur, &path, "fragment resolution")?;
    let mut frag_resolutions = Vec::with_capacity(n_frag);
    for _ in 0..n_frag {
        frag_resolutions.push(cur.read_i32()? as u32);
    }

    let master_index = read_master_index(stream, master_offset as u64, &path)?;

    Ok(BbmHeader {
        version,
        genome,
        attributes,
        reference,
        resolutions,
        frag_resolutions,
        master_index,
    })
}

fn read_master_index(
    stream: &RandomAccessFile,
    offset: u64,
    path: &str,
) -> Result<HashMap<String, MasterEntry>> {
    let mut cur = stream.stream_at(offset);
    let n = read_count(&mut cur, path, "master index entry")?;
    let mut index = HashMap::with_capacity(n);
    for _ in 0..n {
        let key = cur.read_cstr()?;
        let entry_offset = cur.read_i64()?;
        let size = cur.read_i32()?;
        if entry_offset < 0 || size < 0 {
            return Err(Error::Corrupt(format!(
                "{path}: negative offset in master index entry '{key}'"
            )));
        }
        index.insert(
            key,
            MasterEntry {
                offset: entry_offset as u64,
                size: size as u32,
            },
        );
    }
    Ok(index)
}

fn read_count(cur: &mut FileCursor<'_>, path: &str, what: &str) -> Result<usize> {
    let n = cur.read_i32()?;
    if n < 0 {
        return Err(Error::Corrupt(format!("{path}: negative {what} count")));
    }
    Ok(n as usize)
}

// ---------------------------------------------------------------------------
// Footers and the block index
// ---------------------------------------------------------------------------

/// One entry of a pair's sparse block index.
#[derive(Debug, Clone)]
pub(crate) struct BlockIndexEntry {
    pub id: u64,
    pub file_offset: u64,
    pub compressed_size: u32,
}

/// A block scheduled for one query, with its grid position as seen by the
/// query (`transposed` marks below-diagonal consults of intra matrices).
#[derive(Debug, Clone)]
pub(crate) struct BlockCandidate {
    pub row: u64,
    #[allow(dead_code)]
    pub col: u64,
    pub entry: BlockIndexEntry,
    pub transposed: bool,
}

/// Everything needed to answer queries for one
/// (chrom1, chrom2, matrix type, normalization) axis at one resolution.
#[derive(Debug)]
pub(crate) struct BbmFooter {
    pub chrom1_id: u32,
    pub chrom2_id: u32,
    pub block_bin_size: u64,
    pub block_column_count: u64,
    pub blocks: HashMap<u64, BlockIndexEntry>,
    #[allow(dead_code)]
    pub sum_counts: f64,
    /// Matrix-wide average count, the inter-chromosomal expected value.
    pub average: f64,
    pub expected_values: Vec<f64>,
    pub c1_norm: Vec<f64>,
    pub c2_norm: Vec<f64>,
    pub matrix_type: MatrixType,
    pub normalization: Normalization,
}

impl BbmFooter {
    fn empty(
        chrom1_id: u32,
        chrom2_id: u32,
        matrix_type: MatrixType,
        normalization: Normalization,
    ) -> Self {
        Self {
            chrom1_id,
            chrom2_id,
            block_bin_size: 1,
            block_column_count: 1,
            blocks: HashMap::new(),
            sum_counts: 0.0,
            average: 0.0,
            expected_values: Vec::new(),
            c1_norm: Vec::new(),
            c2_norm: Vec::new(),
            matrix_type,
            normalization,
        }
    }

    /// Blocks intersecting the query rectangle, in `(row, col)` order.
    ///
    /// Intra matrices store only blocks with `row <= col`; when the query
    /// rectangle reaches below the grid diagonal, the transposed stored
    /// block is consulted instead and its pixels are flipped before
    /// filtering.
    pub(crate) fn find_overlaps(
        &self,
        coord1: &PixelCoordinates,
        coord2: &PixelCoordinates,
    ) -> Vec<BlockCandidate> {
        let bb = self.block_bin_size;
        let (r1_lo, r1_hi) = coord1.rel_range();
        let (r2_lo, r2_hi) = coord2.rel_range();
        let intra = self.chrom1_id == self.chrom2_id;

        let mut out = Vec::new();
        for row in r1_lo / bb..=r1_hi / bb {
            for col in r2_lo / bb..=r2_hi / bb {
                let (stored_row, stored_col, transposed) = if intra && row > col {
                    (col, row, true)
                } else {
                    (row, col, false)
                };
                let id = stored_row * self.block_column_count + stored_col;
                if let Some(entry) = self.blocks.get(&id) {
                    out.push(BlockCandidate {
                        row,
                        col,
                        entry: entry.clone(),
                        transposed,
                    });
                }
            }
        }
        out.sort_by_key(|c| (c.row, c.col));
        out
    }
}

// ---------------------------------------------------------------------------
// File reader
// ---------------------------------------------------------------------------

/// Shared read-side state: the stream and the parsed header.
#[derive(Debug)]
pub(crate) struct BbmInner {
    stream: RandomAccessFile,
    pub(crate) header: BbmHeader,
}

impl BbmInner {
    fn open(path: &Path) -> Result<Self> {
        let stream = RandomAccessFile::open(path)?;
        let header = read_header(&stream)?;
        debug!(
            version = header.version,
            chromosomes = header.reference.len(),
            resolutions = header.resolutions.len(),
            "opened BBM file"
        );
        Ok(Self { stream, header })
    }

    /// Parse the footer of one chromosome pair for one resolution and
    /// normalization method.
    fn read_footer(
        &self,
        chrom1_id: u32,
        chrom2_id: u32,
        resolution: u32,
        matrix_type: MatrixType,
        normalization: Normalization,
    ) -> Result<BbmFooter> {
        let path = self.stream.path().display().to_string();
        let key = format!("{chrom1_id}_{chrom2_id}");
        let Some(entry) = self.header.master_index.get(&key) else {
            // A pair with no recorded interactions.
            return Ok(BbmFooter::empty(
                chrom1_id,
                chrom2_id,
                matrix_type,
                normalization,
            ));
        };

        let mut cur = self.stream.stream_at(entry.offset);
        let n_sections = read_count(&mut cur, &path, "section")?;
        for _ in 0..n_sections {
            let section_resolution = cur.read_i32()? as u32;
            let _unit = cur.read_cstr()?;
            let sum_counts = cur.read_f64()?;
            let block_bin_size = cur.read_i32()?;
            let block_column_count = cur.read_i32()?;
            let block_count = read_count(&mut cur, &path, "block")?;
            if block_bin_size <= 0 || block_column_count <= 0 {
                return Err(Error::Corrupt(format!(
                    "{path}: invalid block grid for pair {key}"
                )));
            }

            let wanted = section_resolution == resolution;
            let mut blocks = HashMap::new();
            for _ in 0..block_count {
                let id = cur.read_i32()?;
                let file_offset = cur.read_i64()?;
                let compressed_size = cur.read_i32()?;
                if wanted {
                    if id < 0 || file_offset < 0 || compressed_size < 0 {
                        return Err(Error::Corrupt(format!(
                            "{path}: negative block index entry for pair {key}"
                        )));
                    }
                    blocks.insert(
                        id as u64,
                        BlockIndexEntry {
                            id: id as u64,
                            file_offset: file_offset as u64,
                            compressed_size: compressed_size as u32,
                        },
                    );
                }
            }

            let n_expected = read_count(&mut cur, &path, "expected value")?;
            let mut expected_values = Vec::with_capacity(if wanted { n_expected } else { 0 });
            for _ in 0..n_expected {
                let v = cur.read_f64()?;
                if wanted {
                    expected_values.push(v);
                }
            }

            let n_methods = read_count(&mut cur, &path, "normalization method")?;
            let mut norm_vectors = None;
            for _ in 0..n_methods {
                let name = cur.read_cstr()?;
                let w1 = read_f64_vector(&mut cur, &path)?;
                let w2 = read_f64_vector(&mut cur, &path)?;
                if wanted && name == normalization.as_str() {
                    norm_vectors = Some((w1, w2));
                }
            }

            if !wanted {
                continue;
            }

            let (c1_norm, c2_norm) = match (normalization.is_none(), norm_vectors) {
                (true, _) => (Vec::new(), Vec::new()),
                (false, Some(vectors)) => vectors,
                (false, None) => {
                    return Err(Error::NotFound(format!(
                        "{path}: normalization weights for method '{normalization}' are not \
                         available for pair {key}"
                    )))
                }
            };

            let nb1 = bin_count_at(&self.header.reference, chrom1_id, resolution)?;
            let nb2 = bin_count_at(&self.header.reference, chrom2_id, resolution)?;
            if !normalization.is_none()
                && (c1_norm.len() as u64 != nb1 || c2_norm.len() as u64 != nb2)
            {
                return Err(Error::Corrupt(format!(
                    "{path}: normalization vector length mismatch for pair {key}"
                )));
            }
            // Expected/OE intra queries index this vector by diagonal
            // distance, so it must cover every distance the pair can
            // produce.
            if chrom1_id == chrom2_id
                && matrix_type != MatrixType::Observed
                && (expected_values.len() as u64) < nb1
            {
                return Err(Error::Corrupt(format!(
                    "{path}: expected-value vector for pair {key} is too short \
                     ({} entries for {nb1} bins)",
                    expected_values.len()
                )));
            }

            return Ok(BbmFooter {
                chrom1_id,
                chrom2_id,
                block_bin_size: block_bin_size as u64,
                block_column_count: block_column_count as u64,
                blocks,
                sum_counts,
                average: sum_counts / (nb1 as f64 * nb2 as f64),
                expected_values,
                c1_norm,
                c2_norm,
                matrix_type,
                normalization,
            });
        }

        // The pair exists but holds no section at this resolution.
        Ok(BbmFooter::empty(
            chrom1_id,
            chrom2_id,
            matrix_type,
            normalization,
        ))
    }

    /// Read, decompress, and decode one block.
    pub(crate) fn read_block(
        &self,
        footer: &BbmFooter,
        entry: &BlockIndexEntry,
    ) -> Result<InteractionBlock> {
        let raw = self
            .stream
            .read_at(entry.file_offset, entry.compressed_size as usize)?;
        let payload = zlib_decompress(&raw)?;
        let mut cur = ByteCursor::new(payload);

        let n_records = cur.read_i32()?;
        if n_records < 0 {
            return Err(Error::Corrupt("negative record count in block".into()));
        }
        let bin1_offset = i64::from(cur.read_i32()?);
        let bin2_offset = i64::from(cur.read_i32()?);
        let encoding = cur.read_u8()?;

        let mut pixels = Vec::with_capacity(n_records as usize);
        match encoding {
            1 => decode_type1(&mut cur, n_records as usize, bin1_offset, bin2_offset, &mut pixels)?,
            2 => decode_type2(&mut cur, bin1_offset, bin2_offset, &mut pixels)?,
            other => {
                return Err(Error::Corrupt(format!(
                    "unknown block encoding {other} in block {}",
                    entry.id
                )))
            }
        }

        if pixels.len() != n_records as usize {
            return Err(Error::Corrupt(format!(
                "block {} decoded {} pixels, header says {}",
                entry.id,
                pixels.len(),
                n_records
            )));
        }

        // Intra matrices are stored symmetric: keep the upper triangle.
        if footer.chrom1_id == footer.chrom2_id {
            for p in &mut pixels {
                if p.bin1 > p.bin2 {
                    std::mem::swap(&mut p.bin1, &mut p.bin2);
                }
            }
        }

        Ok(InteractionBlock::new(pixels))
    }
}

fn bin_count_at(reference: &Reference, chrom_id: u32, resolution: u32) -> Result<u64> {
    let chrom = reference.chromosome(chrom_id)?;
    Ok(u64::from(chrom.length).div_ceil(u64::from(resolution)))
}

fn read_f64_vector(cur: &mut FileCursor<'_>, path: &str) -> Result<Vec<f64>> {
    let n = read_count(cur, path, "vector element")?;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(cur.read_f64()?);
    }
    Ok(out)
}

/// Dense-by-row encoding: runs of `(row_count, row_idx, cells...)`.
fn decode_type1(
    cur: &mut ByteCursor,
    n_records: usize,
    bin1_offset: i64,
    bin2_offset: i64,
    pixels: &mut Vec<BlockPixel>,
) -> Result<()> {
    let short_bin1 = cur.read_u8()? != 0;
    let short_bin2 = cur.read_u8()? != 0;
    let short_count = cur.read_u8()? != 0;

    while pixels.len() < n_records {
        let row_count = if short_bin2 {
            i32::from(cur.read_i16()?)
        } else {
            cur.read_i32()?
        };
        if row_count <= 0 {
            return Err(Error::Corrupt("invalid row in dense-by-row block".into()));
        }
        let row_idx = if short_bin1 {
            i64::from(cur.read_i16()?)
        } else {
            i64::from(cur.read_i32()?)
        };
        for _ in 0..row_count {
            let col_idx = if short_bin2 {
                i64::from(cur.read_i16()?)
            } else {
                i64::from(cur.read_i32()?)
            };
            let count = if short_count {
                f32::from(cur.read_i16()?)
            } else {
                cur.read_f32()?
            };
            push_pixel(pixels, bin1_offset + row_idx, bin2_offset + col_idx, count)?;
        }
    }
    Ok(())
}

/// List-of-points encoding: a `w_cols`-wide dense window with sentinel
/// values (`i16::MIN` / NaN) marking empty cells.
fn decode_type2(
    cur: &mut ByteCursor,
    bin1_offset: i64,
    bin2_offset: i64,
    pixels: &mut Vec<BlockPixel>,
) -> Result<()> {
    let n_points = cur.read_i32()?;
    let w_cols = i64::from(cur.read_i16()?);
    let short_count = cur.read_u8()? != 0;
    if n_points < 0 || w_cols <= 0 {
        return Err(Error::Corrupt("invalid list-of-points block header".into()));
    }

    for i in 0..i64::from(n_points) {
        let count = if short_count {
            let v = cur.read_i16()?;
            if v == i16::MIN {
                continue;
            }
            f32::from(v)
        } else {
            let v = cur.read_f32()?;
            if v.is_nan() {
                continue;
            }
            v
        };
        push_pixel(
            pixels,
            bin1_offset + i / w_cols,
            bin2_offset + i % w_cols,
            count,
        )?;
    }
    Ok(())
}

fn push_pixel(pixels: &mut Vec<BlockPixel>, bin1: i64, bin2: i64, count: f32) -> Result<()> {
    if bin1 < 0 || bin2 < 0 {
        return Err(Error::Corrupt("negative bin id in block".into()));
    }
    pixels.push(BlockPixel {
        bin1: bin1 as u64,
        bin2: bin2 as u64,
        count,
    });
    Ok(())
}

type FooterKey = (u32, u32, Normalization);

/// A BBM file opened at one resolution.
///
/// The handle owns the reader, the bin table, an unbounded footer cache,
/// and the shared block cache; selectors hold shared references into all
/// of them.
#[derive(Debug)]
pub struct BbmFile {
    inner: Arc<BbmInner>,
    bins: Arc<BinTable>,
    cache: Arc<BlockCache>,
    footers: Mutex<HashMap<FooterKey, Arc<BbmFooter>>>,
    resolution: u32,
    matrix_type: MatrixType,
    unit: MatrixUnit,
}

impl BbmFile {
    /// Open a file at one base-pair resolution with the default matrix
    /// type (observed) and block-cache budget.
    pub fn open(path: impl AsRef<Path>, resolution: u32) -> Result<Self> {
        Self::open_with(
            path,
            resolution,
            MatrixType::Observed,
            MatrixUnit::Bp,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// Open a file selecting the matrix type and block-cache capacity.
    pub fn open_with(
        path: impl AsRef<Path>,
        resolution: u32,
        matrix_type: MatrixType,
        unit: MatrixUnit,
        cache_capacity: usize,
    ) -> Result<Self> {
        let inner = Arc::new(BbmInner::open(path.as_ref())?);
        Self::at_resolution(inner, resolution, matrix_type, unit, cache_capacity)
    }

    fn at_resolution(
        inner: Arc<BbmInner>,
        resolution: u32,
        matrix_type: MatrixType,
        unit: MatrixUnit,
        cache_capacity: usize,
    ) -> Result<Self> {
        if !inner.header.resolutions.contains(&resolution) {
            return Err(Error::NotFound(format!(
                "resolution {resolution} not found in {}; available: {:?}",
                inner.stream.path().display(),
                inner.header.resolutions
            )));
        }
        let bins = Arc::new(BinTable::new(inner.header.reference.clone(), resolution)?);
        Ok(Self {
            inner,
            bins,
            cache: Arc::new(BlockCache::new(cache_capacity)),
            footers: Mutex::new(HashMap::new()),
            resolution,
            matrix_type,
            unit,
        })
    }

    /// A handle onto another stored resolution, sharing the parsed header
    /// and stream but with its own caches.
    pub fn open_resolution(&self, resolution: u32) -> Result<Self> {
        Self::at_resolution(
            Arc::clone(&self.inner),
            resolution,
            self.matrix_type,
            self.unit,
            self.cache.capacity(),
        )
    }

    pub fn has_resolution(&self, resolution: u32) -> bool {
        self.inner.header.resolutions.contains(&resolution)
    }

    pub fn version(&self) -> i32 {
        self.inner.header.version
    }

    pub fn assembly(&self) -> &str {
        &self.inner.header.genome
    }

    /// Free-form attribute pairs from the header.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.inner.header.attributes
    }

    pub fn chromosomes(&self) -> &Reference {
        self.bins.reference()
    }

    pub fn bins(&self) -> &Arc<BinTable> {
        &self.bins
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Base-pair resolutions stored in the file.
    pub fn resolutions(&self) -> &[u32] {
        &self.inner.header.resolutions
    }

    pub fn matrix_type(&self) -> MatrixType {
        self.matrix_type
    }

    pub fn unit(&self) -> MatrixUnit {
        self.unit
    }

    /// Intra-chromosomal query over one region, parsed in UCSC syntax.
    pub fn fetch(&self, query: &str, norm: Normalization) -> Result<PixelSelector> {
        let iv = GenomicInterval::parse_ucsc(self.bins.reference(), query)?;
        let coords = self.bins.coordinates(&iv)?;
        self.fetch_coords(coords.clone(), coords, norm)
    }

    /// Two-interval query, parsed in UCSC syntax.
    pub fn fetch_2d(&self, query1: &str, query2: &str, norm: Normalization) -> Result<PixelSelector> {
        let iv1 = GenomicInterval::parse_ucsc(self.bins.reference(), query1)?;
        let iv2 = GenomicInterval::parse_ucsc(self.bins.reference(), query2)?;
        self.fetch_coords(
            self.bins.coordinates(&iv1)?,
            self.bins.coordinates(&iv2)?,
            norm,
        )
    }

    /// Query by precomputed bin spans.
    pub fn fetch_coords(
        &self,
        coord1: PixelCoordinates,
        coord2: PixelCoordinates,
        norm: Normalization,
    ) -> Result<PixelSelector> {
        validate_orientation(&coord1, &coord2)?;
        let footer = self.footer(coord1.chrom_id(), coord2.chrom_id(), norm)?;
        let candidates = Arc::new(footer.find_overlaps(&coord1, &coord2));
        Ok(PixelSelector::Bbm(BbmSelector {
            inner: Arc::clone(&self.inner),
            footer,
            cache: Arc::clone(&self.cache),
            bins: Arc::clone(&self.bins),
            coord1,
            coord2,
            candidates,
        }))
    }

    /// Number of footers parsed so far.
    pub fn num_cached_footers(&self) -> usize {
        self.footers.lock().len()
    }

    /// Drop all cached footers.
    pub fn purge_footers(&self) {
        self.footers.lock().clear();
    }

    fn footer(
        &self,
        chrom1_id: u32,
        chrom2_id: u32,
        norm: Normalization,
    ) -> Result<Arc<BbmFooter>> {
        let key = (chrom1_id, chrom2_id, norm);
        if let Some(footer) = self.footers.lock().get(&key) {
            return Ok(Arc::clone(footer));
        }
        let footer = Arc::new(self.inner.read_footer(
            chrom1_id,
            chrom2_id,
            self.resolution,
            self.matrix_type,
            norm,
        )?);
        self.footers.lock().insert(key, Arc::clone(&footer));
        Ok(footer)
    }
}

// ---------------------------------------------------------------------------
// Synthetic file builder for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use velella_core::compress::zlib_compress;

    /// One chromosome pair's matrix at one resolution.
    pub struct PairSpec {
        pub chrom1: u32,
        pub chrom2: u32,
        pub resolution: u32,
        pub block_bin_size: u64,
        pub block_column_count: u64,
        /// `(bin1, bin2, count)` with chromosome-relative bin ids, in any
        /// order; intra pairs may contain either triangle.
        pub pixels: Vec<(u64, u64, f32)>,
        pub sum_counts: f64,
        pub expected_values: Vec<f64>,
        /// `(method, w1, w2)`
        pub norms: Vec<(String, Vec<f64>, Vec<f64>)>,
        /// Block body encoding: 1 (dense-by-row) or 2 (list-of-points).
        pub encoding: u8,
    }

    /// Assemble a complete BBM file image.
    pub fn build_bbm(
        version: i32,
        genome: &str,
        chroms: &[(&str, u32)],
        resolutions: &[u32],
        pairs: &[PairSpec],
    ) -> Vec<u8> {
        let mut buf = Vec::new();

        // Header.
        buf.extend_from_slice(&BBM_MAGIC);
        buf.extend_from_slice(&version.to_le_bytes());
        let master_offset_at = buf.len();
        buf.extend_from_slice(&0i64.to_le_bytes()); // patched below
        push_cstr(&mut buf, genome);
        buf.extend_from_slice(&1i32.to_le_bytes());
        push_cstr(&mut buf, "software");
        push_cstr(&mut buf, "velella-test");
        buf.extend_from_slice(&(chroms.len() as i32).to_le_bytes());
        for (name, length) in chroms {
            push_cstr(&mut buf, name);
            if version >= 9 {
                buf.extend_from_slice(&i64::from(*length).to_le_bytes());
            } else {
                buf.extend_from_slice(&(*length as i32).to_le_bytes());
            }
        }
        buf.extend_from_slice(&(resolutions.len() as i32).to_le_bytes());
        for res in resolutions {
            buf.extend_from_slice(&(*res as i32).to_le_bytes());
        }
        buf.extend_from_slice(&0i32.to_le_bytes()); // no fragment resolutions

        // Matrix blocks, grouped per pair and block id.
        let mut pair_blocks: Vec<Vec<(u64, u64, u32)>> = Vec::new(); // (id, offset, size)
        for pair in pairs {
            // The list-of-points window cannot reach left of its origin, so
            // intra pixels are stored upper-triangular for that encoding.
            let mut pair_pixels = pair.pixels.clone();
            if pair.chrom1 == pair.chrom2 && pair.encoding == 2 {
                for p in &mut pair_pixels {
                    if p.0 > p.1 {
                        std::mem::swap(&mut p.0, &mut p.1);
                    }
                }
            }
            let mut grouped: std::collections::BTreeMap<u64, Vec<(u64, u64, f32)>> =
                std::collections::BTreeMap::new();
            for &(b1, b2, count) in &pair_pixels {
                let (row, col) = (b1 / pair.block_bin_size, b2 / pair.block_bin_size);
                let (row, col) = if pair.chrom1 == pair.chrom2 && row > col {
                    (col, row)
                } else {
                    (row, col)
                };
                grouped
                    .entry(row * pair.block_column_count + col)
                    .or_default()
                    .push((b1, b2, count));
            }
            let mut entries = Vec::new();
            for (id, pixels) in grouped {
                let row = id / pair.block_column_count;
                let col = id % pair.block_column_count;
                let payload = match pair.encoding {
                    1 => encode_type1(&pixels, row * pair.block_bin_size, col * pair.block_bin_size),
                    _ => encode_type2(
                        &pixels,
                        row * pair.block_bin_size,
                        col * pair.block_bin_size,
                        pair.block_bin_size,
                    ),
                };
                let compressed = zlib_compress(&payload, 6).unwrap();
                entries.push((id, buf.len() as u64, compressed.len() as u32));
                buf.extend_from_slice(&compressed);
            }
            pair_blocks.push(entries);
        }

        // Pair bodies.
        let mut master: Vec<(String, u64, u32)> = Vec::new();
        for (pair, entries) in pairs.iter().zip(&pair_blocks) {
            let body_offset = buf.len() as u64;
            buf.extend_from_slice(&1i32.to_le_bytes()); // one section
            buf.extend_from_slice(&(pair.resolution as i32).to_le_bytes());
            push_cstr(&mut buf, "BP");
            buf.extend_from_slice(&pair.sum_counts.to_le_bytes());
            buf.extend_from_slice(&(pair.block_bin_size as i32).to_le_bytes());
            buf.extend_from_slice(&(pair.block_column_count as i32).to_le_bytes());
            buf.extend_from_slice(&(entries.len() as i32).to_le_bytes());
            for (id, offset, size) in entries {
                buf.extend_from_slice(&(*id as i32).to_le_bytes());
                buf.extend_from_slice(&(*offset as i64).to_le_bytes());
                buf.extend_from_slice(&(*size as i32).to_le_bytes());
            }
            buf.extend_from_slice(&(pair.expected_values.len() as i32).to_le_bytes());
            for v in &pair.expected_values {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            buf.extend_from_slice(&(pair.norms.len() as i32).to_le_bytes());
            for (name, w1, w2) in &pair.norms {
                push_cstr(&mut buf, name);
                for w in [w1, w2] {
                    buf.extend_from_slice(&(w.len() as i32).to_le_bytes());
                    for v in w {
                        buf.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            let body_size = buf.len() as u64 - body_offset;
            master.push((
                format!("{}_{}", pair.chrom1, pair.chrom2),
                body_offset,
                body_size as u32,
            ));
        }

        // Master index.
        let master_offset = buf.len() as u64;
        buf.extend_from_slice(&(master.len() as i32).to_le_bytes());
        for (key, offset, size) in &master {
            push_cstr(&mut buf, key);
            buf.extend_from_slice(&(*offset as i64).to_le_bytes());
            buf.extend_from_slice(&(*size as i32).to_le_bytes());
        }
        buf[master_offset_at..master_offset_at + 8]
            .copy_from_slice(&(master_offset as i64).to_le_bytes());

        buf
    }

    fn push_cstr(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    /// Dense-by-row payload with full-width (non-short) fields.
    fn encode_type1(pixels: &[(u64, u64, f32)], bin1_offset: u64, bin2_offset: u64) -> Vec<u8> {
        let mut rows: std::collections::BTreeMap<u64, Vec<(u64, f32)>> =
            std::collections::BTreeMap::new();
        for &(b1, b2, count) in pixels {
            rows.entry(b1).or_default().push((b2, count));
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(&(pixels.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(bin1_offset as i32).to_le_bytes());
        buf.extend_from_slice(&(bin2_offset as i32).to_le_bytes());
        buf.push(1); // encoding
        buf.push(0); // full-width bin1
        buf.push(0); // full-width bin2
        buf.push(0); // float counts
        for (b1, cells) in rows {
            buf.extend_from_slice(&(cells.len() as i32).to_le_bytes());
            buf.extend_from_slice(&((b1 as i64 - bin1_offset as i64) as i32).to_le_bytes());
            for (b2, count) in cells {
                // May go negative for below-diagonal pixels of
                // diagonal-straddling intra blocks.
                buf.extend_from_slice(&((b2 as i64 - bin2_offset as i64) as i32).to_le_bytes());
                buf.extend_from_slice(&count.to_le_bytes());
            }
        }
        buf
    }

    /// List-of-points payload over a `width`-wide window, float counts,
    /// NaN sentinels in the gaps.
    fn encode_type2(
        pixels: &[(u64, u64, f32)],
        bin1_offset: u64,
        bin2_offset: u64,
        width: u64,
    ) -> Vec<u8> {
        let n_points = pixels
            .iter()
            .map(|&(b1, b2, _)| (b1 - bin1_offset) * width + (b2 - bin2_offset) + 1)
            .max()
            .unwrap_or(0);

        let mut values = vec![f32::NAN; n_points as usize];
        for &(b1, b2, count) in pixels {
            values[((b1 - bin1_offset) * width + (b2 - bin2_offset)) as usize] = count;
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(&(pixels.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(bin1_offset as i32).to_le_bytes());
        buf.extend_from_slice(&(bin2_offset as i32).to_le_bytes());
        buf.push(2); // encoding
        buf.extend_from_slice(&(n_points as i32).to_le_bytes());
        buf.extend_from_slice(&(width as i16).to_le_bytes());
        buf.push(0); // float counts
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }
}
