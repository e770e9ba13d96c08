//! MRES single-resolution files — an HDF5 container for one sparse contact
//! matrix.
//!
//! Layout of one matrix (either the file root or a subgroup addressed with
//! the `path::/group` URI syntax):
//!
//! - `chroms/name` (vlen str), `chroms/length` (i32)
//! - `bins/chrom` (i32), `bins/start` (i32), `bins/end` (i32), plus one
//!   optional f64 weight dataset per normalization method
//! - `pixels/bin1_id` (i64), `pixels/bin2_id` (i64),
//!   `pixels/count` (i32 or f64)
//! - `indexes/chrom_offset` (i64), `indexes/bin1_offset` (i64)
//! - root attributes: `format`, `format-version`, `bin-size`, `bin-type`,
//!   `nnz`, `sum`, `cis`, `assembly`
//!
//! The bin1-offset index maps every bin `b` to the pixel-table range
//! `[bin1_offset[b], bin1_offset[b+1])` holding the pixels of matrix row
//! `b`, ascending in `bin2_id`. Queries walk the rows of the first interval
//! and binary-search each row for the second interval's span.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use hdf5::types::{FloatSize, TypeDescriptor, VarLenUnicode};
use ndarray::{s, Array1};
use tracing::debug;

use velella_core::{Error, Result};

use crate::bins::{BinTable, PixelCoordinates};
use crate::norm::Normalization;
use crate::pixel::{Count, ThinPixel};
use crate::reference::Reference;
use crate::region::GenomicInterval;
use crate::selector::{MresSelector, PixelSelector, Weights};

/// Value of the `format` attribute of a single-resolution matrix.
pub const MRES_MAGIC: &str = "MRES";
/// Supported `format-version`.
pub const MRES_VERSION: i64 = 1;

/// Pixels decoded per chunk by the whole-file stream.
const STREAM_CHUNK: usize = 1 << 16;
/// Pixels buffered by [`MresWriter`] validation between range checks.
pub(crate) const WRITE_CHUNK: usize = 1 << 20;

pub(crate) fn h5err(e: hdf5::Error) -> Error {
    Error::Corrupt(format!("HDF5 error: {e}"))
}

/// Split a `path::/group` URI into its file path and optional group path.
pub(crate) fn parse_uri(uri: &str) -> (PathBuf, Option<String>) {
    match uri.split_once("::") {
        Some((path, group)) if !group.is_empty() => {
            (PathBuf::from(path), Some(group.trim_start_matches('/').to_string()))
        }
        _ => (PathBuf::from(uri), None),
    }
}

/// Standard attributes of a single-resolution matrix.
#[derive(Debug, Clone)]
pub struct MresAttributes {
    pub format: String,
    pub format_version: i64,
    pub bin_size: u32,
    pub bin_type: String,
    /// Number of stored pixels.
    pub nnz: u64,
    /// Total of all stored counts.
    pub sum: f64,
    /// Total of intra-chromosomal counts.
    pub cis: f64,
    pub assembly: String,
}

#[derive(Debug)]
pub(crate) struct MresDatasets {
    pub(crate) bin1: hdf5::Dataset,
    pub(crate) bin2: hdf5::Dataset,
    pub(crate) count: hdf5::Dataset,
    pub(crate) float_counts: bool,
    pub(crate) nnz: u64,
}

impl MresDatasets {
    /// Read `pixels/count[range]` as f64 regardless of the stored type.
    pub(crate) fn read_counts(&self, start: u64, stop: u64) -> Result<Vec<f64>> {
        let (start, stop) = (start as usize, stop as usize);
        if self.float_counts {
            Ok(self
                .count
                .read_slice_1d::<f64, _>(s![start..stop])
                .map_err(h5err)?
                .to_vec())
        } else {
            Ok(self
                .count
                .read_slice_1d::<i32, _>(s![start..stop])
                .map_err(h5err)?
                .iter()
                .map(|&c| f64::from(c))
                .collect())
        }
    }

    pub(crate) fn read_bin1(&self, start: u64, stop: u64) -> Result<Vec<u64>> {
        read_id_slice(&self.bin1, start, stop)
    }

    pub(crate) fn read_bin2(&self, start: u64, stop: u64) -> Result<Vec<u64>> {
        read_id_slice(&self.bin2, start, stop)
    }
}

fn read_id_slice(ds: &hdf5::Dataset, start: u64, stop: u64) -> Result<Vec<u64>> {
    Ok(ds
        .read_slice_1d::<i64, _>(s![start as usize..stop as usize])
        .map_err(h5err)?
        .iter()
        .map(|&v| v as u64)
        .collect())
}

/// A single-resolution MRES matrix opened for reading.
#[derive(Debug)]
pub struct MresFile {
    _file: hdf5::File,
    root: hdf5::Group,
    uri: String,
    attrs: MresAttributes,
    bins: Arc<BinTable>,
    datasets: Arc<MresDatasets>,
    bin1_offset: Arc<Vec<u64>>,
}

impl MresFile {
    /// Open a matrix from a path or `path::/group` URI.
    pub fn open(uri: &str) -> Result<Self> {
        let (path, group_path) = parse_uri(uri);
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "file {} does not exist",
                path.display()
            )));
        }
        let file = hdf5::File::open(&path).map_err(|e| {
            Error::Corrupt(format!("{}: cannot open HDF5 file: {e}", path.display()))
        })?;
        let root = match &group_path {
            Some(g) => file
                .group(g)
                .map_err(|_| Error::NotFound(format!("{uri}: group '/{g}' does not exist")))?,
            None => file.group("/").map_err(h5err)?,
        };
        Self::from_root(file, root, uri.to_string())
    }

    /// Open a matrix rooted at an already-resolved group (shares the file
    /// handle, so a container can expose its subgroups without reopening
    /// the file).
    pub(crate) fn from_root(file: hdf5::File, root: hdf5::Group, uri: String) -> Result<Self> {
        let attrs = read_attributes(&root, &uri)?;
        if attrs.format != MRES_MAGIC {
            return Err(Error::Corrupt(format!(
                "{uri} does not look like a valid MRES file (format is '{}')",
                attrs.format
            )));
        }
        if attrs.format_version != MRES_VERSION {
            return Err(Error::Corrupt(format!(
                "{uri}: unsupported format-version {}",
                attrs.format_version
            )));
        }

        let reference = import_chroms(&root)?;
        let bins = Arc::new(BinTable::new(reference, attrs.bin_size)?);

        let bin1 = root.dataset("pixels/bin1_id").map_err(h5err)?;
        let bin2 = root.dataset("pixels/bin2_id").map_err(h5err)?;
        let count = root.dataset("pixels/count").map_err(h5err)?;
        let float_counts = count_dtype_is_float(&count)?;
        let nnz = count.size() as u64;

        let bin1_offset = read_bin1_offset(&root, &bins, nnz, &uri)?;
        validate_chrom_offset(&root, &bins, &uri)?;

        Ok(Self {
            _file: file,
            root,
            uri,
            attrs,
            bins,
            datasets: Arc::new(MresDatasets {
                bin1,
                bin2,
                count,
                float_counts,
                nnz,
            }),
            bin1_offset: Arc::new(bin1_offset),
        })
    }

    /// URI this matrix was opened from.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn attributes(&self) -> &MresAttributes {
        &self.attrs
    }

    pub fn bin_size(&self) -> u32 {
        self.attrs.bin_size
    }

    pub fn chromosomes(&self) -> &Reference {
        self.bins.reference()
    }

    pub fn bins(&self) -> &Arc<BinTable> {
        &self.bins
    }

    /// Whether counts are stored as floats.
    pub fn float_counts(&self) -> bool {
        self.datasets.float_counts
    }

    /// Intra-chromosomal query over one region (the region pairs with
    /// itself), parsed in UCSC syntax.
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
        let weights = self.load_weights(norm, &coord1, &coord2)?;

        let (a_lo, a_hi) = coord1.global_range();
        let offsets = self.bin1_offset[a_lo as usize..=a_hi as usize + 1].to_vec();

        Ok(PixelSelector::Mres(MresSelector {
            datasets: Arc::clone(&self.datasets),
            bins: Arc::clone(&self.bins),
            coord1,
            coord2,
            offsets,
            weights,
        }))
    }

    /// Stream every stored pixel in order, without transformation.
    pub fn pixels<N: Count>(&self) -> MresPixels<N> {
        MresPixels {
            datasets: Arc::clone(&self.datasets),
            next: 0,
            buffer: Vec::new(),
            buffer_at: 0,
            errored: false,
            _marker: std::marker::PhantomData,
        }
    }

    fn load_weights(
        &self,
        norm: Normalization,
        coord1: &PixelCoordinates,
        coord2: &PixelCoordinates,
    ) -> Result<Option<Arc<Weights>>> {
        if norm.is_none() {
            return Ok(None);
        }
        let bins_group = self.root.group("bins").map_err(h5err)?;
        if !bins_group.link_exists(norm.as_str()) {
            return Err(Error::NotFound(format!(
                "{}: normalization weights for method '{norm}' are not available",
                self.uri
            )));
        }
        let ds = bins_group.dataset(norm.as_str()).map_err(h5err)?;
        let w1 = read_weight_slice(&ds, &self.bins, coord1.chrom_id())?;
        let w2 = if coord2.chrom_id() == coord1.chrom_id() {
            w1.clone()
        } else {
            read_weight_slice(&ds, &self.bins, coord2.chrom_id())?
        };
        Ok(Some(Arc::new(Weights { w1, w2 })))
    }
}

/// Whole-file pixel stream of an [`MresFile`].
pub struct MresPixels<N> {
    datasets: Arc<MresDatasets>,
    next: u64,
    buffer: Vec<ThinPixel<N>>,
    buffer_at: usize,
    errored: bool,
    _marker: std::marker::PhantomData<N>,
}

impl<N: Count> MresPixels<N> {
    fn refill(&mut self) -> Result<()> {
        let stop = (self.next + STREAM_CHUNK as u64).min(self.datasets.nnz);
        let bin1 = self.datasets.read_bin1(self.next, stop)?;
        let bin2 = self.datasets.read_bin2(self.next, stop)?;
        let counts = self.datasets.read_counts(self.next, stop)?;
        self.buffer.clear();
        self.buffer_at = 0;
        for i in 0..bin1.len() {
            self.buffer.push(ThinPixel {
                bin1_id: bin1[i],
                bin2_id: bin2[i],
                count: N::from_f64(counts[i]),
            });
        }
        self.next = stop;
        Ok(())
    }
}

impl<N: Count> Iterator for MresPixels<N> {
    type Item = Result<ThinPixel<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        if self.buffer_at >= self.buffer.len() {
            if self.next >= self.datasets.nnz {
                return None;
            }
            if let Err(e) = self.refill() {
                self.errored = true;
                return Some(Err(e));
            }
        }
        let p = self.buffer[self.buffer_at];
        self.buffer_at += 1;
        Some(Ok(p))
    }
}

pub(crate) fn validate_orientation(
    coord1: &PixelCoordinates,
    coord2: &PixelCoordinates,
) -> Result<()> {
    let below = coord1.chrom_id() > coord2.chrom_id()
        || (coord1.chrom_id() == coord2.chrom_id() && coord1.bin1.rel_id > coord2.bin1.rel_id);
    if below {
        return Err(Error::InvalidQuery(
            "query overlaps with the lower triangle of the matrix".into(),
        ));
    }
    Ok(())
}

fn import_chroms(root: &hdf5::Group) -> Result<Reference> {
    let names = root
        .dataset("chroms/name")
        .and_then(|ds| ds.read_1d::<VarLenUnicode>())
        .map_err(h5err)?;
    let lengths = root
        .dataset("chroms/length")
        .and_then(|ds| ds.read_1d::<i32>())
        .map_err(h5err)?;
    if names.len() != lengths.len() {
        return Err(Error::Corrupt(
            "chroms/name and chroms/length have different lengths".into(),
        ));
    }
    Reference::new(
        names
            .iter()
            .zip(lengths.iter())
            .map(|(n, &l)| (n.as_str().to_string(), l as u32)),
    )
}

fn count_dtype_is_float(ds: &hdf5::Dataset) -> Result<bool> {
    let desc = ds.dtype().and_then(|d| d.to_descriptor()).map_err(h5err)?;
    match desc {
        TypeDescriptor::Float(FloatSize::U8) => Ok(true),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => Ok(false),
        other => Err(Error::Corrupt(format!(
            "unsupported pixels/count type: {other:?}"
        ))),
    }
}

fn read_bin1_offset(
    root: &hdf5::Group,
    bins: &BinTable,
    nnz: u64,
    uri: &str,
) -> Result<Vec<u64>> {
    let raw = root
        .dataset("indexes/bin1_offset")
        .and_then(|ds| ds.read_1d::<i64>())
        .map_err(h5err)?;
    let offsets: Vec<u64> = raw.iter().map(|&v| v as u64).collect();
    if offsets.len() as u64 != bins.len() + 1 {
        return Err(Error::Corrupt(format!(
            "{uri}: bin1_offset has {} entries, expected {}",
            offsets.len(),
            bins.len() + 1
        )));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) || offsets.last() != Some(&nnz) {
        return Err(Error::Corrupt(format!(
            "{uri}: inconsistent bin1_offset index"
        )));
    }
    Ok(offsets)
}

fn validate_chrom_offset(root: &hdf5::Group, bins: &BinTable, uri: &str) -> Result<()> {
    let raw = root
        .dataset("indexes/chrom_offset")
        .and_then(|ds| ds.read_1d::<i64>())
        .map_err(h5err)?;
    let n = bins.reference().len();
    if raw.len() != n + 1 {
        return Err(Error::Corrupt(format!(
            "{uri}: chrom_offset has {} entries, expected {}",
            raw.len(),
            n + 1
        )));
    }
    for (i, &v) in raw.iter().enumerate() {
        let expected = if i == n {
            bins.len()
        } else {
            bins.chrom_offset(i as u32)?
        };
        if v as u64 != expected {
            return Err(Error::Corrupt(format!(
                "{uri}: inconsistent chrom_offset index"
            )));
        }
    }
    Ok(())
}

fn read_weight_slice(ds: &hdf5::Dataset, bins: &BinTable, chrom_id: u32) -> Result<Vec<f64>> {
    let range = bins.subset(chrom_id)?;
    Ok(ds
        .read_slice_1d::<f64, _>(s![range.start as usize..range.end as usize])
        .map_err(h5err)?
        .to_vec())
}

fn read_attributes(root: &hdf5::Group, uri: &str) -> Result<MresAttributes> {
    let format = read_str_attr(root, "format").map_err(|_| {
        Error::Corrupt(format!(
            "{uri} does not look like a valid MRES file (no format attribute)"
        ))
    })?;
    Ok(MresAttributes {
        format,
        format_version: read_i64_attr(root, "format-version")?,
        bin_size: read_i64_attr(root, "bin-size")? as u32,
        bin_type: read_str_attr(root, "bin-type")?,
        nnz: read_i64_attr(root, "nnz")? as u64,
        sum: read_num_attr(root, "sum")?,
        cis: read_num_attr(root, "cis")?,
        assembly: read_str_attr(root, "assembly")?,
    })
}

pub(crate) fn read_str_attr(loc: &hdf5::Group, name: &str) -> Result<String> {
    loc.attr(name)
        .and_then(|a| a.read_scalar::<VarLenUnicode>())
        .map(|s| s.as_str().to_string())
        .map_err(h5err)
}

pub(crate) fn read_i64_attr(loc: &hdf5::Group, name: &str) -> Result<i64> {
    loc.attr(name)
        .and_then(|a| a.read_scalar::<i64>())
        .map_err(h5err)
}

/// Read a numeric attribute that may be stored as i64 or f64.
fn read_num_attr(loc: &hdf5::Group, name: &str) -> Result<f64> {
    let attr = loc.attr(name).map_err(h5err)?;
    if let Ok(v) = attr.read_scalar::<i64>() {
        return Ok(v as f64);
    }
    attr.read_scalar::<f64>().map_err(h5err)
}

pub(crate) fn write_str_attr(loc: &hdf5::Group, name: &str, value: &str) -> Result<()> {
    let v = VarLenUnicode::from_str(value)
        .map_err(|_| Error::InvalidArgument(format!("attribute '{name}' is not valid UTF-8")))?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)
        .and_then(|a| a.write_scalar(&v))
        .map_err(h5err)
}

pub(crate) fn write_i64_attr(loc: &hdf5::Group, name: &str, value: i64) -> Result<()> {
    loc.new_attr::<i64>()
        .create(name)
        .and_then(|a| a.write_scalar(&value))
        .map_err(h5err)
}

fn write_f64_attr(loc: &hdf5::Group, name: &str, value: f64) -> Result<()> {
    loc.new_attr::<f64>()
        .create(name)
        .and_then(|a| a.write_scalar(&value))
        .map_err(h5err)
}

/// Writes one single-resolution matrix, either into a fresh file or into a
/// subgroup of an existing container.
///
/// Pixels must arrive sorted by `(bin1_id, bin2_id)`, deduplicated, and in
/// the upper triangle. All datasets are written in one shot by
/// [`finish`](MresWriter::finish); a writer dropped early leaves no
/// `format` attribute behind, so partial output never looks valid.
#[derive(Debug)]
pub struct MresWriter {
    _file: Option<hdf5::File>,
    root: hdf5::Group,
    bins: Arc<BinTable>,
    assembly: String,
    float_counts: bool,
    bin1: Vec<i64>,
    bin2: Vec<i64>,
    counts: Vec<f64>,
    sum: f64,
    cis: f64,
}

impl MresWriter {
    /// Create a writer at a path or `path::/group` URI.
    ///
    /// A plain path refuses to replace an existing file unless `force` is
    /// set. A group URI requires the container file to exist already.
    pub fn create(
        uri: &str,
        reference: &Reference,
        bin_size: u32,
        assembly: &str,
        float_counts: bool,
        force: bool,
    ) -> Result<Self> {
        let (path, group_path) = parse_uri(uri);
        let (file, root) = match group_path {
            None => {
                if path.exists() && !force {
                    return Err(Error::Overwrite(path));
                }
                let file = hdf5::File::create(&path).map_err(|e| {
                    Error::Corrupt(format!("{}: cannot create HDF5 file: {e}", path.display()))
                })?;
                let root = file.group("/").map_err(h5err)?;
                (file, root)
            }
            Some(group) => {
                if !path.exists() {
                    return Err(Error::NotFound(format!(
                        "parent file {} does not exist; create the container first",
                        path.display()
                    )));
                }
                let file = hdf5::File::open_rw(&path).map_err(|e| {
                    Error::Corrupt(format!("{}: cannot open HDF5 file: {e}", path.display()))
                })?;
                if file.group(&group).is_ok() {
                    return Err(Error::InvalidArgument(format!(
                        "{uri}: overwriting a matrix inside an existing container is not supported"
                    )));
                }
                let root = ensure_group(&file, &group)?;
                (file, root)
            }
        };
        let bins = Arc::new(BinTable::new(reference.clone(), bin_size)?);
        Ok(Self::with_root(Some(file), root, bins, assembly, float_counts))
    }

    /// Writer over an already-created group (used by the multi-resolution
    /// container).
    pub(crate) fn with_root(
        file: Option<hdf5::File>,
        root: hdf5::Group,
        bins: Arc<BinTable>,
        assembly: &str,
        float_counts: bool,
    ) -> Self {
        Self {
            _file: file,
            root,
            bins,
            assembly: assembly.to_string(),
            float_counts,
            bin1: Vec::new(),
            bin2: Vec::new(),
            counts: Vec::new(),
            sum: 0.0,
            cis: 0.0,
        }
    }

    pub fn bins(&self) -> &Arc<BinTable> {
        &self.bins
    }

    /// Append a batch of pixels.
    ///
    /// Fails with [`Error::InvalidArgument`] when pixels are out of order,
    /// duplicated, below the diagonal, or reference nonexistent bins.
    pub fn add_pixels<N: Count>(
        &mut self,
        pixels: impl IntoIterator<Item = ThinPixel<N>>,
    ) -> Result<()> {
        let n_bins = self.bins.len();
        for p in pixels {
            if p.bin1_id > p.bin2_id {
                return Err(Error::InvalidArgument(format!(
                    "pixel ({}, {}) lies below the diagonal",
                    p.bin1_id, p.bin2_id
                )));
            }
            if p.bin2_id >= n_bins {
                return Err(Error::InvalidArgument(format!(
                    "pixel ({}, {}) references a bin outside the table ({n_bins} bins)",
                    p.bin1_id, p.bin2_id
                )));
            }
            if let (Some(&last1), Some(&last2)) = (self.bin1.last(), self.bin2.last()) {
                if (p.bin1_id as i64, p.bin2_id as i64) <= (last1, last2) {
                    return Err(Error::InvalidArgument(format!(
                        "pixels are not sorted: ({}, {}) follows ({last1}, {last2})",
                        p.bin1_id, p.bin2_id
                    )));
                }
            }
            let count = p.count.to_f64();
            self.sum += count;
            if self.bins.bin(p.bin1_id)?.chrom_id == self.bins.bin(p.bin2_id)?.chrom_id {
                self.cis += count;
            }
            self.bin1.push(p.bin1_id as i64);
            self.bin2.push(p.bin2_id as i64);
            self.counts.push(count);
        }
        Ok(())
    }

    /// Write every dataset and attribute, consuming the writer.
    pub fn finish(self) -> Result<()> {
        let bins = &self.bins;
        let reference = bins.reference();

        // chroms/
        let chroms = self.root.create_group("chroms").map_err(h5err)?;
        let names: Vec<VarLenUnicode> = reference
            .iter()
            .map(|c| {
                VarLenUnicode::from_str(&c.name).map_err(|_| {
                    Error::InvalidArgument(format!(
                        "chromosome name '{}' cannot be stored as an HDF5 string",
                        c.name
                    ))
                })
            })
            .collect::<Result<_>>()?;
        write_dataset(&chroms, "name", names)?;
        write_dataset(
            &chroms,
            "length",
            reference.iter().map(|c| c.length as i32).collect::<Vec<_>>(),
        )?;

        // bins/
        let bins_group = self.root.create_group("bins").map_err(h5err)?;
        let mut bin_chrom = Vec::with_capacity(bins.len() as usize);
        let mut bin_start = Vec::with_capacity(bins.len() as usize);
        let mut bin_end = Vec::with_capacity(bins.len() as usize);
        for chrom in reference.iter() {
            for rel in 0..bins.chrom_bin_count(chrom.id)? {
                let b = bins.at_hint(rel, chrom.id)?;
                bin_chrom.push(chrom.id as i32);
                bin_start.push(b.start as i32);
                bin_end.push(b.end as i32);
            }
        }
        write_dataset(&bins_group, "chrom", bin_chrom)?;
        write_dataset(&bins_group, "start", bin_start)?;
        write_dataset(&bins_group, "end", bin_end)?;

        // pixels/
        let pixels = self.root.create_group("pixels").map_err(h5err)?;
        write_dataset(&pixels, "bin1_id", self.bin1.clone())?;
        write_dataset(&pixels, "bin2_id", self.bin2.clone())?;
        if self.float_counts {
            write_dataset(&pixels, "count", self.counts.clone())?;
        } else {
            write_dataset(
                &pixels,
                "count",
                self.counts.iter().map(|&c| c as i32).collect::<Vec<_>>(),
            )?;
        }

        // indexes/
        let indexes = self.root.create_group("indexes").map_err(h5err)?;
        let mut chrom_offset = Vec::with_capacity(reference.len() + 1);
        for chrom in reference.iter() {
            chrom_offset.push(bins.chrom_offset(chrom.id)? as i64);
        }
        chrom_offset.push(bins.len() as i64);
        write_dataset(&indexes, "chrom_offset", chrom_offset)?;

        let mut bin1_offset = vec![0i64; bins.len() as usize + 1];
        for &b1 in &self.bin1 {
            bin1_offset[b1 as usize + 1] += 1;
        }
        for i in 1..bin1_offset.len() {
            bin1_offset[i] += bin1_offset[i - 1];
        }
        write_dataset(&indexes, "bin1_offset", bin1_offset)?;

        // Attributes; `format` goes last so partial output never validates.
        write_i64_attr(&self.root, "format-version", MRES_VERSION)?;
        write_i64_attr(&self.root, "bin-size", i64::from(bins.bin_size()))?;
        write_str_attr(&self.root, "bin-type", "fixed")?;
        write_i64_attr(&self.root, "nnz", self.bin1.len() as i64)?;
        if self.float_counts {
            write_f64_attr(&self.root, "sum", self.sum)?;
            write_f64_attr(&self.root, "cis", self.cis)?;
        } else {
            write_i64_attr(&self.root, "sum", self.sum as i64)?;
            write_i64_attr(&self.root, "cis", self.cis as i64)?;
        }
        write_str_attr(&self.root, "assembly", &self.assembly)?;
        write_str_attr(&self.root, "format", MRES_MAGIC)?;

        debug!(
            nnz = self.bin1.len(),
            sum = self.sum,
            "finalized MRES matrix"
        );
        Ok(())
    }
}

fn write_dataset<T: hdf5::H5Type>(group: &hdf5::Group, name: &str, data: Vec<T>) -> Result<()> {
    group
        .new_dataset_builder()
        .with_data(&Array1::from(data))
        .create(name)
        .map_err(h5err)?;
    Ok(())
}

/// Open or create every component of a nested group path.
pub(crate) fn ensure_group(file: &hdf5::File, path: &str) -> Result<hdf5::Group> {
    let mut group = file.group("/").map_err(h5err)?;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        group = if group.link_exists(part) {
            group.group(part).map_err(h5err)?
        } else {
            group.create_group(part).map_err(h5err)?
        };
    }
    Ok(group)
}
