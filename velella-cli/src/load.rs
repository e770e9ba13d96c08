//! `velella load` — build an MRES matrix from text interactions on stdin.
//!
//! Four input formats are supported: pre-binned sparse triples (`coo`),
//! pre-binned genomic pairs (`bg2`), and two read-pair formats (`4dn`,
//! `validpairs`) that contribute one interaction each. Pre-binned sorted
//! input streams straight into the writer; everything else is aggregated in
//! sorted batches, spilled to a temporary directory, and merged at the end.

use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use tracing::{info, warn};

use velella_core::{Error, Result};
use velella_hic::{BinTable, MresWriter, Reference, ThinPixel};

/// Pixels handed to the writer per batch during the merge phase.
const MERGE_CHUNK: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// 4DN pairs: `readID chrom1 pos1 chrom2 pos2 [strand1 strand2]`
    #[value(name = "4dn")]
    FourDn,
    /// validPairs: `readID chrom1 pos1 strand1 chrom2 pos2 strand2 ...`
    #[value(name = "validpairs")]
    ValidPairs,
    /// bedGraph2: `chrom1 start1 end1 chrom2 start2 end2 count`
    #[value(name = "bg2")]
    Bg2,
    /// Sparse triples: `bin1_id bin2_id count`
    #[value(name = "coo")]
    Coo,
}

impl InputFormat {
    fn pre_binned(self) -> bool {
        matches!(self, InputFormat::Bg2 | InputFormat::Coo)
    }

    /// Read-pair formats use one-based positions by convention.
    fn default_one_based(self) -> bool {
        matches!(self, InputFormat::FourDn | InputFormat::ValidPairs)
    }

    fn as_str(self) -> &'static str {
        match self {
            InputFormat::FourDn => "4dn",
            InputFormat::ValidPairs => "validpairs",
            InputFormat::Bg2 => "bg2",
            InputFormat::Coo => "coo",
        }
    }
}

#[derive(Args)]
pub struct LoadArgs {
    /// Path to the .chrom.sizes file
    pub chrom_sizes: PathBuf,

    /// Output path (`file.mres`, or `container.mmres::/resolutions/<bin>`)
    pub output: String,

    /// Bin size (bp). Required when --bin-table is not used
    #[arg(short = 'b', long)]
    pub bin_size: Option<u32>,

    /// Path to a BED3 file describing the bin table
    #[arg(short = 't', long, conflicts_with = "bin_size")]
    pub bin_table: Option<PathBuf>,

    /// Input format
    #[arg(short = 'f', long, value_enum)]
    pub format: InputFormat,

    /// Force overwrite an existing output file
    #[arg(long)]
    pub force: bool,

    /// Assembly name recorded in the output
    #[arg(long, default_value = "unknown")]
    pub assembly: String,

    /// Interpret genomic coordinates as one-based (default for 4dn and
    /// validpairs input)
    #[arg(long, conflicts_with = "zero_based")]
    pub one_based: bool,

    /// Interpret genomic coordinates as zero-based (default for bg2 and
    /// coo input)
    #[arg(long)]
    pub zero_based: bool,

    /// Interactions are floats
    #[arg(long)]
    pub count_as_float: bool,

    /// Assume pre-binned input is already sorted
    #[arg(long)]
    pub assume_sorted: bool,

    /// Number of interactions to buffer in memory when sorting
    #[arg(long, default_value_t = 5_000_000)]
    pub batch_size: usize,

    /// Temporary directory for sort spills (default: system temp directory
    /// plus a per-output suffix)
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,
}

pub fn run(args: LoadArgs) -> Result<()> {
    let existed = crate::output_file_path(&args.output).exists();
    let result = run_inner(&args);
    if result.is_err() {
        crate::discard_partial_output(&args.output, existed);
    }
    result
}

fn run_inner(args: &LoadArgs) -> Result<()> {
    let reference = Reference::from_chrom_sizes(&args.chrom_sizes)?;
    let bin_size = resolve_bin_size(args, &reference)?;
    let one_based = if args.one_based || args.zero_based {
        args.one_based
    } else {
        args.format.default_one_based()
    };
    if args.assume_sorted && !args.format.pre_binned() {
        warn!(
            "--assume-sorted has no effect when ingesting interactions in {} format",
            args.format.as_str()
        );
    }

    let mut writer = MresWriter::create(
        &args.output,
        &reference,
        bin_size,
        &args.assembly,
        args.count_as_float,
        args.force,
    )?;
    let bins = writer.bins().clone();

    let stdin = std::io::stdin();
    let n = if args.assume_sorted && args.format.pre_binned() {
        load_sorted(stdin.lock(), args, &bins, one_based, &mut writer)?
    } else {
        load_unsorted(stdin.lock(), args, &bins, one_based, &mut writer)?
    };
    writer.finish()?;
    info!(pixels = n, output = %args.output, "wrote matrix");
    Ok(())
}

/// Streaming path: input is pre-binned and sorted, so adjacent duplicates
/// are merged on the fly and pixels go straight to the writer.
fn load_sorted(
    input: impl BufRead,
    args: &LoadArgs,
    bins: &BinTable,
    one_based: bool,
    writer: &mut MresWriter,
) -> Result<u64> {
    let mut pending: Option<(u64, u64, f64)> = None;
    let mut n = 0u64;
    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let Some((b1, b2, count)) =
            parse_interaction(args.format, &line, bins, one_based, lineno + 1)?
        else {
            continue;
        };
        match pending {
            Some((p1, p2, c)) if (p1, p2) == (b1, b2) => pending = Some((p1, p2, c + count)),
            Some((p1, p2, c)) => {
                writer.add_pixels([pixel(p1, p2, c)])?;
                n += 1;
                pending = Some((b1, b2, count));
            }
            None => pending = Some((b1, b2, count)),
        }
    }
    if let Some((p1, p2, c)) = pending {
        writer.add_pixels([pixel(p1, p2, c)])?;
        n += 1;
    }
    Ok(n)
}

/// Batching path: interactions are collected up to `--batch-size`, sorted
/// and aggregated, spilled as binary runs, and k-way merged into the
/// writer.
fn load_unsorted(
    input: impl BufRead,
    args: &LoadArgs,
    bins: &BinTable,
    one_based: bool,
    writer: &mut MresWriter,
) -> Result<u64> {
    let tmpdir = TempDir::create(args)?;
    let mut batch: Vec<(u64, u64, f64)> = Vec::new();
    let mut runs: Vec<PathBuf> = Vec::new();

    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let Some(interaction) =
            parse_interaction(args.format, &line, bins, one_based, lineno + 1)?
        else {
            continue;
        };
        batch.push(interaction);
        if batch.len() >= args.batch_size {
            aggregate(&mut batch);
            runs.push(tmpdir.spill(runs.len(), &batch)?);
            batch.clear();
        }
    }
    aggregate(&mut batch);

    let n = merge_runs(&runs, batch, writer)?;
    Ok(n)
}

fn pixel(bin1_id: u64, bin2_id: u64, count: f64) -> ThinPixel<f64> {
    ThinPixel {
        bin1_id,
        bin2_id,
        count,
    }
}

/// Sort a batch and sum duplicate cells in place.
fn aggregate(batch: &mut Vec<(u64, u64, f64)>) {
    batch.sort_unstable_by_key(|&(b1, b2, _)| (b1, b2));
    batch.dedup_by(|next, kept| {
        if (kept.0, kept.1) == (next.0, next.1) {
            kept.2 += next.2;
            true
        } else {
            false
        }
    });
}

/// Merge sorted spill files and the final in-memory batch into the writer.
fn merge_runs(
    runs: &[PathBuf],
    last_batch: Vec<(u64, u64, f64)>,
    writer: &mut MresWriter,
) -> Result<u64> {
    let mut sources: Vec<RunReader> = runs
        .iter()
        .map(RunReader::open)
        .collect::<Result<Vec<_>>>()?;
    sources.push(RunReader::from_memory(last_batch));

    // Min-heap of (key, source index); values are read from the source.
    let mut heap: BinaryHeap<std::cmp::Reverse<(u64, u64, usize)>> = BinaryHeap::new();
    for (i, src) in sources.iter_mut().enumerate() {
        if let Some((b1, b2, _)) = src.peek() {
            heap.push(std::cmp::Reverse((b1, b2, i)));
        }
    }

    let mut out: Vec<ThinPixel<f64>> = Vec::with_capacity(MERGE_CHUNK);
    let mut n = 0u64;
    let mut current: Option<(u64, u64, f64)> = None;
    while let Some(std::cmp::Reverse((b1, b2, i))) = heap.pop() {
        let (_, _, count) = sources[i].advance()?.expect("heap entry had a value");
        if let Some((b1n, b2n, _)) = sources[i].peek() {
            heap.push(std::cmp::Reverse((b1n, b2n, i)));
        }
        match current {
            Some((c1, c2, c)) if (c1, c2) == (b1, b2) => current = Some((c1, c2, c + count)),
            Some((c1, c2, c)) => {
                out.push(pixel(c1, c2, c));
                n += 1;
                if out.len() == MERGE_CHUNK {
                    writer.add_pixels(out.drain(..))?;
                }
                current = Some((b1, b2, count));
            }
            None => current = Some((b1, b2, count)),
        }
    }
    if let Some((c1, c2, c)) = current {
        out.push(pixel(c1, c2, c));
        n += 1;
    }
    writer.add_pixels(out)?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// Parse one input line into an upper-triangular `(bin1, bin2, count)`.
/// Comment and empty lines yield `None`.
fn parse_interaction(
    format: InputFormat,
    line: &str,
    bins: &BinTable,
    one_based: bool,
    lineno: usize,
) -> Result<Option<(u64, u64, f64)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split_whitespace().collect();

    let (bin1, bin2, count) = match format {
        InputFormat::Coo => {
            let [b1, b2, count] = expect_fields::<3>(&fields, lineno)?;
            let b1: u64 = parse_num(b1, "bin id", lineno)?;
            let b2: u64 = parse_num(b2, "bin id", lineno)?;
            if b1.max(b2) >= bins.len() {
                return Err(Error::InvalidArgument(format!(
                    "line {lineno}: bin id out of range (table has {} bins)",
                    bins.len()
                )));
            }
            (b1, b2, parse_num::<f64>(count, "count", lineno)?)
        }
        InputFormat::Bg2 => {
            let [c1, s1, _e1, c2, s2, _e2, count] = expect_fields::<7>(&fields, lineno)?;
            let b1 = bin_at(bins, c1, parse_pos(s1, one_based, lineno)?, lineno)?;
            let b2 = bin_at(bins, c2, parse_pos(s2, one_based, lineno)?, lineno)?;
            (b1, b2, parse_num::<f64>(count, "count", lineno)?)
        }
        InputFormat::FourDn => {
            if fields.len() < 5 {
                return Err(short_line(lineno, 5, fields.len()));
            }
            let b1 = bin_at(bins, fields[1], parse_pos(fields[2], one_based, lineno)?, lineno)?;
            let b2 = bin_at(bins, fields[3], parse_pos(fields[4], one_based, lineno)?, lineno)?;
            (b1, b2, 1.0)
        }
        InputFormat::ValidPairs => {
            if fields.len() < 7 {
                return Err(short_line(lineno, 7, fields.len()));
            }
            let b1 = bin_at(bins, fields[1], parse_pos(fields[2], one_based, lineno)?, lineno)?;
            let b2 = bin_at(bins, fields[4], parse_pos(fields[5], one_based, lineno)?, lineno)?;
            (b1, b2, 1.0)
        }
    };

    // Interaction pairs are unordered; storage is upper triangular.
    Ok(Some(if bin1 <= bin2 {
        (bin1, bin2, count)
    } else {
        (bin2, bin1, count)
    }))
}

fn expect_fields<'a, const N: usize>(fields: &[&'a str], lineno: usize) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(&fields[..fields.len().min(N)])
        .map_err(|_| short_line(lineno, N, fields.len()))
}

fn short_line(lineno: usize, want: usize, got: usize) -> Error {
    Error::InvalidArgument(format!(
        "line {lineno}: expected at least {want} fields, found {got}"
    ))
}

fn parse_num<T: std::str::FromStr>(field: &str, what: &str, lineno: usize) -> Result<T> {
    field
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("line {lineno}: invalid {what} '{field}'")))
}

fn parse_pos(field: &str, one_based: bool, lineno: usize) -> Result<u32> {
    let pos: u32 = parse_num(field, "position", lineno)?;
    if one_based {
        pos.checked_sub(1).ok_or_else(|| {
            Error::InvalidArgument(format!("line {lineno}: position 0 in one-based input"))
        })
    } else {
        Ok(pos)
    }
}

fn bin_at(bins: &BinTable, chrom: &str, pos: u32, lineno: usize) -> Result<u64> {
    let chrom = bins
        .reference()
        .chromosome_by_name(chrom)
        .map_err(|e| Error::InvalidArgument(format!("line {lineno}: {e}")))?;
    Ok(bins
        .bin_at(chrom.id, pos)
        .map_err(|e| Error::InvalidArgument(format!("line {lineno}: {e}")))?
        .id)
}

// ---------------------------------------------------------------------------
// Bin-table files
// ---------------------------------------------------------------------------

/// Derive the bin size from a BED3 bin table and validate its alignment
/// against the reference grid.
fn resolve_bin_size(args: &LoadArgs, reference: &Reference) -> Result<u32> {
    let Some(bin_table) = &args.bin_table else {
        return args.bin_size.ok_or_else(|| {
            Error::InvalidArgument(
                "--bin-size is required when --bin-table is not specified".into(),
            )
        });
    };

    let file = File::open(bin_table).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", bin_table.display(), e),
        ))
    })?;
    let mut bin_size = 0u32;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [chrom, start, end] = expect_fields::<3>(&fields, lineno + 1)?;
        let chrom = reference.chromosome_by_name(chrom)?;
        let start: u32 = parse_num(start, "position", lineno + 1)?;
        let end: u32 = parse_num(end, "position", lineno + 1)?;
        if bin_size == 0 {
            bin_size = end.saturating_sub(start);
            if bin_size == 0 {
                return Err(Error::InvalidArgument(format!(
                    "{}: first bin is empty",
                    bin_table.display()
                )));
            }
        }
        let aligned = start % bin_size == 0 && end == (start + bin_size).min(chrom.length);
        if !aligned {
            return Err(Error::InvalidArgument(format!(
                "{}: bin {}:{}-{} does not align to a fixed {}-bp grid",
                bin_table.display(),
                chrom.name,
                start,
                end,
                bin_size
            )));
        }
    }
    if bin_size == 0 {
        return Err(Error::InvalidArgument(format!(
            "{}: bin table is empty",
            bin_table.display()
        )));
    }
    Ok(bin_size)
}

// ---------------------------------------------------------------------------
// Spill files
// ---------------------------------------------------------------------------

/// Scratch directory for sorted runs, removed on drop.
struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn create(args: &LoadArgs) -> Result<Self> {
        let path = match &args.tmpdir {
            Some(dir) => dir.clone(),
            None => {
                let name = crate::output_file_path(&args.output)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "velella".into());
                std::env::temp_dir().join(format!("{name}.tmp"))
            }
        };
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    /// Write one sorted run as fixed-width little-endian records.
    fn spill(&self, index: usize, batch: &[(u64, u64, f64)]) -> Result<PathBuf> {
        let path = self.path.join(format!("run.{index}"));
        let mut out = BufWriter::new(File::create(&path)?);
        for &(b1, b2, count) in batch {
            out.write_all(&b1.to_le_bytes())?;
            out.write_all(&b2.to_le_bytes())?;
            out.write_all(&count.to_le_bytes())?;
        }
        out.flush()?;
        Ok(path)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Sequential reader over one sorted run (spilled or in-memory).
enum RunReader {
    Disk {
        reader: BufReader<File>,
        next: Option<(u64, u64, f64)>,
    },
    Memory {
        batch: std::vec::IntoIter<(u64, u64, f64)>,
        next: Option<(u64, u64, f64)>,
    },
}

impl RunReader {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let next = Self::read_record(&mut reader)?;
        Ok(RunReader::Disk { reader, next })
    }

    fn from_memory(batch: Vec<(u64, u64, f64)>) -> Self {
        let mut batch = batch.into_iter();
        let next = batch.next();
        RunReader::Memory { batch, next }
    }

    fn peek(&self) -> Option<(u64, u64, f64)> {
        match self {
            RunReader::Disk { next, .. } | RunReader::Memory { next, .. } => *next,
        }
    }

    fn advance(&mut self) -> Result<Option<(u64, u64, f64)>> {
        match self {
            RunReader::Disk { reader, next } => {
                let out = next.take();
                *next = Self::read_record(reader)?;
                Ok(out)
            }
            RunReader::Memory { batch, next } => {
                let out = next.take();
                *next = batch.next();
                Ok(out)
            }
        }
    }

    fn read_record(reader: &mut BufReader<File>) -> Result<Option<(u64, u64, f64)>> {
        let mut buf = [0u8; 24];
        match reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some((
                u64::from_le_bytes(buf[0..8].try_into().expect("8-byte slice")),
                u64::from_le_bytes(buf[8..16].try_into().expect("8-byte slice")),
                f64::from_le_bytes(buf[16..24].try_into().expect("8-byte slice")),
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bins() -> BinTable {
        let reference = Reference::new([("chr1", 1000u32), ("chr2", 500)]).unwrap();
        BinTable::new(reference, 100).unwrap()
    }

    #[test]
    fn coo_lines_parse_and_orient() {
        let bins = bins();
        let p = parse_interaction(InputFormat::Coo, "3\t5\t7", &bins, false, 1)
            .unwrap()
            .unwrap();
        assert_eq!(p, (3, 5, 7.0));
        // Pairs are unordered.
        let p = parse_interaction(InputFormat::Coo, "5\t3\t7", &bins, false, 1)
            .unwrap()
            .unwrap();
        assert_eq!(p, (3, 5, 7.0));
        assert!(parse_interaction(InputFormat::Coo, "3\t99\t7", &bins, false, 1).is_err());
    }

    #[test]
    fn bg2_lines_map_positions_to_bins() {
        let bins = bins();
        let p = parse_interaction(
            InputFormat::Bg2,
            "chr1\t200\t300\tchr2\t0\t100\t4.5",
            &bins,
            false,
            1,
        )
        .unwrap()
        .unwrap();
        assert_eq!(p, (2, 10, 4.5));
    }

    #[test]
    fn fourdn_lines_default_one_based() {
        let bins = bins();
        let p = parse_interaction(
            InputFormat::FourDn,
            "read1\tchr1\t101\tchr1\t350\t+\t-",
            &bins,
            true,
            1,
        )
        .unwrap()
        .unwrap();
        // 101 one-based -> 100 -> bin 1; 350 -> 349 -> bin 3.
        assert_eq!(p, (1, 3, 1.0));
        assert!(
            parse_interaction(InputFormat::FourDn, "read1\tchr1\t0\tchr1\t5", &bins, true, 1)
                .is_err()
        );
    }

    #[test]
    fn validpairs_lines_parse() {
        let bins = bins();
        let p = parse_interaction(
            InputFormat::ValidPairs,
            "read1\tchr1\t150\t+\tchr2\t250\t-\t42",
            &bins,
            true,
            1,
        )
        .unwrap()
        .unwrap();
        assert_eq!(p, (1, 12, 1.0));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let bins = bins();
        for line in ["", "   ", "# comment", "## pairs format v1.0"] {
            assert_eq!(
                parse_interaction(InputFormat::Coo, line, &bins, false, 1).unwrap(),
                None
            );
        }
    }

    #[test]
    fn unknown_chromosome_is_invalid() {
        let bins = bins();
        let err = parse_interaction(
            InputFormat::Bg2,
            "chr9\t0\t100\tchr1\t0\t100\t1",
            &bins,
            false,
            3,
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn aggregate_sorts_and_merges() {
        let mut batch = vec![(5, 6, 1.0), (1, 2, 2.0), (5, 6, 3.0), (0, 0, 1.0)];
        aggregate(&mut batch);
        assert_eq!(batch, vec![(0, 0, 1.0), (1, 2, 2.0), (5, 6, 4.0)]);
    }

    #[test]
    fn merge_runs_combines_spills_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("merged.mres");
        let reference = Reference::new([("chr1", 1000u32), ("chr2", 500)]).unwrap();
        let mut writer = MresWriter::create(
            out_path.to_str().unwrap(),
            &reference,
            100,
            "test",
            false,
            false,
        )
        .unwrap();

        let tmp = TempDir {
            path: dir.path().join("runs"),
        };
        std::fs::create_dir_all(&tmp.path).unwrap();
        let run1 = tmp.spill(0, &[(0, 0, 1.0), (0, 2, 2.0), (3, 4, 1.0)]).unwrap();
        let run2 = tmp.spill(1, &[(0, 2, 5.0), (1, 1, 1.0)]).unwrap();

        let n = merge_runs(
            &[run1, run2],
            vec![(0, 1, 1.0), (3, 4, 2.0)],
            &mut writer,
        )
        .unwrap();
        assert_eq!(n, 5);
        writer.finish().unwrap();

        let clr = velella_hic::MresFile::open(out_path.to_str().unwrap()).unwrap();
        let all: Vec<_> = clr
            .pixels::<i32>()
            .collect::<velella_core::Result<_>>()
            .unwrap();
        let cells: Vec<_> = all.iter().map(|p| (p.bin1_id, p.bin2_id, p.count)).collect();
        assert_eq!(
            cells,
            vec![(0, 0, 1), (0, 1, 1), (0, 2, 7), (1, 1, 1), (3, 4, 3)]
        );
    }

    #[test]
    fn bin_table_bin_size_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let reference = Reference::new([("chr1", 250u32)]).unwrap();

        let table = dir.path().join("bins.bed");
        std::fs::write(&table, "chr1\t0\t100\nchr1\t100\t200\nchr1\t200\t250\n").unwrap();
        let args = base_args(&table);
        assert_eq!(resolve_bin_size(&args, &reference).unwrap(), 100);

        // Misaligned table.
        std::fs::write(&table, "chr1\t0\t100\nchr1\t100\t150\n").unwrap();
        assert!(resolve_bin_size(&args, &reference).is_err());
    }

    #[test]
    fn bin_size_required_without_bin_table() {
        let reference = Reference::new([("chr1", 250u32)]).unwrap();
        let mut args = base_args(Path::new("unused"));
        args.bin_table = None;
        assert!(resolve_bin_size(&args, &reference).is_err());
        args.bin_size = Some(100);
        assert_eq!(resolve_bin_size(&args, &reference).unwrap(), 100);
    }

    fn base_args(bin_table: &Path) -> LoadArgs {
        LoadArgs {
            chrom_sizes: PathBuf::new(),
            output: String::new(),
            bin_size: None,
            bin_table: Some(bin_table.to_path_buf()),
            format: InputFormat::Coo,
            force: false,
            assembly: "unknown".into(),
            one_based: false,
            zero_based: false,
            count_as_float: false,
            assume_sorted: false,
            batch_size: 1000,
            tmpdir: None,
        }
    }

    #[test]
    fn load_sorted_streams_adjacent_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("sorted.mres");
        let reference = Reference::new([("chr1", 1000u32), ("chr2", 500)]).unwrap();
        let mut writer = MresWriter::create(
            out_path.to_str().unwrap(),
            &reference,
            100,
            "test",
            false,
            false,
        )
        .unwrap();
        let bins = Arc::clone(writer.bins());

        let mut args = base_args(Path::new("unused"));
        args.bin_table = None;
        args.bin_size = Some(100);
        let input = b"0\t0\t1\n0\t0\t2\n0\t3\t4\n2\t2\t1\n" as &[u8];
        let n = load_sorted(input, &args, &bins, false, &mut writer).unwrap();
        assert_eq!(n, 3);
        writer.finish().unwrap();

        let clr = velella_hic::MresFile::open(out_path.to_str().unwrap()).unwrap();
        assert_eq!(clr.attributes().sum, 8.0);
    }
}
