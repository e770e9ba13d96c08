//! `velella sample` — random subsampling of an MRES matrix.
//!
//! Streams every pixel of the input through a seeded binomial sampler and
//! writes the surviving interactions to a new file with the same axes.

use clap::Args;
use tracing::info;

use velella_core::{Error, Result};
use velella_hic::{MresFile, MresWriter, PixelRandomSampler, ThinPixel};

/// Pixels handed to the writer per batch.
const CHUNK: usize = 1 << 16;

#[derive(Args)]
pub struct SampleArgs {
    /// Input matrix (URI syntax is supported)
    pub input: String,

    /// Output path for the subsampled matrix
    pub output: String,

    /// Fraction of interactions to keep
    #[arg(long, conflicts_with = "count")]
    pub fraction: Option<f64>,

    /// Target number of interactions to keep
    #[arg(long)]
    pub count: Option<u64>,

    /// Seed for the sampling PRNG
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Force overwrite an existing output file
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: SampleArgs) -> Result<()> {
    let existed = crate::output_file_path(&args.output).exists();
    let result = run_inner(&args);
    if result.is_err() {
        crate::discard_partial_output(&args.output, existed);
    }
    result
}

fn run_inner(args: &SampleArgs) -> Result<()> {
    let clr = MresFile::open(&args.input)?;
    if clr.float_counts() {
        return Err(Error::InvalidArgument(
            "random sampling requires integer counts".into(),
        ));
    }
    let fraction = resolve_fraction(args, clr.attributes().sum)?;

    let mut writer = MresWriter::create(
        &args.output,
        clr.chromosomes(),
        clr.bin_size(),
        &clr.attributes().assembly,
        false,
        args.force,
    )?;

    let sampler = PixelRandomSampler::new(clr.pixels::<i32>(), fraction, args.seed)?;
    let mut batch: Vec<ThinPixel<i32>> = Vec::with_capacity(CHUNK);
    let mut kept = 0u64;
    for pixel in sampler {
        batch.push(pixel?);
        kept += 1;
        if batch.len() == CHUNK {
            writer.add_pixels(batch.drain(..))?;
        }
    }
    writer.add_pixels(batch)?;
    writer.finish()?;

    info!(
        fraction,
        seed = args.seed,
        pixels = kept,
        output = %args.output,
        "wrote subsampled matrix"
    );
    Ok(())
}

fn resolve_fraction(args: &SampleArgs, input_sum: f64) -> Result<f64> {
    match (args.fraction, args.count) {
        (Some(f), _) => Ok(f),
        (None, Some(count)) => {
            if input_sum <= 0.0 {
                return Err(Error::InvalidArgument(
                    "--count requires an input with a positive interaction sum".into(),
                ));
            }
            Ok((count as f64 / input_sum).min(1.0))
        }
        (None, None) => Err(Error::InvalidArgument(
            "specify either --fraction or --count".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(fraction: Option<f64>, count: Option<u64>) -> SampleArgs {
        SampleArgs {
            input: String::new(),
            output: String::new(),
            fraction,
            count,
            seed: 0,
            force: false,
        }
    }

    #[test]
    fn fraction_wins_when_given() {
        assert_eq!(resolve_fraction(&args(Some(0.25), None), 100.0).unwrap(), 0.25);
    }

    #[test]
    fn count_derives_a_clamped_fraction() {
        assert_eq!(resolve_fraction(&args(None, Some(50)), 200.0).unwrap(), 0.25);
        assert_eq!(resolve_fraction(&args(None, Some(500)), 200.0).unwrap(), 1.0);
        assert!(resolve_fraction(&args(None, Some(50)), 0.0).is_err());
    }

    #[test]
    fn one_option_is_required() {
        assert!(resolve_fraction(&args(None, None), 100.0).is_err());
    }

    #[test]
    fn full_fraction_round_trips_the_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mres");
        let reference = velella_hic::Reference::new([("chr1", 1000u32)]).unwrap();
        let mut writer = MresWriter::create(
            input.to_str().unwrap(),
            &reference,
            100,
            "test",
            false,
            false,
        )
        .unwrap();
        writer
            .add_pixels([
                ThinPixel { bin1_id: 0, bin2_id: 0, count: 5i32 },
                ThinPixel { bin1_id: 0, bin2_id: 2, count: 3 },
                ThinPixel { bin1_id: 1, bin2_id: 1, count: 7 },
            ])
            .unwrap();
        writer.finish().unwrap();

        let output = dir.path().join("out.mres");
        let mut a = args(Some(1.0), None);
        a.input = input.to_str().unwrap().to_string();
        a.output = output.to_str().unwrap().to_string();
        run_inner(&a).unwrap();

        let original: Vec<_> = MresFile::open(a.input.as_str())
            .unwrap()
            .pixels::<i32>()
            .collect::<Result<_>>()
            .unwrap();
        let sampled: Vec<_> = MresFile::open(a.output.as_str())
            .unwrap()
            .pixels::<i32>()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(original, sampled);
    }
}
