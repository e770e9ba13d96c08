//! Multi-resolution MRES containers.
//!
//! A container file holds one single-resolution matrix per subgroup of
//! `resolutions/`, named by the bin size in base pairs. New resolutions are
//! derived by coarsening the best stored divisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use velella_core::{Error, Result};

use crate::bins::BinTable;
use crate::mres::{
    ensure_group, h5err, read_i64_attr, read_str_attr, write_i64_attr, write_str_attr, MresFile,
    MresWriter, MRES_VERSION, WRITE_CHUNK,
};
use crate::pixel::ThinPixel;
use crate::transformers::CoarsenPixels;

/// Value of the `format` attribute of a multi-resolution container.
pub const MMRES_MAGIC: &str = "MRES::multires";

/// A multi-resolution container.
#[derive(Debug)]
pub struct MultiResFile {
    file: hdf5::File,
    path: PathBuf,
    writable: bool,
}

impl MultiResFile {
    /// Open a container read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "file {} does not exist",
                path.display()
            )));
        }
        let file = hdf5::File::open(&path).map_err(|e| {
            Error::Corrupt(format!("{}: cannot open HDF5 file: {e}", path.display()))
        })?;
        let out = Self {
            file,
            path,
            writable: false,
        };
        out.validate()?;
        Ok(out)
    }

    /// Open a container for reading and resolution creation.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "file {} does not exist",
                path.display()
            )));
        }
        let file = hdf5::File::open_rw(&path).map_err(|e| {
            Error::Corrupt(format!("{}: cannot open HDF5 file: {e}", path.display()))
        })?;
        let out = Self {
            file,
            path,
            writable: true,
        };
        out.validate()?;
        Ok(out)
    }

    /// Create an empty container.
    pub fn create(path: impl AsRef<Path>, force: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() && !force {
            return Err(Error::Overwrite(path));
        }
        let file = hdf5::File::create(&path).map_err(|e| {
            Error::Corrupt(format!("{}: cannot create HDF5 file: {e}", path.display()))
        })?;
        file.create_group("resolutions").map_err(h5err)?;
        let root = file.group("/").map_err(h5err)?;
        write_str_attr(&root, "format", MMRES_MAGIC)?;
        write_i64_attr(&root, "format-version", MRES_VERSION)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    fn validate(&self) -> Result<()> {
        let root = self.file.group("/").map_err(h5err)?;
        let format = read_str_attr(&root, "format").map_err(|_| {
            Error::Corrupt(format!(
                "{} does not look like a multi-resolution MRES file (no format attribute)",
                self.path.display()
            ))
        })?;
        if format != MMRES_MAGIC {
            return Err(Error::Corrupt(format!(
                "{} does not look like a multi-resolution MRES file (format is '{format}')",
                self.path.display()
            )));
        }
        if read_i64_attr(&root, "format-version")? != MRES_VERSION {
            return Err(Error::Corrupt(format!(
                "{}: unsupported format-version",
                self.path.display()
            )));
        }
        self.file.group("resolutions").map_err(|_| {
            Error::Corrupt(format!(
                "{}: container has no resolutions group",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored resolutions, ascending.
    pub fn resolutions(&self) -> Result<Vec<u32>> {
        let group = self.file.group("resolutions").map_err(h5err)?;
        let mut out: Vec<u32> = group
            .member_names()
            .map_err(h5err)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Open one stored resolution. The container's file handle is shared.
    pub fn open_resolution(&self, resolution: u32) -> Result<MresFile> {
        if !self.resolutions()?.contains(&resolution) {
            return Err(Error::NotFound(format!(
                "{}: resolution {resolution} is not stored; available: {:?}",
                self.path.display(),
                self.resolutions()?
            )));
        }
        let group = self
            .file
            .group(&format!("resolutions/{resolution}"))
            .map_err(h5err)?;
        MresFile::from_root(self.file.clone(), group, self.resolution_uri(resolution))
    }

    /// URI of one resolution subgroup.
    pub fn resolution_uri(&self, resolution: u32) -> String {
        format!("{}::/resolutions/{resolution}", self.path.display())
    }

    /// Ingest an open single-resolution matrix as a stored resolution.
    pub fn copy_resolution(&self, src: &MresFile) -> Result<()> {
        self.require_writable()?;
        let resolution = src.bin_size();
        if self.resolutions()?.contains(&resolution) {
            return Err(Error::InvalidArgument(format!(
                "{}: resolution {resolution} already exists",
                self.path.display()
            )));
        }
        let group = ensure_group(&self.file, &format!("resolutions/{resolution}"))?;
        let mut writer = MresWriter::with_root(
            None,
            group,
            Arc::clone(src.bins()),
            &src.attributes().assembly,
            src.float_counts(),
        );
        copy_pixels(src.pixels::<f64>(), &mut writer)?;
        writer.finish()?;
        info!(resolution, path = %self.path.display(), "copied resolution");
        Ok(())
    }

    /// Derive and store a new resolution by coarsening.
    ///
    /// `resolution` must be an integer multiple (>= 2x) of the base (the
    /// smallest stored resolution); the source is the largest stored
    /// resolution dividing it.
    pub fn create_resolution(&self, resolution: u32) -> Result<()> {
        self.require_writable()?;
        let stored = self.resolutions()?;
        let Some(&base) = stored.first() else {
            return Err(Error::InvalidArgument(format!(
                "{}: container holds no base resolution to coarsen",
                self.path.display()
            )));
        };
        if stored.contains(&resolution) {
            return Err(Error::InvalidArgument(format!(
                "{}: resolution {resolution} already exists",
                self.path.display()
            )));
        }
        if resolution % base != 0 || resolution / base < 2 {
            return Err(Error::InvalidArgument(format!(
                "resolution {resolution} is not a multiple (>= 2x) of the base resolution {base}"
            )));
        }
        let source = stored
            .iter()
            .rev()
            .find(|&&r| resolution % r == 0)
            .copied()
            .unwrap_or(base);

        let src = self.open_resolution(source)?;
        let factor = resolution / source;
        let group = ensure_group(&self.file, &format!("resolutions/{resolution}"))?;
        let mut writer = MresWriter::with_root(
            None,
            group,
            Arc::new(BinTable::new(src.chromosomes().clone(), resolution)?),
            &src.attributes().assembly,
            src.float_counts(),
        );
        let coarsened = CoarsenPixels::new(src.pixels::<f64>(), Arc::clone(src.bins()), factor)?;
        copy_pixels(coarsened, &mut writer)?;
        writer.finish()?;
        info!(
            resolution,
            source,
            factor,
            path = %self.path.display(),
            "created resolution by coarsening"
        );
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::InvalidArgument(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn copy_pixels(
    src: impl Iterator<Item = Result<ThinPixel<f64>>>,
    writer: &mut MresWriter,
) -> Result<()> {
    let mut batch = Vec::with_capacity(WRITE_CHUNK.min(1 << 16));
    for pixel in src {
        batch.push(pixel?);
        if batch.len() == WRITE_CHUNK {
            writer.add_pixels(batch.drain(..))?;
        }
    }
    writer.add_pixels(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mres::tests::{toy_pixels, write_toy_file};
    use crate::norm::Normalization;

    fn container_with_base(dir: &tempfile::TempDir) -> MultiResFile {
        let base_path = dir.path().join("base.mres");
        write_toy_file(&base_path);
        let base = MresFile::open(base_path.to_str().unwrap()).unwrap();

        let path = dir.path().join("toy.mmres");
        let mclr = MultiResFile::create(&path, false).unwrap();
        mclr.copy_resolution(&base).unwrap();
        mclr
    }

    #[test]
    fn create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mclr = container_with_base(&dir);
        assert_eq!(mclr.resolutions().unwrap(), vec![100]);
        let path = mclr.path().to_path_buf();
        drop(mclr);

        let reopened = MultiResFile::open(&path).unwrap();
        assert_eq!(reopened.resolutions().unwrap(), vec![100]);
        let base = reopened.open_resolution(100).unwrap();
        assert_eq!(base.attributes().nnz, 12);
        assert!(reopened.open_resolution(200).is_err());
    }

    #[test]
    fn create_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toy.mmres");
        MultiResFile::create(&path, false).unwrap();
        assert!(matches!(
            MultiResFile::create(&path, false).unwrap_err(),
            Error::Overwrite(_)
        ));
        MultiResFile::create(&path, true).unwrap();
    }

    #[test]
    fn plain_matrix_is_not_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.mres");
        write_toy_file(&path);
        assert!(matches!(
            MultiResFile::open(&path).unwrap_err(),
            Error::Corrupt(_)
        ));
    }

    #[test]
    fn invalid_target_resolutions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mclr = container_with_base(&dir);

        // Not a multiple.
        assert!(mclr.create_resolution(150).is_err());
        // Below the base.
        assert!(mclr.create_resolution(50).is_err());
        // Equal to the base (factor 1 < 2).
        assert!(mclr.create_resolution(100).is_err());
    }

    #[test]
    fn coarsened_resolution_matches_direct_coarsening() {
        let dir = tempfile::tempdir().unwrap();
        let mclr = container_with_base(&dir);
        mclr.create_resolution(200).unwrap();
        mclr.create_resolution(400).unwrap();
        assert_eq!(mclr.resolutions().unwrap(), vec![100, 200, 400]);

        let base = mclr.open_resolution(100).unwrap();
        let coarse = mclr.open_resolution(200).unwrap();
        assert_eq!(coarse.bin_size(), 200);
        assert_eq!(coarse.attributes().sum, base.attributes().sum);

        let direct: Vec<_> =
            CoarsenPixels::new(base.pixels::<f64>(), Arc::clone(base.bins()), 2)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        let stored: Vec<_> = coarse.pixels::<f64>().collect::<Result<_>>().unwrap();
        assert_eq!(direct, stored);

        // 400 bp was coarsened from the stored 200 bp resolution; the
        // result must equal coarsening the base by 4.
        let coarse4 = mclr.open_resolution(400).unwrap();
        let direct4: Vec<_> =
            CoarsenPixels::new(base.pixels::<f64>(), Arc::clone(base.bins()), 4)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        let stored4: Vec<_> = coarse4.pixels::<f64>().collect::<Result<_>>().unwrap();
        assert_eq!(direct4, stored4);
    }

    #[test]
    fn coarsened_queries_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let mclr = container_with_base(&dir);
        mclr.create_resolution(200).unwrap();

        let coarse = mclr.open_resolution(200).unwrap();
        let sel = coarse.fetch("1", Normalization::None).unwrap();
        let total: f64 = sel
            .read_all::<f64>()
            .unwrap()
            .iter()
            .map(|p| p.count)
            .sum();
        let base_total: i32 = toy_pixels()
            .iter()
            .filter(|p| p.bin1_id < 10 && p.bin2_id < 10)
            .map(|p| p.count)
            .sum();
        assert_eq!(total, f64::from(base_total));
    }

    #[test]
    fn read_only_container_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mclr = container_with_base(&dir);
        let path = mclr.path().to_path_buf();
        drop(mclr);

        let ro = MultiResFile::open(&path).unwrap();
        assert!(ro.create_resolution(200).is_err());

        let base_path = dir.path().join("other.mres");
        write_toy_file(&base_path);
        let base = MresFile::open(base_path.to_str().unwrap()).unwrap();
        assert!(ro.copy_resolution(&base).is_err());
    }
}
