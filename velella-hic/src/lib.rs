//! Sparse Hi-C contact matrix reading, writing, and transformation.
//!
//! `velella-hic` implements random access to genome-wide, chromosome-pair
//! partitioned sparse contact matrices stored in two on-disk formats:
//!
//! - **MRES** — an HDF5 container holding a single resolution per group,
//!   with a multi-resolution variant whose subgroups are named by bin size.
//!   Supports reading and writing ([`MresFile`], [`MresWriter`],
//!   [`MultiResFile`]).
//! - **BBM** — a legacy monolithic little-endian binary format with
//!   zlib-compressed block bodies. Read-only ([`BbmFile`]).
//!
//! Both formats answer the same query: given two genomic intervals, a
//! normalization method, and a count type, produce a lazily evaluated
//! stream of sparse pixels sorted by `(bin1_id, bin2_id)`. Queries return a
//! [`PixelSelector`]; its iterator pulls blocks through a shared
//! byte-bounded LRU cache, decompresses and decodes them, applies
//! normalization and matrix-type transforms, and filters to the requested
//! rectangle.
//!
//! The [`transformers`] module offers lazy adapters over any pixel stream:
//! genomic-coordinate join, resolution coarsening, and seeded binomial
//! subsampling.
//!
//! # Example
//!
//! ```ignore
//! use velella_hic::{MresFile, Normalization};
//!
//! let clr = MresFile::open("matrix.mres")?;
//! let sel = clr.fetch_2d("1:5000000-5500000", "1:5000000-6500000", Normalization::None)?;
//! for pixel in sel.iter::<i32>() {
//!     let pixel = pixel?;
//!     println!("{} {} {}", pixel.bin1_id, pixel.bin2_id, pixel.count);
//! }
//! ```

pub mod bbm;
pub mod bins;
pub mod cache;
pub mod mres;
pub mod multires;
pub mod norm;
pub mod pixel;
pub mod reference;
pub mod region;
pub mod selector;
pub mod transformers;

pub use bbm::BbmFile;
pub use bins::{Bin, BinTable, PixelCoordinates};
pub use cache::{BlockCache, BlockKey, BlockPixel, InteractionBlock};
pub use mres::{MresFile, MresWriter};
pub use multires::MultiResFile;
pub use norm::{MatrixType, MatrixUnit, Normalization};
pub use pixel::{Count, IntCount, Pixel, ThinPixel};
pub use reference::{Chromosome, Reference};
pub use region::GenomicInterval;
pub use selector::{PixelIter, PixelSelector};
pub use transformers::{CoarsenPixels, JoinGenomicCoords, PixelRandomSampler};

pub use velella_core::{Error, Result};
