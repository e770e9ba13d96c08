//! Reference assembly model — chromosomes and their declaration order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use velella_core::{Error, Result};

/// A single chromosome of a reference assembly.
///
/// Ids are dense and assigned in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chromosome {
    pub id: u32,
    pub name: String,
    /// Length in base pairs. Always > 0.
    pub length: u32,
}

/// An ordered, immutable set of chromosomes.
///
/// Lookup by id is O(1); lookup by name goes through a side map.
#[derive(Debug, Clone)]
pub struct Reference {
    chroms: Vec<Chromosome>,
    by_name: HashMap<String, u32>,
}

impl Reference {
    /// Build a reference from `(name, length)` pairs in declaration order.
    ///
    /// Fails with [`Error::InvalidArgument`] on duplicate names or
    /// zero-length chromosomes.
    pub fn new<S: Into<String>>(chroms: impl IntoIterator<Item = (S, u32)>) -> Result<Self> {
        let mut out = Vec::new();
        let mut by_name = HashMap::new();
        for (name, length) in chroms {
            let name = name.into();
            if length == 0 {
                return Err(Error::InvalidArgument(format!(
                    "chromosome '{name}' has zero length"
                )));
            }
            let id = out.len() as u32;
            if by_name.insert(name.clone(), id).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "duplicate chromosome name '{name}'"
                )));
            }
            out.push(Chromosome { id, name, length });
        }
        if out.is_empty() {
            return Err(Error::InvalidArgument(
                "reference has no chromosomes".into(),
            ));
        }
        Ok(Self {
            chroms: out,
            by_name,
        })
    }

    /// Read a `.chrom.sizes` file: one `name<TAB>length` pair per line.
    pub fn from_chrom_sizes(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;

        let mut pairs = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (name, length) = match (fields.next(), fields.next()) {
                (Some(n), Some(l)) => (n, l),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "{}: line {}: expected 'name<TAB>length'",
                        path.display(),
                        lineno + 1
                    )))
                }
            };
            let length: u32 = length.parse().map_err(|_| {
                Error::InvalidArgument(format!(
                    "{}: line {}: invalid chromosome length '{length}'",
                    path.display(),
                    lineno + 1
                ))
            })?;
            pairs.push((name.to_string(), length));
        }
        Self::new(pairs)
    }

    /// Number of chromosomes.
    pub fn len(&self) -> usize {
        self.chroms.len()
    }

    /// Whether the reference is empty (never true for a constructed one).
    pub fn is_empty(&self) -> bool {
        self.chroms.is_empty()
    }

    /// Chromosome by dense id.
    pub fn chromosome(&self, id: u32) -> Result<&Chromosome> {
        self.chroms.get(id as usize).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "chromosome id {id} out of range (reference has {} chromosomes)",
                self.chroms.len()
            ))
        })
    }

    /// Chromosome by name.
    pub fn chromosome_by_name(&self, name: &str) -> Result<&Chromosome> {
        self.by_name
            .get(name)
            .map(|&id| &self.chroms[id as usize])
            .ok_or_else(|| Error::InvalidArgument(format!("unknown chromosome '{name}'")))
    }

    /// Whether a chromosome with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Chromosomes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Chromosome> {
        self.chroms.iter()
    }
}
