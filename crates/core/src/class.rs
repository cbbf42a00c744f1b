//! Object classes inferred from storage paths.
//!
//! The class decides which platform metadata an object must carry and may
//! override the expected replication factor.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// The instrument platform (or lack of one) that produced a data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Bionano,
    Fluidigm,
    #[serde(rename = "10x")]
    Genomics10x,
    Illumina,
    #[serde(rename = "ont")]
    OxfordNanopore,
    #[serde(rename = "pacbio")]
    PacBio,
    Sequenom,
    UltimaGenomics,
    Generic,
}

static BIONANO: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/bionano\b"));
static FLUIDIGM: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/fluidigm\b"));
static GENOMICS_10X: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^/seq/illumina/(cell|long|space)ranger"));
static ILLUMINA_LEGACY: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/\d+\b"));
static ILLUMINA: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/illumina/runs/\d+\b"));
static ONT: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/ont\b"));
static PACBIO: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/pacbio\b"));
static SEQUENOM: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/sequenom\b"));
static ULTIMA: LazyLock<Regex> = LazyLock::new(|| pattern(r"^/seq/ug\b"));

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static path pattern compiles")
}

impl ObjectClass {
    /// Every class, in inference priority order.
    pub const ALL: [ObjectClass; 9] = [
        Self::Bionano,
        Self::Fluidigm,
        Self::Genomics10x,
        Self::Illumina,
        Self::OxfordNanopore,
        Self::PacBio,
        Self::Sequenom,
        Self::UltimaGenomics,
        Self::Generic,
    ];

    /// Infer the class of an object from its path.
    ///
    /// 10x paths live beneath the Illumina tree, so they are tested first.
    pub fn infer(path: &str) -> Self {
        if BIONANO.is_match(path) {
            Self::Bionano
        } else if FLUIDIGM.is_match(path) {
            Self::Fluidigm
        } else if GENOMICS_10X.is_match(path) {
            Self::Genomics10x
        } else if ILLUMINA_LEGACY.is_match(path) || ILLUMINA.is_match(path) {
            Self::Illumina
        } else if ONT.is_match(path) {
            Self::OxfordNanopore
        } else if PACBIO.is_match(path) {
            Self::PacBio
        } else if SEQUENOM.is_match(path) {
            Self::Sequenom
        } else if ULTIMA.is_match(path) {
            Self::UltimaGenomics
        } else {
            Self::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bionano => "bionano",
            Self::Fluidigm => "fluidigm",
            Self::Genomics10x => "10x",
            Self::Illumina => "illumina",
            Self::OxfordNanopore => "ont",
            Self::PacBio => "pacbio",
            Self::Sequenom => "sequenom",
            Self::UltimaGenomics => "ultima_genomics",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for ObjectClass {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::UnknownObjectClass(s.to_string()))
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_platforms() {
        assert_eq!(ObjectClass::infer("/seq/12345/12345_1#1.cram"), ObjectClass::Illumina);
        assert_eq!(
            ObjectClass::infer("/seq/illumina/runs/47/47995/lane1/plex1/47995_1#1.cram"),
            ObjectClass::Illumina
        );
        assert_eq!(
            ObjectClass::infer("/seq/illumina/cellranger/sample/out.h5"),
            ObjectClass::Genomics10x
        );
        assert_eq!(ObjectClass::infer("/seq/ont/expt/slot/a.bam"), ObjectClass::OxfordNanopore);
        assert_eq!(ObjectClass::infer("/seq/pacbio/r64/a.bam"), ObjectClass::PacBio);
        assert_eq!(ObjectClass::infer("/seq/ug/run/a.cram"), ObjectClass::UltimaGenomics);
        assert_eq!(ObjectClass::infer("/seq/ontology/a.txt"), ObjectClass::Generic);
        assert_eq!(ObjectClass::infer("/testZone/home/a.txt"), ObjectClass::Generic);
    }

    #[test]
    fn test_class_names_roundtrip() {
        for class in ObjectClass::ALL {
            assert_eq!(class.as_str().parse::<ObjectClass>().unwrap(), class);
        }
        assert!("nanopore".parse::<ObjectClass>().is_err());
    }
}
