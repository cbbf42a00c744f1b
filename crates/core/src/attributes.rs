//! Metadata attribute names and the lookup tables used to decide which
//! attributes a data object must carry.

use crate::class::ObjectClass;

/// Checksum of the data object, mirroring the replica checksums.
pub const MD5: &str = "md5";
/// File type parsed from the path suffix.
pub const TYPE: &str = "type";

pub const DCTERMS_CREATED: &str = "dcterms:created";
pub const DCTERMS_CREATOR: &str = "dcterms:creator";

pub const SAMPLE_ID: &str = "sample_id";
pub const SAMPLE_CONSENT: &str = "sample_consent";
pub const SAMPLE_CONSENT_WITHDRAWN: &str = "sample_consent_withdrawn";
pub const STUDY_ID: &str = "study_id";
pub const ID_PRODUCT: &str = "id_product";

pub const ID_RUN: &str = "id_run";
pub const ONT_EXPERIMENT_NAME: &str = "ont:experiment_name";
pub const ONT_INSTRUMENT_SLOT: &str = "ont:instrument_slot";
pub const PACBIO_RUN: &str = "run";
pub const PACBIO_WELL: &str = "well";

/// Pseudo-attribute used when the warehouse location of a product disagrees
/// with where the object is stored.
pub const LOCATION: &str = "location";

/// Creator recorded when the process that created the data is not known.
pub const DEFAULT_CREATOR: &str = "http://www.sanger.ac.uk";

/// Value of `sample_consent_withdrawn` marking restricted data.
pub const CONSENT_WITHDRAWN_VALUE: &str = "1";
/// Legacy `sample_consent` value marking restricted data.
pub const LEGACY_CONSENT_ABSENT_VALUE: &str = "0";

/// Group granted world access.
pub const PUBLIC_GROUP: &str = "public";
/// Prefix of per-study access groups (`ss_<study id>`).
pub const STUDY_GROUP_PREFIX: &str = "ss_";

/// Suffixes recognised for `type` metadata.
pub const RECOGNISED_FILE_TYPES: &[&str] = &[
    "_samhaplotag_clear_bc",
    "_samhaplotag_missing_bc_qt_tags",
    "_samhaplotag_unclear_bc",
    "bai",
    "bam",
    "bam_stats",
    "bamcheck",
    "bcfstats",
    "bed",
    "bin",
    "bqsr_table",
    "crai",
    "cram",
    "csv",
    "fasta",
    "flagstat",
    "gtc",
    "h5",
    "hops",
    "idat",
    "json",
    "pbi",
    "quant",
    "seqchksum",
    "stats",
    "tab",
    "tar",
    "tbi",
    "tgz",
    "tif",
    "tsv",
    "txt",
    "xls",
    "xlsx",
    "xml",
];

/// Suffixes that indicate compression and are skipped when parsing a type.
pub const COMPRESSION_SUFFIXES: &[&str] = &["bz2", "gz", "xz", "zip"];

/// Attributes every data object must carry regardless of class.
pub const COMMON_REQUIRED: &[&str] = &[DCTERMS_CREATED, DCTERMS_CREATOR];

/// Class-specific attributes required in addition to [`COMMON_REQUIRED`].
pub fn class_required(class: ObjectClass) -> &'static [&'static str] {
    match class {
        ObjectClass::Illumina => &[ID_RUN, SAMPLE_ID, STUDY_ID],
        ObjectClass::OxfordNanopore => {
            &[ONT_EXPERIMENT_NAME, ONT_INSTRUMENT_SLOT, SAMPLE_ID, STUDY_ID]
        }
        ObjectClass::PacBio => &[PACBIO_RUN, PACBIO_WELL, SAMPLE_ID, STUDY_ID],
        ObjectClass::Genomics10x
        | ObjectClass::Bionano
        | ObjectClass::Fluidigm
        | ObjectClass::Sequenom
        | ObjectClass::UltimaGenomics => &[SAMPLE_ID, STUDY_ID],
        ObjectClass::Generic => &[],
    }
}

/// Return the data type parsed from a path suffix.
///
/// Compression suffixes are skipped, so `a.bam.gz` has type `bam`. The result
/// is folded to lower case. Names without a suffix, or with only compression
/// suffixes, have no type.
pub fn parse_object_type(path: &str) -> Option<String> {
    let name = crate::path::file_name(path);
    if name.ends_with('.') {
        return None;
    }
    let name = name.trim_start_matches('.');
    let mut parts = name.split('.');
    parts.next();

    let suffixes: Vec<String> = parts.map(|s| s.to_ascii_lowercase()).collect();
    suffixes
        .into_iter()
        .rev()
        .find(|s| !COMPRESSION_SUFFIXES.contains(&s.as_str()))
}

/// True if the path suffix is one that must be recorded as `type` metadata.
pub fn requires_type_metadata(path: &str) -> bool {
    parse_object_type(path).is_some_and(|t| RECOGNISED_FILE_TYPES.contains(&t.as_str()))
}

/// True if an access group is one that must lose access when consent is withdrawn.
pub fn is_restricted_group(owner: &str) -> bool {
    owner == PUBLIC_GROUP || owner.starts_with(STUDY_GROUP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_type_skips_compression() {
        assert_eq!(parse_object_type("/seq/1/a.bam.gz").as_deref(), Some("bam"));
        assert_eq!(parse_object_type("/seq/1/a.CRAM").as_deref(), Some("cram"));
        assert_eq!(parse_object_type("/seq/1/archive.tar.bz2").as_deref(), Some("tar"));
        assert_eq!(parse_object_type("/seq/1/a.gz"), None);
        assert_eq!(parse_object_type("/seq/1/README"), None);
        assert_eq!(parse_object_type("/seq/1/trailing."), None);
    }

    #[test]
    fn test_requires_type_metadata() {
        assert!(requires_type_metadata("/seq/1/a.cram"));
        assert!(requires_type_metadata("/seq/1/a.json.gz"));
        assert!(!requires_type_metadata("/seq/1/a.dat"));
        assert!(!requires_type_metadata("/seq/1/a"));
    }

    #[test]
    fn test_restricted_groups() {
        assert!(is_restricted_group("public"));
        assert!(is_restricted_group("ss_1234"));
        assert!(!is_restricted_group("rodsadmin"));
    }

    #[test]
    fn test_class_required_tables() {
        assert!(class_required(ObjectClass::Illumina).contains(&SAMPLE_ID));
        assert!(class_required(ObjectClass::OxfordNanopore).contains(&ONT_EXPERIMENT_NAME));
        assert!(class_required(ObjectClass::Generic).is_empty());
    }
}
