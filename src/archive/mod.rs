//! Portable archive format
//!
//! An archive is a zip holding one serialized document ([`DOCUMENT_NAME`]), a
//! plain-text manifest ([`README_NAME`]) and the media files referenced by the
//! exported content, stored at their uploads-relative paths.
//!
//! The document is XML:
//!
//! ```text
//! <archive>
//!   <header> format_version, generator, site, module_id, created </header>
//!   <authors> <author>... </authors>
//!   <terms> <category>... <tag>... <term>... </terms>
//!   <items> <item> ... <term_ref/> <meta/> <comment><meta/></comment> </item> </items>
//! </archive>
//! ```
//!
//! Free text is carried in CDATA sections (see [`cdata_sections`]).

mod cdata;
mod record;

pub use cdata::cdata_sections;
pub use record::{
    ArchiveHeader, AuthorRecord, CommentRecord, ItemRecord, MetaPair, Record, TermKind,
    TermRecord, TermRef,
};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Document format version written by this crate
pub const FORMAT_VERSION: &str = "1.2";

/// Name of the serialized document inside an archive
pub const DOCUMENT_NAME: &str = "export.xml";

/// Name of the human-readable manifest inside an archive
pub const README_NAME: &str = "readme.txt";

/// Generator string recorded in document headers
pub fn generator() -> String {
    format!("modmigrate/{}", env!("CARGO_PKG_VERSION"))
}

/// Element names used in the document
pub mod tag {
    pub const ARCHIVE: &str = "archive";
    pub const HEADER: &str = "header";
    pub const AUTHORS: &str = "authors";
    pub const AUTHOR: &str = "author";
    pub const TERMS: &str = "terms";
    pub const CATEGORY: &str = "category";
    pub const TAG: &str = "tag";
    pub const TERM: &str = "term";
    pub const ITEMS: &str = "items";
    pub const ITEM: &str = "item";
    pub const TERM_REF: &str = "term_ref";
    pub const META: &str = "meta";
    pub const COMMENT: &str = "comment";
}

/// How a document's declared format version relates to this parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSupport {
    Supported,
    /// Newer than [`FORMAT_VERSION`], or not a dotted number
    Newer,
    /// The document declares no version
    Unknown,
}

/// Compare a declared version against [`FORMAT_VERSION`].
///
/// Versions compare as dotted numbers with missing parts taken as zero, so
/// `1.2.0` equals `1.2`.
pub fn check_version(version: &str) -> VersionSupport {
    fn parse(v: &str) -> Option<Vec<u32>> {
        v.trim().split('.').map(|p| p.parse().ok()).collect()
    }
    if version.trim().is_empty() {
        return VersionSupport::Unknown;
    }
    let (Some(mut theirs), Some(mut ours)) = (parse(version), parse(FORMAT_VERSION)) else {
        return VersionSupport::Newer;
    };
    let len = theirs.len().max(ours.len());
    theirs.resize(len, 0);
    ours.resize(len, 0);
    if theirs > ours {
        VersionSupport::Newer
    } else {
        VersionSupport::Supported
    }
}

/// Timestamp as written in documents (RFC 3339, second precision, UTC)
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a document timestamp. Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS`
/// (taken as UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_formats() {
        let date = parse_date("2024-05-01T09:30:00Z").unwrap();
        assert_eq!(format_date(&date), "2024-05-01T09:30:00Z");
        assert_eq!(parse_date("2024-05-01 09:30:00"), Some(date));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_version_comparison() {
        assert_eq!(check_version("1.2"), VersionSupport::Supported);
        assert_eq!(check_version("1.2.0"), VersionSupport::Supported);
        assert_eq!(check_version("1.0"), VersionSupport::Supported);
        assert_eq!(check_version("1.2.1"), VersionSupport::Newer);
        assert_eq!(check_version("1.3"), VersionSupport::Newer);
        assert_eq!(check_version("2"), VersionSupport::Newer);
        assert_eq!(check_version("next"), VersionSupport::Newer);
        assert_eq!(check_version(""), VersionSupport::Unknown);
        assert_eq!(check_version("  "), VersionSupport::Unknown);
    }
}
