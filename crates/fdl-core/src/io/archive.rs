//! Index archive member extraction.
//!
//! An index archive is a signed JAR (a zip file). Only the one member holding
//! the index document is decompressed; the rest of the archive is ignored.

use std::io::{Read, Seek};
use std::path::PathBuf;

use fdl_schema::IndexError;
use zip::ZipArchive;
use zip::result::ZipError;

/// Member holding the JSON index.
pub const JSON_MEMBER: &str = "index-v1.json";
/// Member holding the legacy XML index.
pub const XML_MEMBER: &str = "index.xml";

/// Decompress the first member of `candidates` present in the archive.
///
/// Returns the member name together with its contents.
///
/// # Errors
///
/// Returns [`IndexError::Archive`] if the archive is unreadable and
/// [`IndexError::MissingMember`] if none of the candidates exist.
pub fn extract_member<R: Read + Seek>(
    reader: R,
    candidates: &[&str],
) -> Result<(String, Vec<u8>), IndexError> {
    let mut archive = ZipArchive::new(reader).map_err(|e| IndexError::Archive(e.to_string()))?;
    for name in candidates {
        match archive.by_name(name) {
            Ok(mut member) => {
                let mut data = Vec::with_capacity(member.size() as usize);
                member
                    .read_to_end(&mut data)
                    .map_err(|e| IndexError::Archive(e.to_string()))?;
                return Ok(((*name).to_string(), data));
            }
            Err(ZipError::FileNotFound) => {}
            Err(e) => return Err(IndexError::Archive(e.to_string())),
        }
    }
    Err(IndexError::MissingMember(candidates.join(" or ")))
}

/// [`extract_member`] on a file, run on the blocking pool.
///
/// # Errors
///
/// Same as [`extract_member`]; I/O failures map to [`IndexError::Archive`].
pub async fn extract_member_from_file(
    path: PathBuf,
    candidates: &'static [&'static str],
) -> Result<(String, Vec<u8>), IndexError> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path).map_err(|e| IndexError::Archive(e.to_string()))?;
        extract_member(std::io::BufReader::new(file), candidates)
    })
    .await
    .map_err(|e| IndexError::Archive(e.to_string()))?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Build an in-memory JAR with the given members.
    pub(crate) fn jar(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn picks_first_present_candidate() {
        let bytes = jar(&[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0"),
            (XML_MEMBER, b"<fdroid/>"),
        ]);
        let (name, data) = extract_member(Cursor::new(bytes), &[JSON_MEMBER, XML_MEMBER]).unwrap();
        assert_eq!(name, XML_MEMBER);
        assert_eq!(data, b"<fdroid/>");
    }

    #[test]
    fn missing_member_and_garbage() {
        let bytes = jar(&[("other.txt", b"x")]);
        assert!(matches!(
            extract_member(Cursor::new(bytes), &[JSON_MEMBER]),
            Err(IndexError::MissingMember(_))
        ));
        assert!(matches!(
            extract_member(Cursor::new(b"not a zip".to_vec()), &[JSON_MEMBER]),
            Err(IndexError::Archive(_))
        ));
    }

    #[tokio::test]
    async fn extracts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&jar(&[(JSON_MEMBER, b"{}")])).unwrap();
        let (name, data) = extract_member_from_file(file.path().to_path_buf(), &[JSON_MEMBER])
            .await
            .unwrap();
        assert_eq!(name, JSON_MEMBER);
        assert_eq!(data, b"{}");
    }
}
