//! Block-wise file digests.

use fdl_schema::HashAlgorithm;
use sha2::Digest;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used while hashing (64 KiB).
const BLOCK_SIZE: usize = 64 * 1024;

fn digest_reader<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex digest of everything `reader` yields.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn hash_reader(reader: &mut impl Read, algorithm: HashAlgorithm) -> io::Result<String> {
    match algorithm {
        HashAlgorithm::Md5 => digest_reader::<md5::Md5>(reader),
        HashAlgorithm::Sha1 => digest_reader::<sha1::Sha1>(reader),
        HashAlgorithm::Sha224 => digest_reader::<sha2::Sha224>(reader),
        HashAlgorithm::Sha256 => digest_reader::<sha2::Sha256>(reader),
        HashAlgorithm::Sha384 => digest_reader::<sha2::Sha384>(reader),
        HashAlgorithm::Sha512 => digest_reader::<sha2::Sha512>(reader),
    }
}

/// Hex digest of a file's full contents.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file, algorithm)
}

/// Check a file against an expected hex digest (case-insensitive).
///
/// Returns `Ok(None)` on a match and `Ok(Some(actual))` on a mismatch.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn verify_file(
    path: &Path,
    expected: &str,
    algorithm: HashAlgorithm,
) -> io::Result<Option<String>> {
    let actual = hash_file(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(None)
    } else {
        Ok(Some(actual))
    }
}

/// `true` if `path` exists and its digest equals `expected`.
///
/// Any read error counts as "does not match".
pub fn file_matches(path: &Path, expected: &str, algorithm: HashAlgorithm) -> bool {
    matches!(verify_file(path, expected, algorithm), Ok(None))
}

/// SHA-1 hex digest of a string.
pub fn sha1_hex(text: &str) -> String {
    hex::encode(sha1::Sha1::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_digests() {
        let mut empty: &[u8] = b"";
        assert_eq!(
            hash_reader(&mut empty, HashAlgorithm::Sha256).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        let mut abc: &[u8] = b"abc";
        assert_eq!(
            hash_reader(&mut abc, HashAlgorithm::Md5).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn verify_reports_actual_on_mismatch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let ok = verify_file(
            file.path(),
            "A9993E364706816ABA3E25717850C26C9CD0D89D",
            HashAlgorithm::Sha1,
        )
        .unwrap();
        assert_eq!(ok, None);

        let bad = verify_file(file.path(), "00", HashAlgorithm::Sha1).unwrap();
        assert_eq!(
            bad.as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert!(!file_matches(
            Path::new("/nonexistent/file"),
            "00",
            HashAlgorithm::Sha1
        ));
    }

    #[test]
    fn spans_multiple_blocks() {
        let data = vec![7u8; BLOCK_SIZE * 2 + 17];
        let mut reader: &[u8] = &data;
        let streamed = hash_reader(&mut reader, HashAlgorithm::Sha512).unwrap();
        assert_eq!(streamed, hex::encode(sha2::Sha512::digest(&data)));
    }
}
