use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::candidate::ContentHash;
use crate::error::Error;

const CHUNK_SIZE: usize = 64 * 1024;
/// Leading bytes kept for format sniffing.
pub const HEAD_LENGTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: ContentHash,
    pub bytes_read: u64,
    pub head: Vec<u8>,
}

/// Stream a file through BLAKE3 in fixed-size chunks.
///
/// Memory use is bounded by `CHUNK_SIZE` regardless of file size. When
/// `expected_size` is given, a short read (file truncated since it was
/// scanned) is reported as a `Read` error rather than hashed.
pub fn fingerprint(path: &Path, expected_size: Option<u64>) -> Result<Fingerprint, Error> {
    let read_err = |source: io::Error| Error::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut head = Vec::with_capacity(HEAD_LENGTH);
    let mut bytes_read = 0u64;

    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_err(e)),
        };
        if head.len() < HEAD_LENGTH {
            let take = (HEAD_LENGTH - head.len()).min(n);
            head.extend_from_slice(&buffer[..take]);
        }
        hasher.update(&buffer[..n]);
        bytes_read += n as u64;
    }

    if let Some(expected) = expected_size {
        if bytes_read != expected {
            return Err(read_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read {} bytes, expected {}", bytes_read, expected),
            )));
        }
    }

    Ok(Fingerprint {
        hash: hasher.finalize().into(),
        bytes_read,
        head,
    })
}

/// Hash a file without size or head bookkeeping.
pub fn hash_file(path: &Path) -> Result<ContentHash, Error> {
    fingerprint(path, None).map(|fp| fp.hash)
}

pub fn hash_data(data: &[u8]) -> ContentHash {
    blake3::hash(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_identical_bytes_identical_hash_regardless_of_name() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("report.pdf");
        let b = tmp.path().join("nested").join("report_copy.bin");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        assert_eq!(hash_file(&a).unwrap(), hash_data(b"same bytes"));
    }

    #[test]
    fn test_streaming_matches_one_shot_for_multi_chunk_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let fp = fingerprint(&path, Some(data.len() as u64)).unwrap();
        assert_eq!(fp.hash, hash_data(&data));
        assert_eq!(fp.bytes_read, data.len() as u64);
        assert_eq!(fp.head, data[..HEAD_LENGTH].to_vec());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let tmp = tempdir().unwrap();
        let err = fingerprint(&tmp.path().join("gone"), None).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(err.is_per_file());
    }

    #[test]
    fn test_size_mismatch_is_read_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("shrunk.txt");
        fs::write(&path, b"abc").unwrap();
        assert!(matches!(
            fingerprint(&path, Some(10)),
            Err(Error::Read { .. })
        ));
    }
}
