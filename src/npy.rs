//! Minimal NumPy `.npy` (format 1.0) writer for `(N, 2)` arrays
//! of little-endian `float64`.
//!
//! Layout: 6-byte magic `\x93NUMPY`, version `1 0`, u16 LE header length,
//! a Python dict literal padded with spaces and a trailing newline so the
//! data starts on a 64-byte boundary, then the raw row-major values.

use std::fs;
use std::io;
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const PREAMBLE_LEN: usize = 10;
const ALIGNMENT: usize = 64;

/// Encode rows as a `(rows.len(), 2)` `<f8` array
pub fn encode(rows: &[[f64; 2]]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 2), }}",
        rows.len()
    );
    // Header text is padded so that preamble + header + '\n' is aligned
    let unpadded = PREAMBLE_LEN + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_len + rows.len() * 16);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');

    for row in rows {
        for value in row {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Write rows to `path`, replacing any existing file
pub fn save(path: &Path, rows: &[[f64; 2]]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, encode(rows))?;
    Ok(())
}

/// Reader for the arrays written by [`save`], used to check saved output
#[cfg(test)]
pub mod read {
    use super::{MAGIC, PREAMBLE_LEN};
    use std::fs;
    use std::path::Path;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum NpyError {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
        #[error("not an .npy file")]
        BadMagic,
        #[error("unsupported .npy version {0}.{1}")]
        UnsupportedVersion(u8, u8),
        #[error("unsupported array header: {0}")]
        UnsupportedHeader(String),
        #[error("expected {expected} data bytes, found {found}")]
        Truncated { expected: usize, found: usize },
    }

    /// Decode a `(N, 2)` `<f8` C-order array
    pub fn decode(bytes: &[u8]) -> Result<Vec<[f64; 2]>, NpyError> {
        if bytes.len() < PREAMBLE_LEN || &bytes[..6] != MAGIC {
            return Err(NpyError::BadMagic);
        }
        let (major, minor) = (bytes[6], bytes[7]);
        if major != 1 {
            return Err(NpyError::UnsupportedVersion(major, minor));
        }

        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let data_start = PREAMBLE_LEN + header_len;
        let header = bytes
            .get(PREAMBLE_LEN..data_start)
            .ok_or(NpyError::Truncated {
                expected: data_start,
                found: bytes.len(),
            })?;
        let header = String::from_utf8_lossy(header);
        let rows = parse_header(&header)?;

        let data = &bytes[data_start..];
        let expected = rows.checked_mul(16).ok_or_else(|| {
            NpyError::UnsupportedHeader(format!("{} rows do not fit in memory", rows))
        })?;
        if data.len() != expected {
            return Err(NpyError::Truncated {
                expected,
                found: data.len(),
            });
        }

        Ok(data
            .chunks_exact(16)
            .map(|chunk| {
                let mut x = [0u8; 8];
                let mut y = [0u8; 8];
                x.copy_from_slice(&chunk[..8]);
                y.copy_from_slice(&chunk[8..]);
                [f64::from_le_bytes(x), f64::from_le_bytes(y)]
            })
            .collect())
    }

    /// Extract the row count from the header dict, checking dtype and order
    pub fn parse_header(header: &str) -> Result<usize, NpyError> {
        let compact: String = header.chars().filter(|c| !c.is_whitespace()).collect();
        let unsupported = || NpyError::UnsupportedHeader(header.trim().to_string());

        if !compact.contains("'descr':'<f8'") || !compact.contains("'fortran_order':False") {
            return Err(unsupported());
        }

        let shape_start = compact.find("'shape':(").ok_or_else(unsupported)? + "'shape':(".len();
        let shape_end = compact[shape_start..].find(')').ok_or_else(unsupported)? + shape_start;
        let dims: Vec<&str> = compact[shape_start..shape_end]
            .split(',')
            .filter(|d| !d.is_empty())
            .collect();

        match dims.as_slice() {
            [rows, "2"] => rows.parse().map_err(|_| unsupported()),
            _ => Err(unsupported()),
        }
    }

    pub fn load(path: &Path) -> Result<Vec<[f64; 2]>, NpyError> {
        decode(&fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::read::{decode, load, parse_header, NpyError};
    use super::*;

    #[test]
    fn test_header_is_aligned() {
        let bytes = encode(&[[1.0, 2.0]; 4]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((PREAMBLE_LEN + header_len) % ALIGNMENT, 0);
        assert_eq!(bytes[PREAMBLE_LEN + header_len - 1], b'\n');
        assert_eq!(bytes.len(), PREAMBLE_LEN + header_len + 4 * 16);
    }

    #[test]
    fn test_header_text() {
        let bytes = encode(&[[0.0, 0.0]; 4]);
        let text = String::from_utf8_lossy(&bytes[PREAMBLE_LEN..PREAMBLE_LEN + 70]);
        assert!(text.starts_with("{'descr': '<f8', 'fortran_order': False, 'shape': (4, 2), }"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source_points.npy");
        let rows = [[112.0, 40.0], [251.0, 37.0], [327.73, 480.0], [-3.5, 480.0]];

        save(&path, &rows).unwrap();
        assert_eq!(load(&path).unwrap(), rows.to_vec());

        // Overwrites without complaint
        let moved = [[1.0, 1.0], [2.0, 1.0], [3.0, 480.0], [0.0, 480.0]];
        save(&path, &moved).unwrap();
        assert_eq!(load(&path).unwrap(), moved.to_vec());
    }

    #[test]
    fn test_rejects_other_files() {
        assert!(matches!(decode(b"PNG not npy"), Err(NpyError::BadMagic)));

        let mut bytes = encode(&[[1.0, 2.0]; 4]);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode(&bytes), Err(NpyError::Truncated { .. })));
    }

    #[test]
    fn test_huge_shape_is_rejected() {
        let dict = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 2), }}\n",
            usize::MAX
        );
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(&[0u8; 64]);

        assert!(matches!(decode(&bytes), Err(NpyError::UnsupportedHeader(_))));
    }

    #[test]
    fn test_rejects_other_dtypes() {
        let header = "{'descr': '<i4', 'fortran_order': False, 'shape': (4, 2), }";
        assert!(parse_header(header).is_err());
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (4, 3), }";
        assert!(parse_header(header).is_err());
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (4, 2), }";
        assert_eq!(parse_header(header).unwrap(), 4);
    }
}
