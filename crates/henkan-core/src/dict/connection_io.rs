//! Binary serialization for the connection matrix.
//!
//! Layout: magic "HKCX" (4) | version (1) | num_ids (2, LE) |
//! resolution (2, LE) | num_ids² costs (i16, LE). Loading either copies the
//! costs into memory or maps the file and reads in place.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use super::connection::{Connector, CostStorage, HEADER_SIZE, MAGIC, VERSION};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionIoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("file truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

pub fn save_connection(conn: &Connector, path: &Path) -> Result<(), ConnectionIoError> {
    let mut file = File::create(path)?;
    file.write_all(MAGIC)?;
    file.write_all(&[VERSION])?;
    file.write_all(&conn.num_ids.to_le_bytes())?;
    file.write_all(&conn.resolution.to_le_bytes())?;
    let n = conn.num_ids as usize;
    for rid in 0..n {
        for lid in 0..n {
            let cost = conn.transition_cost(rid as u16, lid as u16) as i16;
            file.write_all(&cost.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Load the matrix by memory-mapping `path`. Costs are read straight from
/// the mapping, so the file must outlive the connector on disk.
pub fn load_connection_mmap(path: &Path) -> Result<Connector, ConnectionIoError> {
    let file = File::open(path)?;
    // Read-only mapping of a file we just opened.
    let mmap = unsafe { Mmap::map(&file)? };
    let (num_ids, resolution) = parse_header(&mmap)?;
    let expected = HEADER_SIZE + num_ids as usize * num_ids as usize * 2;
    if mmap.len() < expected {
        return Err(ConnectionIoError::Truncated {
            expected,
            actual: mmap.len(),
        });
    }
    Ok(Connector {
        num_ids,
        resolution,
        storage: CostStorage::Mapped(mmap),
    })
}

/// Load the matrix into owned memory.
pub fn load_connection_owned(data: &[u8]) -> Result<Connector, ConnectionIoError> {
    let (num_ids, resolution) = parse_header(data)?;
    let n = num_ids as usize * num_ids as usize;
    let expected = HEADER_SIZE + n * 2;
    if data.len() < expected {
        return Err(ConnectionIoError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    let costs = data[HEADER_SIZE..expected]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok(Connector {
        num_ids,
        resolution,
        storage: CostStorage::Owned(costs),
    })
}

fn parse_header(data: &[u8]) -> Result<(u16, u16), ConnectionIoError> {
    if data.len() < HEADER_SIZE {
        return Err(ConnectionIoError::Truncated {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }
    if &data[0..4] != MAGIC {
        return Err(ConnectionIoError::BadMagic);
    }
    if data[4] != VERSION {
        return Err(ConnectionIoError::BadVersion(data[4]));
    }
    let num_ids = u16::from_le_bytes([data[5], data[6]]);
    let resolution = u16::from_le_bytes([data[7], data[8]]);
    Ok((num_ids, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Connector {
        let costs: Vec<i16> = (0..4)
            .flat_map(|r| (0..4).map(move |l| (r * 100 + l) as i16))
            .collect();
        Connector::new_owned(4, 1, costs)
    }

    #[test]
    fn test_save_and_load_mmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.bin");
        let conn = sample();
        save_connection(&conn, &path).unwrap();

        let loaded = load_connection_mmap(&path).unwrap();
        assert_eq!(loaded.num_ids(), 4);
        assert_eq!(loaded.resolution(), 1);
        for rid in 0..4u16 {
            for lid in 0..4u16 {
                assert_eq!(loaded.transition_cost(rid, lid), conn.transition_cost(rid, lid));
            }
        }
    }

    #[test]
    fn test_save_and_load_owned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.bin");
        save_connection(&sample(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let loaded = load_connection_owned(&bytes).unwrap();
        assert_eq!(loaded.transition_cost(3, 2), 302);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            load_connection_owned(&bytes),
            Err(ConnectionIoError::BadMagic)
        ));
    }

    #[test]
    fn test_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.bin");
        save_connection(&sample(), &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            load_connection_owned(&bytes),
            Err(ConnectionIoError::Truncated { .. })
        ));
    }
}
