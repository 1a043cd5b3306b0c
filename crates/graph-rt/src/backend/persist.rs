//! Framed bincode archives for persisted compiled artifacts.
//!
//! Layout: 8-byte magic, `u32` little-endian format version, `u64` little-endian FNV-1a checksum
//! of the payload, then the bincode payload. Writers go through a sibling temporary file and a
//! rename, so a failed save never leaves a truncated archive at the destination.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::hashing::fnv1a_hash;
use crate::error::{Error, Result};

const HEADER_LEN: usize = 8 + 4 + 8;

pub fn write_archive<T: Serialize>(
    path: &Path,
    magic: &[u8; 8],
    version: u32,
    payload: &T,
) -> Result<()> {
    let body = bincode::serialize(payload).map_err(|err| Error::save(path, err))?;
    let staging = staging_path(path);
    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&staging)?);
        writer.write_all(magic)?;
        writer.write_all(&version.to_le_bytes())?;
        writer.write_all(&fnv1a_hash(&body).to_le_bytes())?;
        writer.write_all(&body)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&staging, path)
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&staging);
        return Err(Error::save(path, err));
    }
    Ok(())
}

pub fn read_archive<T: DeserializeOwned>(path: &Path, magic: &[u8; 8], version: u32) -> Result<T> {
    let bytes = fs::read(path).map_err(|err| Error::load(path, err))?;
    if bytes.len() < HEADER_LEN {
        return Err(Error::load(path, "truncated header"));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if &header[..8] != magic {
        return Err(Error::load(path, "unrecognized archive format"));
    }
    let found = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if found != version {
        return Err(Error::load(
            path,
            format!("unsupported format version {found} (expected {version})"),
        ));
    }
    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&header[12..20]);
    if u64::from_le_bytes(checksum) != fnv1a_hash(body) {
        return Err(Error::load(path, "payload checksum mismatch"));
    }
    bincode::deserialize(body).map_err(|err| Error::load(path, err))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
