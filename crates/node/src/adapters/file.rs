//! LOAD_FILE / WRITE_FILE: file transfer through forms.
//!
//! Content travels as base64 of zlib-compressed bytes, with an MD5
//! checksum and the uncompressed size alongside so the receiving side
//! can verify what it got.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use meshwork_core::form::{LoadFile, WriteFile};
use tracing::{debug, warn};

/// Read `form.path` into the form.
pub fn load(mut form: LoadFile) -> LoadFile {
    debug!(path = %form.path, "loading file");
    match std::fs::read(&form.path).and_then(|data| Ok((compress(&data)?, data))) {
        Ok((compressed, data)) => {
            form.size = Some(data.len() as u64);
            form.md5sum = Some(md5_hex(&data));
            form.b64 = Some(BASE64.encode(compressed));
            form.error = None;
        }
        Err(err) => {
            warn!(path = %form.path, %err, "failed to read file");
            form.error = Some(format!("failed to read {}: {err}", form.path));
            form.size = None;
            form.md5sum = None;
            form.b64 = None;
        }
    }
    form
}

/// Write the form's content to `form.path`.
pub fn write(mut form: WriteFile) -> WriteFile {
    debug!(path = %form.path, "writing file");
    let result = decode(&form.b64).and_then(|data| {
        std::fs::write(&form.path, &data)?;
        Ok(())
    });
    match result {
        Ok(()) => form.error = None,
        Err(err) => {
            warn!(path = %form.path, %err, "failed to write file");
            form.error = Some(format!("failed to write {}: {err}", form.path));
        }
    }
    form
}

/// Build a WRITE_FILE form from raw bytes, the way the admin CLI ships
/// a local file to a remote agent.
pub fn pack(data: &[u8], path: impl Into<String>) -> std::io::Result<WriteFile> {
    Ok(WriteFile {
        path: path.into(),
        b64: BASE64.encode(compress(data)?),
        size: Some(data.len() as u64),
        md5sum: Some(md5_hex(data)),
        error: None,
    })
}

/// Recover the raw bytes carried by a serviced LOAD_FILE form.
pub fn unpack(form: &LoadFile) -> std::io::Result<Vec<u8>> {
    let b64 = form
        .b64
        .as_deref()
        .ok_or_else(|| std::io::Error::other("form carries no content"))?;
    decode(b64)
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(9));
    encoder.write_all(data)?;
    encoder.finish()
}

fn decode(b64: &str) -> std::io::Result<Vec<u8>> {
    let compressed = BASE64
        .decode(b64)
        .map_err(|err| std::io::Error::other(format!("invalid base64: {err}")))?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    Ok(data)
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
