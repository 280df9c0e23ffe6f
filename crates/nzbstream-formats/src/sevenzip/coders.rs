//! Coder identification and encoded-header decoding

use std::io::Cursor;

use lzma_rs::decompress::{Options, UnpackedSize};
use tracing::trace;

use super::database::Folder;
use crate::error::{FormatError, FormatResult};

/// Copy (no transformation)
pub const METHOD_COPY: &[u8] = &[0x00];
/// LZMA
pub const METHOD_LZMA: &[u8] = &[0x03, 0x01, 0x01];
/// LZMA2
pub const METHOD_LZMA2: &[u8] = &[0x21];
/// 7zAES (AES-256 + SHA-256)
pub const METHOD_AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

/// Readable name for a coder id
pub fn method_name(id: &[u8]) -> String {
    match id {
        METHOD_COPY => "Copy".to_string(),
        METHOD_LZMA => "LZMA".to_string(),
        METHOD_LZMA2 => "LZMA2".to_string(),
        METHOD_AES => "7zAES".to_string(),
        [0x04, 0x01, 0x08] => "Deflate".to_string(),
        [0x04, 0x02, 0x02] => "BZip2".to_string(),
        [0x03, 0x04, 0x01] => "PPMD".to_string(),
        other => other.iter().map(|b| format!("{b:02X}")).collect(),
    }
}

/// How an entry's bytes are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMethod {
    /// Bytes are stored as-is
    Copy,
    /// Bytes are AES-256-CBC encrypted, otherwise stored
    Aes,
}

/// Check a data folder against what can be served directly
///
/// Returns the method plus the AES properties when encrypted.
pub(crate) fn storage_method(folder: &Folder) -> FormatResult<(StorageMethod, Option<Vec<u8>>)> {
    let unsupported = || FormatError::UnsupportedCompression {
        entry: String::new(),
        method: folder
            .coders
            .iter()
            .map(|c| method_name(&c.method_id))
            .collect::<Vec<_>>()
            .join("+"),
    };

    let mut aes = None;
    for coder in &folder.coders {
        match coder.method_id.as_slice() {
            METHOD_COPY => {}
            METHOD_AES if aes.is_none() => {
                aes = Some(coder.properties.clone().unwrap_or_default());
            }
            _ => return Err(unsupported()),
        }
    }
    if folder.packed_streams.len() != 1 {
        return Err(unsupported());
    }
    Ok(match aes {
        Some(props) => (StorageMethod::Aes, Some(props)),
        None => (StorageMethod::Copy, None),
    })
}

fn decode_error(err: impl std::fmt::Display) -> FormatError {
    FormatError::Decode(err.to_string())
}

fn decode_coder(
    method_id: &[u8],
    properties: Option<&[u8]>,
    input: &[u8],
    unpack_size: u64,
) -> FormatResult<Vec<u8>> {
    let capacity = usize::try_from(unpack_size).map_err(decode_error)?;
    let mut output = Vec::with_capacity(capacity);
    match method_id {
        METHOD_COPY => output.extend_from_slice(input),
        METHOD_LZMA => {
            let props = properties
                .filter(|p| p.len() == 5)
                .ok_or_else(|| FormatError::Decode("LZMA coder without properties".into()))?;
            let mut stream = props.to_vec();
            stream.extend_from_slice(input);
            let options = Options {
                unpacked_size: UnpackedSize::UseProvided(Some(unpack_size)),
                ..Default::default()
            };
            lzma_rs::lzma_decompress_with_options(&mut Cursor::new(stream), &mut output, &options)
                .map_err(decode_error)?;
        }
        METHOD_LZMA2 => {
            lzma_rs::lzma2_decompress(&mut Cursor::new(input), &mut output).map_err(decode_error)?;
        }
        METHOD_AES => return Err(FormatError::EncryptedHeaders),
        other => {
            return Err(FormatError::Decode(format!(
                "header coder {} not supported",
                method_name(other)
            )));
        }
    }
    trace!(
        "Decoded {} header bytes with {}",
        output.len(),
        method_name(method_id)
    );
    Ok(output)
}

/// Decode a single-stream folder (an encoded header)
///
/// Coders are applied last to first, which is the order 7-Zip chains
/// them for headers.
pub(crate) fn decode_folder(folder: &Folder, packed: &[u8]) -> FormatResult<Vec<u8>> {
    if folder.coders.iter().any(|c| c.num_in_streams != 1 || c.num_out_streams != 1) {
        return Err(FormatError::Decode("multi-stream header coders".into()));
    }
    let mut data = packed.to_vec();
    for (index, coder) in folder.coders.iter().enumerate().rev() {
        let size = folder.unpack_sizes.get(index).copied().unwrap_or(data.len() as u64);
        data = decode_coder(&coder.method_id, coder.properties.as_deref(), &data, size)?;
    }
    if data.len() as u64 != folder.unpack_size() {
        return Err(FormatError::Decode(format!(
            "header decoded to {} bytes, expected {}",
            data.len(),
            folder.unpack_size()
        )));
    }
    Ok(data)
}
