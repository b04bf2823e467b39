use encoding_rs::{DecoderResult, SHIFT_JIS};

use crate::error::{ZipError, ZipResult};

/// Convert CP932 (Windows Shift-JIS) encoded bytes to a UTF-8 string.
/// ZIP tools on Japanese Windows store entry names in CP932 without setting
/// the UTF-8 flag. encoding_rs::SHIFT_JIS is the WHATWG decoder, which covers
/// the CP932 extensions (NEC and IBM rows) as well.
///
/// Malformed input is an error, never replaced: the returned offset points
/// at the first byte of the offending sequence.
pub fn cp932_to_utf8(bytes: &[u8]) -> ZipResult<String> {
    let mut decoder = SHIFT_JIS.new_decoder_without_bom_handling();
    let capacity = decoder
        .max_utf8_buffer_length_without_replacement(bytes.len())
        .ok_or_else(|| invalid(bytes, 0))?;
    let mut out = String::with_capacity(capacity);

    let (result, read) = decoder.decode_to_string_without_replacement(bytes, &mut out, true);
    match result {
        DecoderResult::InputEmpty => Ok(out),
        DecoderResult::Malformed(bad_len, consumed_after) => {
            let offset = read - consumed_after as usize - bad_len as usize;
            Err(invalid(bytes, offset))
        }
        // Unreachable with the worst-case capacity above.
        DecoderResult::OutputFull => Err(invalid(bytes, read)),
    }
}

/// Names flagged as UTF-8 (general purpose bit 11) still have to be valid.
pub fn utf8_name(bytes: &[u8]) -> ZipResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| invalid(bytes, e.valid_up_to()))
}

fn invalid(bytes: &[u8], offset: usize) -> ZipError {
    ZipError::InvalidEncoding {
        raw: bytes.to_vec(),
        offset,
    }
}
