/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical form of a BLE address: trimmed and uppercase.
pub(crate) fn normalise_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}
