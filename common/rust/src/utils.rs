use ethers::types::{Address, Bytes};
use hex::FromHex;

pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Decodes hex with or without a `0x` prefix.
pub fn parse_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let value = value.trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    Vec::from_hex(value)
}

pub fn parse_bytes(value: &str) -> Result<Bytes, hex::FromHexError> {
    parse_hex(value).map(Bytes::from)
}
