/// Parse a JSON-RPC hex quantity such as `0x1a`.
pub fn parse_quantity(quantity: &str) -> Result<u64, String> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity {:?} is missing the 0x prefix", quantity))?;
    if digits.is_empty() {
        return Err(format!("quantity {:?} has no digits", quantity));
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {:?}: {}", quantity, e))
}

pub fn parse_optional_quantity(quantity: Option<&str>) -> Result<Option<u64>, String> {
    quantity.map(parse_quantity).transpose()
}

/// Format a number as a JSON-RPC hex quantity.
pub fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}
