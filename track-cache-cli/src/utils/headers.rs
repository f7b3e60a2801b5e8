use tracing::warn;

/// Split a header string in format "Name: Value"
pub fn parse_header(header_str: &str) -> Option<(&str, &str)> {
    // The first colon separates name and value
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(header = header_str, "Invalid header format, expected 'Name: Value'");
        return None;
    };

    let name = name.trim();
    if name.is_empty() {
        warn!(header = header_str, "Header name is empty");
        return None;
    }

    Some((name, value.trim()))
}
