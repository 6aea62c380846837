//! Table and value formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Parse a memory string like "512m", "2g" into megabytes.
///
/// Used as a clap value parser for `--memory` and `--memory-swap`.
pub fn parse_memory(s: &str) -> Result<u32, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty memory value".to_string());
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('g') {
        (n, 1024u32)
    } else if let Some(n) = s.strip_suffix("gb") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix("mb") {
        (n, 1)
    } else {
        // Assume megabytes if no suffix
        (s.as_str(), 1)
    };

    let num: u32 = num_str
        .parse()
        .map_err(|_| format!("invalid memory value: {s}"))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("memory value too large: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_suffixes() {
        assert_eq!(parse_memory("512m").unwrap(), 512);
        assert_eq!(parse_memory("256MB").unwrap(), 256);
        assert_eq!(parse_memory("2G").unwrap(), 2048);
        assert_eq!(parse_memory("4gb").unwrap(), 4096);
        assert_eq!(parse_memory(" 768 ").unwrap(), 768);
    }

    #[test]
    fn test_parse_memory_rejects_bad_values() {
        for value in ["", "abc", "1.5g", "-512m"] {
            assert!(parse_memory(value).is_err(), "{value:?} accepted");
        }
    }

    #[test]
    fn test_parse_memory_overflow() {
        assert_eq!(parse_memory("4194303g").unwrap(), 4194303 * 1024);
        assert!(parse_memory("5000000g").is_err());
    }

    #[test]
    fn test_new_table_lists_images() {
        let mut table = new_table(&["NAME", "TAG", "DIGEST"]);
        table.add_row(["alpine", "3.19", "4cc3d8b6a1f0"]);
        let output = table.to_string();
        let header = output.lines().next().unwrap();
        assert!(header.contains("NAME") && header.contains("DIGEST"));
        assert!(output.contains("4cc3d8b6a1f0"));
    }
}
