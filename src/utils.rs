// src/utils.rs
use anyhow::{Context, Result};
use std::path::Path;

/// Lowercased, trimmed, inner whitespace collapsed. Used for role matching.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Falls back to `default` when the value is missing or blank.
pub fn non_blank<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}

/// Trims entries and drops blanks while keeping order.
pub fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

// File system utilities
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Security   Guard "), "security guard");
        assert_eq!(normalize_text("COOK"), "cook");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("Driver"), "Worker"), "Driver");
        assert_eq!(non_blank(Some("   "), "Worker"), "Worker");
        assert_eq!(non_blank(None, "Standard"), "Standard");
    }

    #[test]
    fn test_clean_list_keeps_order() {
        let skills = vec![
            " License ".to_string(),
            "".to_string(),
            "Navigation".to_string(),
        ];
        assert_eq!(clean_list(&skills), vec!["License", "Navigation"]);
    }
}
