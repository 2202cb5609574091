//! Terminal styling helpers.

use console::Style;

/// Green checkmark prefix.
pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

/// Red cross prefix.
pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}

/// Yellow warning prefix.
pub fn warn(msg: &str) -> String {
    format!("{} {}", Style::new().yellow().apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}
