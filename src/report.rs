//! Operator-Facing Reporting
//!
//! Colored one-line outcome messages. Progress goes through the `log`
//! facade; these helpers are for the final word on each command.

use std::process;

use colored::{ColoredString, Colorize};

/// Category tag attached to every reported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Success,
    Warning,
    Error,
}

impl Category {
    /// Plain-text tag for this category.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS:",
            Self::Warning => "WARNING:",
            Self::Error => "ERROR:",
        }
    }

    fn styled(self, text: &str) -> ColoredString {
        match self {
            Self::Success => text.green(),
            Self::Warning => text.yellow(),
            Self::Error => text.red(),
        }
    }
}

/// Formats a message with its category tag, colored when the terminal allows it.
pub fn format_line(category: Category, msg: &str) -> String {
    category
        .styled(&format!("{} {}", category.tag(), msg))
        .to_string()
}

/// Reports a completed action on standard output.
pub fn report_success(msg: &str) {
    println!("{}", format_line(Category::Success, msg));
}

/// Reports a non-fatal anomaly on standard error.
pub fn report_warning(msg: &str) {
    eprintln!("{}", format_line(Category::Warning, msg));
}

/// Reports an error on standard error without terminating.
pub fn report_error(msg: &str) {
    eprintln!("{}", format_line(Category::Error, msg));
}

/// Reports `msg` as the terminal diagnostic and exits with status 1.
pub fn fail(msg: &str) -> ! {
    report_error(msg);
    eprintln!("Exiting");
    process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct() {
        assert_eq!(Category::Success.tag(), "SUCCESS:");
        assert_eq!(Category::Warning.tag(), "WARNING:");
        assert_eq!(Category::Error.tag(), "ERROR:");
    }

    #[test]
    fn test_format_line_carries_tag_and_message() {
        let line = format_line(Category::Error, "lock artifact not found");
        assert!(line.contains("ERROR: lock artifact not found"));
    }

    #[test]
    fn test_format_line_is_single_line() {
        let line = format_line(Category::Success, "environment ready");
        assert!(!line.contains('\n'));
    }
}
