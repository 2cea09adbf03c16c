//! The stream stage contract shared by every pipeline stage.

use gcodestream_core::{strip_comment, PrinterMove};

/// One stage of the G-code pipeline.
///
/// Every stage except a source owns the stage below it; dropping the outermost
/// stage tears down the whole chain.
///
/// `read_line` returns `None` at end of stream. An empty string (or a
/// comment-only line) means "nothing to transmit right now" and lets a stage
/// wait without blocking the caller.
pub trait GcodeStream: Send {
    /// Short stage name used in logs and debug output
    fn name(&self) -> &str;

    /// Produce the next output line
    fn read_line(&mut self) -> Option<String>;

    /// Accept an authoritative printer position and forward it (in this stage's
    /// input frame) to the stage below.
    fn set_printer_position(&mut self, position: PrinterMove);

    /// Drop any buffered or pending work and forward to the stage below.
    fn cancel(&mut self);

    /// Describe the stage chain from this stage down.
    fn debug_info(&self) -> String;
}

/// A boxed pipeline stage.
pub type BoxedStream = Box<dyn GcodeStream>;

/// True when a line carries nothing to transmit.
pub fn is_nop(line: &str) -> bool {
    strip_comment(line).trim().is_empty()
}

/// Split a macro setting into lines.
///
/// Both real newlines and the literal two-character escape `\n` separate
/// lines. Blank macros produce no lines.
pub fn macro_lines(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.replace("\\n", "\n")
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_nop() {
        assert!(is_nop(""));
        assert!(is_nop("   "));
        assert!(is_nop("; waiting"));
        assert!(!is_nop("M105"));
    }

    #[test]
    fn test_macro_lines() {
        assert!(macro_lines("").is_empty());
        assert!(macro_lines("  \n ").is_empty());
        assert_eq!(macro_lines("G28\\nM105"), vec!["G28", "M105"]);
        assert_eq!(macro_lines("G91\r\n\r\nG90"), vec!["G91", "", "G90"]);
    }
}
