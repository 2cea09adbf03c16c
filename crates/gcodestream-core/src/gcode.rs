//! G-code line utilities.
//!
//! Every stream stage works on raw text lines. These helpers are the only
//! place where lines are tokenized: they look only at the code part of a
//! line (everything before `;`) so digits inside comments never leak into
//! parsed values.

use crate::position::PrinterMove;

/// Suffix marking a line that must pass through every stage untouched.
pub const NO_PROCESSING: &str = "; NO_PROCESSING";

/// Return the code part of a line (before any `;` comment), trailing whitespace trimmed.
pub fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(index) => line[..index].trim_end(),
        None => line.trim_end(),
    }
}

/// True when the line carries the [`NO_PROCESSING`] marker.
pub fn has_no_processing(line: &str) -> bool {
    line.trim_end().ends_with(NO_PROCESSING)
}

/// Parse the leading command word of a line, e.g. `G1 X10` -> `('G', 1.0)`.
///
/// The letter is uppercased; `G01` and `G1` compare equal.
pub fn command(line: &str) -> Option<(char, f64)> {
    let code = strip_comment(line).trim_start();
    let token = code.split_whitespace().next()?;
    let mut chars = token.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if !letter.is_ascii_alphabetic() {
        return None;
    }
    let rest = chars.as_str();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let number = rest[..end].parse::<f64>().ok()?;
    Some((letter, number))
}

/// True when the line's command word matches `expected` (for example `"G28"` or `"M109"`).
pub fn command_is(line: &str, expected: &str) -> bool {
    match (command(line), command(expected)) {
        (Some(actual), Some(expected)) => actual == expected,
        _ => false,
    }
}

/// True for `G0` / `G1` lines.
pub fn is_movement(line: &str) -> bool {
    command_is(line, "G0") || command_is(line, "G1")
}

/// Find the first number following `key` in the code part of `line`.
///
/// The key must not be preceded by another letter (so `X` never matches inside
/// a word). Malformed numbers such as `X1.2.3` are skipped; if no well-formed
/// value follows any occurrence, `None` is returned.
pub fn first_number_after(key: &str, line: &str) -> Option<f64> {
    let code = strip_comment(line);
    number_span_after(key, code).and_then(|(start, end)| code[start..end].parse().ok())
}

/// Replace the number following `key`, or append `key<value>` to the code part
/// when the key is absent. Any comment is preserved.
pub fn set_number_after(line: &str, key: &str, value: f64) -> String {
    let code_len = line.find(';').unwrap_or(line.len());
    let code = &line[..code_len];
    let formatted = format_number(value);

    match number_span_after(key, code) {
        Some((start, end)) => format!("{}{}{}", &line[..start], formatted, &line[end..]),
        None => {
            let comment = &line[code_len..];
            let code = code.trim_end();
            if comment.is_empty() {
                format!("{} {}{}", code, key, formatted)
            } else {
                format!("{} {}{} {}", code, key, formatted, comment)
            }
        }
    }
}

fn number_span_after(key: &str, code: &str) -> Option<(usize, usize)> {
    if key.is_empty() {
        return None;
    }

    let mut from = 0;
    while let Some(offset) = code[from..].find(key) {
        let start = from + offset;
        let after = start + key.len();
        let at_boundary = code[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphabetic());

        if at_boundary {
            let end = number_end(code, after);
            if end > after && code[after..end].parse::<f64>().is_ok() {
                return Some((after, end));
            }
        }
        from = after;
    }
    None
}

fn number_end(code: &str, start: usize) -> usize {
    let bytes = code.as_bytes();
    let mut end = start;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    end
}

/// Format a number with at most three decimals and no trailing zeros.
pub fn format_number(value: f64) -> String {
    let mut text = format!("{:.3}", value);
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Apply the X/Y/Z/E/F words of `line` on top of `last`.
pub fn get_position(line: &str, last: PrinterMove) -> PrinterMove {
    let mut position = last;
    if let Some(x) = first_number_after("X", line) {
        position.position.x = x;
    }
    if let Some(y) = first_number_after("Y", line) {
        position.position.y = y;
    }
    if let Some(z) = first_number_after("Z", line) {
        position.position.z = z;
    }
    if let Some(e) = first_number_after("E", line) {
        position.extrusion = e;
    }
    if let Some(f) = first_number_after("F", line) {
        position.feed_rate = f;
    }
    position
}

/// Build a `G1` line to `destination` carrying only the fields that differ from `start`.
pub fn create_movement_line(destination: &PrinterMove, start: &PrinterMove) -> String {
    fn changed(value: f64, previous: f64) -> bool {
        value.is_finite() && value != previous
    }

    let mut line = String::from("G1");
    let fields = [
        ("X", destination.position.x, start.position.x),
        ("Y", destination.position.y, start.position.y),
        ("Z", destination.position.z, start.position.z),
        ("E", destination.extrusion, start.extrusion),
        ("F", destination.feed_rate, start.feed_rate),
    ];
    for (key, value, previous) in fields {
        if changed(value, previous) {
            line.push(' ');
            line.push_str(key);
            line.push_str(&format_number(value));
        }
    }
    line
}

/// Layer index announced by a slicer layer comment (`;LAYER:3`, `; LAYER:3`, `; layer 3`).
pub fn layer_index(line: &str) -> Option<i32> {
    let comment = line.trim().strip_prefix(';')?.trim_start().to_ascii_uppercase();
    let rest = comment
        .strip_prefix("LAYER:")
        .or_else(|| comment.strip_prefix("LAYER "))?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}
