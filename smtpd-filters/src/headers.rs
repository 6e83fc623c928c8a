//! Header block edits on a message held as a list of lines.

/// Index of the blank line ending the header block, or the line count when
/// the message has no body.
pub fn header_end(lines: &[String]) -> usize {
    lines
        .iter()
        .position(|line| line.is_empty())
        .unwrap_or(lines.len())
}

fn is_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

fn is_named(line: &str, name: &str) -> bool {
    !is_continuation(line)
        && line
            .split_once(':')
            .is_some_and(|(field, _)| field.trim_end().eq_ignore_ascii_case(name))
}

pub fn has_header(lines: &[String], name: &str) -> bool {
    lines[..header_end(lines)]
        .iter()
        .any(|line| is_named(line, name))
}

/// Removes every `name` header with its continuation lines and returns how
/// many headers were dropped. The body is left untouched.
pub fn remove_header(lines: &mut Vec<String>, name: &str) -> usize {
    let end = header_end(lines);
    let mut index = 0;
    let mut dropping = false;
    let mut removed = 0;

    lines.retain(|line| {
        let in_header = index < end;
        index += 1;
        if !in_header {
            return true;
        }
        if !is_continuation(line) {
            dropping = is_named(line, name);
            if dropping {
                removed += 1;
            }
        }
        !dropping
    });

    removed
}

/// Appends a header, given as its physical lines, to the end of the header block.
pub fn insert_header<I>(lines: &mut Vec<String>, header: I)
where
    I: IntoIterator<Item = String>,
{
    let end = header_end(lines);
    lines.splice(end..end, header);
}
