use super::types::{JoinedLine, PreprocessResult};

/// Physical lines of `text` with the byte offset each starts at. Line
/// terminators (`\n` or `\r\n`) are stripped.
fn physical_lines(text: &str) -> Vec<(usize, &str)> {
    let mut offset = 0usize;
    text.split_inclusive('\n')
        .map(|raw| {
            let start = offset;
            offset += raw.len();
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            (start, line.strip_suffix('\r').unwrap_or(line))
        })
        .collect()
}

/// A line continues onto the next when it ends with an odd number of `\`.
fn strip_continuation(line: &str) -> Option<&str> {
    let det = line.trim_end_matches([' ', '\t']);
    let slashes = det.chars().rev().take_while(|&c| c == '\\').count();
    (slashes % 2 == 1).then(|| &det[..det.len() - 1])
}

/// Join physical lines that are continued with a trailing backslash.
pub fn join_continued_lines(text: &str) -> Vec<JoinedLine> {
    let physical = physical_lines(text);
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < physical.len() {
        let start = i;
        let (line_offset, first) = physical[i];
        let indent = first.len() - first.trim_start().len();
        let mut buf = String::new();

        loop {
            let line = physical[i].1;
            let (continues, piece) = match strip_continuation(line) {
                Some(head) => (true, head),
                None => (false, line),
            };

            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(piece.trim());

            if continues && i + 1 < physical.len() {
                i += 1;
                continue;
            }
            break;
        }

        out.push(JoinedLine {
            text: buf,
            offset: line_offset + indent,
            phys_start: start,
            phys_end: i,
        });
        i += 1;
    }

    out
}

/// Full preprocessing pipeline
pub fn preprocess(text: &str) -> PreprocessResult {
    let logical = join_continued_lines(text);
    let physical_count = logical.last().map_or(0, |line| line.phys_end + 1);

    let mut phys_to_logical = vec![0usize; physical_count];
    for (li, joined) in logical.iter().enumerate() {
        for p in joined.phys_start..=joined.phys_end {
            phys_to_logical[p] = li;
        }
    }

    PreprocessResult {
        logical,
        phys_to_logical,
    }
}
