const CONTEXT: usize = 3;

/// Render a single-hunk unified diff between two versions of `path`.
///
/// The hunk spans the region between the longest common prefix and suffix,
/// padded with up to three lines of context. Returns an empty string when the
/// contents are identical.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    // Lines keep their terminators so CRLF and missing final newlines count as changes.
    let a: Vec<&str> = old.split_inclusive('\n').collect();
    let b: Vec<&str> = new.split_inclusive('\n').collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let max_suffix = a.len().min(b.len()) - prefix;
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();

    let a_end = a.len() - suffix;
    let b_end = b.len() - suffix;
    let start = prefix.saturating_sub(CONTEXT);
    let trailing = suffix.min(CONTEXT);

    let a_len = a_end + trailing - start;
    let b_len = b_end + trailing - start;
    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        hunk_range(start, a_len),
        hunk_range(start, b_len)
    ));

    for line in &a[start..prefix] {
        push_line(&mut out, ' ', line);
    }
    for line in &a[prefix..a_end] {
        push_line(&mut out, '-', line);
    }
    for line in &b[prefix..b_end] {
        push_line(&mut out, '+', line);
    }
    for line in &a[a_end..a_end + trailing] {
        push_line(&mut out, ' ', line);
    }
    out
}

fn push_line(out: &mut String, marker: char, line: &str) {
    out.push(marker);
    match line.strip_suffix('\n') {
        Some(body) => {
            out.push_str(body);
            out.push('\n');
        }
        None => {
            out.push_str(line);
            out.push_str("\n\\ No newline at end of file\n");
        }
    }
}

fn hunk_range(start: usize, len: usize) -> String {
    if len == 0 {
        format!("{start},0")
    } else {
        format!("{},{len}", start + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_contents_have_no_diff() {
        assert_eq!(unified_diff("a.txt", "same\n", "same\n"), "");
    }

    #[test]
    fn new_file_is_all_additions() {
        let diff = unified_diff("a.txt", "", "one\ntwo\n");
        assert_eq!(diff, "--- a/a.txt\n+++ b/a.txt\n@@ -0,0 +1,2 @@\n+one\n+two\n");
    }

    #[test]
    fn changed_line_gets_context() {
        let old = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let new = "1\n2\n3\n4\nfive\n6\n7\n8\n";
        let diff = unified_diff("n.txt", old, new);
        assert_eq!(
            diff,
            "--- a/n.txt\n+++ b/n.txt\n@@ -2,7 +2,7 @@\n 2\n 3\n 4\n-5\n+five\n 6\n 7\n 8\n"
        );
    }

    #[test]
    fn trailing_newline_change_is_reported() {
        let diff = unified_diff("a.txt", "x\n", "x");
        assert_eq!(
            diff,
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,1 +1,1 @@\n-x\n+x\n\\ No newline at end of file\n"
        );
    }

    #[test]
    fn line_ending_change_is_a_real_diff() {
        let diff = unified_diff("w.txt", "one\r\ntwo\r\n", "one\ntwo\n");
        assert!(!diff.contains("No newline"));
        assert!(diff.contains("-one\r\n"));
        assert!(diff.contains("+one\n"));
        assert!(diff.contains("@@ -1,2 +1,2 @@"));
    }
}
