use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered (pattern, placeholder) pairs. Earlier entries win because later ones
/// only see the already-masked text.
static MASKS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let table: [(&str, &str); 10] = [
        (r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d{1,9})?(?:Z|[+-]\d{2}(?::?\d{2})?)?", "<TIMESTAMP>"),
        (r#"\b[a-zA-Z][a-zA-Z0-9+.-]*://[^\s"']+"#, "<URL>"),
        (r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b", "<IP>"),
        (r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?::\d{1,5})?\b", "<IP>"),
        (r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "<EMAIL>"),
        (r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b", "<UUID>"),
        (r"(?:~|\.{1,2})?/[\w.\-]+(?:/[\w.\-]+)+", "<PATH>"),
        (r"\b[0-9a-fA-F]{16,}\b", "<HEX>"),
        (r"(?i)\b-?\d+(?:\.\d+)?(ms|us|µs|ns|s|m|h|kb|mb|gb|kib|mib|gib|b|%)\b", "<NUM>$1"),
        (r"\b-?\d+(?:\.\d+)?\b", "<NUM>"),
    ];
    table
        .into_iter()
        .map(|(re, placeholder)| (Regex::new(re).unwrap(), placeholder))
        .collect()
});

/// Replace variable tokens so that messages differing only in ids, numbers
/// or addresses collapse onto one template.
pub fn mask_text(input: &str) -> String {
    let mut s = input.trim().to_string();
    for (re, placeholder) in MASKS.iter() {
        if re.is_match(&s) {
            s = re.replace_all(&s, *placeholder).into_owned();
        }
    }
    s
}
