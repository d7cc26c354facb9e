/// Redact user-controlled content from a `serde_json` error display string.
///
/// Client requests can carry secrets (the attach secret, evaluated
/// expressions), and decode errors like `invalid type: string "..."` would
/// otherwise echo them back into responses and logs. Double-quoted substrings
/// are always redacted; backticked segments are redacted only after
/// `unknown field`/`unknown variant` or inside `invalid type`/`invalid value`
/// scalars, so schema names and line/column info survive.
#[must_use]
pub fn sanitize_json_error_message(message: &str) -> String {
    let mut out = redact_double_quoted(message);

    let start = ["unknown field `", "unknown variant `"]
        .iter()
        .filter_map(|pattern| out.find(pattern).map(|pos| pos + pattern.len()))
        .min()
        .or_else(|| {
            if !(out.contains("invalid type:") || out.contains("invalid value:")) {
                return None;
            }
            let boundary = out.find(", expected").unwrap_or(out.len());
            out[..boundary].find('`').map(|pos| pos + 1)
        });

    if let Some(start) = start {
        let rest = &out[start..];
        let end = rest
            .find("`, expected")
            .or_else(|| rest.find('`'))
            .map(|rel| start + rel);
        if let Some(end) = end {
            out.replace_range(start..end, "<redacted>");
        }
    }

    out
}

fn redact_double_quoted(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut in_quote = false;
    let mut escaped = false;
    for ch in message.chars() {
        if !in_quote {
            out.push(ch);
            in_quote = ch == '"';
            continue;
        }
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => {
                out.push_str("<redacted>\"");
                in_quote = false;
            }
            _ => {}
        }
    }
    if in_quote {
        out.push_str("<redacted>");
    }
    out
}
