//! Segment file naming template substitution (spec §6.4). Recognizes
//! `$RepresentationID$`, `$Number$` (with optional `%0Nd` zero-padding),
//! `$Time$` and `$Bandwidth$`, resolved once per segment the muxer writes.

/// Values available for one naming resolution, supplied by the muxer at
/// the point it's about to open a new segment sink.
#[derive(Debug, Clone)]
pub struct NamingContext<'a> {
    pub representation_id: &'a str,
    pub number: i64,
    pub time: i64,
    pub bandwidth: u64,
}

/// Resolves every `$...$` token in `template` against `context`.
/// Unrecognized tokens are left untouched, matching the original's
/// "pass through what it doesn't understand" behavior for literal `$`
/// characters that aren't part of a variable.
pub fn resolve(template: &str, context: &NamingContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];
        match after.find('$') {
            Some(end) => {
                let token = &after[..end];
                match resolve_token(token, context) {
                    Some(resolved) => {
                        out.push_str(&resolved);
                        rest = &after[end + 1..];
                    }
                    None => {
                        out.push('$');
                        rest = after;
                    }
                }
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `token` is the text between a pair of `$`, e.g. `Number`,
/// `Number%05d`, `Bandwidth`.
fn resolve_token(token: &str, context: &NamingContext) -> Option<String> {
    let (name, format) = match token.find('%') {
        Some(p) => (&token[..p], Some(&token[p..])),
        None => (token, None),
    };
    match name {
        "RepresentationID" => Some(context.representation_id.to_string()),
        "Number" => Some(format_number(context.number, format)),
        "Time" => Some(context.time.to_string()),
        "Bandwidth" => Some(context.bandwidth.to_string()),
        _ => None,
    }
}

/// Applies a `%0Nd`-style zero-padding spec to `value`, or plain decimal
/// if `format` is absent or malformed.
fn format_number(value: i64, format: Option<&str>) -> String {
    let Some(fmt) = format else { return value.to_string() };
    // Expect "%0Nd"; anything else falls back to unpadded.
    let fmt = fmt.strip_prefix('%').unwrap_or(fmt);
    let fmt = fmt.strip_suffix('d').unwrap_or(fmt);
    let width: Option<usize> = fmt.strip_prefix('0').and_then(|w| w.parse().ok());
    match width {
        Some(w) => format!("{:0width$}", value, width = w),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NamingContext<'static> {
        NamingContext { representation_id: "video-1", number: 7, time: 630000, bandwidth: 2_500_000 }
    }

    #[test]
    fn substitutes_all_recognized_tokens() {
        let out = resolve("$RepresentationID$/$Number$.m4s", &ctx());
        assert_eq!(out, "video-1/7.m4s");
    }

    #[test]
    fn zero_pads_number_with_explicit_width() {
        let out = resolve("seg-$Number%05d$.m4s", &ctx());
        assert_eq!(out, "seg-00007.m4s");
    }

    #[test]
    fn time_and_bandwidth_tokens_resolve() {
        let out = resolve("$Time$-$Bandwidth$.mp4", &ctx());
        assert_eq!(out, "630000-2500000.mp4");
    }

    #[test]
    fn unrecognized_token_is_left_untouched() {
        let out = resolve("$Unknown$-literal", &ctx());
        assert_eq!(out, "$Unknown$-literal");
    }
}
