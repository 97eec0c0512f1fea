/// Strip a markdown code fence and any prose around the first JSON object.
///
/// Returns the trimmed text unchanged when no `{ ... }` span exists, so the
/// caller's JSON parse fails explicitly.
pub fn sanitize(raw: &str) -> String {
    let mut cleaned = raw.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        // Optional language tag, e.g. ```json
        let tag_len = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphanumeric())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let body = rest[tag_len..].trim_start();
        cleaned = body.strip_suffix("```").unwrap_or(body).trim_end();
    }

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => cleaned[start..=end].to_string(),
        _ => cleaned.to_string(),
    }
}
