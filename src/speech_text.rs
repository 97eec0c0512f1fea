//! Rewrites narration text into a form that reads well aloud.

use once_cell::sync::Lazy;
use regex::Regex;

struct Rewrite {
    pattern: Regex,
    replacement: &'static str,
}

fn rewrite(pattern: &str, replacement: &'static str) -> Rewrite {
    Rewrite {
        pattern: Regex::new(pattern).expect("valid regex"),
        replacement,
    }
}

static SPOKEN_FORMS: Lazy<Vec<Rewrite>> = Lazy::new(|| {
    vec![
        rewrite(r"\bDr\.", "Doctor"),
        rewrite(r"\bMr\.", "Mister"),
        rewrite(r"\bMrs\.", "Missus"),
        rewrite(r"\bMs\.", "Miss"),
        rewrite(r"\bProf\.", "Professor"),
        rewrite(r"\betc\.", "et cetera"),
        rewrite(r"\be\.g\.", "for example"),
        rewrite(r"\bi\.e\.", "that is"),
        rewrite(r"\bvs\.", "versus"),
        rewrite(r"\bInc\.", "Incorporated"),
        rewrite(r"\bCorp\.", "Corporation"),
        rewrite(r"\bLLC\.", "Limited Liability Company"),
        rewrite(r"\$(\d+,?\d*)", "${1} dollars"),
        rewrite(r"€(\d+,?\d*)", "${1} euros"),
        rewrite(r"£(\d+,?\d*)", "${1} pounds"),
        rewrite(r"(\d+)%", "${1} percent"),
        rewrite(r"(\d+)°C", "${1} degrees Celsius"),
        rewrite(r"(\d+)°F", "${1} degrees Fahrenheit"),
        rewrite(r"(?i)\b(\d{1,2}):(\d{2})\s?(AM|PM)\b", "${1} ${2} ${3}"),
    ]
});

static ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\.\.").expect("valid regex"));
static DOUBLE_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"--").expect("valid regex"));
static SENTENCE_LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?])\s*\n\s*").expect("valid regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Spell out abbreviations, currency, percentages and temperatures, and turn
/// ellipses and paragraph breaks into pauses. With `ssml` the pauses become
/// `<break/>` tags and the result is wrapped in `<speak>`.
pub fn optimize_for_speech(text: &str, ssml: bool) -> String {
    let mut out = text.to_string();
    for rw in SPOKEN_FORMS.iter() {
        out = rw.pattern.replace_all(&out, rw.replacement).into_owned();
    }

    let (long_pause, paragraph_pause) = if ssml {
        (r#"<break time="1s"/>"#, r#"<break time="0.5s"/>"#)
    } else {
        ("... pause ...", ". ")
    };

    out = ELLIPSIS.replace_all(&out, long_pause).into_owned();
    out = DOUBLE_DASH.replace_all(&out, " - ").into_owned();
    out = SENTENCE_LINE_BREAK.replace_all(&out, "${1} ").into_owned();
    out = PARAGRAPH_BREAK.replace_all(&out, paragraph_pause).into_owned();
    out = WHITESPACE.replace_all(&out, " ").trim().to_string();

    if ssml {
        format!("<speak>{out}</speak>")
    } else {
        out
    }
}
