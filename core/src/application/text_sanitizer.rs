// Copyright (c) 2026 Isprava Engineering
//! Assistant-text sanitization (`spec.md` SS4.6 "Text sanitization").
//!
//! Strips `<function_calls>`/`<invoke>`/`<parameter>` XML-ish blocks and
//! fenced `xml` code blocks the model sometimes emits verbatim alongside
//! its structured tool-use blocks. Purely cosmetic — never applied to the
//! structured tool-use/tool-result content itself.

use once_cell::sync::Lazy;
use regex::Regex;

static FUNCTION_CALLS_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function_calls>.*?</function_calls>").unwrap()
});

static INVOKE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<invoke[^>]*>.*?</invoke>").unwrap());

static PARAMETER_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<parameter[^>]*>.*?</parameter>").unwrap());

static FENCED_XML_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```xml.*?```").unwrap());

pub fn sanitize(text: &str) -> String {
    let text = FUNCTION_CALLS_BLOCK.replace_all(text, "");
    let text = INVOKE_BLOCK.replace_all(&text, "");
    let text = PARAMETER_BLOCK.replace_all(&text, "");
    let text = FENCED_XML_BLOCK.replace_all(&text, "");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_function_calls_block() {
        let input = "Here's the answer.\n<function_calls>\n<invoke name=\"x\"></invoke>\n</function_calls>\nDone.";
        let out = sanitize(input);
        assert!(!out.contains("function_calls"));
        assert!(out.contains("Here's the answer."));
        assert!(out.contains("Done."));
    }

    #[test]
    fn strips_standalone_invoke_and_parameter_blocks() {
        let input = "text <invoke name=\"foo\"><parameter name=\"x\">1</parameter></invoke> more";
        let out = sanitize(input);
        assert!(!out.contains("invoke"));
        assert!(!out.contains("parameter"));
    }

    #[test]
    fn strips_fenced_xml_blocks() {
        let input = "before\n```xml\n<a>b</a>\n```\nafter";
        let out = sanitize(input);
        assert_eq!(out, "before\n\nafter");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(sanitize("just a normal reply"), "just a normal reply");
    }
}
