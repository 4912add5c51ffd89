//! BCP-47-like language tag normalization.
//!
//! Applied before engine selection and before any backend-internal language
//! parameter binding: `"zh-CN"`, `"pt-BR"`, `"ZH-cn"` normalize to their
//! ISO-639-1 base (`"zh"`, `"pt"`); unknown or three-letter codes pass
//! through unchanged; an empty string means "use the engine's default".

/// Normalizes a BCP-47-like language tag to its ISO-639-1 base subtag.
///
/// Lowercases the whole tag, then strips everything from the first `-`
/// onward. Codes that are not two letters after stripping the region are
/// returned unchanged (three-letter codes such as `"yue"`, or anything the
/// benchmarked preset table does not recognize) so that callers can decide
/// whether to fall back.
pub fn normalize_language_code(tag: &str) -> String {
    if tag.is_empty() {
        return String::new();
    }
    let lower = tag.to_lowercase();
    let base = lower.split('-').next().unwrap_or(&lower);
    base.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_region_and_lowercases() {
        assert_eq!(normalize_language_code("zh-CN"), "zh");
        assert_eq!(normalize_language_code("pt-BR"), "pt");
        assert_eq!(normalize_language_code("ZH-cn"), "zh");
    }

    #[test]
    fn passes_through_unknown_and_three_letter_codes() {
        assert_eq!(normalize_language_code("yue"), "yue");
        assert_eq!(normalize_language_code("en"), "en");
    }

    #[test]
    fn empty_string_stays_empty() {
        assert_eq!(normalize_language_code(""), "");
    }
}
