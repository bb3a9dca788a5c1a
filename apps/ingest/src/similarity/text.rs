use strsim::levenshtein;

/// Normalised edit distances strictly below this ratio are near-duplicates.
pub const TEXT_DISTANCE_RATIO: f64 = 0.2;

/// Edit distance divided by the longer length, in characters.
/// Returns `None` when either side is empty; empty text never matches.
pub fn distance_ratio(a: &str, b: &str) -> Option<f64> {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return None;
    }
    Some(levenshtein(a, b) as f64 / len_a.max(len_b) as f64)
}

/// The distance ratio when it is below [`TEXT_DISTANCE_RATIO`]. Both inputs
/// are expected to be normalised already.
pub fn similar_ratio(a: &str, b: &str) -> Option<f64> {
    distance_ratio(a, b).filter(|ratio| *ratio < TEXT_DISTANCE_RATIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::markdown::normalize_text;

    #[test]
    fn test_one_character_edit_is_similar() {
        let a = normalize_text("今天又要加班到半夜，老板的心比石头还硬");
        let b = normalize_text("今天还要加班到半夜，老板的心比石头还硬");
        let ratio = distance_ratio(&a, &b).unwrap();
        assert!(ratio > 0.05 && ratio < 0.06, "ratio was {ratio}");
        assert!(similar_ratio(&a, &b).is_some());
    }

    #[test]
    fn test_unrelated_sentences_are_not_similar() {
        let a = normalize_text("今天又要加班到半夜，老板的心比石头还硬");
        let b = normalize_text("猫咪把我的键盘当成了暖气片睡了一下午");
        assert!(similar_ratio(&a, &b).is_none());
    }

    #[test]
    fn test_ratio_uses_characters_not_bytes() {
        assert_eq!(distance_ratio("加班", "加油"), Some(0.5));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        // 1 edit over 5 chars = exactly 0.2
        assert!(similar_ratio("abcde", "abcdx").is_none());
        // 1 edit over 6 chars ≈ 0.167
        assert!(similar_ratio("abcdef", "abcdex").is_some());
    }

    #[test]
    fn test_empty_text_never_matches() {
        assert_eq!(distance_ratio("", "abc"), None);
        assert!(similar_ratio("", "").is_none());
    }
}
