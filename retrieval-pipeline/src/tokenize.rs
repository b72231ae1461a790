use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// English stopwords removed from every passage and query before indexing.
const ENGLISH_STOPWORDS: [&str; 60] = [
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have",
    "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "my", "no",
    "not", "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "then", "there",
    "they", "this", "to", "was", "we", "what", "with",
];

/// Normalize a passage into the token stream the BM25 index stores.
///
/// The steps are fixed per deployment so identical passages produce identical
/// token streams in every process: unicode word segmentation, NFKD fold,
/// lowercasing, non-alphanumeric stripping, then stopword removal. Stemming
/// happens inside the database analyzer on these tokens.
pub fn normalize_tokens(passage: &str) -> Vec<String> {
    passage
        .unicode_words()
        .filter_map(|word| {
            let folded: String = word
                .nfkd()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();

            if folded.is_empty() || ENGLISH_STOPWORDS.contains(&folded.as_str()) {
                None
            } else {
                Some(folded)
            }
        })
        .collect()
}

/// The whitespace-joined form stored in `bm25_doc.tokens`.
pub fn normalized_passage(passage: &str) -> String {
    normalize_tokens(passage).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenization_is_deterministic() {
        let passage = "def add(a, b): return a + b  # The sum";
        assert_eq!(normalize_tokens(passage), normalize_tokens(passage));
        assert_eq!(normalized_passage(passage), normalized_passage(passage));
    }

    #[test]
    fn strips_punctuation_and_lowercases() {
        let tokens = normalize_tokens("Fn ADD(x, y) -> Result<i32, Error>");
        assert_eq!(tokens, vec!["fn", "add", "x", "y", "result", "i32", "error"]);
    }

    #[test]
    fn removes_english_stopwords() {
        let tokens = normalize_tokens("the function that adds numbers");
        assert_eq!(tokens, vec!["function", "adds", "numbers"]);
    }

    #[test]
    fn folds_unicode_to_compatibility_forms() {
        // NFKD decomposes the ligature and the accented char; the combining
        // marks are then dropped by the alphanumeric filter.
        let tokens = normalize_tokens("ﬁle café");
        assert_eq!(tokens, vec!["file", "cafe"]);
    }

    #[test]
    fn empty_and_symbol_only_input_yields_no_tokens() {
        assert!(normalize_tokens("").is_empty());
        assert!(normalize_tokens("+++ --- ///").is_empty());
        assert_eq!(normalized_passage("   "), "");
    }
}
