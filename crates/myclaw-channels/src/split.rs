/// Splits `content` into chunks no longer than `limit` characters.
///
/// Each chunk boundary falls at the last newline strictly before `limit`
/// characters in the remaining text; if no newline exists in range, the
/// chunk is hard-cut at `limit` (§4.2). Operates on `char` boundaries so
/// multi-byte UTF-8 content is never split mid-codepoint.
pub fn split_for_transport(content: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return vec![content.to_string()];
    }

    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= limit {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= limit {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let window = &chars[start..start + limit];
        let split_at = window.iter().rposition(|&c| c == '\n');
        let cut = match split_at {
            Some(pos) => start + pos + 1,
            None => start + limit,
        };

        chunks.push(chars[start..cut].iter().collect());
        start = cut;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_not_split() {
        assert_eq!(split_for_transport("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn splits_at_last_newline_before_limit() {
        let content = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let chunks = split_for_transport(&content, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n", "a".repeat(8)));
        assert_eq!(chunks[1], "b".repeat(8));
    }

    #[test]
    fn hard_cuts_when_no_newline_in_range() {
        let content = "x".repeat(25);
        let chunks = split_for_transport(&content, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[1].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn reassembled_chunks_equal_original() {
        let content = "x".repeat(5000);
        let chunks = split_for_transport(&content, 4000);
        assert_eq!(chunks.concat(), content);
        assert!(chunks.len() >= 2);
    }
}
