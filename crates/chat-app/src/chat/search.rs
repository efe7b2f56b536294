use super::ids::ConversationId;
use super::message::Conversation;

const TITLE_SCORE: f32 = 0.9;
const MESSAGE_SCORE: f32 = 0.7;
const SNIPPET_CONTEXT_CHARS: usize = 20;

/// One match produced by [`search_conversations`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub conversation_id: ConversationId,
    /// `None` for a title match.
    pub message_index: Option<usize>,
    pub match_text: String,
    pub relevance_score: f32,
}

/// Case-insensitive substring match on title, tags and message content.
/// A blank term matches everything; otherwise surrounding whitespace is part
/// of the term.
pub fn search_in_conversation(conversation: &Conversation, term: &str) -> bool {
    if term.trim().is_empty() {
        return true;
    }

    let needle = term.to_lowercase();
    contains_folded(&conversation.title, &needle)
        || conversation
            .tags
            .iter()
            .any(|tag| contains_folded(tag, &needle))
        || conversation
            .messages
            .iter()
            .any(|message| contains_folded(&message.content, &needle))
}

/// Stable sort by `updated_at` descending; equal timestamps keep input order.
pub fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
}

pub fn filter_and_sort<'a, I>(conversations: I, term: &str) -> Vec<Conversation>
where
    I: IntoIterator<Item = &'a Conversation>,
{
    let mut matched = conversations
        .into_iter()
        .filter(|conversation| search_in_conversation(conversation, term))
        .cloned()
        .collect::<Vec<_>>();
    sort_by_recency(&mut matched);
    matched
}

/// Ranked hits across conversations: title matches before message matches.
/// A blank query yields nothing.
pub fn search_conversations<'a, I>(conversations: I, query: &str) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a Conversation>,
{
    if query.trim().is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    let mut hits = Vec::new();
    for conversation in conversations {
        if contains_folded(&conversation.title, &needle) {
            hits.push(SearchHit {
                conversation_id: conversation.id.clone(),
                message_index: None,
                match_text: conversation.title.clone(),
                relevance_score: TITLE_SCORE,
            });
        }

        for (index, message) in conversation.messages.iter().enumerate() {
            if let Some(snippet) = snippet_around(&message.content, &needle) {
                hits.push(SearchHit {
                    conversation_id: conversation.id.clone(),
                    message_index: Some(index),
                    match_text: snippet,
                    relevance_score: MESSAGE_SCORE,
                });
            }
        }
    }

    hits.sort_by(|left, right| right.relevance_score.total_cmp(&left.relevance_score));
    hits
}

fn contains_folded(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

/// Text around the first match, padded by a few characters on either side.
fn snippet_around(content: &str, lowered_needle: &str) -> Option<String> {
    let chars = content.chars().collect::<Vec<_>>();
    let needle = lowered_needle.chars().collect::<Vec<_>>();
    if needle.is_empty() || needle.len() > chars.len() {
        return None;
    }

    // Char-wise lowercase keeps indices aligned with `content`.
    let start = (0..=chars.len() - needle.len()).find(|&offset| {
        chars[offset..offset + needle.len()]
            .iter()
            .zip(&needle)
            .all(|(candidate, expected)| chars_match(*candidate, *expected))
    })?;

    let from = start.saturating_sub(SNIPPET_CONTEXT_CHARS);
    let to = (start + needle.len() + SNIPPET_CONTEXT_CHARS).min(chars.len());
    Some(chars[from..to].iter().collect::<String>().trim().to_string())
}

fn chars_match(candidate: char, lowered: char) -> bool {
    let mut folded = candidate.to_lowercase();
    folded.next() == Some(lowered) && folded.next().is_none()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::chat::ids::MessageId;
    use crate::chat::message::Message;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn conversation(id: &str, title: &str, updated: u32, contents: &[&str]) -> Conversation {
        let mut conversation = Conversation::new(ConversationId::new(id), title, at(0));
        for (index, content) in contents.iter().enumerate() {
            conversation.messages.push(Message::user(
                MessageId::new(format!("{id}-m{index}")),
                *content,
                at(0),
            ));
        }
        conversation.updated_at = at(updated);
        conversation
    }

    #[test]
    fn blank_term_matches_everything() {
        let empty = conversation("a", "", 0, &[]);
        assert!(search_in_conversation(&empty, ""));
        assert!(search_in_conversation(&empty, "   "));
    }

    #[test]
    fn term_matches_title_tags_or_content_ignoring_case() {
        let mut chat = conversation("a", "Rust Basics", 0, &["How do LIFETIMES work?"]);
        chat.tags = vec!["Programming".to_string()];

        assert!(search_in_conversation(&chat, "rust"));
        assert!(search_in_conversation(&chat, "PROGRAM"));
        assert!(search_in_conversation(&chat, "lifetimes"));
        assert!(!search_in_conversation(&chat, "python"));
    }

    #[test]
    fn surrounding_whitespace_is_part_of_the_term() {
        let chat = conversation("a", "Rust", 0, &["learning rust today"]);

        assert!(!search_in_conversation(&chat, "rust "));
        assert!(search_in_conversation(&chat, " rust "));
        assert!(!search_in_conversation(&chat, "today "));

        let bare = conversation("b", "Rust", 0, &[]);
        assert!(!search_in_conversation(&bare, " rust"));
        assert!(search_conversations([&bare], "rust ").is_empty());
        assert_eq!(search_conversations([&bare], "rust").len(), 1);
    }

    #[test]
    fn filter_and_sort_orders_by_recency() {
        let older = conversation("a", "A", 1, &[]);
        let newer = conversation("b", "B", 5, &[]);
        let tied = conversation("c", "C", 5, &[]);

        let listed = filter_and_sort([&older, &newer, &tied], "");
        let ids = listed
            .iter()
            .map(|conversation| conversation.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn title_hits_rank_before_message_hits() {
        let first = conversation("a", "notes", 0, &["rust is a systems language"]);
        let second = conversation("b", "Rust tips", 0, &[]);

        let hits = search_conversations([&first, &second], "rust");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].conversation_id, ConversationId::new("b"));
        assert_eq!(hits[0].message_index, None);
        assert_eq!(hits[1].message_index, Some(0));
        assert!(search_conversations([&first], "  ").is_empty());
    }

    #[test]
    fn snippet_keeps_twenty_chars_of_context() {
        let content = format!("{}KEY{}", "x".repeat(30), "y".repeat(30));
        let snippet = snippet_around(&content, "key").expect("match");
        assert_eq!(snippet, format!("{}KEY{}", "x".repeat(20), "y".repeat(20)));
    }
}
