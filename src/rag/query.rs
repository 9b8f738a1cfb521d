//! Question answering over an indexed meeting
//!
//! Embeds the question, retrieves the closest completed chunks for the
//! requested transcript language, and asks the LLM to answer in the
//! chat language using only those excerpts.

use anyhow::Result;
use tracing::debug;

use crate::config::RagConfig;
use crate::services::{cosine_similarity, ChatMessage, ChatModel, Embedder};
use crate::store::{ChatTurn, MeetingStore};

const NO_CONTEXT_ANSWER: &str =
    "I could not find relevant information about that in this meeting's transcript.";

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub meeting_id: String,
    /// Transcript language the index was built from.
    pub language: String,
    pub question: String,
    /// Language the answer should be written in.
    pub chat_language: String,
    pub top_k: usize,
    /// Prior turns of the chat session, oldest first.
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub answer: String,
    pub chunk_indices: Vec<i64>,
}

/// Answer a question over one meeting's indexed transcript.
///
/// With zero retrievable chunks the canned no-information answer is
/// returned and the LLM is never called.
pub async fn answer_question(
    store: &MeetingStore,
    embedder: &dyn Embedder,
    llm: &dyn ChatModel,
    config: &RagConfig,
    request: &QueryRequest,
) -> Result<QueryAnswer> {
    let question_with_history = fold_history(&request.history, &request.question, config.history_turns);
    let query_embedding = embedder.embed(&question_with_history).await?;

    let chunks = store
        .completed_chunks(&request.meeting_id, &request.language)
        .await?;

    let mut scored: Vec<(f32, usize)> = chunks
        .iter()
        .enumerate()
        .filter_map(|(i, chunk)| {
            chunk
                .embedding
                .as_ref()
                .map(|e| (cosine_similarity(&query_embedding, e), i))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| chunks[a.1].index.cmp(&chunks[b.1].index))
    });
    scored.truncate(request.top_k);

    if scored.is_empty() {
        return Ok(QueryAnswer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            chunk_indices: Vec::new(),
        });
    }

    let mut context = String::new();
    for &(score, i) in &scored {
        let chunk = &chunks[i];
        debug!(
            "retrieved chunk {} (score {:.3}) for {}",
            chunk.index, score, request.meeting_id
        );
        context.push_str("---\n");
        if let Some(speaker) = &chunk.speaker_name {
            context.push_str(&format!("Speaker: {}\n", speaker));
        }
        context.push_str(&format!(
            "Time: {:02}:{:02}\n",
            chunk.start_seconds / 60,
            chunk.start_seconds % 60
        ));
        context.push_str(&format!("Content: {}\n", chunk.text));
    }

    let system = format!(
        "You answer questions about a finished meeting using only the transcript \
         excerpts provided. If the excerpts do not contain the answer, say so. \
         Respond in the language with code '{}'.",
        request.chat_language
    );
    let user = format!(
        "Transcript excerpts:\n{}\n\nQuestion: {}",
        context, question_with_history
    );

    let answer = llm
        .complete(
            &[ChatMessage::system(system), ChatMessage::user(user)],
            config.max_answer_tokens,
            config.answer_temperature,
        )
        .await?;

    Ok(QueryAnswer {
        answer,
        chunk_indices: scored.iter().map(|&(_, i)| chunks[i].index).collect(),
    })
}

/// Prepend the last `max_turns` conversation turns to the question so
/// follow-ups embed and generate with their context.
fn fold_history(history: &[ChatTurn], question: &str, max_turns: usize) -> String {
    if history.is_empty() || max_turns == 0 {
        return question.to_string();
    }
    let start = history.len().saturating_sub(max_turns);
    let mut folded = String::new();
    for turn in &history[start..] {
        folded.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    folded.push_str(&format!("user: {}", question));
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::HashEmbedder;
    use crate::store::{ChunkRecord, ChunkStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedLlm {
        calls: AtomicUsize,
    }

    impl CannedLlm {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for CannedLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(messages[1].content.contains("Transcript excerpts"));
            Ok("Alice welcomed everyone.".to_string())
        }
    }

    async fn seeded_store() -> MeetingStore {
        let store = MeetingStore::open_in_memory().unwrap();
        let embedder = HashEmbedder::default();
        let texts = [
            "Alice: Hello everyone, welcome to the meeting.",
            "Bob: The budget needs review next quarter.",
            "Alice: Let's schedule a follow-up for Friday.",
        ];
        let mut records = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            records.push(ChunkRecord {
                index: i as i64,
                text: text.to_string(),
                start_seconds: (i as i64) * 30,
                end_seconds: (i as i64) * 30 + 20,
                speaker_name: None,
                embedding: Some(embedder.embed(text).await.unwrap()),
                status: ChunkStatus::Completed,
            });
        }
        store.replace_chunks("m1", "en", &records).await.unwrap();
        store
    }

    fn request(question: &str, top_k: usize) -> QueryRequest {
        QueryRequest {
            meeting_id: "m1".into(),
            language: "en".into(),
            question: question.into(),
            chat_language: "en".into(),
            top_k,
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retrieves_relevant_chunks_and_answers() {
        let store = seeded_store().await;
        let llm = CannedLlm::new();
        let answer = answer_question(
            &store,
            &HashEmbedder::default(),
            &llm,
            &RagConfig::default(),
            &request("Who welcomed everyone to the meeting?", 2),
        )
        .await
        .unwrap();

        assert_eq!(answer.answer, "Alice welcomed everyone.");
        assert!(!answer.chunk_indices.is_empty());
        assert!(answer.chunk_indices.len() <= 2);
        // the welcome chunk should rank first for this question
        assert_eq!(answer.chunk_indices[0], 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_chunks_short_circuits_without_llm_call() {
        let store = MeetingStore::open_in_memory().unwrap();
        let llm = CannedLlm::new();
        let answer = answer_question(
            &store,
            &HashEmbedder::default(),
            &llm,
            &RagConfig::default(),
            &request("Anything?", 3),
        )
        .await
        .unwrap();

        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.chunk_indices.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chunk_indices_are_distinct_and_exist() {
        let store = seeded_store().await;
        let llm = CannedLlm::new();
        let answer = answer_question(
            &store,
            &HashEmbedder::default(),
            &llm,
            &RagConfig::default(),
            &request("budget review", 5),
        )
        .await
        .unwrap();

        let mut sorted = answer.chunk_indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), answer.chunk_indices.len());
        assert!(answer.chunk_indices.iter().all(|&i| (0..3).contains(&i)));
    }

    #[test]
    fn history_folding_keeps_last_turns() {
        let history = vec![
            ChatTurn {
                role: "user".into(),
                content: "q1".into(),
            },
            ChatTurn {
                role: "assistant".into(),
                content: "a1".into(),
            },
            ChatTurn {
                role: "user".into(),
                content: "q2".into(),
            },
        ];
        let folded = fold_history(&history, "and then?", 2);
        assert!(!folded.contains("q1"));
        assert!(folded.contains("a1"));
        assert!(folded.ends_with("user: and then?"));
    }
}
