//! Cross-source merge, threshold partition and answer selection

use super::QueryRequest;
use crate::backend::CompletionProvider;
use crate::handler::prompt::{build_user_prompt, render_system_prompt};
use crate::retrieval::{
    sort_by_score_desc, AggregatedResponse, AnswerOrigin, HandlerResult, SearchResult,
    SourceFailure, SourceType,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NO_INFORMATION_MESSAGE: &str =
    "I could not find any relevant information to answer this question.";

pub const GENERATION_FAILED_MESSAGE: &str =
    "Relevant sources were found, but I could not generate an answer from them.";

#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// High-confidence results fed into synthesis
    pub max_context_size: usize,
    pub system_prompt: String,
    pub no_information_message: String,
    pub generation_failed_message: String,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            max_context_size: 8,
            system_prompt: "You are a helpful assistant. Answer the question using only the \
                            numbered context passages."
                .to_string(),
            no_information_message: NO_INFORMATION_MESSAGE.to_string(),
            generation_failed_message: GENERATION_FAILED_MESSAGE.to_string(),
        }
    }
}

/// Runs after every handler has joined; owns nothing shared with them
pub struct ResultAggregator {
    completion: Option<Arc<dyn CompletionProvider>>,
    settings: AggregationSettings,
}

impl ResultAggregator {
    pub fn new(
        completion: Option<Arc<dyn CompletionProvider>>,
        settings: AggregationSettings,
    ) -> Self {
        Self {
            completion,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    /// Merge handler outcomes into one response.
    ///
    /// `requested_sources` counts the sources the caller was authorized for
    /// and asked about; a sole source's own answer is returned verbatim.
    pub async fn aggregate(
        &self,
        request: &QueryRequest,
        requested_sources: usize,
        handler_results: Vec<HandlerResult>,
    ) -> AggregatedResponse {
        let threshold = request.min_relevance_score;
        let mut source_answers: BTreeMap<SourceType, String> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut merged: Vec<SearchResult> = Vec::new();

        for outcome in handler_results {
            if !outcome.success {
                if let Some(error) = outcome.error {
                    failures.push(SourceFailure {
                        source_type: outcome.source_type,
                        kind: error.kind,
                        message: error.message,
                    });
                }
                continue;
            }
            if let Some(answer) = outcome.generated_answer {
                source_answers.insert(outcome.source_type.clone(), answer);
            }
            merged.extend(outcome.results);
        }

        let total_retrieved = merged.len();
        sort_by_score_desc(&mut merged);
        merged.truncate(request.top_k);

        let (high, low): (Vec<_>, Vec<_>) = merged.into_iter().partition(|r| r.score >= threshold);
        tracing::debug!(
            total_retrieved,
            high_confidence = high.len(),
            low_confidence = low.len(),
            threshold,
            "merged handler results"
        );

        let (answer, origin, token_count) = self
            .select_answer(request, requested_sources, &source_answers, &high)
            .await;

        AggregatedResponse {
            total_after_filter: high.len(),
            results: high,
            low_confidence: request.include_low_confidence.then_some(low),
            synthesized_answer: answer,
            answer_origin: origin,
            total_retrieved,
            threshold_applied: threshold,
            source_answers,
            failures,
            token_count,
        }
    }

    async fn select_answer(
        &self,
        request: &QueryRequest,
        requested_sources: usize,
        source_answers: &BTreeMap<SourceType, String>,
        high: &[SearchResult],
    ) -> (String, AnswerOrigin, Option<u32>) {
        if requested_sources == 1 {
            if let Some(answer) = source_answers.values().next() {
                return (answer.clone(), AnswerOrigin::SourceVerbatim, None);
            }
        }

        if high.is_empty() {
            return (
                self.settings.no_information_message.clone(),
                AnswerOrigin::NoInformation,
                None,
            );
        }

        let Some(completion) = &self.completion else {
            return (self.fallback_answer(source_answers), AnswerOrigin::Fallback, None);
        };

        let context_len = high.len().min(self.settings.max_context_size.max(1));
        let system = render_system_prompt(&self.settings.system_prompt, &request.options);
        let user = build_user_prompt(&request.question, &high[..context_len]);

        match completion.complete(&system, &user).await {
            Ok(done) if !done.text.trim().is_empty() => {
                (done.text, AnswerOrigin::Synthesized, done.token_count)
            }
            Ok(_) => {
                tracing::warn!("answer synthesis returned empty text");
                (self.fallback_answer(source_answers), AnswerOrigin::Fallback, None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "answer synthesis failed");
                (self.fallback_answer(source_answers), AnswerOrigin::Fallback, None)
            }
        }
    }

    fn fallback_answer(&self, source_answers: &BTreeMap<SourceType, String>) -> String {
        if source_answers.is_empty() {
            return self.settings.generation_failed_message.clone();
        }
        source_answers
            .iter()
            .map(|(source, answer)| format!("[{source}] {answer}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
