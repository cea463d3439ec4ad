//! The collaboration driver.
//!
//! One spawned task per session walks two models through the phase
//! sequence: allocate the window, assemble history, render the prompt,
//! lease a context, stream tokens to the fan-out, persist and curate
//! the turn, analyze agreement, transition. Cancellation is observed
//! before every acquisition, before every token write, and between
//! phases.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;

use sy_context::{allocate, assemble_history, HistorySection, SectionKind};
use sy_domain::collab::{ConversationState, ConversationTurn, SessionStatus, TurnMetadata};
use sy_domain::events::{ModelActivity, SynergyEvent};
use sy_domain::tokens::{estimate_tokens, TokenRing};
use sy_domain::{CollaborationPhase, Error, Result};
use sy_engine::analytics::RankedInput;
use sy_inference::formatter;
use sy_inference::GenerationRequest;

use crate::state::{AppState, EngineBundle};

use super::cancel::CancelToken;
use super::stream_hub::SessionPublisher;

/// Target size for the synthesis brief fed into the SYNTHESIZE phase.
const SYNTHESIS_BRIEF_TOKENS: u32 = 400;
/// Prior-turn count above which history is re-ranked for relevance.
const RERANK_THRESHOLD: usize = 6;
/// Prior turns kept after a re-rank.
const RERANK_KEEP: usize = 5;

const BASE_SYSTEM_PROMPT: &str =
    "You are one of two local models collaborating on the user's question. \
     Read the other model's latest response before writing. Build on it; \
     do not restate it.";

pub struct CollaborationInput {
    pub session_id: String,
    pub query: String,
    pub models: [String; 2],
}

/// Start orchestrating a session in the background.
///
/// Registers the cancel token and the stream channel synchronously so a
/// subscriber arriving right after `initiate` returns sees every event.
pub fn spawn_collaboration(state: AppState, engine: EngineBundle, input: CollaborationInput) {
    state.active_sessions.fetch_add(1, Ordering::AcqRel);
    let cancel = state.cancel_map.register(&input.session_id);
    let publisher = state.streams.register(&input.session_id);
    let session_id = input.session_id.clone();

    tokio::spawn(async move {
        let started = Instant::now();
        tracing::info!(
            session_id = %session_id,
            model_a = %input.models[0],
            model_b = %input.models[1],
            "collaboration started"
        );

        let result =
            run_collaboration(&state, &engine, &input, &publisher, &cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let final_status = match result {
            Ok(final_answer) => {
                tracing::info!(session_id = %session_id, duration_ms, "collaboration completed");
                publisher
                    .publish_final(SynergyEvent::CollaborationComplete {
                        status: SessionStatus::Completed,
                        reason: None,
                        final_answer,
                        duration_ms,
                    })
                    .await;
                "completed"
            }
            Err(Error::Cancelled) => {
                tracing::info!(session_id = %session_id, duration_ms, "collaboration cancelled");
                publisher
                    .publish_final(SynergyEvent::CollaborationComplete {
                        status: SessionStatus::Failed,
                        reason: Some("cancelled".into()),
                        final_answer: None,
                        duration_ms,
                    })
                    .await;
                "failed"
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, duration_ms, "collaboration failed");
                publisher
                    .publish_final(SynergyEvent::CollaborationComplete {
                        status: SessionStatus::Failed,
                        reason: Some(e.to_string()),
                        final_answer: None,
                        duration_ms,
                    })
                    .await;
                "failed"
            }
        };

        // Teardown, on every path.
        if let Ok(Some(mut record)) = state.store.load_session(&session_id).await {
            record.status = final_status.to_owned();
            if let Err(e) = state.store.save_session(&session_id, &record).await {
                tracing::warn!(session_id = %session_id, error = %e, "session status update failed");
            }
        }
        if let Err(e) = state.store.unlock(&session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "session unlock failed");
        }
        state.cancel_map.remove(&session_id);
        state.streams.remove(&session_id);
        state.active_sessions.fetch_sub(1, Ordering::AcqRel);
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_collaboration(
    state: &AppState,
    engine: &EngineBundle,
    input: &CollaborationInput,
    publisher: &SessionPublisher,
    cancel: &CancelToken,
) -> Result<Option<String>> {
    let session_id = &input.session_id;

    // Advisory cross-process lock; self-expires if this process dies.
    if !state.store.try_lock(session_id).await? {
        return Err(Error::Validation(format!(
            "session {session_id} is already being orchestrated"
        )));
    }

    let mut conv = state
        .conversations
        .create(session_id, &input.query, input.models.to_vec())
        .await?;

    let mut phase = CollaborationPhase::Brainstorm;
    conv.current_phase = phase;
    state.conversations.save(&mut conv).await?;
    publisher
        .publish(SynergyEvent::PhaseUpdate {
            phase,
            message: "collaboration phase started".into(),
        })
        .await?;

    let mut rounds: u32 = 0;
    let mut synthesis_brief: Option<String> = None;
    let mut final_answer: Option<String> = None;

    while !phase.is_terminal() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        rounds += 1;

        for model_id in input.models.clone() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            run_model_turn(
                state,
                engine,
                publisher,
                cancel,
                &mut conv,
                phase,
                &model_id,
                synthesis_brief.as_deref(),
            )
            .await?;
        }

        // Both models have contributed: analyze agreement.
        let (content_a, content_b) = match conv.latest_pair_in_phase(phase) {
            Some((a, b)) => (a.content.clone(), b.content.clone()),
            None => {
                return Err(Error::Other(format!(
                    "phase {phase} concluded without a turn pair"
                )))
            }
        };
        let analysis = engine
            .agreement
            .analyze(&conv.original_query, phase, &content_a, &content_b)
            .await;
        publisher
            .publish(SynergyEvent::AgreementAnalysis {
                phase,
                agreement_level: analysis.agreement_level,
                stage_used: analysis.stage_used,
                next_phase: analysis.final_recommendation.next_phase,
                confidence: analysis.final_recommendation.confidence,
                is_phase_jump: analysis.final_recommendation.is_phase_jump,
                reasoning: analysis.final_recommendation.reasoning.clone(),
            })
            .await?;

        {
            let _guard = lock_session(state, session_id).await?;
            state
                .conversations
                .record_phase_outcome(
                    &mut conv,
                    phase,
                    &format!("{:?}", analysis.agreement_level),
                    analysis.final_recommendation.confidence,
                )
                .await?;
        }

        let decision = state.phase_machine.next(
            phase,
            &analysis.final_recommendation,
            rounds,
            cancel.is_cancelled(),
        );
        let (next, forced) = match decision {
            sy_engine::PhaseDecision::Halt => return Err(Error::Cancelled),
            sy_engine::PhaseDecision::Continue { next, forced } => (next, forced),
        };
        if forced {
            tracing::warn!(session_id = %session_id, phase = %phase, rounds, "phase advanced by round cap");
        }

        if next != phase {
            rounds = 0;
            phase = next;
            {
                let _guard = lock_session(state, session_id).await?;
                conv.current_phase = next;
                state.conversations.save(&mut conv).await?;
            }

            if next == CollaborationPhase::Synthesize {
                let brief = engine
                    .analytics
                    .synthesis_summary(&conv.turns, &conv.original_query, SYNTHESIS_BRIEF_TOKENS)
                    .await
                    .unwrap_or_default();
                if !brief.is_empty() {
                    publisher
                        .publish(SynergyEvent::SynthesisUpdate {
                            content: brief.clone(),
                        })
                        .await?;
                    synthesis_brief = Some(brief);
                }
            }

            if next.is_terminal() {
                final_answer = conv.turns.last().map(|t| t.content.clone());
            } else {
                publisher
                    .publish(SynergyEvent::PhaseUpdate {
                        phase: next,
                        message: if forced {
                            "phase advanced by round cap".into()
                        } else {
                            "phase transition".into()
                        },
                    })
                    .await?;
            }
        }
    }

    {
        let _guard = lock_session(state, session_id).await?;
        conv.status = SessionStatus::Completed;
        state.conversations.save(&mut conv).await?;
    }
    Ok(final_answer)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One model turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn run_model_turn(
    state: &AppState,
    engine: &EngineBundle,
    publisher: &SessionPublisher,
    cancel: &CancelToken,
    conv: &mut ConversationState,
    phase: CollaborationPhase,
    model_id: &str,
    synthesis_brief: Option<&str>,
) -> Result<()> {
    let spec = state
        .registry
        .get(model_id)
        .cloned()
        .ok_or_else(|| Error::Validation(format!("unknown model {model_id}")))?;
    let other_id = conv
        .participants
        .iter()
        .find(|m| m.as_str() != model_id)
        .cloned()
        .unwrap_or_default();

    publisher
        .publish(SynergyEvent::ModelStatus {
            model_id: model_id.to_owned(),
            status: ModelActivity::Queued,
        })
        .await?;

    // ── history and budgets ─────────────────────────────────────────
    let relevant = relevant_prior_turns(engine, conv, &other_id, phase).await;
    let sections = history_sections(conv, &other_id, synthesis_brief, relevant.as_ref());
    let approx_history: u32 = sections
        .iter()
        .map(|s| estimate_tokens(&s.content))
        .sum();
    let system_rendered = format!(
        "{BASE_SYSTEM_PROMPT}\n\n{}\n\n{}",
        formatter::phase_instruction(phase),
        formatter::VERIFICATION_REMINDER
    );
    let allocation = allocate(
        spec.context_size,
        phase,
        approx_history,
        estimate_tokens(&system_rendered),
        state.config.collab.max_context_usage,
    );
    let assembled = assemble_history(&sections, allocation.context_budget_tokens);

    let prompt = formatter::render(spec.template, BASE_SYSTEM_PROMPT, &assembled.text, phase);
    let context_used = estimate_tokens(&prompt) as f32 / spec.context_size as f32;
    conv.peak_context_usage = conv.peak_context_usage.max(context_used);

    // ── lease a context ─────────────────────────────────────────────
    let pool = state.pools.pool_for(&spec);
    let acquire_timeout = Duration::from_secs(state.config.collab.acquire_timeout_secs);
    let mut lease = match pool.acquire(acquire_timeout).await {
        Ok(lease) => lease,
        Err(e) => {
            publisher
                .publish_final(error_event(&e, phase, model_id))
                .await;
            return Err(e);
        }
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    publisher
        .publish(SynergyEvent::ModelStatus {
            model_id: model_id.to_owned(),
            status: ModelActivity::Generating,
        })
        .await?;

    // ── stream tokens ───────────────────────────────────────────────
    let started = Instant::now();
    let request = GenerationRequest {
        prompt,
        max_tokens: allocation.generation_budget_tokens,
        temperature: spec.settings.temperature,
        stop: spec.template.stop_tokens(),
    };
    let mut stream = match lease.session().generate(request).await {
        Ok(stream) => stream,
        Err(e) => {
            lease.mark_poisoned();
            publisher
                .publish_final(error_event(&e, phase, model_id))
                .await;
            return Err(e);
        }
    };

    let mut ring = TokenRing::new(state.config.collab.token_chunk_size.max(1));
    let mut content = String::new();
    while let Some(item) = stream.next().await {
        // Dropping the stream interrupts in-flight inference.
        if cancel.is_cancelled() {
            drop(stream);
            return Err(Error::Cancelled);
        }
        match item {
            Ok(token) => {
                content.push_str(&token);
                if ring.push(token) {
                    publisher
                        .publish(SynergyEvent::TokenChunk {
                            model_id: model_id.to_owned(),
                            phase,
                            tokens: ring.drain(),
                            is_complete: false,
                        })
                        .await?;
                }
            }
            Err(e) => {
                drop(stream);
                lease.mark_poisoned();
                publisher
                    .publish_final(error_event(&e, phase, model_id))
                    .await;
                return Err(e);
            }
        }
    }
    drop(stream);

    publisher
        .publish(SynergyEvent::TokenChunk {
            model_id: model_id.to_owned(),
            phase,
            tokens: ring.drain(),
            is_complete: true,
        })
        .await?;
    publisher
        .publish(SynergyEvent::ModelStatus {
            model_id: model_id.to_owned(),
            status: ModelActivity::Complete,
        })
        .await?;
    lease.release();

    // ── persist the turn ────────────────────────────────────────────
    let turn = ConversationTurn {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: conv.session_id.clone(),
        model_id: model_id.to_owned(),
        phase,
        turn_number: conv.next_turn_number(),
        response_to_turn_id: conv.latest_turn_for(&other_id).map(|t| t.id.clone()),
        content: content.clone(),
        timestamp: Utc::now(),
        metadata: TurnMetadata {
            token_count: estimate_tokens(&content),
            processing_time_ms: started.elapsed().as_millis() as u64,
            context_used,
            is_final_answer: phase == CollaborationPhase::Consensus,
            ..TurnMetadata::default()
        },
    };
    let turn_id = turn.id.clone();
    {
        let _guard = lock_session(state, &conv.session_id).await?;
        state.conversations.append_turn(conv, turn).await?;
    }
    tracing::debug!(
        session_id = %conv.session_id,
        model_id,
        phase = %phase,
        tokens = estimate_tokens(&content),
        dropped_sections = assembled.dropped,
        "turn persisted"
    );

    // ── curate: compress for future history ─────────────────────────
    match engine.compressor.compress_turn(&content, phase).await {
        Ok(result) => {
            let _guard = lock_session(state, &conv.session_id).await?;
            if let Some(stored) = conv.turns.iter_mut().find(|t| t.id == turn_id) {
                let meta = &mut stored.metadata;
                meta.is_compressed = result.compression_ratio < 1.0;
                meta.compressed_content = meta
                    .is_compressed
                    .then(|| result.compressed.clone());
                meta.original_tokens = Some(estimate_tokens(&result.original));
                meta.compressed_tokens = Some(estimate_tokens(&result.compressed));
                meta.compression_ratio = Some(result.compression_ratio);
                meta.key_points = result.preserved_key_points;
                meta.optimized_by = Some(engine.curator.model_id().to_owned());
                meta.optimized_at = Some(Utc::now());
            }
            state.conversations.save(conv).await?;
        }
        Err(e) => {
            // Compression is an optimization; the turn stands without it.
            tracing::warn!(session_id = %conv.session_id, error = %e, "turn compression skipped");
        }
    }

    // Brainstorm output seeds the working hypotheses.
    if phase == CollaborationPhase::Brainstorm {
        let hypothesis = conv
            .turns
            .iter()
            .find(|t| t.id == turn_id)
            .and_then(|t| t.metadata.key_points.first().cloned())
            .unwrap_or_else(|| content.chars().take(160).collect::<String>().trim().to_owned());
        if !hypothesis.is_empty() {
            let _guard = lock_session(state, &conv.session_id).await?;
            state
                .conversations
                .add_working_hypothesis(conv, &format!("{model_id}: {hypothesis}"))
                .await?;
        }
    }

    // ── curate: extract shared context from the latest pair ─────────
    let pair = conv
        .latest_turn_for(&other_id)
        .cloned()
        .zip(conv.latest_turn_for(model_id).cloned());
    if let Some((theirs, mine)) = pair {
        match engine.analytics.extract_shared_context(&theirs, &mine).await {
            Ok(delta) => {
                let _guard = lock_session(state, &conv.session_id).await?;
                state
                    .conversations
                    .update_shared_context(conv, &delta)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(session_id = %conv.session_id, error = %e, "shared-context update skipped");
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Prior turns the history should keep, by re-ranking against the
/// query expanded with a hypothetical answer document. `None` means
/// keep everything (short sessions skip the re-rank).
async fn relevant_prior_turns(
    engine: &EngineBundle,
    conv: &ConversationState,
    other_id: &str,
    phase: CollaborationPhase,
) -> Option<std::collections::HashSet<String>> {
    let other_latest_id = conv.latest_turn_for(other_id).map(|t| t.id.clone());
    let candidates: Vec<&ConversationTurn> = conv
        .turns
        .iter()
        .filter(|t| Some(&t.id) != other_latest_id.as_ref())
        .collect();
    if candidates.len() <= RERANK_THRESHOLD {
        return None;
    }

    let expanded_query = match engine
        .analytics
        .hypothetical_document(&conv.original_query, None, Some(phase))
        .await
    {
        Ok(document) => format!("{}\n{document}", conv.original_query),
        Err(e) => {
            tracing::debug!(session_id = %conv.session_id, error = %e, "query expansion skipped");
            conv.original_query.clone()
        }
    };

    let docs: Vec<RankedInput> = candidates
        .iter()
        .map(|t| RankedInput {
            id: t.id.clone(),
            content: t
                .metadata
                .compressed_content
                .clone()
                .unwrap_or_else(|| t.content.clone()),
        })
        .collect();
    match engine
        .analytics
        .rerank(&expanded_query, &docs, RERANK_KEEP)
        .await
    {
        Ok(ranked) => Some(ranked.into_iter().map(|d| d.id).collect()),
        Err(e) => {
            tracing::warn!(session_id = %conv.session_id, error = %e, "turn re-ranking skipped");
            None
        }
    }
}

/// Candidate history sections in priority order: the unconditional
/// pieces, the shared findings, then prior turns newest-first in their
/// compressed rendition, optionally filtered to the re-ranked set.
fn history_sections(
    conv: &ConversationState,
    other_id: &str,
    synthesis_brief: Option<&str>,
    relevant: Option<&std::collections::HashSet<String>>,
) -> Vec<HistorySection> {
    let mut sections = vec![HistorySection::new(
        SectionKind::OriginalQuery,
        "Original question",
        &conv.original_query,
    )];

    let other_latest = conv.latest_turn_for(other_id);
    if let Some(turn) = other_latest {
        sections.push(HistorySection::new(
            SectionKind::LatestResponse,
            format!("{}'s latest response", turn.model_id),
            &turn.content,
        ));
    }
    if let Some(brief) = synthesis_brief {
        sections.push(HistorySection::new(
            SectionKind::SharedContext,
            "Synthesis brief",
            brief,
        ));
    }
    if !conv.shared_context.is_empty() {
        sections.push(HistorySection::new(
            SectionKind::SharedContext,
            "Shared findings",
            conv.shared_context.digest(),
        ));
    }

    let other_latest_id = other_latest.map(|t| t.id.clone());
    for turn in conv.turns.iter().rev() {
        if Some(&turn.id) == other_latest_id.as_ref() {
            continue;
        }
        if relevant.is_some_and(|keep| !keep.contains(&turn.id)) {
            continue;
        }
        let text = turn
            .metadata
            .compressed_content
            .as_deref()
            .unwrap_or(&turn.content);
        sections.push(HistorySection::new(
            SectionKind::PriorTurn,
            format!("{} in {}", turn.model_id, turn.phase),
            text,
        ));
    }

    sections
}

async fn lock_session(
    state: &AppState,
    session_id: &str,
) -> Result<tokio::sync::OwnedSemaphorePermit> {
    state
        .session_locks
        .acquire(session_id)
        .await
        .map_err(|_| Error::Other(format!("session lock for {session_id} closed")))
}

fn error_event(e: &Error, phase: CollaborationPhase, model_id: &str) -> SynergyEvent {
    SynergyEvent::Error {
        message: e.to_string(),
        phase: Some(phase),
        model_id: Some(model_id.to_owned()),
    }
}
