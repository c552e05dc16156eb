use log::{debug, info, warn};
use stickerloop_contracts::journal::JournalEntry;
use stickerloop_contracts::queue::EventLabel;

use crate::error::{PipelineError, PipelineErrorKind, PipelineResult};
use crate::media::image_data_url;
use crate::services::{ChatMessage, ChatRequest, EngineContext, ImageGenerationRequest};

const SCORE_INSTRUCTION: &str = "Evaluate if the image matches the original desired outcome. Your response must only be an integer between 0 and 100 indicating your perceived level of success.";

fn score_intent(event: &EventLabel, strict: bool) -> String {
    let intent = format!(
        "The original intent was to create a die cut sticker design that captures the ethos of {event}."
    );
    if strict {
        return format!(
            "{intent} Please evaluate the image on a scale of 0 to 100 with no additional comments or text."
        );
    }
    intent
}

/// An image that cleared the threshold. `image` holds the evaluation-time
/// download; the persisted bytes are fetched again from `uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedImage {
    pub attempt: u32,
    pub uri: String,
    pub image: Vec<u8>,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Generating { attempt: u32 },
    Fetching { attempt: u32, uri: String },
    Evaluating { attempt: u32, uri: String, image: Vec<u8> },
    Retry { attempt: u32, score: Option<u8> },
    Accepted(AcceptedImage),
    Exhausted { attempts: u32, last_score: Option<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Accepted(AcceptedImage),
    Exhausted { attempts: u32, last_score: Option<u8> },
}

/// Integer 0–100, or `None` for anything else.
pub fn parse_score(text: &str) -> Option<u8> {
    let value = text.trim().parse::<i64>().ok()?;
    u8::try_from(value).ok().filter(|score| *score <= 100)
}

pub fn is_acceptable(score: Option<u8>, threshold: u8) -> bool {
    score.map(|score| score >= threshold).unwrap_or(false)
}

/// Bounded generate, fetch, evaluate loop for one prompt.
pub struct QualityGate<'a> {
    ctx: &'a EngineContext,
}

impl<'a> QualityGate<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    pub fn run(&self, event: &EventLabel, prompt: &str) -> PipelineResult<GateOutcome> {
        let mut state = GateState::Generating { attempt: 1 };
        loop {
            state = self.step(event, prompt, state)?;
            match state {
                GateState::Accepted(accepted) => return Ok(GateOutcome::Accepted(accepted)),
                GateState::Exhausted {
                    attempts,
                    last_score,
                } => {
                    return Ok(GateOutcome::Exhausted {
                        attempts,
                        last_score,
                    })
                }
                _ => {}
            }
        }
    }

    /// Advances one transition. Terminal states are returned unchanged.
    pub fn step(
        &self,
        event: &EventLabel,
        prompt: &str,
        state: GateState,
    ) -> PipelineResult<GateState> {
        let config = &self.ctx.config;
        match state {
            GateState::Generating { attempt } => {
                let request = ImageGenerationRequest {
                    model: config.image_model.clone(),
                    prompt: prompt.to_string(),
                    size: config.image_size.clone(),
                    quality: config.image_quality.clone(),
                    n: 1,
                };
                let uri = self
                    .ctx
                    .images
                    .generate(&request)
                    .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Upstream, &err))?;
                debug!("'{event}' attempt {attempt}: generated {uri}");
                Ok(GateState::Fetching { attempt, uri })
            }
            GateState::Fetching { attempt, uri } => {
                let image = self
                    .ctx
                    .fetcher
                    .fetch(&uri)
                    .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Fetch, &err))?;
                Ok(GateState::Evaluating {
                    attempt,
                    uri,
                    image,
                })
            }
            GateState::Evaluating {
                attempt,
                uri,
                image,
            } => {
                let score = self.evaluate(event, &image)?;
                self.note_scored(event, prompt, attempt, score);
                if is_acceptable(score, config.accept_threshold) {
                    info!(
                        "'{event}' accepted on attempt {attempt} with score {}",
                        score.unwrap_or_default()
                    );
                    return Ok(GateState::Accepted(AcceptedImage {
                        attempt,
                        uri,
                        image,
                        score: score.unwrap_or_default(),
                    }));
                }
                if attempt < config.iterations() {
                    return Ok(GateState::Retry { attempt, score });
                }
                Ok(GateState::Exhausted {
                    attempts: attempt,
                    last_score: score,
                })
            }
            GateState::Retry { attempt, .. } => Ok(GateState::Generating {
                attempt: attempt + 1,
            }),
            terminal @ (GateState::Accepted(_) | GateState::Exhausted { .. }) => Ok(terminal),
        }
    }

    /// Scores one image. Unparseable answers are retried with a stricter
    /// instruction; after the last attempt the score is indeterminate.
    pub fn evaluate(&self, event: &EventLabel, image: &[u8]) -> PipelineResult<Option<u8>> {
        let data_url = image_data_url(image);
        let attempts = self.ctx.config.score_attempts();
        for idx in 0..attempts {
            let request = ChatRequest {
                model: self.ctx.config.vision_model.clone(),
                messages: vec![
                    ChatMessage::system(SCORE_INSTRUCTION),
                    ChatMessage::user_with_image(data_url.clone(), score_intent(event, idx > 0)),
                ],
            };
            let answer = self
                .ctx
                .vision
                .complete(&request)
                .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Upstream, &err))?;
            if let Some(score) = parse_score(&answer) {
                return Ok(Some(score));
            }
            warn!(
                "'{event}' score response not an integer (attempt {} of {attempts}): {:?}",
                idx + 1,
                answer.chars().take(80).collect::<String>()
            );
        }
        Ok(None)
    }

    fn note_scored(&self, event: &EventLabel, prompt: &str, attempt: u32, score: Option<u8>) {
        self.ctx.journal.note(JournalEntry::AttemptScored {
            event: event.to_string(),
            prompt: prompt.to_string(),
            attempt,
            score,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stickerloop_contracts::queue::EventLabel;

    use super::{is_acceptable, parse_score, GateOutcome, GateState, QualityGate};
    use crate::error::PipelineErrorKind;
    use crate::testing::{context, image_uri, FnChat, StubFetcher, StubImages};

    fn event() -> EventLabel {
        EventLabel::new("test-holiday")
    }

    #[test]
    fn parse_score_accepts_only_integers_in_range() {
        assert_eq!(parse_score(" 85\n"), Some(85));
        assert_eq!(parse_score("0"), Some(0));
        assert_eq!(parse_score("100"), Some(100));
        assert_eq!(parse_score("101"), None);
        assert_eq!(parse_score("-3"), None);
        assert_eq!(parse_score("85/100"), None);
        assert_eq!(parse_score("I would rate this 85"), None);
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(is_acceptable(Some(70), 70));
        assert!(!is_acceptable(Some(69), 70));
        assert!(!is_acceptable(None, 70));
    }

    #[test]
    fn score_of_70_is_accepted_first_time() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = StubImages::new();
        let vision = FnChat::new(|_, _| Ok("70".to_string()));
        let ctx = context(temp.path(), FnChat::silent(), vision, images.clone(), StubFetcher::new());

        let outcome = QualityGate::new(&ctx).run(&event(), "a sun")?;
        match outcome {
            GateOutcome::Accepted(accepted) => {
                assert_eq!(accepted.attempt, 1);
                assert_eq!(accepted.score, 70);
                assert_eq!(accepted.uri, "stub://a-sun/0");
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert_eq!(images.calls(), 1);
        Ok(())
    }

    #[test]
    fn score_of_69_is_rejected_until_exhausted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = StubImages::new();
        let vision = FnChat::new(|_, _| Ok("69".to_string()));
        let ctx = context(temp.path(), FnChat::silent(), vision.clone(), images.clone(), StubFetcher::new());

        let outcome = QualityGate::new(&ctx).run(&event(), "a sun")?;
        assert_eq!(
            outcome,
            GateOutcome::Exhausted {
                attempts: 3,
                last_score: Some(69)
            }
        );
        assert_eq!(images.calls(), 3);
        assert_eq!(vision.calls(), 3);
        Ok(())
    }

    #[test]
    fn indeterminate_scores_terminate_within_bounds() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = StubImages::new();
        let fetcher = StubFetcher::new();
        let vision = FnChat::new(|_, _| Ok("Looks great!".to_string()));
        let ctx = context(temp.path(), FnChat::silent(), vision.clone(), images.clone(), fetcher.clone());

        let outcome = QualityGate::new(&ctx).run(&event(), "a sun")?;

        assert_eq!(
            outcome,
            GateOutcome::Exhausted {
                attempts: 3,
                last_score: None
            }
        );
        assert_eq!(images.calls(), 3);
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(vision.calls(), 6);
        assert!(!temp.path().join("test-holiday").exists());
        Ok(())
    }

    #[test]
    fn second_score_attempt_is_stricter_and_can_recover() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let vision = FnChat::new(|_, idx| {
            Ok(if idx == 0 { "Score: high" } else { "88" }.to_string())
        });
        let ctx = context(temp.path(), FnChat::silent(), vision.clone(), StubImages::new(), StubFetcher::new());

        let score = QualityGate::new(&ctx).evaluate(&event(), b"\x89PNG\r\n\x1a\nx")?;

        assert_eq!(score, Some(88));
        let requests = vision.requests();
        assert!(!requests[0].user_text().contains("no additional comments"));
        assert!(requests[1].user_text().contains("no additional comments or text"));
        assert!(requests[1].image_data_url().is_some());
        Ok(())
    }

    #[test]
    fn retries_generate_fresh_images_for_same_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let vision = FnChat::new(|request, _| {
            let uri = image_uri(request).unwrap_or_default();
            Ok(if uri.ends_with("/2") { "90" } else { "10" }.to_string())
        });
        let ctx = context(temp.path(), FnChat::silent(), vision, StubImages::new(), StubFetcher::new());

        match QualityGate::new(&ctx).run(&event(), "a sun")? {
            GateOutcome::Accepted(accepted) => {
                assert_eq!(accepted.attempt, 3);
                assert_eq!(accepted.uri, "stub://a-sun/2");
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn fetch_failure_is_fatal_not_retried() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = StubImages::new();
        let vision = FnChat::silent();
        let ctx = context(
            temp.path(),
            FnChat::silent(),
            vision.clone(),
            images.clone(),
            StubFetcher::failing_for("stub://"),
        );

        let err = QualityGate::new(&ctx).run(&event(), "a sun").err();
        assert_eq!(err.map(|err| err.kind()), Some(PipelineErrorKind::Fetch));
        assert_eq!(images.calls(), 1);
        assert_eq!(vision.calls(), 0);
        Ok(())
    }

    #[test]
    fn step_walks_the_documented_transitions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let vision = FnChat::new(|_, _| Ok("12".to_string()));
        let ctx = context(temp.path(), FnChat::silent(), vision, StubImages::new(), StubFetcher::new());
        let gate = QualityGate::new(&ctx);

        let state = gate.step(&event(), "a sun", GateState::Generating { attempt: 1 })?;
        assert!(matches!(state, GateState::Fetching { attempt: 1, .. }));
        let state = gate.step(&event(), "a sun", state)?;
        assert!(matches!(state, GateState::Evaluating { attempt: 1, .. }));
        let state = gate.step(&event(), "a sun", state)?;
        assert_eq!(state, GateState::Retry { attempt: 1, score: Some(12) });
        let state = gate.step(&event(), "a sun", state)?;
        assert_eq!(state, GateState::Generating { attempt: 2 });

        let terminal = GateState::Exhausted { attempts: 3, last_score: None };
        assert_eq!(gate.step(&event(), "a sun", terminal.clone())?, terminal);
        Ok(())
    }

    #[test]
    fn upstream_image_failure_is_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ctx = context(
            temp.path(),
            FnChat::silent(),
            FnChat::silent(),
            StubImages::failing(),
            Arc::new(crate::dryrun::DryrunClient::new()),
        );
        let err = QualityGate::new(&ctx).run(&event(), "a sun").err();
        assert_eq!(err.map(|err| err.kind()), Some(PipelineErrorKind::Upstream));
        Ok(())
    }
}
