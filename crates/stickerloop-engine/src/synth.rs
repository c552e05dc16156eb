use log::{debug, info};
use stickerloop_contracts::journal::JournalEntry;
use stickerloop_contracts::prompts::{normalize_prompt_lines, PromptCache};
use stickerloop_contracts::queue::EventLabel;

use crate::error::{PipelineError, PipelineErrorKind, PipelineResult};
use crate::services::{ChatMessage, ChatRequest, EngineContext};

const PROMPT_ENGINEER_DIRECTIVE: &str = "You are a sticker prompt engineer who writes detailed, imaginative image prompts for die cut stickers. Start each prompt by describing the desired result and state explicitly that it is a sticker. Use specific details and descriptive language for the scene, mood, objects, actions and interactions, including colours, styles, emotions and setting, with references such as 'in the style of Impressionism' or 'reminiscent of 1950s fashion'.";

fn prompt_request(event: &EventLabel, quantity: usize) -> String {
    format!(
        "Provide {quantity} prompts for die cut stickers, one per line. Each prompt focuses on a different theme or value of {event}. The prompts promote the ethos or cause it represents without mentioning it by name. Include specific visual elements and action-oriented text. Each illustration is cute, vibrant or colourful. The sticker has no border around the design and a simple background."
    )
}

/// Produces the prompt set for one event, reusing `prompts.txt` when present.
pub struct PromptSynthesizer<'a> {
    ctx: &'a EngineContext,
}

impl<'a> PromptSynthesizer<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    pub fn synthesize(&self, event: &EventLabel) -> PipelineResult<Vec<String>> {
        let config = &self.ctx.config;
        let cache = PromptCache::new(self.ctx.store().event_dir(event));
        let cached = cache
            .load()
            .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Storage, &err))?;
        if let Some(prompts) = cached {
            debug!("prompts for '{event}' served from {}", cache.path().display());
            self.note_ready(event, &prompts, true);
            return Ok(prompts);
        }

        let target = config.target_prompt_count.max(1);
        let request = ChatRequest {
            model: config.text_model.clone(),
            messages: vec![
                ChatMessage::system(PROMPT_ENGINEER_DIRECTIVE),
                ChatMessage::user(prompt_request(event, target)),
            ],
        };
        let raw = self
            .ctx
            .text
            .complete(&request)
            .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Upstream, &err))?;

        let mut prompts = normalize_prompt_lines(raw.trim().lines(), target, config.min_prompt_chars);
        if prompts.len() < target {
            return Err(PipelineError::unrecognized_format(format!(
                "expected {target} prompts for '{event}', got {}",
                prompts.len()
            )));
        }
        prompts.truncate(target);

        cache
            .store(&prompts)
            .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Storage, &err))?;
        info!("synthesized {} prompts for '{event}'", prompts.len());
        self.note_ready(event, &prompts, false);
        Ok(prompts)
    }

    fn note_ready(&self, event: &EventLabel, prompts: &[String], cached: bool) {
        self.ctx.journal.note(JournalEntry::PromptsReady {
            event: event.to_string(),
            count: prompts.len(),
            cached,
        });
    }
}
