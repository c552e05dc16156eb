use log::debug;
use stickerloop_contracts::artifacts::{parse_metadata_response, ArtifactMetadata};
use stickerloop_contracts::queue::EventLabel;

use crate::error::{PipelineError, PipelineErrorKind, PipelineResult};
use crate::media::image_data_url;
use crate::services::{ChatMessage, ChatRequest, EngineContext};

const METADATA_INSTRUCTION: &str = "Generate metadata for an image. The metadata should include a title (4 to 8 words), tags (up to 15 tags, 50 characters limit, comma-separated), and a short description. Format your response as exactly three lines:\nTitle: [Your title here]\nTags: [Your tags here]\nDescription: [Your description here]";

/// Title, tags and description for an accepted image.
pub struct MetadataSynthesizer<'a> {
    ctx: &'a EngineContext,
}

impl<'a> MetadataSynthesizer<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    pub fn describe(&self, event: &EventLabel, image: &[u8]) -> PipelineResult<ArtifactMetadata> {
        let request = ChatRequest {
            model: self.ctx.config.vision_model.clone(),
            messages: vec![
                ChatMessage::system(METADATA_INSTRUCTION),
                ChatMessage::user_with_image(
                    image_data_url(image),
                    format!("This image is for {event}."),
                ),
            ],
        };
        let answer = self
            .ctx
            .vision
            .complete(&request)
            .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Upstream, &err))?;
        debug!("metadata response for '{event}': {answer:?}");
        parse_metadata_response(&answer)
            .map_err(|err| PipelineError::unrecognized_format(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use stickerloop_contracts::queue::EventLabel;

    use super::MetadataSynthesizer;
    use crate::error::PipelineErrorKind;
    use crate::testing::{context, FnChat, StubFetcher, StubImages, PNG_MAGIC};

    #[test]
    fn describe_parses_fixed_three_line_response() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let vision = FnChat::new(|_, _| {
            Ok("Title: Lantern Glow Over Quiet Lake\nTags: lantern, lake, dusk\nDescription: A paper lantern floating at dusk.".to_string())
        });
        let ctx = context(temp.path(), FnChat::silent(), vision.clone(), StubImages::new(), StubFetcher::new());

        let metadata = MetadataSynthesizer::new(&ctx).describe(&EventLabel::new("Lantern Day"), PNG_MAGIC)?;

        assert_eq!(metadata.title, "Lantern Glow Over Quiet Lake");
        assert_eq!(metadata.tags.len(), 3);
        assert_eq!(metadata.slug(), "lantern-glow-over-quiet-lake");
        let request = &vision.requests()[0];
        assert_eq!(request.user_text(), "This image is for Lantern Day.");
        assert!(request
            .image_data_url()
            .map(|url| url.starts_with("data:image/png;base64,"))
            .unwrap_or(false));
        Ok(())
    }

    #[test]
    fn unstructured_response_is_an_explicit_format_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let vision = FnChat::new(|_, _| Ok("What a lovely sticker!".to_string()));
        let ctx = context(temp.path(), FnChat::silent(), vision, StubImages::new(), StubFetcher::new());

        let err = MetadataSynthesizer::new(&ctx)
            .describe(&EventLabel::new("Lantern Day"), PNG_MAGIC)
            .err();
        assert_eq!(
            err.map(|err| err.kind()),
            Some(PipelineErrorKind::UnrecognizedFormat)
        );
        Ok(())
    }
}
