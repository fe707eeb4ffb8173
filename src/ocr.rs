//! Menu text extraction from images.
//!
//! OCR is delegated to hosted vision models through OpenRouter. Models are
//! tried in configured order and the first reply with enough text wins;
//! a reply below `min_text_len` usually means the model described the
//! image instead of transcribing it, so it is treated as a miss. Only when
//! every model fails is the extraction an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;

use crate::config::OcrConfig;
use crate::llm::OpenRouterChat;

/// Extracted menu text plus the model that produced it.
#[derive(Debug, Clone)]
pub struct OcrExtraction {
    pub text: String,
    pub model: String,
}

/// Seam for image-to-text extraction.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<OcrExtraction>;
}

const EXTRACTION_INSTRUCTION: &str = "Transcribe all text from this restaurant menu image. \
     Preserve the line structure: one dish per line, keep prices and section headings. \
     Output only the transcribed text, no commentary.";

/// OpenRouter-backed extractor with a model fallback chain.
pub struct VisionOcr {
    client: OpenRouterChat,
    models: Vec<String>,
    min_text_len: usize,
}

impl VisionOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        Ok(Self {
            client: OpenRouterChat::new(config.timeout_secs)?,
            models: config.models.clone(),
            min_text_len: config.min_text_len,
        })
    }
}

#[async_trait]
impl TextExtractor for VisionOcr {
    async fn extract(&self, image: &[u8]) -> Result<OcrExtraction> {
        let data_url = format!(
            "data:{};base64,{}",
            sniff_mime(image),
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": EXTRACTION_INSTRUCTION },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }]);

        for model in &self.models {
            match self.client.complete_messages(model, messages.clone(), false).await {
                Ok(response) => {
                    let text = response.content.trim().to_string();
                    if text.len() >= self.min_text_len {
                        tracing::info!(model = %model, chars = text.len(), "OCR extraction succeeded");
                        return Ok(OcrExtraction {
                            text,
                            model: model.clone(),
                        });
                    }
                    tracing::warn!(
                        model = %model,
                        chars = text.len(),
                        "OCR reply too short, trying next model"
                    );
                }
                Err(err) => {
                    tracing::warn!(model = %model, error = %format!("{:#}", err), "OCR model failed, trying next");
                }
            }
        }
        bail!("All {} OCR models failed to extract menu text", self.models.len())
    }
}

fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.starts_with(b"GIF8") {
        "image/gif"
    } else if image.len() > 11 && &image[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_sniffing() {
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G', 0x0d]), "image/png");
        assert_eq!(sniff_mime(b"GIF89a...."), "image/gif");
        assert_eq!(sniff_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(&[0xff, 0xd8, 0xff]), "image/jpeg");
    }
}
