//! Generative content client.
//!
//! Two capabilities sit on top of a [`GenerativeBackend`]:
//!
//! - [`ContentClient::describe_species`] asks for a structured species
//!   dossier, then parses and validates it. One attempt, no retry.
//! - [`ContentClient::render_species_images`] asks for two photographs in
//!   parallel, each with its own primary/secondary model fallback. It never
//!   fails; the worst case is the stock placeholder.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::data_sources::gemini::{
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, GenerativeBackend,
    ImageConfig,
};
use crate::error::{GeminiError, LookupError};
use crate::model::{
    Classification, FUN_FACT_COUNT, GroundingSource, ImageSet, MAX_GROUNDING_SOURCES,
    MAX_SUGGESTIONS, SpeciesDossier, ThreatLevel,
};

/// Default model for the describe-species call.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

/// Default high-quality image model.
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

/// Default lower-tier image model used when the primary fails.
pub const DEFAULT_FALLBACK_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

const IMAGE_ASPECT_RATIO: &str = "16:9";
const IMAGE_SIZE: &str = "1K";

/// Which models each call goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub text_model: String,
    pub image_model: String,
    pub fallback_image_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            fallback_image_model: DEFAULT_FALLBACK_IMAGE_MODEL.to_string(),
        }
    }
}

/// The two image slots, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    /// Full-body side view.
    Profile,
    /// Close-up of the face.
    Portrait,
}

impl ImageSlot {
    pub fn label(&self) -> &'static str {
        match self {
            ImageSlot::Profile => "profile",
            ImageSlot::Portrait => "portrait",
        }
    }

    fn framing(&self) -> &'static str {
        match self {
            ImageSlot::Profile => "Full-body profile view showing exact anatomical proportions.",
            ImageSlot::Portrait => {
                "Extreme close-up macro portrait focusing on unique facial markers."
            }
        }
    }
}

/// Client for the describe-species and render-images capabilities.
#[derive(Clone)]
pub struct ContentClient {
    backend: Arc<dyn GenerativeBackend>,
    models: ModelConfig,
}

impl ContentClient {
    pub fn new(backend: Arc<dyn GenerativeBackend>, models: ModelConfig) -> Self {
        Self { backend, models }
    }

    pub fn models(&self) -> &ModelConfig {
        &self.models
    }

    /// Classify `query` and, for animals, fetch the full dossier.
    ///
    /// # Errors
    ///
    /// - [`LookupError::LookupFailed`] if the call itself fails
    /// - [`LookupError::MalformedResponse`] if the payload is not a valid dossier
    pub async fn describe_species(&self, query: &str) -> Result<Classification, LookupError> {
        let request = describe_request(query);
        let response = self
            .backend
            .generate_content(&self.models.text_model, &request)
            .await?;

        let classification = parse_classification(&response)?;
        match &classification {
            Classification::Animal(dossier) => info!(
                query,
                common_name = %dossier.common_name,
                sources = dossier.sources.len(),
                "Species dossier received"
            ),
            Classification::NotAnimal { suggestions } => info!(
                query,
                suggestions = suggestions.len(),
                "Query rejected as not an animal"
            ),
        }
        Ok(classification)
    }

    /// Render the two dossier photographs.
    ///
    /// Slots run concurrently and fail independently; an empty slot is
    /// dropped and two empty slots yield [`ImageSet::placeholder`].
    pub async fn render_species_images(&self, dossier: &SpeciesDossier) -> ImageSet {
        let base = image_base_prompt(dossier);
        let (profile, portrait) = tokio::join!(
            self.render_slot(ImageSlot::Profile, &base),
            self.render_slot(ImageSlot::Portrait, &base),
        );

        let images = ImageSet::from_slots([profile, portrait]);
        if images.is_placeholder() {
            warn!(
                common_name = %dossier.common_name,
                "Both image slots failed; using stock placeholder"
            );
        } else {
            info!(
                common_name = %dossier.common_name,
                count = images.len(),
                "Species images rendered"
            );
        }
        images
    }

    async fn render_slot(&self, slot: ImageSlot, base: &str) -> Option<String> {
        let prompt = format!("{} {}", base, slot.framing());

        let primary = image_request(&prompt, true);
        match self.try_image(&self.models.image_model, &primary).await {
            Ok(Some(uri)) => return Some(uri),
            Ok(None) => warn!(
                slot = slot.label(),
                model = %self.models.image_model,
                "Primary image model returned no image"
            ),
            Err(e) => warn!(
                slot = slot.label(),
                model = %self.models.image_model,
                error = %e,
                "Primary image model failed"
            ),
        }

        let fallback = image_request(&prompt, false);
        match self
            .try_image(&self.models.fallback_image_model, &fallback)
            .await
        {
            Ok(Some(uri)) => Some(uri),
            Ok(None) => {
                warn!(
                    slot = slot.label(),
                    model = %self.models.fallback_image_model,
                    "Fallback image model returned no image"
                );
                None
            }
            Err(e) => {
                warn!(
                    slot = slot.label(),
                    model = %self.models.fallback_image_model,
                    error = %e,
                    "Fallback image model failed"
                );
                None
            }
        }
    }

    async fn try_image(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<Option<String>, GeminiError> {
        let response = self.backend.generate_content(model, request).await?;
        Ok(response.first_inline_data().map(|d| d.to_data_uri()))
    }
}

/// Build the structured describe-species request for `query`.
pub fn describe_request(query: &str) -> GenerateContentRequest {
    GenerateContentRequest::prompt(describe_prompt(query))
        .with_google_search()
        .with_config(GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(species_schema()),
            image_config: None,
        })
}

fn describe_prompt(query: &str) -> String {
    format!(
        r#"You are FaunaSphere AI, a senior zoologist.

VALIDATION PROTOCOL:
1. Analyze the query: "{query}".
2. Decide whether it names a real biological animal species, extant or extinct.
3. If it is NOT an animal (a plant, fungus, microbe, individual human, fictional character, place, object or abstract concept), set "isAnimal" to false.
4. When "isAnimal" is false:
   - give exactly 3 real animal species as "suggestions";
   - the remaining fields may hold empty or placeholder values.
5. When "isAnimal" is true, write a complete, scientifically grounded report:
   - cross-reference Wikipedia and authorities such as the IUCN Red List;
   - "visualDescriptionForAi": a precise anatomical blueprint for a scientific illustrator;
   - "wikipediaSummary": one dense paragraph based on Wikipedia;
   - "threats.level": one of the IUCN categories listed in the schema;
   - "funFacts": exactly {FUN_FACT_COUNT} distinct scientific insights;
   - "scientificLiterature": 2-3 real peer-reviewed papers;
   - "quiz": exactly 3 multiple-choice questions.

Answer with JSON only."#
    )
}

/// The response schema declared to the service.
///
/// Field names, nesting and the threat level strings are the compatibility
/// contract with any replacement backend.
pub fn species_schema() -> Value {
    let string = json!({ "type": "STRING" });
    let string_list = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    let threat_levels: Vec<&str> = ThreatLevel::ALL.iter().map(|l| l.label()).collect();

    json!({
        "type": "OBJECT",
        "properties": {
            "isAnimal": { "type": "BOOLEAN" },
            "suggestions": string_list,
            "commonName": string,
            "scientificName": string,
            "taxonomy": {
                "type": "OBJECT",
                "properties": {
                    "kingdom": string,
                    "phylum": string,
                    "class": string,
                    "order": string,
                    "family": string,
                    "genus": string,
                    "species": string
                },
                "required": ["kingdom", "phylum", "class", "order", "family", "genus", "species"]
            },
            "evolutionaryHistory": string,
            "habitat": string,
            "habitatMapRegions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": string,
                        "latitude": { "type": "NUMBER" },
                        "longitude": { "type": "NUMBER" }
                    },
                    "required": ["name", "latitude", "longitude"]
                }
            },
            "diet": string,
            "physicalFeatures": string_list,
            "visualDescriptionForAi": string,
            "behavior": string,
            "roleInEcosystem": string,
            "threats": {
                "type": "OBJECT",
                "properties": {
                    "level": { "type": "STRING", "format": "enum", "enum": threat_levels },
                    "description": string
                },
                "required": ["level", "description"]
            },
            "wikipediaSummary": string,
            "aiResearchMethodology": string,
            "funFacts": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "minItems": FUN_FACT_COUNT,
                "maxItems": FUN_FACT_COUNT
            },
            "scientificLiterature": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": string,
                        "authors": string,
                        "year": { "type": "NUMBER" },
                        "journal": string
                    },
                    "required": ["title", "authors", "year", "journal"]
                }
            },
            "quiz": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "question": string,
                        "options": string_list,
                        "correctAnswerIndex": { "type": "NUMBER" },
                        "explanation": string
                    },
                    "required": ["question", "options", "correctAnswerIndex", "explanation"]
                }
            }
        },
        "required": [
            "isAnimal", "commonName", "scientificName", "taxonomy", "evolutionaryHistory",
            "habitat", "habitatMapRegions", "diet", "physicalFeatures", "visualDescriptionForAi",
            "behavior", "roleInEcosystem", "threats", "wikipediaSummary", "aiResearchMethodology",
            "funFacts", "scientificLiterature", "quiz"
        ]
    })
}

/// Turn a describe-species response into a validated classification.
pub fn parse_classification(
    response: &GenerateContentResponse,
) -> Result<Classification, LookupError> {
    let text = response
        .first_text()
        .ok_or_else(|| LookupError::MalformedResponse("response has no text part".to_string()))?;

    let payload = strip_code_fence(text);
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| LookupError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let is_animal = value
        .get("isAnimal")
        .and_then(Value::as_bool)
        .ok_or_else(|| LookupError::MalformedResponse("missing boolean isAnimal".to_string()))?;

    if !is_animal {
        let suggestions = value
            .get("suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .take(MAX_SUGGESTIONS)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        return Ok(Classification::NotAnimal { suggestions });
    }

    let mut dossier: SpeciesDossier = serde_json::from_value(value)
        .map_err(|e| LookupError::MalformedResponse(format!("schema mismatch: {}", e)))?;
    dossier.validate().map_err(LookupError::MalformedResponse)?;

    dossier.sources = response
        .web_chunks(MAX_GROUNDING_SOURCES)
        .into_iter()
        .map(|web| GroundingSource {
            title: web.title.clone(),
            uri: web.uri.clone(),
        })
        .collect();
    debug!(sources = dossier.sources.len(), "Grounding sources attached");

    Ok(Classification::Animal(Box::new(dossier)))
}

/// Remove an optional surrounding Markdown code fence.
pub fn strip_code_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // Drop an info string such as `json` up to the first newline.
        s = match rest.find('\n') {
            Some(newline) if rest[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[newline + 1..]
            }
            _ => rest.strip_prefix("json").unwrap_or(rest),
        };
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn image_base_prompt(dossier: &SpeciesDossier) -> String {
    format!(
        "BIOLOGICAL SPECIES IDENTIFICATION: {} ({}). \
         ANATOMICAL BLUEPRINT: {}. \
         Match published scientific records exactly; zero artistic license. \
         SETTING: {}. \
         STYLE: ultra-sharp documentary wildlife photography with realistic lighting and textures.",
        dossier.common_name,
        dossier.scientific_name,
        dossier.visual_description_for_ai,
        dossier.habitat
    )
}

fn image_request(prompt: &str, primary: bool) -> GenerateContentRequest {
    let request = GenerateContentRequest::prompt(prompt).with_config(GenerationConfig {
        image_config: Some(ImageConfig {
            aspect_ratio: Some(IMAGE_ASPECT_RATIO.to_string()),
            image_size: primary.then(|| IMAGE_SIZE.to_string()),
        }),
        ..GenerationConfig::default()
    });
    if primary {
        request.with_google_search()
    } else {
        request
    }
}
