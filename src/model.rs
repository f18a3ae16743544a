//! Data models for FaunaSphere.
//!
//! The dossier types mirror the JSON contract declared to the generative
//! content service field for field (camelCase on the wire). Anything the
//! service hands back is checked by [`SpeciesDossier::validate`] before the
//! rest of the crate sees it.

use serde::{Deserialize, Serialize};

/// Stock photo shown when neither image slot produced a picture.
pub const STOCK_PLACEHOLDER_URL: &str =
    "https://images.unsplash.com/photo-1546182990-dffeafbe841d?auto=format&fit=crop&q=80&w=1200";

/// Maximum number of grounding sources attached to a dossier.
pub const MAX_GROUNDING_SOURCES: usize = 5;

/// Maximum number of suggestions shown for a rejected query.
pub const MAX_SUGGESTIONS: usize = 3;

/// Number of fun facts the service is contracted to return.
pub const FUN_FACT_COUNT: usize = 2;

/// IUCN-style conservation status.
///
/// The string forms are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    #[serde(rename = "Least Concern")]
    LeastConcern,
    #[serde(rename = "Near Threatened")]
    NearThreatened,
    #[serde(rename = "Vulnerable")]
    Vulnerable,
    #[serde(rename = "Endangered")]
    Endangered,
    #[serde(rename = "Critically Endangered")]
    CriticallyEndangered,
    #[serde(rename = "Extinct in the Wild")]
    ExtinctInTheWild,
    #[serde(rename = "Extinct")]
    Extinct,
}

impl ThreatLevel {
    /// Every level, least to most severe.
    pub const ALL: [ThreatLevel; 7] = [
        ThreatLevel::LeastConcern,
        ThreatLevel::NearThreatened,
        ThreatLevel::Vulnerable,
        ThreatLevel::Endangered,
        ThreatLevel::CriticallyEndangered,
        ThreatLevel::ExtinctInTheWild,
        ThreatLevel::Extinct,
    ];

    /// Get the wire/display label.
    pub fn label(&self) -> &'static str {
        match self {
            ThreatLevel::LeastConcern => "Least Concern",
            ThreatLevel::NearThreatened => "Near Threatened",
            ThreatLevel::Vulnerable => "Vulnerable",
            ThreatLevel::Endangered => "Endangered",
            ThreatLevel::CriticallyEndangered => "Critically Endangered",
            ThreatLevel::ExtinctInTheWild => "Extinct in the Wild",
            ThreatLevel::Extinct => "Extinct",
        }
    }
}

/// The seven Linnaean ranks, all required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub kingdom: String,
    pub phylum: String,
    pub class: String,
    pub order: String,
    pub family: String,
    pub genus: String,
    pub species: String,
}

impl Taxonomy {
    /// Ranks paired with their names, kingdom first.
    pub fn ranks(&self) -> [(&'static str, &str); 7] {
        [
            ("kingdom", &self.kingdom),
            ("phylum", &self.phylum),
            ("class", &self.class),
            ("order", &self.order),
            ("family", &self.family),
            ("genus", &self.genus),
            ("species", &self.species),
        ]
    }
}

/// A named point on the range map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRegion {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Conservation status plus a short explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub description: String,
}

/// A peer-reviewed paper cited by the dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScientificPaper {
    pub title: String,
    pub authors: String,
    /// Declared as a NUMBER in the schema; the service sometimes sends `2019.0`.
    #[serde(deserialize_with = "de_whole_number")]
    pub year: i32,
    pub journal: String,
}

/// A multiple-choice question about the species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(deserialize_with = "de_whole_number")]
    pub correct_answer_index: i32,
    pub explanation: String,
}

impl QuizQuestion {
    /// Whether `option` is the correct answer.
    pub fn is_correct(&self, option: usize) -> bool {
        usize::try_from(self.correct_answer_index).is_ok_and(|i| i == option)
    }
}

/// A web citation attached by the service's search grounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// A fully validated species record.
///
/// Only ever constructed for inputs the service classified as animals; a
/// rejected query is a [`Classification::NotAnimal`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesDossier {
    pub is_animal: bool,
    pub common_name: String,
    pub scientific_name: String,
    pub taxonomy: Taxonomy,
    pub evolutionary_history: String,
    pub habitat: String,
    pub habitat_map_regions: Vec<MapRegion>,
    pub diet: String,
    pub physical_features: Vec<String>,
    pub visual_description_for_ai: String,
    pub behavior: String,
    pub role_in_ecosystem: String,
    pub threats: ThreatAssessment,
    pub wikipedia_summary: String,
    pub ai_research_methodology: String,
    pub fun_facts: Vec<String>,
    pub scientific_literature: Vec<ScientificPaper>,
    pub quiz: Vec<QuizQuestion>,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
}

impl SpeciesDossier {
    /// Check the invariants the response schema promises but a remote
    /// service may not honor.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if !self.is_animal {
            return Err("dossier is not flagged as an animal".to_string());
        }
        if self.common_name.trim().is_empty() {
            return Err("commonName is empty".to_string());
        }
        if self.scientific_name.trim().is_empty() {
            return Err("scientificName is empty".to_string());
        }
        for (rank, value) in self.taxonomy.ranks() {
            if value.trim().is_empty() {
                return Err(format!("taxonomy.{} is empty", rank));
            }
        }
        if self.fun_facts.len() != FUN_FACT_COUNT {
            return Err(format!(
                "expected {} funFacts, got {}",
                FUN_FACT_COUNT,
                self.fun_facts.len()
            ));
        }
        for (n, q) in self.quiz.iter().enumerate() {
            if q.options.len() < 2 {
                return Err(format!("quiz[{}] has fewer than 2 options", n));
            }
            let in_range = usize::try_from(q.correct_answer_index)
                .is_ok_and(|i| i < q.options.len());
            if !in_range {
                return Err(format!(
                    "quiz[{}].correctAnswerIndex {} is out of range",
                    n, q.correct_answer_index
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of classifying a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The query names a real animal; the full dossier follows.
    Animal(Box<SpeciesDossier>),
    /// The query is not an animal; real species to try instead.
    NotAnimal { suggestions: Vec<String> },
}

/// Ordered, never-empty list of image references for a dossier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageSet(Vec<String>);

impl ImageSet {
    /// Build a set from slot results, falling back to the stock placeholder
    /// when every slot came back empty.
    pub fn from_slots<I>(slots: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let images: Vec<String> = slots
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if images.is_empty() {
            Self::placeholder()
        } else {
            Self(images)
        }
    }

    /// The single-image stock fallback.
    pub fn placeholder() -> Self {
        Self(vec![STOCK_PLACEHOLDER_URL.to_string()])
    }

    /// The first (cover) image.
    pub fn first(&self) -> &str {
        // Never empty by construction.
        &self.0[0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether this set is only the stock placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.0.len() == 1 && self.0[0] == STOCK_PLACEHOLDER_URL
    }
}

/// A saved species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteItem {
    pub name: String,
    pub scientific_name: String,
    pub image: String,
}

fn de_whole_number<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "expected a whole number, got {}",
            value
        )));
    }
    Ok(value as i32)
}
