//! Session state machine.
//!
//! [`Session::apply`] is a pure transition: it takes an [`Event`] and the
//! current calendar day, updates the session and returns the side effects
//! the caller must run ([`Command`]). Nothing here touches the network or the
//! store, so every rule can be tested directly.
//!
//! # Views
//!
//! ```text
//! Idle ──search──▶ Loading ──lookup done──▶ NotAnimal | Success | Failed
//!   ▲                                              │
//!   └──────────────────────reset───────────────────┘
//! ```
//!
//! Only one lookup is in flight at a time; searching while `Loading` is
//! ignored rather than queued.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LookupError;
use crate::model::{FavoriteItem, ImageSet, MAX_SUGGESTIONS, SpeciesDossier};

/// Most recent searches kept in history.
pub const MAX_HISTORY: usize = 10;

/// Animals offered as the daily challenge.
pub const CHALLENGE_ANIMALS: [&str; 10] = [
    "Axolotl",
    "Pangolin",
    "Quokka",
    "Saiga Antelope",
    "Fennec Fox",
    "Secretary Bird",
    "Maned Wolf",
    "Narwhal",
    "Red Panda",
    "Capybara",
];

/// The persisted part of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Saved species, unique by case-insensitive name.
    pub favorites: Vec<FavoriteItem>,

    /// Common names of successful lookups, most recent first.
    pub search_history: Vec<String>,

    /// Consecutive calendar days with a successful lookup.
    pub streak: u32,

    /// Day of the last successful lookup.
    pub last_search_date: Option<NaiveDate>,
}

impl Profile {
    /// Whether `name` is among the favorites (case-insensitive).
    pub fn is_favorite(&self, name: &str) -> bool {
        self.favorites.iter().any(|f| same_name(&f.name, name))
    }
}

/// Progress through a dossier's quiz.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizProgress {
    pub active: bool,
    pub step: usize,
    pub score: u32,
    pub selected: Option<usize>,
    pub finished: bool,
}

/// A successful lookup on display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub query: String,
    pub dossier: SpeciesDossier,
    pub images: ImageSet,
    /// Index of the image currently shown.
    pub slide: usize,
    pub quiz: QuizProgress,
}

/// What the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum View {
    Idle,
    Loading {
        ticket: u64,
        query: String,
    },
    NotAnimal {
        query: String,
        message: String,
        suggestions: Vec<String>,
    },
    Success(Box<Discovery>),
    Failed {
        query: String,
        message: String,
    },
}

/// What a finished lookup produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    NotAnimal {
        suggestions: Vec<String>,
    },
    Animal {
        dossier: Box<SpeciesDossier>,
        images: ImageSet,
    },
}

/// A user intent or a completed side effect.
#[derive(Debug)]
pub enum Event {
    SearchRequested { query: String },
    LookupCompleted {
        ticket: u64,
        outcome: Result<Resolution, LookupError>,
    },
    ToggleFavorite,
    RemoveFavorite { name: String },
    Reset,
    NextSlide,
    PreviousSlide,
    ShowSlide(usize),
    StartQuiz,
    AnswerQuiz { option: usize },
    AdvanceQuiz,
}

/// A persisted field and its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedSlice {
    Favorites(Vec<FavoriteItem>),
    SearchHistory(Vec<String>),
    Streak(u32),
    LastSearchDate(NaiveDate),
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Classify `query`, render images for animals, then report back with
    /// [`Event::LookupCompleted`] carrying the same ticket.
    Lookup { ticket: u64, query: String },
    /// Mirror a changed field to the key-value store.
    Persist(PersistedSlice),
}

/// Everything a client needs to render the current state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub profile: Profile,
    pub view: View,
    /// Whether the species on display is a favorite.
    pub is_favorite: bool,
    pub daily_challenge: &'static str,
}

/// The live session: persisted profile plus transient view.
#[derive(Debug, Clone)]
pub struct Session {
    profile: Profile,
    view: View,
    last_ticket: u64,
}

impl Session {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            view: View::Idle,
            last_ticket: 0,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.view, View::Loading { .. })
    }

    pub fn snapshot(&self, today: NaiveDate) -> SessionSnapshot {
        let is_favorite = match &self.view {
            View::Success(d) => self.profile.is_favorite(&d.dossier.common_name),
            _ => false,
        };
        SessionSnapshot {
            profile: self.profile.clone(),
            view: self.view.clone(),
            is_favorite,
            daily_challenge: daily_challenge(today),
        }
    }

    /// Apply `event` and return the side effects to run.
    pub fn apply(&mut self, event: Event, today: NaiveDate) -> Vec<Command> {
        match event {
            Event::SearchRequested { query } => self.search(&query),
            Event::LookupCompleted { ticket, outcome } => self.complete(ticket, outcome, today),
            Event::ToggleFavorite => self.toggle_favorite(),
            Event::RemoveFavorite { name } => self.remove_favorite(&name),
            Event::Reset => {
                self.view = View::Idle;
                Vec::new()
            }
            Event::NextSlide => {
                if let Some(d) = self.discovery_mut() {
                    d.slide = (d.slide + 1) % d.images.len();
                }
                Vec::new()
            }
            Event::PreviousSlide => {
                if let Some(d) = self.discovery_mut() {
                    let len = d.images.len();
                    d.slide = (d.slide + len - 1) % len;
                }
                Vec::new()
            }
            Event::ShowSlide(index) => {
                if let Some(d) = self.discovery_mut() {
                    if index < d.images.len() {
                        d.slide = index;
                    }
                }
                Vec::new()
            }
            Event::StartQuiz => {
                if let Some(d) = self.discovery_mut() {
                    if !d.dossier.quiz.is_empty() {
                        d.quiz = QuizProgress {
                            active: true,
                            ..QuizProgress::default()
                        };
                    }
                }
                Vec::new()
            }
            Event::AnswerQuiz { option } => {
                if let Some(d) = self.discovery_mut() {
                    answer_quiz(d, option);
                }
                Vec::new()
            }
            Event::AdvanceQuiz => {
                if let Some(d) = self.discovery_mut() {
                    let quiz = &mut d.quiz;
                    if quiz.active && !quiz.finished && quiz.selected.is_some() {
                        if quiz.step + 1 < d.dossier.quiz.len() {
                            quiz.step += 1;
                            quiz.selected = None;
                        } else {
                            quiz.finished = true;
                        }
                    }
                }
                Vec::new()
            }
        }
    }

    fn search(&mut self, query: &str) -> Vec<Command> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Ignoring empty search");
            return Vec::new();
        }
        if self.is_loading() {
            debug!(query, "Lookup already in flight; ignoring search");
            return Vec::new();
        }

        self.last_ticket += 1;
        let ticket = self.last_ticket;
        self.view = View::Loading {
            ticket,
            query: query.to_string(),
        };
        vec![Command::Lookup {
            ticket,
            query: query.to_string(),
        }]
    }

    fn complete(
        &mut self,
        ticket: u64,
        outcome: Result<Resolution, LookupError>,
        today: NaiveDate,
    ) -> Vec<Command> {
        let query = match &self.view {
            View::Loading { ticket: pending, query } if *pending == ticket => query.clone(),
            _ => {
                debug!(ticket, "Discarding stale lookup result");
                return Vec::new();
            }
        };

        match outcome {
            Err(_) => {
                self.view = View::Failed {
                    message: format!("Could not research \"{}\". Please try again.", query),
                    query,
                };
                Vec::new()
            }
            Ok(Resolution::NotAnimal { mut suggestions }) => {
                suggestions.truncate(MAX_SUGGESTIONS);
                self.view = View::NotAnimal {
                    message: format!(
                        "Species Verification Failed: \"{}\" is not recognized as a biological animal species in our records.",
                        query
                    ),
                    query,
                    suggestions,
                };
                Vec::new()
            }
            Ok(Resolution::Animal { dossier, images }) => {
                let mut commands = Vec::new();

                let streak = advance_streak(self.profile.streak, self.profile.last_search_date, today);
                if streak != self.profile.streak {
                    self.profile.streak = streak;
                    commands.push(Command::Persist(PersistedSlice::Streak(streak)));
                }
                if self.profile.last_search_date != Some(today) {
                    self.profile.last_search_date = Some(today);
                    commands.push(Command::Persist(PersistedSlice::LastSearchDate(today)));
                }

                let history = with_recent_search(&self.profile.search_history, &dossier.common_name);
                if history != self.profile.search_history {
                    self.profile.search_history = history.clone();
                    commands.push(Command::Persist(PersistedSlice::SearchHistory(history)));
                }

                info!(
                    common_name = %dossier.common_name,
                    streak = self.profile.streak,
                    images = images.len(),
                    "Discovery committed"
                );
                self.view = View::Success(Box::new(Discovery {
                    query,
                    dossier: *dossier,
                    images,
                    slide: 0,
                    quiz: QuizProgress::default(),
                }));
                commands
            }
        }
    }

    fn toggle_favorite(&mut self) -> Vec<Command> {
        let View::Success(discovery) = &self.view else {
            return Vec::new();
        };
        let dossier = &discovery.dossier;
        let favorites = &mut self.profile.favorites;

        match favorites
            .iter()
            .position(|f| same_name(&f.name, &dossier.common_name))
        {
            Some(index) => {
                favorites.remove(index);
            }
            None => favorites.push(FavoriteItem {
                name: dossier.common_name.clone(),
                scientific_name: dossier.scientific_name.clone(),
                image: discovery.images.first().to_string(),
            }),
        }
        vec![Command::Persist(PersistedSlice::Favorites(favorites.clone()))]
    }

    fn remove_favorite(&mut self, name: &str) -> Vec<Command> {
        let before = self.profile.favorites.len();
        self.profile.favorites.retain(|f| !same_name(&f.name, name));
        if self.profile.favorites.len() == before {
            return Vec::new();
        }
        vec![Command::Persist(PersistedSlice::Favorites(
            self.profile.favorites.clone(),
        ))]
    }

    fn discovery_mut(&mut self) -> Option<&mut Discovery> {
        match &mut self.view {
            View::Success(d) => Some(d),
            _ => None,
        }
    }
}

fn answer_quiz(discovery: &mut Discovery, option: usize) {
    let quiz = &mut discovery.quiz;
    if !quiz.active || quiz.finished || quiz.selected.is_some() {
        return;
    }
    let Some(question) = discovery.dossier.quiz.get(quiz.step) else {
        return;
    };
    if option >= question.options.len() {
        return;
    }
    quiz.selected = Some(option);
    if question.is_correct(option) {
        quiz.score += 1;
    }
}

/// Streak after a successful lookup on `today`.
///
/// Same day: unchanged. Day after the last lookup: one more. Anything else,
/// including no previous lookup: a fresh streak of 1.
pub fn advance_streak(streak: u32, last: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last {
        Some(day) if day == today => streak,
        Some(day) if today.pred_opt() == Some(day) => streak.saturating_add(1),
        _ => 1,
    }
}

/// Streak as loaded at startup: more than a day away from the last lookup
/// (in either direction) breaks it. The last lookup date is left alone.
pub fn decay_streak(streak: u32, last: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last {
        Some(day) if (today - day).num_days().abs() > 1 => 0,
        _ => streak,
    }
}

/// History with `name` moved or inserted at the front.
pub fn with_recent_search(history: &[String], name: &str) -> Vec<String> {
    std::iter::once(name.to_string())
        .chain(history.iter().filter(|h| !same_name(h, name)).cloned())
        .take(MAX_HISTORY)
        .collect()
}

/// The challenge animal for `today`; stable for the whole day.
pub fn daily_challenge(today: NaiveDate) -> &'static str {
    let index = today
        .num_days_from_ce()
        .rem_euclid(CHALLENGE_ANIMALS.len() as i32) as usize;
    CHALLENGE_ANIMALS[index]
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
