//! Prompting the text model and turning its replies into validated content.
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::character::CharacterProfile;
use crate::error::{PipelineError, Result};
use crate::llm::TextModel;
use crate::model::{Article, Emotion, Gender, GeneratedSegment, StoryContent};

/// Remove one surrounding Markdown code fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| PipelineError::MalformedResponse {
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Clone)]
pub struct ContentGenerator {
    model: Arc<dyn TextModel>,
}

impl ContentGenerator {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// One model call; the reply must parse and validate or the item fails.
    #[instrument(skip_all, fields(title = %article.title))]
    pub async fn generate(&self, article: &Article) -> Result<GeneratedSegment> {
        let raw = self.model.complete(&news_prompt(article)).await?;
        let value: Value = parse_json(&raw)?;
        let segment = GeneratedSegment::from_value(value)?;
        info!(
            character = %segment.character_name,
            emotion = segment.emotion.as_str(),
            "segment generated"
        );
        Ok(segment)
    }

    #[instrument(skip_all, fields(character = %profile.name))]
    pub async fn generate_story(&self, profile: &CharacterProfile) -> Result<StoryContent> {
        let raw = self.model.complete(&story_prompt(profile)).await?;
        let value: Value = parse_json(&raw)?;
        let story = StoryContent::from_value(value)?;
        info!(title = %story.title, "story generated");
        Ok(story)
    }
}

pub fn news_prompt(article: &Article) -> String {
    let emotions: Vec<&str> = Emotion::ALL.iter().map(Emotion::as_str).collect();
    format!(
        r#"You write a 30-second alien news script for English learners aged 6-10.
Earth news:
Title: {title}
Content: {content}

Invent a fun alien reporter name (2-3 syllables), pick one emotion ({emotions}),
and retell the story as if it happened on planet Zorg: a title of at most 8 words
and at most 2 short sentences. Keep it gentle; if the news is not suitable for
children, tell a tiny alien story instead. Pick 3 simple English words from your
story, each with a 5-7 word explanation.

Reply with JSON only:
{{"character_name": "...", "emotion": "...", "alien_title": "...", "alien_content": "...",
  "vocab": [{{"word": "...", "explanation": "..."}}, {{"word": "...", "explanation": "..."}}, {{"word": "...", "explanation": "..."}}]}}"#,
        title = article.title,
        content = article.description,
        emotions = emotions.join(", "),
    )
}

pub fn story_prompt(profile: &CharacterProfile) -> String {
    format!(
        r#"Write a cosmic adventure story for children about an alien named {name}.
Age: {age}
Personality: {personality}
Backstory: {backstory}

About 500 words, child-friendly, with a positive moral and 4 distinct scenes set in
space or on alien worlds. Each scene description needs rich visual detail for an
illustration; each scene narration is a plain string of 2-3 sentences.

Reply with JSON only, using exactly these keys:
title, story, scene1, scene1_story, scene2, scene2_story, scene3, scene3_story,
scene4, scene4_story, moral"#,
        name = profile.name,
        age = profile.age_label(),
        personality = non_empty(&profile.personality, "Friendly and curious"),
        backstory = profile.backstory.trim(),
    )
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value.trim()
    }
}

/// Randomised look for a news anchor when no character file is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterAttributes {
    pub skin_color: &'static str,
    pub hair_style: &'static str,
    pub hair_color: &'static str,
    pub outfit: &'static str,
    pub feature: &'static str,
}

const SKIN_COLORS: &[&str] = &["light blue", "mint green", "pale lavender"];
const HAIR_COLORS: &[&str] = &["red", "silver", "pale pink"];
const MALE_HAIR: &[&str] = &["short cropped hair", "subtle quiff", "neat side part"];
const FEMALE_HAIR: &[&str] = &["neat bun", "short pixie cut", "shoulder-length waves"];
const NEUTRAL_HAIR: &[&str] = &["short tidy style", "medium-length style", "sleek look"];
const MALE_OUTFITS: &[&str] = &[
    "news anchor suit in navy blue",
    "news anchor suit in charcoal gray",
    "news anchor suit in dark green",
];
const FEMALE_OUTFITS: &[&str] = &[
    "news anchor blazer in light gray",
    "news anchor outfit in beige",
    "blouse and blazer in navy",
];
const NEUTRAL_OUTFITS: &[&str] = &[
    "news anchor outfit in neutral tones",
    "clean news anchor attire",
    "modern news presenter outfit",
];
const MALE_FEATURES: &[&str] = &[
    "a defined jawline with slight freckles",
    "a neat, human-like face",
    "expressive eyes with defined features",
];
const FEMALE_FEATURES: &[&str] = &[
    "soft features with slight freckles",
    "a human-like face with gentle curves",
    "large expressive eyes with softer features",
];
const NEUTRAL_FEATURES: &[&str] = &[
    "balanced features with slight freckles",
    "a human-like face",
    "expressive eyes with a clear nose and lips",
];

fn choose<R: Rng + ?Sized>(rng: &mut R, options: &[&'static str]) -> &'static str {
    options.choose(rng).copied().unwrap_or_default()
}

impl CharacterAttributes {
    pub fn random<R: Rng + ?Sized>(rng: &mut R, gender: Option<Gender>) -> Self {
        let (hair, outfits, features) = match gender {
            Some(Gender::Male) => (MALE_HAIR, MALE_OUTFITS, MALE_FEATURES),
            Some(Gender::Female) => (FEMALE_HAIR, FEMALE_OUTFITS, FEMALE_FEATURES),
            None => (NEUTRAL_HAIR, NEUTRAL_OUTFITS, NEUTRAL_FEATURES),
        };
        Self {
            skin_color: choose(rng, SKIN_COLORS),
            hair_style: choose(rng, hair),
            hair_color: choose(rng, HAIR_COLORS),
            outfit: choose(rng, outfits),
            feature: choose(rng, features),
        }
    }
}

/// Where the anchor's look comes from.
#[derive(Debug, Clone)]
pub enum AnchorLook<'a> {
    Profile(&'a CharacterProfile),
    Attributes(CharacterAttributes),
}

pub fn news_portrait_prompt(
    name: &str,
    emotion: Emotion,
    gender: Option<Gender>,
    look: &AnchorLook<'_>,
) -> String {
    let presenting = match gender {
        Some(Gender::Male) => "male-presenting ",
        Some(Gender::Female) => "female-presenting ",
        None => "",
    };
    let mut prompt = format!(
        "A hyper-realistic portrait of a cute, friendly {presenting}humanoid alien news anchor \
         named {name}, the clear focus of the image, sitting in a bright modern news studio \
         that is softly out of focus behind them.\n\n"
    );
    match look {
        AnchorLook::Profile(profile) => {
            prompt.push_str(&format!("Appearance: {}\n", profile.appearance.trim()));
            if !profile.personality.trim().is_empty() {
                prompt.push_str(&format!(
                    "Their expression should show this personality: {}\n",
                    profile.personality.trim()
                ));
            }
            if profile.age.is_some() {
                prompt.push_str(&format!("The character is {} years old.\n", profile.age_label()));
            }
        }
        AnchorLook::Attributes(a) => prompt.push_str(&format!(
            "The alien has {}, {} skin and {} {} hair, and wears a professional {}.\n",
            a.feature, a.skin_color, a.hair_color, a.hair_style, a.outfit
        )),
    }
    prompt.push_str(&format!(
        "\nA warm smile with an overall {} expression, soft even lighting, child-friendly.",
        emotion.as_str()
    ));
    prompt
}

pub fn story_portrait_prompt(profile: &CharacterProfile) -> String {
    format!(
        "Using the reference image as a style guide, paint a detailed, colourful portrait of \
         an alien named {name}.\n\nAppearance: {appearance}\n\nPersonality: {personality}\n\n\
         Show them against a space or alien-world background, child-friendly and expressive.",
        name = profile.name,
        appearance = non_empty(&profile.appearance, "A humanoid alien with unique features"),
        personality = non_empty(&profile.personality, "Friendly and curious"),
    )
}

pub fn scene_prompt(description: &str) -> String {
    format!(
        "Create a colourful children's-book illustration of this alien scene:\n\n{}\n\n\
         The alien from the reference image must be prominent. Keep the setting clearly \
         cosmic or otherworldly.",
        description.trim()
    )
}

/// The spoken script for one segment, with `<break>` pauses for the TTS engine.
pub fn narration_script(segment: &GeneratedSegment) -> String {
    const ORDINALS: [&str; 3] = ["one", "two", "three"];
    let mut script = String::from(
        "<break time=\"500ms\"/>Hello Earth friends! <break time=\"300ms\"/>\n\
         Welcome to today's alien news from Planet Zorg!\n<break time=\"800ms\"/>\n",
    );
    script.push_str(&format!(
        "{}\n<break time=\"500ms\"/>\n{}\n<break time=\"800ms\"/>\n",
        segment.alien_title, segment.alien_content
    ));
    script.push_str("And now, let's learn some fun Earth words!\n<break time=\"500ms\"/>\n");
    for (ordinal, entry) in ORDINALS.iter().zip(&segment.vocab) {
        script.push_str(&format!(
            "Word number {}: <break time=\"200ms\"/>{}\nThis word means: <break time=\"200ms\"/>{}\n<break time=\"500ms\"/>\n",
            ordinal, entry.word, entry.explanation
        ));
    }
    script.push_str(
        "That's all for today's alien news! <break time=\"300ms\"/>Keep learning and having fun!\n\
         <break time=\"500ms\"/>Goodbye, Earth friends!",
    );
    script
}
