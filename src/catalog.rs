//! Catalog of effect templates the injection trigger draws from.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use crate::bias::BiasField;
use crate::modifier::{EffectKind, EffectTemplate};

/// Immutable, ordered list of templates. Passed by value into the simulation;
/// there is no process-wide registry.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: Vec<EffectTemplate>,
}

impl Catalog {
    pub fn new(templates: Vec<EffectTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[EffectTemplate] {
        &self.templates
    }

    pub fn get(&self, name: &str) -> Option<&EffectTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Uniform pick. `None` only for an empty catalog.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&EffectTemplate> {
        self.templates.choose(rng)
    }

    /// The eight company events the mock ticker ships with.
    pub fn standard() -> Self {
        Self::new(vec![
            EffectTemplate::new("Market Crash", EffectKind::Absolute, 24 * 10)
                .describe("The market is crashing!")
                .delta(BiasField::Prospect, -0.5)
                .delta(BiasField::ProspectVolatility, 0.25)
                .delta(BiasField::Volatility, 0.001)
                .stack_limit(1)
                .opposes("Market Boom")
                .message(crash_message),
            EffectTemplate::new("Market Boom", EffectKind::Flat, 24 * 5)
                .describe("The market is booming!")
                .delta(BiasField::Prospect, 0.2)
                .delta(BiasField::Hype, 0.2)
                .stack_limit(1)
                .opposes("Market Crash")
                .message(boom_message),
            EffectTemplate::new("A New CEO in Town", EffectKind::Percent, 24 * 3)
                .describe("A new CEO has taken over the company!")
                .delta(BiasField::Volatility, 0.75)
                .delta(BiasField::Prospect, 0.5)
                .delta(BiasField::ProspectVolatility, 0.5)
                .delta(BiasField::Hype, 0.75)
                .stack_limit(1)
                .message(ceo_message),
            EffectTemplate::new("A New Project", EffectKind::Percent, 24 * 3)
                .describe("A new project has been announced!")
                .delta(BiasField::Volatility, 0.15)
                .delta(BiasField::Prospect, 0.15)
                .delta(BiasField::ProspectVolatility, 0.15)
                .delta(BiasField::Hype, 0.15)
                .stack_limit(5)
                .message(project_message),
            EffectTemplate::new("Scandal!", EffectKind::Flat, 24 * 3)
                .describe("A scandal has been revealed!")
                .delta(BiasField::Prospect, -0.3)
                .delta(BiasField::Hype, -0.3)
                .delta(BiasField::Volatility, 0.01)
                .stack_limit(3)
                .message(scandal_message),
            EffectTemplate::new("Lawsuit", EffectKind::Percent, 24 * 5)
                .describe("The company is being sued!")
                .delta(BiasField::Volatility, 2.0)
                .delta(BiasField::Prospect, -0.5)
                .delta(BiasField::ProspectVolatility, 0.5)
                .delta(BiasField::Hype, -0.5)
                .stack_limit(3)
                .message(lawsuit_message),
            EffectTemplate::new("Marketing Campaign", EffectKind::Percent, 24 * 5)
                .describe("A new marketing campaign has been launched!")
                .delta(BiasField::Volatility, 0.1)
                .delta(BiasField::Prospect, 0.15)
                .delta(BiasField::ProspectVolatility, 0.3)
                .delta(BiasField::Hype, 0.2)
                .stack_limit(5)
                .opposes("Scandal!")
                .message(campaign_message),
            EffectTemplate::new("Award", EffectKind::Percent, 24 * 2)
                .describe("The company has won an award!")
                .delta(BiasField::Volatility, 0.2)
                .delta(BiasField::Prospect, 0.3)
                .delta(BiasField::ProspectVolatility, 0.2)
                .delta(BiasField::Hype, 0.25)
                .stack_limit(3)
                .opposes("Scandal!")
                .message(award_message),
        ])
    }
}

// -----------------------------------------------------------------------------
// Flavor text
// -----------------------------------------------------------------------------

const FIRST_NAMES: &[&str] = &[
    "Ada", "Bruno", "Carmen", "Dmitri", "Elena", "Farid", "Grace", "Hiro", "Ines", "Jonas",
    "Keiko", "Luis", "Maya", "Nikolai", "Olga", "Priya",
];

const LAST_NAMES: &[&str] = &[
    "Abbott", "Becker", "Castillo", "Dubois", "Eriksen", "Fischer", "Gallagher", "Haddad",
    "Ivanova", "Jensen", "Kowalski", "Lindqvist", "Moreau", "Nakamura", "Okafor", "Petrov",
];

const PRODUCTS: &[&str] = &[
    "Chair", "Keyboard", "Sausages", "Gloves", "Bike", "Table", "Shoes", "Towels", "Salad",
    "Computer", "Soap", "Pizza", "Hat", "Car",
];

const ADJECTIVES: &[&str] = &[
    "Ergonomic", "Handcrafted", "Incredible", "Refined", "Sleek", "Rustic", "Intelligent",
    "Gorgeous", "Practical", "Fantastic", "Licensed", "Tasty",
];

const BUZZ_VERBS: &[&str] = &[
    "synergize", "leverage", "disintermediate", "monetize", "incubate", "orchestrate",
    "repurpose", "streamline", "scale", "envisioneer", "aggregate", "deploy",
];

const BUZZ_NOUNS: &[&str] = &[
    "paradigms", "markets", "deliverables", "platforms", "synergies", "channels",
    "supply-chains", "mindshare", "bandwidth", "web-readiness",
];

const ANIMALS: &[&str] = &[
    "cat", "dog", "horse", "bear", "lion", "rabbit", "crocodile", "fish", "bird", "cetacean",
];

fn word(rng: &mut dyn RngCore, words: &'static [&'static str]) -> &'static str {
    words.choose(rng).copied().unwrap_or("")
}

fn one_of(rng: &mut dyn RngCore, options: Vec<String>) -> String {
    if options.is_empty() {
        return String::new();
    }
    let idx = rng.gen_range(0..options.len());
    options.into_iter().nth(idx).unwrap_or_default()
}

fn crash_message(rng: &mut dyn RngCore) -> String {
    one_of(
        rng,
        vec![
            "Company filed for bankruptcy! Stock price has plummeted!".into(),
            "Company has been accused of fraud! Stock price has plummeted!".into(),
            "Company has been accused of insider trading! Stock price has plummeted!".into(),
            "Company assets have been frozen! Stock price has plummeted!".into(),
            "Company production has been halted! Stock price has plummeted!".into(),
        ],
    )
}

fn boom_message(rng: &mut dyn RngCore) -> String {
    one_of(
        rng,
        vec![
            "Company has been acquired by a larger company! Stock price has skyrocketed!".into(),
            "Company has secured a large contract! Stock price has skyrocketed!".into(),
            "Company has been granted a patent! Stock price has skyrocketed!".into(),
            "Company has been granted a government contract! Stock price has skyrocketed!".into(),
        ],
    )
}

fn ceo_message(rng: &mut dyn RngCore) -> String {
    let ceo = format!("{} {}", word(rng, FIRST_NAMES), word(rng, LAST_NAMES));
    one_of(
        rng,
        vec![
            format!("Company has a new CEO! {} has taken over the company!", ceo),
            format!("{}, former employee of the company, has taken over as CEO!", ceo),
        ],
    )
}

fn project_message(rng: &mut dyn RngCore) -> String {
    let product = word(rng, PRODUCTS);
    let adjective = word(rng, ADJECTIVES);
    one_of(
        rng,
        vec![
            format!("Company has announced a new project! {} {}!", adjective, product),
            format!("Company released a press statement! {} {}!", adjective, product),
            format!("Company made a new discovery in {}!", product),
        ],
    )
}

fn scandal_message(rng: &mut dyn RngCore) -> String {
    let verb = word(rng, BUZZ_VERBS);
    one_of(
        rng,
        vec![
            format!("Company has been accused of {} fraud!", verb),
            format!(
                "Company has been involved with a(n) {} mafia, and is under investigation!",
                verb
            ),
            format!("Company was rumored to be involved in a(n) {} scandal!", verb),
        ],
    )
}

fn lawsuit_message(rng: &mut dyn RngCore) -> String {
    let verb = word(rng, BUZZ_VERBS);
    let noun = word(rng, BUZZ_NOUNS);
    one_of(
        rng,
        vec![
            format!("Company is in trial with the {} {} case!", verb, noun),
            format!("Company is being sued for {} {} case!", verb, noun),
            format!("Company was demanding a(n) {} {} issue trial!", verb, noun),
        ],
    )
}

fn campaign_message(rng: &mut dyn RngCore) -> String {
    format!(
        "Company has launched a new marketing campaign! Project: {}!",
        word(rng, BUZZ_VERBS)
    )
}

fn award_message(rng: &mut dyn RngCore) -> String {
    format!(
        "Company has won the {} {} award!",
        word(rng, ANIMALS),
        word(rng, BUZZ_VERBS)
    )
}
