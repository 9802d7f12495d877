//! Stance vocabularies: 3-point for users, 5-point for parties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stance of a citizen on a statement (after classification or user override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Agree,
    Neutral,
    Disagree,
}

impl Stance {
    pub const ALL: [Stance; 3] = [Stance::Agree, Stance::Neutral, Stance::Disagree];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Agree => "agree",
            Stance::Neutral => "neutral",
            Stance::Disagree => "disagree",
        }
    }

    /// Class index used by the stance model head (0 = disagree, 1 = neutral, 2 = agree).
    pub fn from_class_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Stance::Disagree),
            1 => Some(Stance::Neutral),
            2 => Some(Stance::Agree),
            _ => None,
        }
    }

    /// True for the two committed stances.
    pub fn is_committed(&self) -> bool {
        !matches!(self, Stance::Neutral)
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agree" => Ok(Stance::Agree),
            "neutral" => Ok(Stance::Neutral),
            "disagree" => Ok(Stance::Disagree),
            other => anyhow::bail!("unknown stance label: {other:?} (use agree, neutral or disagree)"),
        }
    }
}

/// A party's position on a statement, on a 5-point scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyStance {
    StronglyAgree,
    Agree,
    Neutral,
    Disagree,
    StronglyDisagree,
}

impl PartyStance {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyStance::StronglyAgree => "strongly_agree",
            PartyStance::Agree => "agree",
            PartyStance::Neutral => "neutral",
            PartyStance::Disagree => "disagree",
            PartyStance::StronglyDisagree => "strongly_disagree",
        }
    }

    /// Collapse to the 3-point scale the user side is expressed in.
    pub fn normalize(self) -> Stance {
        match self {
            PartyStance::StronglyAgree | PartyStance::Agree => Stance::Agree,
            PartyStance::Neutral => Stance::Neutral,
            PartyStance::Disagree | PartyStance::StronglyDisagree => Stance::Disagree,
        }
    }
}

impl fmt::Display for PartyStance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyStance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strongly_agree" => Ok(PartyStance::StronglyAgree),
            "agree" => Ok(PartyStance::Agree),
            "neutral" => Ok(PartyStance::Neutral),
            "disagree" => Ok(PartyStance::Disagree),
            "strongly_disagree" => Ok(PartyStance::StronglyDisagree),
            other => anyhow::bail!("unknown party stance: {other:?}"),
        }
    }
}
