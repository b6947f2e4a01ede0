use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Garment category passed to the generation prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top,
    Bottom,
    Dress,
    Outerwear,
}

const OUTERWEAR_KEYWORDS: &[&str] = &["jacket", "coat", "parka", "blazer", "puffer"];
const DRESS_KEYWORDS: &[&str] = &["dress", "gown"];
const BOTTOM_KEYWORDS: &[&str] = &["jeans", "pants", "trousers", "skirt", "shorts", "chinos"];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottom",
            Category::Dress => "dress",
            Category::Outerwear => "outerwear",
        }
    }

    /// Keyword heuristic over the garment reference URL. Falls back to
    /// `Top` when nothing matches. The widget applies the same rules
    /// client-side so both ends agree when no explicit category is given.
    pub fn infer(garment_url: &str) -> Self {
        let haystack = garment_url.to_lowercase();
        if OUTERWEAR_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return Category::Outerwear;
        }
        if DRESS_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return Category::Dress;
        }
        if BOTTOM_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return Category::Bottom;
        }
        Category::Top
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "top" => Ok(Category::Top),
            "bottom" => Ok(Category::Bottom),
            "dress" => Ok(Category::Dress),
            "outerwear" => Ok(Category::Outerwear),
            other => Err(format!("unknown category: {other}")),
        }
    }
}
