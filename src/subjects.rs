//! KoCEM subject catalog

use crate::models::{Locale, Split};
use serde::Serialize;

/// Coarse grouping of subjects for leaderboard rollups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Dimension {
    #[serde(rename = "Domain Knowledge")]
    DomainKnowledge,
    Terminology,
    Reasoning,
    #[serde(rename = "Visual Interpretation")]
    VisualInterpretation,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::DomainKnowledge => "Domain Knowledge",
            Dimension::Terminology => "Terminology",
            Dimension::Reasoning => "Reasoning",
            Dimension::VisualInterpretation => "Visual Interpretation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub name: &'static str,
    pub abbreviation: &'static str,
    pub description: &'static str,
    /// Sample counts for dev / val / test; `None` means the split has no data
    pub dev: Option<u32>,
    pub val: Option<u32>,
    pub test: Option<u32>,
    pub locales: &'static [Locale],
    pub has_difficulty: bool,
    pub dimension: Option<Dimension>,
}

impl Subject {
    pub fn split_size(&self, split: Split) -> Option<u32> {
        match split {
            Split::Dev => self.dev,
            Split::Val => self.val,
            Split::Test => self.test,
            Split::Extra => None,
        }
    }

    pub fn has_split(&self, split: Split) -> bool {
        self.split_size(split).is_some()
    }

    pub fn supports(&self, locale: Locale) -> bool {
        self.locales.contains(&locale)
    }
}

const EN_KO: &[Locale] = &[Locale::En, Locale::Ko];

pub const DATASET_NAME: &str = "pikaybh/KoCEM";

pub static SUBJECTS: &[Subject] = &[
    Subject {
        name: "Architectural_Planning",
        abbreviation: "ap",
        description: "Architectural Planning",
        dev: Some(3),
        val: Some(41),
        test: Some(461),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Building_System",
        abbreviation: "bs",
        description: "Building System",
        dev: Some(5),
        val: Some(49),
        test: Some(367),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Comprehensive_Understanding",
        abbreviation: "cu",
        description: "Comprehensive Understanding",
        dev: Some(3),
        val: Some(157),
        test: Some(161),
        locales: EN_KO,
        has_difficulty: false,
        dimension: Some(Dimension::Reasoning),
    },
    Subject {
        name: "Construction_Management",
        abbreviation: "cm",
        description: "Construction Management",
        dev: Some(5),
        val: Some(34),
        test: Some(488),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Domain_Reasoning",
        abbreviation: "dr",
        description: "Domain Reasoning",
        dev: Some(3),
        val: Some(10),
        test: Some(255),
        locales: EN_KO,
        has_difficulty: false,
        dimension: Some(Dimension::Reasoning),
    },
    Subject {
        name: "Drawing_Interpretation",
        abbreviation: "di",
        description: "Drawing Interpretation",
        dev: Some(3),
        val: Some(9),
        test: Some(122),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::VisualInterpretation),
    },
    Subject {
        name: "Industry_Jargon",
        abbreviation: "ij",
        description: "Industry Jargon",
        dev: None,
        val: None,
        test: None,
        locales: EN_KO,
        has_difficulty: false,
        dimension: None,
    },
    Subject {
        name: "Interior",
        abbreviation: "int",
        description: "Interior",
        dev: Some(6),
        val: Some(46),
        test: Some(357),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Materials",
        abbreviation: "mat",
        description: "Materials",
        dev: Some(8),
        val: Some(43),
        test: Some(407),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Safety_Management",
        abbreviation: "sm",
        description: "Safety Management",
        dev: Some(4),
        val: Some(41),
        test: Some(376),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
    Subject {
        name: "Standard_Nomenclature",
        abbreviation: "sn",
        description: "Standard Nomenclature",
        dev: Some(5),
        val: Some(45),
        test: Some(450),
        locales: EN_KO,
        has_difficulty: false,
        dimension: Some(Dimension::Terminology),
    },
    Subject {
        name: "Structural_Engineering",
        abbreviation: "se",
        description: "Structural Engineering",
        dev: Some(2),
        val: Some(34),
        test: Some(342),
        locales: EN_KO,
        has_difficulty: true,
        dimension: Some(Dimension::DomainKnowledge),
    },
];

/// Subject whose fields are not localized
pub const UNLOCALIZED_SUBJECT: &str = "Standard_Nomenclature";

pub fn find(name: &str) -> Option<&'static Subject> {
    SUBJECTS.iter().find(|s| s.name == name)
}

pub fn all_names() -> Vec<String> {
    SUBJECTS.iter().map(|s| s.name.to_string()).collect()
}

pub fn dimension_of(subject: &str) -> Option<Dimension> {
    find(subject).and_then(|s| s.dimension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_subject() {
        let subject = find("Materials").unwrap();
        assert_eq!(subject.abbreviation, "mat");
        assert_eq!(subject.split_size(Split::Test), Some(407));
        assert!(find("Unknown_Subject").is_none());
    }

    #[test]
    fn test_industry_jargon_has_no_data() {
        let subject = find("Industry_Jargon").unwrap();
        for split in [Split::Dev, Split::Val, Split::Test, Split::Extra] {
            assert!(!subject.has_split(split));
        }
        assert_eq!(dimension_of("Industry_Jargon"), None);
    }

    #[test]
    fn test_subject_json_uses_display_dimension() {
        let value = serde_json::to_value(find("Interior").unwrap()).unwrap();
        assert_eq!(value["dimension"], "Domain Knowledge");
        assert_eq!(value["locales"][1], "ko");
        assert!(find("Interior").unwrap().supports(Locale::Ko));
    }

    #[test]
    fn test_every_subject_with_data_has_dimension() {
        for subject in SUBJECTS.iter().filter(|s| s.has_split(Split::Test)) {
            assert!(subject.dimension.is_some(), "{} lacks a dimension", subject.name);
        }
    }
}
