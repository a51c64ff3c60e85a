use serde::{Deserialize, Serialize};
use std::fmt;

/// Request categories the router understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    StrategicAnalysis,
    SocialMedia,
    CampaignOptimization,
    ContentStrategy,
    DataAnalysis,
    GeneralInquiry,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::StrategicAnalysis,
        Intent::SocialMedia,
        Intent::CampaignOptimization,
        Intent::ContentStrategy,
        Intent::DataAnalysis,
        Intent::GeneralInquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::StrategicAnalysis => "strategic_analysis",
            Intent::SocialMedia => "social_media",
            Intent::CampaignOptimization => "campaign_optimization",
            Intent::ContentStrategy => "content_strategy",
            Intent::DataAnalysis => "data_analysis",
            Intent::GeneralInquiry => "general_inquiry",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword sets in priority order. The first matching set wins.
const KEYWORD_TABLE: &[(Intent, &[&str])] = &[
    (
        Intent::StrategicAnalysis,
        &[
            "استراتيجية",
            "تحليل سوق",
            "منافسين",
            "تموضع",
            "خطة",
            "strategy",
            "strategic",
            "market analysis",
            "competitor",
            "positioning",
        ],
    ),
    (
        Intent::SocialMedia,
        &[
            "سوشيال",
            "تواصل",
            "فيسبوك",
            "انستغرام",
            "تويتر",
            "لينكد",
            "social media",
            "facebook",
            "instagram",
            "twitter",
            "linkedin",
            "tiktok",
        ],
    ),
    (
        Intent::CampaignOptimization,
        &[
            "حملة",
            "إعلان",
            "تحسين",
            "roi",
            "ميزانية",
            "أداء",
            "campaign",
            "advertis",
            "budget",
            "optimiz",
            "performance",
        ],
    ),
    (
        Intent::ContentStrategy,
        &[
            "محتوى",
            "كتابة",
            "منشور",
            "مقال",
            "فيديو",
            "تقويم",
            "content",
            "copywriting",
            "blog post",
            "article",
            "video",
            "editorial calendar",
        ],
    ),
    (
        Intent::DataAnalysis,
        &[
            "بيانات",
            "تحليل",
            "إحصائيات",
            "أرقام",
            "تقرير",
            "رؤى",
            "data",
            "analytics",
            "statistics",
            "metrics",
            "report",
            "insight",
        ],
    ),
];

const ARTICLE_PREFIXES: [&str; 2] = ["وال", "ال"];

/// Keyword-based intent classifier.
///
/// Matching is a case-insensitive substring test against the lowercased
/// text and against a copy with Arabic definite articles removed from word
/// starts, so "تحليل السوق" matches the keyword "تحليل سوق".
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let normalized = strip_articles(&lowered);

        KEYWORD_TABLE
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|kw| lowered.contains(kw) || normalized.contains(kw))
            })
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::GeneralInquiry)
    }
}

fn strip_articles(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            ARTICLE_PREFIXES
                .iter()
                .find_map(|prefix| {
                    word.strip_prefix(prefix)
                        .filter(|rest| rest.chars().count() >= 2)
                })
                .unwrap_or(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_stripping() {
        assert_eq!(strip_articles("تحليل السوق والمنافسين"), "تحليل سوق منافسين");
        // Too short to be an article-prefixed word
        assert_eq!(strip_articles("الى"), "الى");
    }

    #[test]
    fn test_priority_order() {
        let classifier = IntentClassifier::new();
        // social outranks campaign
        assert_eq!(
            classifier.classify("حملة على فيسبوك"),
            Intent::SocialMedia
        );
        // strategic outranks data even though "تحليل" is a data keyword
        assert_eq!(
            classifier.classify("أريد تحليل السوق والمنافسين"),
            Intent::StrategicAnalysis
        );
    }

    #[test]
    fn test_case_insensitive() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("Improve our ROI"), Intent::CampaignOptimization);
        assert_eq!(classifier.classify("LinkedIn growth"), Intent::SocialMedia);
    }

    #[test]
    fn test_general_fallback() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify(""), Intent::GeneralInquiry);
        assert_eq!(classifier.classify("مرحبا"), Intent::GeneralInquiry);
    }

    #[test]
    fn test_intent_serialization() {
        let json = serde_json::to_string(&Intent::CampaignOptimization).unwrap();
        assert_eq!(json, "\"campaign_optimization\"");
        for intent in Intent::ALL {
            assert_eq!(
                serde_json::to_value(intent).unwrap(),
                serde_json::Value::String(intent.to_string())
            );
        }
    }
}
