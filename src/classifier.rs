//! Query classification
//!
//! Decides, per request, whether a query is asking about refund status or is
//! a general tax question. Intentionally coarse: lowercase substring checks,
//! no tokenization, no stemming. Delivery mode (streamed vs buffered) is a
//! request attribute and never derived here.

/// Category assigned to an incoming query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    /// The user is asking about their refund status
    StatusInquiry,
    /// Any other tax question
    GeneralInquiry,
}

impl QueryCategory {
    /// Short tag used as a cache key component
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::StatusInquiry => "refund",
            Self::GeneralInquiry => "general",
        }
    }
}

/// Qualifier words that, together with the status subject, mark a status
/// inquiry ("what is MY refund STATUS", "CHECK my refund").
const STATUS_QUALIFIERS: [&str; 3] = ["status", "check", "my"];

/// Keyword classifier for incoming queries
///
/// A query is a [`QueryCategory::StatusInquiry`] iff its lowercased text
/// contains the status subject keyword and at least one qualifier word.
/// Everything else is a general inquiry; there is no ambiguous outcome.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    /// Lowercased subject keyword, "refund" unless configured otherwise
    subject: String,
}

impl QueryClassifier {
    /// Create a classifier for the given status subject keyword
    #[must_use]
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_lowercase(),
        }
    }

    /// Classify a query
    #[must_use]
    pub fn classify(&self, text: &str) -> QueryCategory {
        let lower = text.to_lowercase();
        if lower.contains(&self.subject)
            && STATUS_QUALIFIERS.iter().any(|q| lower.contains(q))
        {
            QueryCategory::StatusInquiry
        } else {
            QueryCategory::GeneralInquiry
        }
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new("refund")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_inquiry() {
        let classifier = QueryClassifier::default();
        assert_eq!(
            classifier.classify("What is my refund status?"),
            QueryCategory::StatusInquiry
        );
        assert_eq!(
            classifier.classify("check refund please"),
            QueryCategory::StatusInquiry
        );
        assert_eq!(
            classifier.classify("WHERE IS MY REFUND"),
            QueryCategory::StatusInquiry
        );
    }

    #[test]
    fn test_general_inquiry() {
        let classifier = QueryClassifier::default();
        assert_eq!(
            classifier.classify("How do I file taxes?"),
            QueryCategory::GeneralInquiry
        );
        // Subject without any qualifier stays general
        assert_eq!(
            classifier.classify("refund policy details"),
            QueryCategory::GeneralInquiry
        );
        // Qualifier without the subject stays general
        assert_eq!(
            classifier.classify("check my W-2"),
            QueryCategory::GeneralInquiry
        );
    }

    #[test]
    fn test_configured_subject() {
        let classifier = QueryClassifier::new("Rebate");
        assert_eq!(
            classifier.classify("what is the status of my rebate"),
            QueryCategory::StatusInquiry
        );
        assert_eq!(
            classifier.classify("what is my refund status"),
            QueryCategory::GeneralInquiry
        );
    }
}
