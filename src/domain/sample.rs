/// Text extracted from one page, ready to be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub domain: String,
    pub title: String,
    pub snippet: String,
}

impl Sample {
    pub fn new(
        domain: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            title: title.into(),
            snippet: snippet.into(),
        }
    }
}
