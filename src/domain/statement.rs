use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A single xAPI statement, kept as the exact JSON text it was submitted with.
///
/// The pipeline never looks inside a statement. Keeping the raw text means the
/// forensic copy written for a dropped batch is byte-identical to what the
/// producer submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Statement(Box<RawValue>);

impl Statement {
    /// Validates `json` and wraps it. Surrounding whitespace is trimmed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Box<RawValue>>(json).map(Self)
    }

    pub fn as_json(&self) -> &str {
        self.0.get()
    }

    /// Parses either a JSON array of statements or a single statement.
    pub fn parse_many(json: &str) -> Result<Vec<Self>, serde_json::Error> {
        if json.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<Self>>(json)
        } else {
            Self::from_json(json).map(|statement| vec![statement])
        }
    }
}

impl PartialEq for Statement {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

impl Eq for Statement {}

/// An ordered group of statements delivered in one request.
///
/// Always holds at least one statement; batches only come out of a
/// non-empty drain of the statement queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    statements: Vec<Statement>,
}

impl Batch {
    pub fn new(statements: Vec<Statement>) -> Option<Self> {
        if statements.is_empty() {
            None
        } else {
            Some(Self { statements })
        }
    }

    pub fn size(&self) -> usize {
        self.statements.len()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

/// Serializes statements as the JSON array sent to the LRS.
pub fn statements_to_json(statements: &[Statement]) -> Result<String, serde_json::Error> {
    serde_json::to_string(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATEMENT: &str = r#"{"actor":{"name":"Jim Beam","mbox":"mailto:jim.beam@example.com"},"verb":{"id":"https://adlnet.gov/expapi/verbs/experienced","display":{"en-US":"experienced"}},"object":{"id":"https://example.com/activities/watching-stars"}}"#;

    #[test]
    fn test_statement_keeps_original_bytes() {
        // key order would change if this went through serde_json::Value
        let json = r#"{"verb":"b","actor":"a"}"#;
        let statement = Statement::from_json(json).unwrap();
        assert_eq!(statement.as_json(), json);
    }

    #[test]
    fn test_statement_rejects_invalid_json() {
        assert!(Statement::from_json("{not json").is_err());
    }

    #[test]
    fn test_batch_json_embeds_statements_verbatim() {
        let statement = Statement::from_json(STATEMENT).unwrap();
        let batch = Batch::new(vec![statement.clone(), statement]).unwrap();

        let json = statements_to_json(batch.statements()).unwrap();
        assert_eq!(json, format!("[{STATEMENT},{STATEMENT}]"));
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(Batch::new(Vec::new()).is_none());
    }

    #[test]
    fn test_parse_many_accepts_array_or_single() {
        let many = Statement::parse_many(&format!("[{STATEMENT}, {STATEMENT}]")).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].as_json(), STATEMENT);

        let single = Statement::parse_many(STATEMENT).unwrap();
        assert_eq!(single.len(), 1);
    }
}
