use serde::{Deserialize, Serialize};

/// Primary key of a register key row.
pub type KeyId = i64;

/// Primary key of a register row.
pub type RegisterId = i64;

/// The external systems a record mutation is propagated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterhandlerType {
    /// Immutable ledger anchoring a hash per record.
    Blockchain,
    /// Search index holding one document per record.
    Elastic,
    /// Public link / QR issuance service.
    Plink,
}

impl AfterhandlerType {
    pub const ALL: [AfterhandlerType; 3] = [Self::Blockchain, Self::Elastic, Self::Plink];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blockchain => "blockchain",
            Self::Elastic => "elastic",
            Self::Plink => "plink",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "blockchain" => Some(Self::Blockchain),
            "elastic" => Some(Self::Elastic),
            "plink" => Some(Self::Plink),
            _ => None,
        }
    }
}

impl std::fmt::Display for AfterhandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of mutation a record goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOperation {
    Create,
    Update,
    Delete,
    Reindex,
}

impl RecordOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reindex => "reindex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "reindex" => Some(Self::Reindex),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
