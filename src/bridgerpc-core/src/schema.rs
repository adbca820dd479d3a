use schemars::Schema;
use serde::Serialize;
use std::collections::BTreeMap;

/// Catalogue of the methods a server exposes.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSchema {
    pub methods: BTreeMap<String, MethodSchema>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodSchema {
    pub shape: ReplyShape,
    pub params: Schema,
    /// Schema of the value, or of each stream item. Absent for dynamic replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Schema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyShape {
    Value,
    Stream,
    Dynamic,
}
