//! Operation catalog.
//!
//! A static table mapping operation name to input schema, required
//! capability, and the confirmation flag for destructive operations.
//! Immutable after startup. Listings are a pure filter over the caller's
//! capability set: an operation whose capability the caller lacks is
//! omitted entirely, not merely blocked at call time.

use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{Capability, CapabilitySet};

pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required_capability: Option<Capability>,
    /// Destructive operations additionally require `confirm: true` in the
    /// arguments before the handler is invoked.
    pub confirm_required: bool,
    schema: fn() -> RootSchema,
}

impl OperationSpec {
    pub fn input_schema(&self) -> Value {
        serde_json::to_value((self.schema)()).unwrap_or(Value::Null)
    }
}

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "list_posts",
        description: "List posts, optionally filtered by tag",
        required_capability: Some(Capability::Read),
        confirm_required: false,
        schema: || schema_for!(ListPostsArgs),
    },
    OperationSpec {
        name: "get_post",
        description: "Fetch a single post by slug",
        required_capability: Some(Capability::Read),
        confirm_required: false,
        schema: || schema_for!(GetPostArgs),
    },
    OperationSpec {
        name: "create_post",
        description: "Create a new post",
        required_capability: Some(Capability::Write),
        confirm_required: false,
        schema: || schema_for!(CreatePostArgs),
    },
    OperationSpec {
        name: "update_post",
        description: "Update fields of an existing post",
        required_capability: Some(Capability::Write),
        confirm_required: false,
        schema: || schema_for!(UpdatePostArgs),
    },
    OperationSpec {
        name: "delete_post",
        description: "Delete a post and its translations",
        required_capability: Some(Capability::Delete),
        confirm_required: true,
        schema: || schema_for!(DeletePostArgs),
    },
    OperationSpec {
        name: "create_translation",
        description: "Attach a translation to an existing post",
        required_capability: Some(Capability::Write),
        confirm_required: false,
        schema: || schema_for!(CreateTranslationArgs),
    },
    OperationSpec {
        name: "upload_media",
        description: "Upload a media file for a post",
        required_capability: Some(Capability::Write),
        confirm_required: false,
        schema: || schema_for!(UploadMediaArgs),
    },
    OperationSpec {
        name: "delete_media",
        description: "Delete an uploaded media file",
        required_capability: Some(Capability::Delete),
        confirm_required: true,
        schema: || schema_for!(DeleteMediaArgs),
    },
    OperationSpec {
        name: "list_tags",
        description: "Aggregate tags across all posts",
        required_capability: Some(Capability::Read),
        confirm_required: false,
        schema: || schema_for!(ListTagsArgs),
    },
];

pub fn operations() -> &'static [OperationSpec] {
    OPERATIONS
}

pub fn find(name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS.iter().find(|op| op.name == name)
}

/// Catalog entry as rendered in a listing response.
#[derive(Debug, Serialize)]
pub struct ListedOperation {
    pub name: &'static str,
    pub description: &'static str,
    pub required_capability: Option<Capability>,
    pub confirm_required: bool,
    pub input_schema: Value,
}

/// The catalog visible to one caller: pure filter over its capabilities.
pub fn visible_for(capabilities: &CapabilitySet) -> Vec<ListedOperation> {
    OPERATIONS
        .iter()
        .filter(|op| match op.required_capability {
            Some(required) => capabilities.contains(required),
            None => true,
        })
        .map(|op| ListedOperation {
            name: op.name,
            description: op.description,
            required_capability: op.required_capability,
            confirm_required: op.confirm_required,
            input_schema: op.input_schema(),
        })
        .collect()
}

// Argument shapes. Unknown fields are rejected so a typo'd argument name
// surfaces as a validation error instead of being silently dropped.

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListPostsArgs {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetPostArgs {
    pub slug: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreatePostArgs {
    pub slug: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostArgs {
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub draft: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeletePostArgs {
    pub slug: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTranslationArgs {
    pub slug: String,
    pub language: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UploadMediaArgs {
    pub slug: String,
    pub filename: String,
    pub content_base64: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteMediaArgs {
    pub slug: String,
    pub filename: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListTagsArgs {}
