//! Content store collaborator.
//!
//! The gateway core only knows this trait: one handler per catalog
//! operation, validated arguments in, `{data | error}` out. Business
//! failures are values, never panics. The in-memory implementation backs
//! the binary and the tests; real storage mechanics live outside this
//! repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog::{
    CreatePostArgs, CreateTranslationArgs, DeleteMediaArgs, DeletePostArgs, GetPostArgs,
    ListPostsArgs, ListTagsArgs, UpdatePostArgs, UploadMediaArgs,
};
use crate::errors::GatewayError;

/// Handler-level failure. Business failures are structured; `Internal` is
/// the only kind that maps to an opaque 500.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<HandlerError> for GatewayError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::NotFound(what) => GatewayError::NotFound(what),
            HandlerError::Conflict(what) => GatewayError::Conflict(what),
            HandlerError::Invalid(what) => GatewayError::Validation(what),
            HandlerError::Internal(source) => GatewayError::internal(source),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_posts(&self, args: ListPostsArgs) -> HandlerResult;
    async fn get_post(&self, args: GetPostArgs) -> HandlerResult;
    async fn create_post(&self, args: CreatePostArgs) -> HandlerResult;
    async fn update_post(&self, args: UpdatePostArgs) -> HandlerResult;
    async fn delete_post(&self, args: DeletePostArgs) -> HandlerResult;
    async fn create_translation(&self, args: CreateTranslationArgs) -> HandlerResult;
    async fn upload_media(&self, args: UploadMediaArgs) -> HandlerResult;
    async fn delete_media(&self, args: DeleteMediaArgs) -> HandlerResult;
    async fn list_tags(&self, args: ListTagsArgs) -> HandlerResult;
}

#[derive(Clone, Debug, Serialize)]
struct Translation {
    title: String,
    content: String,
}

#[derive(Clone, Debug, Serialize)]
struct Post {
    slug: String,
    title: String,
    content: String,
    tags: Vec<String>,
    draft: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    translations: BTreeMap<String, Translation>,
}

#[derive(Default)]
pub struct MemoryContentStore {
    posts: RwLock<BTreeMap<String, Post>>,
    media: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_slug_component(kind: &str, value: &str) -> Result<(), HandlerError> {
    if value.is_empty() {
        return Err(HandlerError::Invalid(format!("{kind} must not be empty")));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(HandlerError::Invalid(format!(
            "{kind} must not contain path separators"
        )));
    }
    Ok(())
}

fn summary(post: &Post) -> Value {
    json!({
        "slug": post.slug,
        "title": post.title,
        "tags": post.tags,
        "draft": post.draft,
        "updated_at": post.updated_at,
        "languages": post.translations.keys().collect::<Vec<_>>(),
    })
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn list_posts(&self, args: ListPostsArgs) -> HandlerResult {
        let posts = self.posts.read();
        let filtered: Vec<&Post> = posts
            .values()
            .filter(|post| match &args.tag {
                Some(tag) => post.tags.iter().any(|t| t == tag),
                None => true,
            })
            .collect();
        let total = filtered.len();
        let offset = args.offset.unwrap_or(0) as usize;
        let limit = args.limit.unwrap_or(50) as usize;
        let page: Vec<Value> = filtered.into_iter().skip(offset).take(limit).map(summary).collect();
        Ok(json!({ "posts": page, "total": total }))
    }

    async fn get_post(&self, args: GetPostArgs) -> HandlerResult {
        let posts = self.posts.read();
        match posts.get(&args.slug) {
            Some(post) => Ok(serde_json::to_value(post).map_err(anyhow::Error::from)?),
            None => Err(HandlerError::NotFound(format!("post '{}'", args.slug))),
        }
    }

    async fn create_post(&self, args: CreatePostArgs) -> HandlerResult {
        check_slug_component("slug", &args.slug)?;
        let mut posts = self.posts.write();
        if posts.contains_key(&args.slug) {
            return Err(HandlerError::Conflict(format!(
                "post '{}' already exists",
                args.slug
            )));
        }
        let now = Utc::now();
        let post = Post {
            slug: args.slug.clone(),
            title: args.title,
            content: args.content,
            tags: args.tags,
            draft: args.draft,
            created_at: now,
            updated_at: now,
            translations: BTreeMap::new(),
        };
        posts.insert(args.slug.clone(), post);
        Ok(json!({ "slug": args.slug, "created": true }))
    }

    async fn update_post(&self, args: UpdatePostArgs) -> HandlerResult {
        let mut posts = self.posts.write();
        let post = posts
            .get_mut(&args.slug)
            .ok_or_else(|| HandlerError::NotFound(format!("post '{}'", args.slug)))?;
        if let Some(title) = args.title {
            post.title = title;
        }
        if let Some(content) = args.content {
            post.content = content;
        }
        if let Some(tags) = args.tags {
            post.tags = tags;
        }
        if let Some(draft) = args.draft {
            post.draft = draft;
        }
        post.updated_at = Utc::now();
        Ok(json!({ "slug": args.slug, "updated": true }))
    }

    async fn delete_post(&self, args: DeletePostArgs) -> HandlerResult {
        let mut posts = self.posts.write();
        if posts.remove(&args.slug).is_none() {
            return Err(HandlerError::NotFound(format!("post '{}'", args.slug)));
        }
        drop(posts);
        // Media belonging to the post goes with it.
        self.media.write().retain(|(slug, _), _| slug != &args.slug);
        Ok(json!({ "slug": args.slug, "deleted": true }))
    }

    async fn create_translation(&self, args: CreateTranslationArgs) -> HandlerResult {
        check_slug_component("language", &args.language)?;
        let mut posts = self.posts.write();
        let post = posts
            .get_mut(&args.slug)
            .ok_or_else(|| HandlerError::NotFound(format!("post '{}'", args.slug)))?;
        if post.translations.contains_key(&args.language) {
            return Err(HandlerError::Conflict(format!(
                "translation '{}' already exists for post '{}'",
                args.language, args.slug
            )));
        }
        post.translations.insert(
            args.language.clone(),
            Translation {
                title: args.title,
                content: args.content,
            },
        );
        post.updated_at = Utc::now();
        Ok(json!({ "slug": args.slug, "language": args.language, "created": true }))
    }

    async fn upload_media(&self, args: UploadMediaArgs) -> HandlerResult {
        check_slug_component("slug", &args.slug)?;
        check_slug_component("filename", &args.filename)?;
        let bytes = BASE64
            .decode(args.content_base64.as_bytes())
            .map_err(|err| HandlerError::Invalid(format!("content_base64 is not valid base64: {err}")))?;

        if !self.posts.read().contains_key(&args.slug) {
            return Err(HandlerError::NotFound(format!("post '{}'", args.slug)));
        }

        let key = (args.slug.clone(), args.filename.clone());
        let mut media = self.media.write();
        if media.contains_key(&key) && !args.overwrite {
            return Err(HandlerError::Conflict(format!(
                "media '{}' already exists for post '{}'",
                args.filename, args.slug
            )));
        }
        let size = bytes.len();
        media.insert(key, bytes);
        Ok(json!({
            "slug": args.slug,
            "filename": args.filename,
            "bytes": size,
            "path": format!("media/{}/{}", args.slug, args.filename),
        }))
    }

    async fn delete_media(&self, args: DeleteMediaArgs) -> HandlerResult {
        let key = (args.slug.clone(), args.filename.clone());
        if self.media.write().remove(&key).is_none() {
            return Err(HandlerError::NotFound(format!(
                "media '{}' for post '{}'",
                args.filename, args.slug
            )));
        }
        Ok(json!({ "slug": args.slug, "filename": args.filename, "deleted": true }))
    }

    async fn list_tags(&self, _args: ListTagsArgs) -> HandlerResult {
        let posts = self.posts.read();
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for post in posts.values() {
            for tag in &post.tags {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let tags: Vec<Value> = counts
            .into_iter()
            .map(|(tag, count)| json!({ "tag": tag, "count": count }))
            .collect();
        Ok(json!({ "tags": tags }))
    }
}
