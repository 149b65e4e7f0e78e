//! Raw media upload endpoint.
//!
//! Accepts either multipart form fields (`slug`, `file`, `overwrite?`) or
//! a JSON body (`slug`, `filename`, `content_base64`, `overwrite?`). Both
//! shapes reduce to the same `upload_media` arguments before entering the
//! dispatch state machine, so the upload path is gated exactly like any
//! other invocation.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, Multipart, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;

use super::router::{auth_header, body_rejection};
use super::state::GatewayState;

#[derive(Debug, Deserialize)]
struct UploadJson {
    slug: String,
    filename: String,
    content_base64: String,
    #[serde(default)]
    overwrite: bool,
}

pub(super) async fn upload_handler(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let auth = auth_header(request.headers()).map(str::to_string);
    let content_type = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    let upload = if content_type.starts_with("multipart/form-data") {
        match read_multipart(request, state.upload_max_bytes).await {
            Ok(upload) => upload,
            Err(reply) => return reply.into_response(),
        }
    } else {
        match read_json(request, state.upload_max_bytes).await {
            Ok(upload) => upload,
            Err(reply) => return reply.into_response(),
        }
    };

    state
        .dispatcher
        .dispatch_invoke(
            client_addr.ip(),
            auth.as_deref(),
            "upload_media",
            json!({
                "slug": upload.slug,
                "filename": upload.filename,
                "content_base64": upload.content_base64,
                "overwrite": upload.overwrite,
            }),
        )
        .await
        .into_response()
}

async fn read_json(
    request: Request,
    max_bytes: usize,
) -> Result<UploadJson, crate::dispatch::DispatchReply> {
    let Json(body) = Json::<UploadJson>::from_request(request, &())
        .await
        .map_err(|rejection| body_rejection(rejection.body_text()))?;

    // Conservative decoded-size estimate; the store re-validates the
    // base64 content itself.
    if body.content_base64.len() / 4 * 3 > max_bytes {
        return Err(body_rejection(format!(
            "upload exceeds the {max_bytes} byte limit"
        )));
    }
    Ok(body)
}

async fn read_multipart(
    request: Request,
    max_bytes: usize,
) -> Result<UploadJson, crate::dispatch::DispatchReply> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| body_rejection(rejection.to_string()))?;

    let mut slug: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    let mut overwrite = false;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(body_rejection(err.to_string())),
        };
        match field.name() {
            Some("slug") => {
                slug = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| body_rejection(err.to_string()))?,
                );
            }
            Some("overwrite") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| body_rejection(err.to_string()))?;
                overwrite = text.trim().eq_ignore_ascii_case("true");
            }
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| body_rejection(err.to_string()))?;
                if bytes.len() > max_bytes {
                    return Err(body_rejection(format!(
                        "upload exceeds the {max_bytes} byte limit"
                    )));
                }
                content = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let slug = slug.ok_or_else(|| body_rejection("multipart field 'slug' is required".into()))?;
    let content =
        content.ok_or_else(|| body_rejection("multipart field 'file' is required".into()))?;
    let filename =
        filename.ok_or_else(|| body_rejection("uploaded file must carry a filename".into()))?;

    Ok(UploadJson {
        slug,
        filename,
        content_base64: BASE64.encode(content),
        overwrite,
    })
}
