use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::routes::AppState;

const INDEX_FILE: &str = "index.html";
const HTML: &str = "text/html; charset=utf-8";

pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    info!("loading initial page");
    let path = state.static_dir.join(INDEX_FILE);
    match read_file(&path).await {
        Ok(Some(body)) => ([(header::CONTENT_TYPE, HTML)], body).into_response(),
        Ok(None) => {
            debug!(path = %path.display(), "no index.html on disk; generating one");
            ([(header::CONTENT_TYPE, HTML)], render_index(&state.app_name)).into_response()
        }
        Err(err) => internal_error(&path, err),
    }
}

pub async fn resource(
    State(state): State<Arc<AppState>>,
    UrlPath(requested): UrlPath<String>,
) -> Response {
    let Some(path) = resolve(&state.static_dir, &requested) else {
        return not_found(&requested);
    };
    debug!(resource = %requested, "loading resource");
    match read_file(&path).await {
        Ok(Some(body)) => ([(header::CONTENT_TYPE, content_type(&path))], body).into_response(),
        Ok(None) => not_found(&requested),
        Err(err) => internal_error(&path, err),
    }
}

/// Reads a regular file, mapping absent files and directories to `None`.
async fn read_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => tokio::fs::read(path).await.map(Some),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Joins `requested` under `root`, refusing anything that would climb out of it.
fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(path)
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => HTML,
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn not_found(requested: &str) -> Response {
    warn!(resource = %requested, "resource not found");
    counter!("sandcastle_resources_not_found_total", 1);
    (StatusCode::NOT_FOUND, "resource not found").into_response()
}

fn internal_error(path: &Path, err: io::Error) -> Response {
    warn!(path = %path.display(), error = %err, "failed to read resource");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Page served when the static directory carries no `index.html`.
pub fn render_index(app_name: &str) -> String {
    let title = escape_html(app_name);
    format!(
        "<!doctype html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         <script type=\"text/javascript\" src=\"terminal/terminal.js\" data-endpoint=\"/ws\"></script>\n\
         </head>\n\
         <body>\n\
         <div id=\"loading\">loading {title}</div>\n\
         <noscript>Your web browser must have JavaScript enabled to run this application.</noscript>\n\
         </body>\n\
         </html>\n"
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn resolve_stays_under_root() {
        let root = Path::new("/srv/static");
        assert_eq!(
            resolve(root, "terminal/terminal.js"),
            Some(PathBuf::from("/srv/static/terminal/terminal.js"))
        );
        assert_eq!(
            resolve(root, "./css/app.css"),
            Some(PathBuf::from("/srv/static/css/app.css"))
        );
        assert_eq!(resolve(root, "../secret"), None);
        assert_eq!(resolve(root, "css/../../secret"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, ""), None);
    }

    #[test_timeout::timeout]
    fn content_type_follows_extension() {
        assert_eq!(content_type(Path::new("a/index.HTML")), HTML);
        assert_eq!(
            content_type(Path::new("terminal.js")),
            "text/javascript; charset=utf-8"
        );
        assert_eq!(content_type(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(
            content_type(Path::new("blob")),
            "application/octet-stream"
        );
    }

    #[test_timeout::timeout]
    fn generated_index_escapes_the_title() {
        let page = render_index("<Tom & Jerry>");
        assert!(page.starts_with("<!doctype html>"));
        assert!(page.contains("<title>&lt;Tom &amp; Jerry&gt;</title>"));
        assert!(page.contains("terminal/terminal.js"));
    }
}
