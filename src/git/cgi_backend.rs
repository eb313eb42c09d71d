use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{error, warn};

use crate::error::CoreError;

use super::{BackendResponse, GitBackend, GitRequestContext};

/// Delegates to the real `git http-backend` CGI binary. This crate
/// never touches git's object format itself — pack negotiation and
/// storage are git's job; this only wires up the CGI environment and
/// translates its stdout back into an HTTP response (adapted from the
/// project's earlier ShareLatex bridge, `git_http.rs`).
#[derive(Debug, Clone, Default)]
pub struct CgiGitBackend;

impl GitBackend for CgiGitBackend {
    fn handle(
        &self,
        project_root: &Path,
        ctx: &GitRequestContext,
    ) -> Result<BackendResponse, CoreError> {
        let mut cmd = Command::new("git");
        cmd.arg("http-backend")
            .env("GIT_PROJECT_ROOT", project_root)
            .env("GIT_HTTP_EXPORT_ALL", "1")
            .env("PATH_INFO", &ctx.path_info)
            .env("REQUEST_METHOD", ctx.method.as_str())
            .env("QUERY_STRING", ctx.query.as_deref().unwrap_or(""))
            .env("CONTENT_TYPE", ctx.content_type.as_deref().unwrap_or(""))
            .env(
                "CONTENT_LENGTH",
                ctx.content_length
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            )
            .env("REMOTE_USER", &ctx.remote_user)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::Internal(format!("spawning git http-backend: {e}")))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(&ctx.body)
                .map_err(|e| CoreError::Internal(format!("writing to git http-backend: {e}")))?;
        }
        drop(child.stdin.take());

        let mut stdout_buf = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_end(&mut stdout_buf)
                .map_err(|e| CoreError::Internal(format!("reading git http-backend: {e}")))?;
        }

        let mut stderr_buf = Vec::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_end(&mut stderr_buf);
        }
        if !stderr_buf.is_empty() {
            warn!(
                "git http-backend stderr: {}",
                String::from_utf8_lossy(&stderr_buf)
            );
        }

        let status = child
            .wait()
            .map_err(|e| CoreError::Internal(format!("waiting for git http-backend: {e}")))?;
        if !status.success() {
            error!("git http-backend exited with {status:?}");
            return Err(CoreError::Internal(format!(
                "git http-backend failed with {status:?}"
            )));
        }

        parse_cgi_response(stdout_buf)
    }

    fn ensure_repo(&self, repo_path: &Path) -> Result<(), CoreError> {
        if repo_path.join("HEAD").exists() {
            return Ok(());
        }
        std::fs::create_dir_all(repo_path)
            .map_err(|e| CoreError::Internal(format!("creating repo directory: {e}")))?;
        let status = Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg(repo_path)
            .status()
            .map_err(|e| CoreError::Internal(format!("spawning git init: {e}")))?;
        if !status.success() {
            return Err(CoreError::Internal(format!(
                "git init --bare failed with {status:?}"
            )));
        }
        Ok(())
    }
}

fn parse_cgi_response(mut all: Vec<u8>) -> Result<BackendResponse, CoreError> {
    let split_seq = b"\r\n\r\n";
    let split_alt = b"\n\n";

    let (header_end_idx, body_start_idx) = if let Some(idx) = find_subslice(&all, split_seq) {
        (idx, idx + split_seq.len())
    } else if let Some(idx) = find_subslice(&all, split_alt) {
        (idx, idx + split_alt.len())
    } else {
        return Err(CoreError::Internal(
            "git http-backend output missing header delimiter".to_string(),
        ));
    };

    let body = all.split_off(body_start_idx);
    all.truncate(header_end_idx);
    let header_text = String::from_utf8(all)
        .map_err(|e| CoreError::Internal(format!("non-utf8 CGI headers: {e}")))?;

    let mut status_code = StatusCode::OK;
    let mut headers = HeaderMap::new();

    for line in header_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Status") {
            if let Some(code_str) = value.split_whitespace().next() {
                if let Ok(code_u16) = code_str.parse::<u16>() {
                    if let Ok(sc) = StatusCode::from_u16(code_u16) {
                        status_code = sc;
                    }
                }
            }
            continue;
        }

        let Ok(header_name) = axum::http::HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(header_val) = HeaderValue::from_str(value) else {
            continue;
        };
        headers.append(header_name, header_val);
    }

    Ok(BackendResponse {
        status: status_code,
        headers,
        body,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
