//! Path and URL helpers for repo-sync

use crate::error::{Error, Result};
use regex::Regex;
use url::Url;

/// Apply a regex-based rename operation with capture groups
///
/// The `pattern` is a regex that may contain capture groups.
/// The `replacement` is a string that can reference capture groups using $1, $2, etc.
///
/// Returns the new path if the pattern matches, None if it doesn't match.
pub fn regex_rename(pattern: &str, replacement: &str, path: &str) -> Result<Option<String>> {
    let regex = Regex::new(pattern).map_err(Error::Regex)?;
    let Some(captures) = regex.captures(path) else {
        return Ok(None);
    };

    // Expand $1, $2, etc. in the replacement string
    let mut result = String::new();
    let mut chars = replacement.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                chars.next(); // consume the digit
                if let Some(capture) = captures.get(digit as usize) {
                    result.push_str(capture.as_str());
                }
                continue;
            }
        }
        result.push(ch);
    }

    Ok(Some(result))
}

/// Encode a URL path to be filesystem-safe
///
/// This converts URL characters that are problematic for filesystems
/// into safe alternatives.
pub fn encode_url_path(url: &str) -> String {
    url.chars()
        .map(|c| match c {
            '/' => '-',
            '\\' => '-',
            ':' => '_',
            // Keep alphanumeric, dots, dashes, underscores as-is
            c if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            // Replace other characters with underscores
            _ => '_',
        })
        .collect()
}

/// Extract `(owner, repository)` from a repository location.
///
/// For remote URLs the first path segment is the owner and the rest is the
/// repository, so nested groups stay in the repository name. scp-like
/// locations (`git@host:owner/repo.git`) are supported. Local paths and
/// `file://` URLs use their last two segments. A trailing `.git` is dropped.
pub fn owner_and_repository(location: &str) -> Result<(String, String)> {
    let invalid = || Error::ConfigParse {
        message: format!("Cannot extract owner and repository from '{}'", location),
        hint: Some("Use a URL such as https://host/owner/repository.git".to_string()),
    };

    let segments: Vec<String> = match Url::parse(location) {
        Ok(url) if url.scheme() != "file" && url.has_host() => {
            let segments: Vec<String> = url
                .path_segments()
                .map(|s| s.filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default();
            if segments.len() < 2 {
                return Err(invalid());
            }
            let (owner, rest) = segments.split_at(1);
            vec![owner[0].clone(), rest.join("/")]
        }
        Ok(url) if url.scheme() == "file" => last_two(url.path()).ok_or_else(invalid)?,
        _ => match scp_path(location) {
            Some(path) => {
                let mut parts = path.splitn(2, '/');
                match (parts.next(), parts.next()) {
                    (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
                        vec![owner.to_string(), repo.to_string()]
                    }
                    _ => return Err(invalid()),
                }
            }
            None => last_two(location).ok_or_else(invalid)?,
        },
    };

    let owner = segments[0].clone();
    let repository = segments[1].trim_end_matches('/').trim_end_matches(".git").to_string();
    if owner.is_empty() || repository.is_empty() {
        return Err(invalid());
    }
    Ok((owner, repository))
}

fn scp_path(location: &str) -> Option<&str> {
    let (user_host, path) = location.split_once(':')?;
    if user_host.contains('/') || !user_host.contains('@') {
        return None;
    }
    Some(path.trim_start_matches('/'))
}

fn last_two(path: &str) -> Option<Vec<String>> {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [.., owner, repository] => Some(vec![owner.to_string(), repository.to_string()]),
        _ => None,
    }
}
