//! Package identifier parsing and syntax checks

const NPM_MAX_LEN: usize = 214;

/// A GitHub repository reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

/// Parse `github:owner/repo`, `https://[www.]github.com/owner/repo[.git][/]`
/// or `git@github.com:owner/repo[.git]`
pub fn parse_repository(identifier: &str) -> Option<RepoRef> {
    let rest = if let Some(rest) = identifier.strip_prefix("github:") {
        rest
    } else if let Some(rest) = identifier.strip_prefix("git@github.com:") {
        rest
    } else {
        let without_scheme = identifier
            .strip_prefix("https://")
            .or_else(|| identifier.strip_prefix("http://"))?;
        without_scheme
            .strip_prefix("github.com/")
            .or_else(|| without_scheme.strip_prefix("www.github.com/"))?
    };

    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    let (owner, repo) = rest.split_once('/')?;
    if !is_github_name(owner) || !is_github_name(repo) {
        return None;
    }

    Some(RepoRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

fn is_github_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// `[@scope/]name`, lowercase URL-safe characters, at most 214 long
pub fn is_valid_npm_name(name: &str) -> bool {
    if name.is_empty() || name.len() > NPM_MAX_LEN {
        return false;
    }

    let bare = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, bare)) if is_npm_segment(scope) => bare,
            _ => return false,
        },
        None => name,
    };

    is_npm_segment(bare) && !bare.starts_with('.') && !bare.starts_with('_')
}

fn is_npm_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
        })
}

/// PEP 508 project name: alphanumeric at both ends, `._-` allowed inside
pub fn is_valid_python_name(name: &str) -> bool {
    let starts_and_ends_alnum = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    starts_and_ends_alnum
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
