//! # Path resolver
//!
//! Absolute paths only. A parsed path is a token list whose first element is
//! always the root marker `/`.

use crate::dir;
use crate::{Error, Ext2FileSystem, FileType, InodeId, Result, NAME_MAX};

pub const ROOT_TOKEN: &str = "/";

/// Splits an absolute path into `["/", component, ...]`, collapsing repeated
/// and trailing separators.
pub fn parse_path(path: &str) -> Result<Vec<&str>> {
    let rest = path.strip_prefix('/').ok_or(Error::InvalidPath)?;
    let mut tokens = vec![ROOT_TOKEN];
    for component in rest.split('/').filter(|component| !component.is_empty()) {
        if component.len() > NAME_MAX {
            return Err(Error::InvalidPath);
        }
        tokens.push(component);
    }
    Ok(tokens)
}

/// Walks the first `depth` components after the root, each of which must be a
/// directory listed in the direct blocks of its parent.
pub fn trace_path(efs: &Ext2FileSystem, tokens: &[&str], depth: usize) -> Result<InodeId> {
    if depth >= tokens.len() {
        return Err(Error::InvalidPath);
    }
    tokens[1..=depth].iter().try_fold(InodeId::ROOT, |parent, name| {
        match dir::find_in_inode(efs, parent, name, FileType::Directory) {
            Err(Error::WrongType) => Err(Error::NotFound),
            found => found,
        }
    })
}

/// Number of components leading to the parent of the last one, and the last
/// one itself. The bare root has no parent.
pub fn split_parent<'p>(tokens: &[&'p str]) -> Result<(usize, &'p str)> {
    match tokens {
        [_, .., name] => Ok((tokens.len() - 2, *name)),
        _ => Err(Error::InvalidPath),
    }
}

/// Resolves the directory that holds the last component of `path`.
pub fn resolve_parent<'p>(efs: &Ext2FileSystem, path: &'p str) -> Result<(InodeId, &'p str)> {
    let tokens = parse_path(path)?;
    let (depth, name) = split_parent(&tokens)?;
    Ok((trace_path(efs, &tokens, depth)?, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_and_repeated_separators() {
        let expected = ["/", "a", "b", "c"];
        assert_eq!(parse_path("/a/b/c").unwrap(), expected);
        assert_eq!(parse_path("/a/b/c/").unwrap(), expected);
        assert_eq!(parse_path("//a///b/c//").unwrap(), expected);
        assert_eq!(parse_path("/").unwrap(), ["/"]);
    }

    #[test]
    fn relative_or_empty_path() {
        assert!(matches!(parse_path("a/b"), Err(Error::InvalidPath)));
        assert!(matches!(parse_path(""), Err(Error::InvalidPath)));
    }

    #[test]
    fn component_length_limit() {
        let longest = format!("/{}", "x".repeat(255));
        assert_eq!(parse_path(&longest).unwrap().len(), 2);
        let too_long = format!("/a/{}/b", "x".repeat(256));
        assert!(matches!(parse_path(&too_long), Err(Error::InvalidPath)));
    }

    #[test]
    fn parent_split() {
        assert_eq!(split_parent(&["/", "a", "b"]).unwrap(), (1, "b"));
        assert_eq!(split_parent(&["/", "a"]).unwrap(), (0, "a"));
        assert!(matches!(split_parent(&["/"]), Err(Error::InvalidPath)));
    }
}
